use crate::{IndexError, Result};
use std::collections::HashMap;
use std::io::{BufRead, Write};

/// One cached record pair, kept as raw lines so a hit re-emits the
/// exact bytes of the previous run.
#[derive(Debug, Clone)]
pub struct Entry {
    pub mtime: i64,
    pub file: String,
    pub meta: String,
}

/// Cache of previously produced records, keyed by identity digest.
/// Populated once at startup, read-only afterwards.
#[derive(Debug, Default)]
pub struct Delta {
    entries: HashMap<Vec<u8>, Entry>,
}

// Position of the identity hash and the modification time in the
// file: line of the normal output layout.
const FIELD_IDENT: usize = 9;
const FIELD_MTIME: usize = 17;
const MIN_FIELDS: usize = 18;

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Load one delta file. Input is repeated `file:`/`meta:` line
    /// pairs; anything else is a fatal parse error. When the same
    /// identity appears again, the entry with the greatest mtime wins
    /// and ties keep the first seen.
    pub fn load<R: BufRead>(&mut self, r: R) -> Result<()> {
        let mut lines = r.lines();
        while let Some(fline) = lines.next() {
            let fline = fline?;
            let payload = fline.strip_prefix("file:").ok_or_else(|| IndexError::Delta {
                line: fline.clone(),
                reason: "invalid file line".into(),
            })?;
            let fields = parse_csv_line(payload, &fline)?;
            if fields.len() < MIN_FIELDS {
                return Err(IndexError::Delta {
                    line: fline.clone(),
                    reason: format!("expected at least {} fields, got {}", MIN_FIELDS, fields.len()),
                });
            }
            let hash = hex::decode(&fields[FIELD_IDENT]).map_err(|e| IndexError::Delta {
                line: fline.clone(),
                reason: format!("bad identity hash: {}", e),
            })?;
            let mtime: i64 = fields[FIELD_MTIME].parse().map_err(|e| IndexError::Delta {
                line: fline.clone(),
                reason: format!("cannot parse modification time: {}", e),
            })?;
            let mline = match lines.next() {
                Some(l) => l?,
                None => {
                    return Err(IndexError::Delta {
                        line: fline.clone(),
                        reason: "expected a meta: line, got end of input".into(),
                    })
                }
            };
            if !mline.starts_with("meta:") {
                return Err(IndexError::Delta {
                    line: mline.clone(),
                    reason: "invalid meta line".into(),
                });
            }
            // Keep the newest entry for this identity.
            if let Some(existing) = self.entries.get(hash.as_slice()) {
                if existing.mtime >= mtime {
                    continue;
                }
            }
            self.entries.insert(
                hash,
                Entry {
                    mtime,
                    file: fline,
                    meta: mline,
                },
            );
        }
        Ok(())
    }

    /// Cached lines for `ident`, only when the modification time still
    /// matches. A hit means the file is skipped entirely.
    pub fn lookup(&self, ident: &[u8], mtime: i64) -> Option<&Entry> {
        self.entries
            .get(ident)
            .filter(|entry| entry.mtime == mtime)
    }

    /// Re-emit the merged cache as a normal mode stream.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        for entry in self.entries.values() {
            writeln!(w, "{}\n{}", entry.file, entry.meta)?;
        }
        Ok(())
    }
}

/// Parse one quoted CSV line from the normal layout. The format
/// escapes embedded quotes as `\"`, so the reader is configured for
/// backslash escapes instead of doubled quotes.
fn parse_csv_line(payload: &str, context: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .double_quote(false)
        .escape(Some(b'\\'))
        .from_reader(payload.as_bytes());
    match reader.records().next() {
        Some(rec) => Ok(rec?.iter().map(|f| f.to_string()).collect()),
        None => Err(IndexError::Delta {
            line: context.to_string(),
            reason: "empty record".into(),
        }),
    }
}
