use crate::config::Mode;
use crate::record::Record;
use crate::writer::Writer;
use crate::{IndexError, Result};
use std::io::BufRead;

// Merged-record positions: the file line contributes fields 0..18, the
// meta line follows, putting the image dimensions at 38 and 39.
const FIELD_CTIME: usize = 2;
const FIELD_FTYPE: usize = 6;
const FIELD_FNAME: usize = 8;
const FIELD_IDENT: usize = 9;
const FIELD_DIDENT: usize = 10;
const FIELD_EXT: usize = 11;
const FIELD_MIME: usize = 12;
const FIELD_BNAME: usize = 13;
const FIELD_CHASH: usize = 14;
const FIELD_SIZE: usize = 15;
const FIELD_WIDTH: usize = 38;
const FIELD_HEIGHT: usize = 39;

/// Rewrite a normal mode stream as SQL INSERT pairs. Each
/// `file:`/`meta:` pair is merged into one CSV record, rebuilt as a
/// [`Record`] and re-marshaled; the writer substitutes the UID tokens.
pub fn load_csv<R: BufRead>(input: R, writer: &Writer) -> Result<()> {
    let mut buf = String::new();
    let mut lines = input.lines();
    while let Some(fline) = lines.next() {
        let fline = fline?;
        let fpayload = fline
            .strip_prefix("file:")
            .ok_or_else(|| IndexError::Rewrite(format!("invalid line, file: expected: {}", fline)))?;
        let mline = lines
            .next()
            .transpose()?
            .ok_or_else(|| IndexError::Rewrite("expected a meta: line, got end of input".into()))?;
        let mpayload = mline
            .strip_prefix("meta:")
            .ok_or_else(|| IndexError::Rewrite(format!("invalid line, meta: expected: {}", mline)))?;

        let merged = format!("{},{}", fpayload, mpayload);
        let fields = parse_merged(&merged)?;
        let record = record_from_fields(&fields)?;
        writer.write(record.marshal(Mode::Sql, &mut buf));
    }
    Ok(())
}

fn parse_merged(merged: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .double_quote(false)
        .escape(Some(b'\\'))
        .from_reader(merged.as_bytes());
    match reader.records().next() {
        Some(rec) => Ok(rec?.iter().map(|f| f.to_string()).collect()),
        None => Err(IndexError::Rewrite(format!("empty record: {}", merged))),
    }
}

fn record_from_fields(fields: &[String]) -> Result<Record> {
    if fields.len() <= FIELD_HEIGHT {
        return Err(IndexError::Rewrite(format!(
            "expected at least {} fields, got {}",
            FIELD_HEIGHT + 1,
            fields.len()
        )));
    }
    let int = |idx: usize| -> Result<i64> {
        fields[idx]
            .parse()
            .map_err(|e| IndexError::Rewrite(format!("field {}: {}", idx, e)))
    };
    let hash = |idx: usize| -> Result<Box<[u8]>> {
        hex::decode(&fields[idx])
            .map(Vec::into_boxed_slice)
            .map_err(|e| IndexError::Rewrite(format!("parsing {}: {}", fields[idx], e)))
    };
    // The stream's tstamp stands in for both timestamps, as the
    // database loader expects.
    let ctime = int(FIELD_CTIME)?;
    Ok(Record {
        fname: fields[FIELD_FNAME].clone(),
        bname: fields[FIELD_BNAME].clone(),
        ext: fields[FIELD_EXT].clone(),
        dir: dir_of(&fields[FIELD_FNAME]),
        mime: fields[FIELD_MIME].clone(),
        ident: hash(FIELD_IDENT)?,
        dident: hash(FIELD_DIDENT)?,
        chash: hash(FIELD_CHASH)?,
        isize: (int(FIELD_WIDTH)? as u32, int(FIELD_HEIGHT)? as u32),
        size: int(FIELD_SIZE)? as u64,
        ftype: int(FIELD_FTYPE)? as u8,
        modtime: ctime,
        ctime,
        ..Record::default()
    })
}

fn dir_of(fname: &str) -> String {
    match fname.rfind('/') {
        Some(0) => "/".to_string(),
        Some(n) => fname[..n].to_string(),
        None => ".".to_string(),
    }
}
