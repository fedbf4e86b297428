use std::io::{Read, Seek, SeekFrom};
use tracing::warn;

/// MIME type forced onto zero-byte files, before any lookup runs.
pub const MIME_EMPTY: &str = "inode/x-empty";

/// Extensions whose MIME type must not depend on the host database.
/// Mostly office, archive and media formats the database gets wrong or
/// reports inconsistently across systems.
const KNOWN_MIME: &[(&str, &str)] = &[
    ("xls", "application/vnd.ms-excel"),
    ("doc", "application/msword"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("pps", "application/vnd.ms-powerpoint"),
    ("ppt", "application/vnd.ms-powerpoint"),
    ("pptm", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
    ("ods", "application/vnd.oasis.opendocument.spreadsheet"),
    ("odt", "application/vnd.oasis.opendocument.text"),
    ("pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("xlsm", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("docm", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("7z", "application/x-7z-compressed"),
    ("exe", "application/x-dosexec"),
    ("mm", "application/x-freemind"),
    ("mdb", "application/x-msaccess"),
    ("rar", "application/x-rar"),
    ("swf", "application/x-shockwave-flash"),
    ("xml", "application/xml"),
    ("wav", "audio/x-wav"),
    ("tif", "image/tiff"),
    ("bmp", "image/x-ms-bmp"),
    ("rtf", "text/rtf"),
    ("mp4", "video/mp4"),
    ("mpg", "video/mpeg"),
    ("mov", "video/quicktime"),
    ("flv", "video/x-flv"),
    ("wmv", "video/x-ms-asf"),
    ("avi", "video/x-msvideo"),
    ("htaccess", "text/plain"),
];

/// Resolve a MIME type from a file extension: the override table wins,
/// then the extension database. Returns an empty string on a full miss,
/// which tells the caller to sniff the content instead.
pub fn guess_mime(ext: &str) -> String {
    let ext = ext.to_lowercase();
    if let Some((_, m)) = KNOWN_MIME.iter().find(|(e, _)| *e == ext) {
        return (*m).to_string();
    }
    mime_guess::from_ext(&ext)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_default()
}

/// Sniff the MIME type from the first 255 bytes of content. Any
/// `"; ..."` parameter suffix is stripped. Returns an empty string when
/// the file cannot be read at all.
pub fn sniff_mime<R: Read + Seek>(name: &str, r: &mut R) -> String {
    if let Err(e) = r.seek(SeekFrom::Start(0)) {
        warn!("{}: Seek: {}", name, e);
        return String::new();
    }
    let mut buf = [0u8; 255];
    let mut n = 0;
    while n < buf.len() {
        match r.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(read) => n += read,
            Err(e) => {
                if n == 0 {
                    warn!("{}: Read: {}", name, e);
                    return String::new();
                }
                break;
            }
        }
    }
    let mut mime = detect_content_type(&buf[..n]);
    if let Some(idx) = mime.find("; ") {
        mime.truncate(idx);
    }
    mime
}

/// Magic-byte detection with a textual fallback: anything that is not a
/// known binary signature but decodes as control-free UTF-8 is plain
/// text, everything else is an opaque octet stream.
fn detect_content_type(buf: &[u8]) -> String {
    if let Some(kind) = infer::get(buf) {
        return kind.mime_type().to_string();
    }
    if looks_textual(buf) {
        return "text/plain; charset=utf-8".to_string();
    }
    "application/octet-stream".to_string()
}

fn looks_textual(buf: &[u8]) -> bool {
    // The window may end mid-codepoint; ignore the truncated tail.
    let text = match std::str::from_utf8(buf) {
        Ok(s) => s,
        Err(e) if e.error_len().is_none() => {
            std::str::from_utf8(&buf[..e.valid_up_to()]).unwrap_or("")
        }
        Err(_) => return false,
    };
    !text
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\r' && c != '\t')
}

/// Map a MIME type onto the small integer the file table stores.
pub fn map_type(mime: &str) -> u8 {
    let top = match mime.find('/') {
        Some(n) => &mime[..n],
        None => mime,
    };
    match top {
        "text" => 1,
        "image" => 2,
        "audio" => 3,
        "video" => 4,
        "application" => 5,
        _ => 0,
    }
}

/// Extension of a logical path: everything after the final dot of the
/// basename, lowercased, without the dot. Empty when there is none.
/// Dotfiles like `.htaccess` count as all-extension so the override
/// table can match them.
pub fn file_ext(fname: &str) -> String {
    let base = match fname.rfind('/') {
        Some(n) => &fname[n + 1..],
        None => fname,
    };
    match base.rfind('.') {
        Some(n) => base[n + 1..].to_lowercase(),
        None => String::new(),
    }
}
