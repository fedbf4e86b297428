use crate::config::Mode;
use crate::hash::{to_hex, Digest, Hasher};
use crate::indexer::FileMeta;
use crate::mime;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Metadata to save about a file.
///
/// A record is built in two phases: [`Record::new`] fills the fields
/// derived from the path and stat alone, [`Record::load`] fills the
/// fields that need the file contents. UIDs stay zero (rendered as the
/// literal `UID` token) until the writer or the split rewriter assigns
/// real numbers.
#[derive(Debug, Clone, Default)]
pub struct Record {
    /// Surrogate id, or zero for unassigned.
    pub uid: u64,
    /// Surrogate id of the metadata row, or zero for unassigned.
    pub meta_uid: u64,
    /// Digest of the logical path.
    pub ident: Digest,
    /// Digest of the containing directory string.
    pub dident: Digest,
    /// Digest of the file contents.
    pub chash: Digest,
    /// Logical path (root stripped, slash separated).
    pub fname: String,
    /// Basename.
    pub bname: String,
    /// Extension, lowercase, without the dot.
    pub ext: String,
    /// Containing directory string.
    pub dir: String,
    /// Resolved MIME type.
    pub mime: String,
    /// Small integer for the MIME top-level type.
    pub ftype: u8,
    /// File size in bytes.
    pub size: u64,
    /// Image width and height, zero for non-images.
    pub isize: (u32, u32),
    /// Modification time, Unix seconds.
    pub modtime: i64,
    /// Creation time of this record, Unix seconds.
    pub ctime: i64,
}

/// Directory part of a slash-separated logical path.
fn path_dir(p: &str) -> String {
    match p.rfind('/') {
        Some(0) => "/".to_string(),
        Some(n) => p[..n].to_string(),
        None => ".".to_string(),
    }
}

/// Basename part of a slash-separated logical path.
fn path_base(p: &str) -> String {
    match p.rfind('/') {
        Some(n) => p[n + 1..].to_string(),
        None => p.to_string(),
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn escape(s: &str) -> String {
    s.replace('"', "\\\"")
}

impl Record {
    /// Fast fields only: everything derivable from the walk entry
    /// without opening the file. The identity digest computed here is
    /// what the delta cache is keyed on.
    pub fn new(hasher: &mut Hasher, fm: &FileMeta) -> Self {
        let fname = fm.logical.clone();
        Record {
            ident: hasher.str_digest(&fname),
            dident: hasher.zero(),
            chash: hasher.zero(),
            bname: path_base(&fname),
            ext: mime::file_ext(&fname),
            dir: path_dir(&fname),
            size: fm.size,
            modtime: fm.modtime,
            ctime: now_unix(),
            fname,
            ..Record::default()
        }
    }

    /// Slow fields: MIME resolution, content hash, directory hash and
    /// image dimensions. Every failure is logged and leaves the
    /// affected fields zeroed; the record is still emitted.
    pub fn load(&mut self, hasher: &mut Hasher, path: &Path) {
        if self.size == 0 {
            self.mime = mime::MIME_EMPTY.to_string();
        } else {
            self.mime = mime::guess_mime(&self.ext);
        }
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!("{}: Open: {}", self.fname, e);
                self.ftype = mime::map_type(&self.mime);
                self.dident = hasher.str_digest(&self.dir);
                return;
            }
        };
        // No extension match: detect the MIME type from the contents.
        if self.mime.is_empty() {
            self.mime = mime::sniff_mime(&self.fname, &mut file);
        }
        self.ftype = mime::map_type(&self.mime);
        if let Err(e) = file.seek(SeekFrom::Start(0)) {
            warn!("{}: Seek: {}", self.fname, e);
            self.dident = hasher.str_digest(&self.dir);
            return;
        }
        match hasher.reader_digest(&mut file) {
            Ok(d) => self.chash = d,
            Err(e) => warn!("{}: Hash: {}", self.fname, e),
        }
        self.dident = hasher.str_digest(&self.dir);
        // Non-images are completely processed at this point.
        if !self.mime.starts_with("image/") {
            return;
        }
        if let Err(e) = file.seek(SeekFrom::Start(0)) {
            warn!("{}: Seek: {}", self.fname, e);
            return;
        }
        match imagesize::reader_size(std::io::BufReader::new(&mut file)) {
            Ok(dim) => self.isize = (dim.width as u32, dim.height as u32),
            Err(e) => warn!("{}: Image decoder: {}", self.fname, e),
        }
    }

    /// Render the record in the given mode, reusing `buf` as scratch
    /// space. Returns the owned text handed to the writer.
    pub fn marshal(&self, mode: Mode, buf: &mut String) -> String {
        buf.clear();
        match mode {
            Mode::Single => self.write_single(buf),
            Mode::Sql => self.write_sql(buf),
            Mode::Normal => self.write_normal(buf),
        }
        buf.clone()
    }

    fn uid_token(v: u64) -> String {
        if v != 0 {
            v.to_string()
        } else {
            "UID".to_string()
        }
    }

    // One condensed line per file, for diffing against a reference tool.
    fn write_single(&self, buf: &mut String) {
        let _ = write!(
            buf,
            "\"0\",\"0\",\"1\",\"{ftype}\",\"0\",\"{fname}\",\"{ident}\",\"{dident}\",\"{ext}\",\"{mime}\",\"{bname}\",\"{chash}\",\"{size}\",\"{w}\",\"{h}\"\n",
            ftype = self.ftype,
            fname = escape(&self.fname),
            ident = to_hex(&self.ident),
            dident = to_hex(&self.dident),
            ext = self.ext,
            mime = self.mime,
            bname = escape(&self.bname),
            chash = to_hex(&self.chash),
            size = self.size,
            w = self.isize.0,
            h = self.isize.1,
        );
    }

    fn write_sql(&self, buf: &mut String) {
        let _ = write!(
            buf,
            "INSERT INTO sys_file (uid, pid, tstamp, last_indexed, missing, storage, type, metadata,\n\tidentifier, identifier_hash, folder_hash, extension, mime_type, name, sha1, size, creation_date, modification_date) VALUES\n(\"UID\",\"0\",\"{ctime}\",\"0\",\"0\",\"1\",\"{ftype}\",\"0\",\"{fname}\",\"{ident}\",\"{dident}\",\"{ext}\",\"{mime}\",\"{bname}\",\"{chash}\",\"{size}\",\"{ctime}\",\"{mtime}\");\n",
            ctime = self.ctime,
            ftype = self.ftype,
            fname = escape(&self.fname),
            ident = to_hex(&self.ident),
            dident = to_hex(&self.dident),
            ext = self.ext,
            mime = self.mime,
            bname = escape(&self.bname),
            chash = to_hex(&self.chash),
            size = self.size,
            mtime = self.modtime,
        );
        let _ = write!(
            buf,
            "INSERT INTO sys_file_metadata (tstamp, crdate, file, width, height) VALUES\n(\"{mtime}\",\"{ctime}\",\"UID\",\"{w}\",\"{h}\");\n",
            mtime = self.modtime,
            ctime = self.ctime,
            w = self.isize.0,
            h = self.isize.1,
        );
    }

    // The prefixed double-line layout consumed by the delta cache and
    // the split rewriter. Field order and padding match the database
    // loader byte for byte.
    fn write_normal(&self, buf: &mut String) {
        let uid = Self::uid_token(self.uid);
        let meta_uid = Self::uid_token(self.meta_uid);
        let _ = write!(
            buf,
            "file:\"{uid}\",\"0\",\"{ctime}\",\"0\",\"0\",\"1\",\"{ftype}\",\"0\",\"{fname}\",\"{ident}\",\"{dident}\",\"{ext}\",\"{mime}\",\"{bname}\",\"{chash}\",\"{size}\",\"{ctime}\",\"{mtime}\"\n",
            uid = uid,
            ctime = self.ctime,
            ftype = self.ftype,
            fname = escape(&self.fname),
            ident = to_hex(&self.ident),
            dident = to_hex(&self.dident),
            ext = self.ext,
            mime = self.mime,
            bname = escape(&self.bname),
            chash = to_hex(&self.chash),
            size = self.size,
            mtime = self.modtime,
        );
        let _ = write!(
            buf,
            "meta:\"{meta_uid}\",\"0\",\"{mtime}\",\"{ctime}\",\"0\",\"0\",\"0\",\"\",\"0\",\"0\",\"0\",\"\",\"0\",\"0\",\"0\",\"0\",\"0\",\"0\",\"{uid}\",\"\",\"{w}\",\"{h}\",\"\",\"\",\"0\"\n",
            meta_uid = meta_uid,
            mtime = self.modtime,
            ctime = self.ctime,
            uid = uid,
            w = self.isize.0,
            h = self.isize.1,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgo;
    use std::io::Write as _;

    fn meta_for(logical: &str, size: u64, modtime: i64) -> FileMeta {
        FileMeta {
            path: std::path::PathBuf::from(logical),
            logical: logical.to_string(),
            size,
            modtime,
        }
    }

    #[test]
    fn test_fast_fields() {
        let mut h = Hasher::new(HashAlgo::Sha1);
        let r = Record::new(&mut h, &meta_for("/sub/photo.JPG", 42, 1700000000));
        assert_eq!(r.fname, "/sub/photo.JPG");
        assert_eq!(r.bname, "photo.JPG");
        assert_eq!(r.ext, "jpg");
        assert_eq!(r.dir, "/sub");
        assert_eq!(r.size, 42);
        assert_eq!(r.modtime, 1700000000);
        assert_eq!(r.ident, h.str_digest("/sub/photo.JPG"));
        // Not loaded yet.
        assert_eq!(r.chash, h.zero());
        assert_eq!(r.dident, h.zero());
        assert_eq!(r.isize, (0, 0));
    }

    #[test]
    fn test_root_level_dir_is_slash() {
        let mut h = Hasher::new(HashAlgo::Sha1);
        let r = Record::new(&mut h, &meta_for("/hello.txt", 6, 0));
        assert_eq!(r.dir, "/");
        assert_eq!(r.bname, "hello.txt");
    }

    #[test]
    fn test_normal_mode_layout() {
        let mut h = Hasher::new(HashAlgo::Sha1);
        let mut r = Record::new(&mut h, &meta_for("/hello.txt", 6, 1700000000));
        r.ctime = 1700000100;
        r.mime = "text/plain".to_string();
        r.ftype = 1;
        let mut buf = String::new();
        let out = r.marshal(Mode::Normal, &mut buf);
        let mut lines = out.lines();
        let file_line = lines.next().unwrap();
        let meta_line = lines.next().unwrap();
        assert!(file_line.starts_with("file:\"UID\",\"0\",\"1700000100\","));
        assert!(meta_line.starts_with("meta:\"UID\",\"0\",\"1700000000\",\"1700000100\","));

        // Field 9 must be the identity hash, field 17 the modification
        // time: the delta loader depends on these positions.
        let fields: Vec<&str> = file_line
            .trim_start_matches("file:")
            .split(',')
            .map(|f| f.trim_matches('"'))
            .collect();
        assert_eq!(fields.len(), 18);
        assert_eq!(fields[9], to_hex(&r.ident));
        assert_eq!(fields[17], "1700000000");
        assert_eq!(fields[8], "/hello.txt");

        // The meta line carries the file UID token at field 18.
        let mfields: Vec<&str> = meta_line
            .trim_start_matches("meta:")
            .split(',')
            .map(|f| f.trim_matches('"'))
            .collect();
        assert_eq!(mfields[18], "UID");
        assert_eq!(mfields[20], "0");
        assert_eq!(mfields[21], "0");
    }

    #[test]
    fn test_assigned_uids_replace_tokens() {
        let mut h = Hasher::new(HashAlgo::Sha1);
        let mut r = Record::new(&mut h, &meta_for("/a", 0, 0));
        r.uid = 7;
        r.meta_uid = 9;
        let mut buf = String::new();
        let out = r.marshal(Mode::Normal, &mut buf);
        assert!(out.starts_with("file:\"7\","));
        assert!(out.contains("meta:\"9\","));
        assert!(!out.contains("UID"));
    }

    #[test]
    fn test_single_mode_layout() {
        let mut h = Hasher::new(HashAlgo::Sha1);
        let mut r = Record::new(&mut h, &meta_for("/img/pic.png", 10, 0));
        r.mime = "image/png".to_string();
        r.ftype = 2;
        r.isize = (640, 480);
        let mut buf = String::new();
        let out = r.marshal(Mode::Single, &mut buf);
        assert!(out.starts_with("\"0\",\"0\",\"1\",\"2\",\"0\",\"/img/pic.png\","));
        assert!(out.ends_with("\"10\",\"640\",\"480\"\n"));
        assert!(!out.contains("UID"));
    }

    #[test]
    fn test_sql_mode_layout() {
        let mut h = Hasher::new(HashAlgo::Sha1);
        let mut r = Record::new(&mut h, &meta_for("/hello.txt", 6, 1700000000));
        r.ctime = 1700000100;
        r.mime = "text/plain".to_string();
        r.ftype = 1;
        let mut buf = String::new();
        let out = r.marshal(Mode::Sql, &mut buf);
        assert_eq!(out.matches("INSERT INTO sys_file ").count(), 1);
        assert_eq!(out.matches("INSERT INTO sys_file_metadata ").count(), 1);
        // One UID per statement, both replaced by the writer in one go.
        assert_eq!(out.matches("\"UID\"").count(), 2);
        assert!(out.contains("\"/hello.txt\""));
        assert!(out.ends_with(");\n"));
    }

    #[test]
    fn test_quote_escaping() {
        let mut h = Hasher::new(HashAlgo::Sha1);
        let r = Record::new(&mut h, &meta_for("/we\"ird.txt", 1, 0));
        let mut buf = String::new();
        let out = r.marshal(Mode::Normal, &mut buf);
        assert!(out.contains("/we\\\"ird.txt"));
    }

    #[test]
    fn test_load_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::File::create(&path).unwrap();
        let mut h = Hasher::new(HashAlgo::Sha1);
        let mut r = Record::new(&mut h, &meta_for("/empty", 0, 0));
        r.load(&mut h, &path);
        assert_eq!(r.mime, "inode/x-empty");
        assert_eq!(r.ftype, 0);
        assert_eq!(
            to_hex(&r.chash),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn test_load_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello\n").unwrap();
        let mut h = Hasher::new(HashAlgo::Sha1);
        let mut r = Record::new(&mut h, &meta_for("/hello.txt", 6, 0));
        r.load(&mut h, &path);
        assert_eq!(r.mime, "text/plain");
        assert_eq!(r.ftype, 1);
        assert_eq!(
            to_hex(&r.chash),
            "f572d396fae9206628714fb2ce00f72e94f2258f"
        );
        assert_eq!(r.dident, h.str_digest("/"));
        assert_eq!(r.isize, (0, 0));
    }

    #[test]
    fn test_load_no_extension_sniffs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("README");
        std::fs::write(&path, b"just some words\n").unwrap();
        let mut h = Hasher::new(HashAlgo::Sha1);
        let mut r = Record::new(&mut h, &meta_for("/README", 16, 0));
        r.load(&mut h, &path);
        assert_eq!(r.mime, "text/plain");
        assert_eq!(r.ftype, 1);
    }

    #[test]
    fn test_load_png_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.png");
        let mut f = std::fs::File::create(&path).unwrap();
        // Signature plus an IHDR chunk declaring 640x480.
        f.write_all(&[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a])
            .unwrap();
        f.write_all(&[0, 0, 0, 13]).unwrap();
        f.write_all(b"IHDR").unwrap();
        f.write_all(&640u32.to_be_bytes()).unwrap();
        f.write_all(&480u32.to_be_bytes()).unwrap();
        f.write_all(&[8, 6, 0, 0, 0]).unwrap();
        f.write_all(&[0, 0, 0, 0]).unwrap();
        drop(f);
        let size = std::fs::metadata(&path).unwrap().len();
        let mut h = Hasher::new(HashAlgo::Sha1);
        let mut r = Record::new(&mut h, &meta_for("/pic.png", size, 0));
        r.load(&mut h, &path);
        assert_eq!(r.mime, "image/png");
        assert_eq!(r.ftype, 2);
        assert_eq!(r.isize, (640, 480));
    }

    #[test]
    fn test_load_unopenable_file_degrades() {
        let mut h = Hasher::new(HashAlgo::Sha1);
        let mut r = Record::new(&mut h, &meta_for("/gone.txt", 5, 0));
        r.load(&mut h, Path::new("/no/such/path/gone.txt"));
        // Extension still resolves the type; content fields stay zero.
        assert_eq!(r.mime, "text/plain");
        assert_eq!(r.ftype, 1);
        assert_eq!(r.chash, h.zero());
        assert_eq!(r.dident, h.str_digest("/"));
    }
}
