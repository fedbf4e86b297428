use crate::Result;
use digest::DynDigest;
use md5::Md5;
use sha1::Sha1;
use std::io::Read;

/// Content hash algorithm, selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgo {
    #[default]
    Sha1,
    Md5,
}

/// A finalized digest. All-zero means the underlying operation failed.
pub type Digest = Box<[u8]>;

/// Reusable digest state. Resets itself after every finalization so one
/// hasher can serve identity, directory and content hashes in sequence.
pub struct Hasher {
    inner: Box<dyn DynDigest + Send>,
}

impl Hasher {
    pub fn new(algo: HashAlgo) -> Self {
        let inner: Box<dyn DynDigest + Send> = match algo {
            HashAlgo::Sha1 => Box::new(Sha1::default()),
            HashAlgo::Md5 => Box::new(Md5::default()),
        };
        Self { inner }
    }

    /// Digest width in bytes (20 for SHA-1, 16 for MD5).
    pub fn output_len(&self) -> usize {
        self.inner.output_size()
    }

    /// All-zero digest of the right width, for failed operations.
    pub fn zero(&self) -> Digest {
        vec![0u8; self.output_len()].into_boxed_slice()
    }

    pub fn str_digest(&mut self, s: &str) -> Digest {
        self.inner.update(s.as_bytes());
        self.inner.finalize_reset()
    }

    /// Stream `r` through the hasher. The state is reset even when the
    /// read fails partway, so the hasher is clean for the next file.
    pub fn reader_digest<R: Read>(&mut self, r: &mut R) -> Result<Digest> {
        let mut buf = [0u8; 64 * 1024];
        loop {
            match r.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.inner.update(&buf[..n]),
                Err(e) => {
                    self.inner.reset();
                    return Err(e.into());
                }
            }
        }
        Ok(self.inner.finalize_reset())
    }
}

pub fn to_hex(d: &[u8]) -> String {
    hex::encode(d)
}
