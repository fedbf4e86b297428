use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::{BufRead, Write};
use std::thread;
use tracing::error;

/// Single sink for all processor output. Owns the destination stream
/// on its own thread, assigns surrogate ids in arrival order, and in
/// transformation mode substitutes the `UID` tokens with real numbers.
///
/// Shard k of a group of N is constructed with `(min, inc) = (k, N)`,
/// which yields the progression k+N, k+2N, ... (the counter advances
/// before use), so shards never produce colliding ids.
pub struct Writer {
    tx: Option<Sender<String>>,
    done: Receiver<bool>,
}

impl Writer {
    pub fn spawn<W: Write + Send + 'static>(
        mut out: W,
        transform: bool,
        min: u64,
        inc: u64,
    ) -> Writer {
        let min = min.max(1);
        let inc = inc.max(1);
        // Buffering absorbs bursts, especially in SQL mode.
        let (tx, rx) = bounded::<String>(16);
        let (done_tx, done_rx) = bounded::<bool>(1);
        thread::spawn(move || {
            let mut uid = min;
            let mut failed = false;
            for mut s in rx.iter() {
                uid += inc;
                if failed {
                    // Keep draining so the processors can finish.
                    continue;
                }
                if transform {
                    s = s.replacen("UID", &uid.to_string(), 2);
                }
                if let Err(e) = out.write_all(s.as_bytes()) {
                    error!("Write to result: {}", e);
                    failed = true;
                }
            }
            if !failed {
                if let Err(e) = out.flush() {
                    error!("Flush result: {}", e);
                    failed = true;
                }
            }
            let _ = done_tx.send(!failed);
        });
        Writer {
            tx: Some(tx),
            done: done_rx,
        }
    }

    /// Sender handle for processor workers. The writer stops once all
    /// handles and the writer itself have dropped theirs.
    pub fn sender(&self) -> Sender<String> {
        self.tx.as_ref().expect("writer already closed").clone()
    }

    pub fn write(&self, s: String) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(s);
        }
    }

    /// Close the input channel and wait for the thread to finish
    /// writing. Returns false when the output stream failed.
    pub fn wait(mut self) -> bool {
        self.tx.take();
        self.done.recv().unwrap_or(false)
    }
}

/// Rewrites one half of a normal mode stream into plain CSV for bulk
/// loading: keeps only lines with the wanted prefix, substitutes their
/// `UID` tokens with the shard progression, and strips the prefix.
///
/// The file line carries one token (its own id); the meta line carries
/// two (its own id and the file foreign key), which both receive the
/// same number because the two passes walk the same stream in the same
/// order.
pub struct SplitWriter<'a> {
    pub prefix: &'a str,
    pub uids: usize,
    pub min: u64,
    pub inc: u64,
}

impl SplitWriter<'_> {
    pub fn write<R: BufRead, W: Write>(&self, input: R, out: &mut W) -> crate::Result<()> {
        let min = self.min.max(1);
        let inc = self.inc.max(1);
        let mut uid = min;
        for line in input.lines() {
            let line = line?;
            if let Some(payload) = line.strip_prefix(self.prefix) {
                let payload = payload.replacen("UID", &uid.to_string(), self.uids);
                writeln!(out, "{}", payload)?;
                uid += inc;
            }
        }
        Ok(())
    }
}
