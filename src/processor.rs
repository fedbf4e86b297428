use crate::config::OutputConfig;
use crate::delta::Delta;
use crate::hash::Hasher;
use crate::indexer::FileMeta;
use crate::record::Record;
use crate::writer::Writer;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

/// A reusable hasher and scratch buffer pair. One is checked out of
/// the pool per file, so the pool size bounds digest-state allocation
/// to the worker count.
struct Tools {
    hasher: Hasher,
    buf: String,
}

/// Worker pool turning walked files into marshaled records. Workers
/// consume the files channel until the indexer closes it; per-file
/// errors degrade the record but never stop a worker.
pub struct Processor {
    input: Receiver<FileMeta>,
    writer: Writer,
    nproc: usize,
    delta: Arc<Delta>,
    cfg: OutputConfig,
    tools_tx: Sender<Tools>,
    tools_rx: Receiver<Tools>,
    handles: Vec<JoinHandle<()>>,
}

impl Processor {
    pub fn new(
        input: Receiver<FileMeta>,
        writer: Writer,
        nproc: usize,
        delta: Arc<Delta>,
        cfg: OutputConfig,
    ) -> Self {
        let (tools_tx, tools_rx) = bounded(nproc);
        for _ in 0..nproc {
            let _ = tools_tx.send(Tools {
                hasher: Hasher::new(cfg.hash),
                buf: String::new(),
            });
        }
        Self {
            input,
            writer,
            nproc,
            delta,
            cfg,
            tools_tx,
            tools_rx,
            handles: Vec::new(),
        }
    }

    pub fn run(&mut self) {
        for _ in 0..self.nproc {
            let input = self.input.clone();
            let sink = self.writer.sender();
            let delta = Arc::clone(&self.delta);
            let mode = self.cfg.mode;
            let tools_tx = self.tools_tx.clone();
            let tools_rx = self.tools_rx.clone();
            self.handles.push(thread::spawn(move || {
                let use_delta = !delta.is_empty();
                for fm in input.iter() {
                    let mut tools = match tools_rx.recv() {
                        Ok(tools) => tools,
                        Err(_) => return,
                    };
                    let mut record = Record::new(&mut tools.hasher, &fm);
                    // Unchanged since the cached run: re-emit the old
                    // lines without reopening the file.
                    let cached = use_delta
                        .then(|| delta.lookup(&record.ident, fm.modtime))
                        .flatten()
                        .map(|entry| format!("{}\n{}\n", entry.file, entry.meta));
                    let text = match cached {
                        Some(text) => text,
                        None => {
                            record.load(&mut tools.hasher, &fm.path);
                            record.marshal(mode, &mut tools.buf)
                        }
                    };
                    let _ = sink.send(text);
                    let _ = tools_tx.send(tools);
                }
            }));
        }
    }

    /// Block until every worker has drained the files channel, then
    /// shut the writer down. Returns false when the output stream
    /// failed partway.
    pub fn wait(self) -> bool {
        for handle in self.handles {
            let _ = handle.join();
        }
        self.writer.wait()
    }
}
