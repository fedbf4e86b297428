use crate::config::{Args, OutputConfig};
use crate::delta::Delta;
use crate::indexer::Indexer;
use crate::processor::Processor;
use crate::writer::Writer;
use crate::{IndexError, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// Wires the core pipeline together: delta caches, walker, processor
/// pool and writer.
pub struct IndexEngine {
    args: Args,
}

impl IndexEngine {
    pub fn new(args: Args) -> Self {
        Self { args }
    }

    pub fn run(&self) -> Result<()> {
        let cfg = self.args.output_config()?;

        let mut delta = Delta::new();
        for path in &self.args.delta {
            info!("Loading delta cache: {:?}", path);
            let file = File::open(path)?;
            delta.load(BufReader::new(file))?;
        }
        if !delta.is_empty() {
            debug!("Delta cache holds {} entries", delta.len());
        }

        let root = match &self.args.root {
            Some(root) => root,
            None => {
                // No root: just re-emit the merged caches.
                if delta.is_empty() {
                    return Err(IndexError::Config(
                        "Root directory required unless --delta is given".into(),
                    ));
                }
                let mut out = BufWriter::new(std::io::stdout());
                delta.write_to(&mut out)?;
                out.flush()?;
                return Ok(());
            }
        };
        let meta = std::fs::metadata(root)?;
        if !meta.is_dir() {
            return Err(IndexError::Config(format!(
                "Root is not a directory: {}",
                root.display()
            )));
        }

        let nproc = self.args.nproc();
        info!("Indexing {:?} with {} workers", root, nproc);

        run_pipeline(
            root,
            &cfg,
            Arc::new(delta),
            nproc,
            self.args.wg,
            self.args.worker - 1,
            self.args.follow_symlinks,
            BufWriter::new(std::io::stdout()),
        )
    }
}

/// Run the walker, processor pool and writer over `root` until the
/// subtree is exhausted. `shard` is the 0-based index of this instance
/// in a group of `group`. The writer owns `out` on its own thread; a
/// failed output stream surfaces as an error after the pipeline has
/// drained.
#[allow(clippy::too_many_arguments)]
pub fn run_pipeline<W: Write + Send + 'static>(
    root: &Path,
    cfg: &OutputConfig,
    delta: Arc<Delta>,
    nproc: usize,
    group: usize,
    shard: usize,
    follow_symlinks: bool,
    out: W,
) -> Result<()> {
    let writer = Writer::spawn(out, cfg.transform(), cfg.uid_min, cfg.uid_inc);

    let indexer = Indexer::new(group, shard, follow_symlinks);
    let files = indexer.sink();
    let scan_root = root.to_path_buf();
    let scanner = thread::spawn(move || indexer.scan(scan_root, nproc));

    let mut processor = Processor::new(files, writer, nproc, delta, cfg.clone());
    processor.run();

    // Processors finish when the walker closes the files channel; the
    // writer finishes when the processors are done.
    let write_ok = processor.wait();
    let _ = scanner.join();

    if !write_ok {
        return Err(IndexError::WriteFailed);
    }
    Ok(())
}
