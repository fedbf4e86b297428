use crate::hash::HashAlgo;
use crate::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory to index
    #[arg(value_name = "ROOT")]
    pub root: Option<PathBuf>,

    /// Use a normal mode CSV file for cached values (repeatable)
    #[arg(long, value_name = "FILE")]
    pub delta: Vec<PathBuf>,

    /// Output in single view mode
    #[arg(long, conflicts_with = "sql")]
    pub single: bool,

    /// Output in SQL mode
    #[arg(long)]
    pub sql: bool,

    /// Hash with MD5 instead of SHA-1
    #[arg(long)]
    pub md5: bool,

    /// Rewrite normal mode CSV from FILE (or - for stdin) as SQL
    #[arg(long, value_name = "FILE")]
    pub osql: Option<String>,

    /// Extract the sys_file CSV from a normal mode FILE
    #[arg(long, value_name = "FILE")]
    pub ofile: Option<PathBuf>,

    /// Extract the sys_file_metadata CSV from a normal mode FILE
    #[arg(long, value_name = "FILE")]
    pub ometa: Option<PathBuf>,

    /// Total number of workers in the shard group
    #[arg(long, default_value_t = 1, value_name = "N")]
    pub wg: usize,

    /// 1-based number of this worker instance
    #[arg(short = 'w', long = "worker", default_value_t = 1, value_name = "K")]
    pub worker: usize,

    /// Processor workers to run per CPU
    #[arg(long, default_value_t = 3, value_name = "M")]
    pub multi: usize,

    /// Follow symlinks to their targets (false logs and skips them)
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        value_name = "BOOL"
    )]
    pub follow_symlinks: bool,

    /// Suppress non-error messages
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,

    /// Increase verbosity
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

/// Output encoding for the record stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Single,
    Sql,
    #[default]
    Normal,
}

/// Everything the pipeline needs to know about how records are rendered
/// and numbered. Built once from the flags and passed down explicitly.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub mode: Mode,
    pub hash: HashAlgo,
    pub uid_min: u64,
    pub uid_inc: u64,
}

impl OutputConfig {
    /// SQL output gets real UIDs substituted by the writer; everything
    /// else keeps the UID token for the split rewriter.
    pub fn transform(&self) -> bool {
        self.mode == Mode::Sql
    }
}

impl Args {
    /// Validate the shard configuration and derive the output config.
    /// Shard k of a group of N numbers its records k, k+N, k+2N, ...
    /// so shards never collide.
    pub fn output_config(&self) -> Result<OutputConfig> {
        if self.wg < 1 {
            return Err(crate::IndexError::Config(
                "Number of workers should be at least one".into(),
            ));
        }
        if self.worker < 1 || self.worker > self.wg {
            return Err(crate::IndexError::Config(
                "Worker number is not valid: must be between 1 and --wg N".into(),
            ));
        }
        let mode = if self.single {
            Mode::Single
        } else if self.sql {
            Mode::Sql
        } else {
            Mode::Normal
        };
        let hash = if self.md5 { HashAlgo::Md5 } else { HashAlgo::Sha1 };
        Ok(OutputConfig {
            mode,
            hash,
            uid_min: self.worker as u64,
            uid_inc: self.wg as u64,
        })
    }

    /// Processor pool size: logical CPUs times the multiplier.
    pub fn nproc(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        cpus * self.multi.max(1)
    }
}
