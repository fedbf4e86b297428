use clap::Parser;
use fileindex::config::Args;
use fileindex::engine::IndexEngine;
use fileindex::rewrite;
use fileindex::writer::{SplitWriter, Writer};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write as _};
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    // Stdout carries the record stream, so logging goes to stderr.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    // Validate sharding up front; it applies to every mode.
    let cfg = match args.output_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    // Rewrite modes transform an already-produced stream and exit.
    if let Some(source) = &args.osql {
        let result = if source == "-" {
            run_osql(BufReader::new(std::io::stdin()), &cfg)
        } else {
            match File::open(source) {
                Ok(f) => run_osql(BufReader::new(f), &cfg),
                Err(e) => Err(e.into()),
            }
        };
        if let Err(e) = result {
            error!("{}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    if args.ofile.is_some() || args.ometa.is_some() {
        if let Err(e) = run_split(&args, &cfg) {
            error!("{}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    let engine = IndexEngine::new(args);
    if let Err(e) = engine.run() {
        error!("Indexing failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn run_osql<R: std::io::BufRead>(
    input: R,
    cfg: &fileindex::config::OutputConfig,
) -> fileindex::Result<()> {
    let writer = Writer::spawn(
        BufWriter::new(std::io::stdout()),
        true,
        cfg.uid_min,
        cfg.uid_inc,
    );
    rewrite::load_csv(input, &writer)?;
    if !writer.wait() {
        return Err(fileindex::IndexError::WriteFailed);
    }
    Ok(())
}

fn run_split(args: &Args, cfg: &fileindex::config::OutputConfig) -> fileindex::Result<()> {
    // The file CSV carries one UID token per line, the meta CSV two.
    let (path, prefix, uids) = match (&args.ofile, &args.ometa) {
        (_, Some(path)) => (path, "meta:", 2),
        (Some(path), None) => (path, "file:", 1),
        (None, None) => unreachable!(),
    };
    let input = BufReader::new(File::open(path)?);
    let mut out = BufWriter::new(std::io::stdout());
    let split = SplitWriter {
        prefix,
        uids,
        min: cfg.uid_min,
        inc: cfg.uid_inc,
    };
    split.write(input, &mut out)?;
    out.flush()?;
    Ok(())
}
