use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid delta input: {reason}: {line}")]
    Delta { line: String, reason: String },

    #[error("Invalid record stream: {0}")]
    Rewrite(String),

    #[error("Output stream failed")]
    WriteFailed,
}
