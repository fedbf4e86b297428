pub mod config;
pub mod delta;
pub mod engine;
pub mod error;
pub mod hash;
pub mod indexer;
pub mod mime;
pub mod processor;
pub mod record;
pub mod rewrite;
pub mod writer;

pub use error::IndexError;
pub type Result<T> = std::result::Result<T, IndexError>;
