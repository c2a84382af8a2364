//! Error type shared by the wire codec and the file loader.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

/// Recoverable failures. Misuse of the container (null handles, reading
/// an inactive edge destination) is not represented here; it panics.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("truncated buffer: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("invalid {what} tag: {tag}")]
    InvalidTag { what: &'static str, tag: u8 },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
