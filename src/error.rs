use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the page engine and its collaborators.
///
/// The engine recovers nothing locally: every kind here propagates to the
/// caller. `Invariant` signals on-disk corruption or a broken structural
/// invariant and is fatal to the current operation.
#[derive(Error, Debug)]
pub enum Error {
    #[error("not found")]
    NotFound,
    #[error("format error: {0}")]
    Format(String),
    #[error("invariant violation: {0}")]
    Invariant(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize error: {0}")]
    Serialize(String),
}
