//! Error types and result alias for the crate.
//!
//! [`Error::Format`] covers malformed policy artifacts and slot-name mismatches,
//! [`Error::Range`] a caller-supplied index outside its domain,
//! [`Error::Exhausted`] an assignment attempt with no free slot left and
//! [`Error::Value`] degenerate matcher input. None of them leave an assigner in
//! a modified state.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("format error: {0}")]
    Format(String),

    #[error("{what} index {index} out of range [0, {len})")]
    Range {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("no free slots remain")]
    Exhausted,

    #[error("value error: {0}")]
    Value(String),

    #[error("item {item} was already assigned in this episode")]
    AlreadyUsed { item: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub(crate) fn value(msg: impl Into<String>) -> Self {
        Error::Value(msg.into())
    }
}
