use crate::document::{ApplyError, DocumentHandle};
use crate::store::{AppendError, ConcurrencyConflict};
use std::io;

/// Every failure a caller of documents and repositories can see.
///
/// Each kind calls for a different recovery: reject the input
/// ([`Validation`](Error::Validation)), reload and retry
/// ([`Conflict`](Error::Conflict)), fix the calling code
/// ([`Untracked`](Error::Untracked)), or report an outage
/// ([`Storage`](Error::Storage)).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A business method's precondition failed. Nothing was emitted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The stream changed since the document was loaded. Nothing was
    /// written and the document's pending events are intact.
    #[error(transparent)]
    Conflict(ConcurrencyConflict),

    /// `save` was called on a document this repository does not track,
    /// either never loaded through it or already saved.
    #[error("{}", untracked_message(.handle))]
    Untracked { handle: Option<DocumentHandle> },

    /// The underlying store failed.
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    /// An event could not be applied to a document.
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

impl Error {
    /// Build a [`Error::Validation`] from any message.
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Returns `true` for [`Error::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

fn untracked_message(handle: &Option<DocumentHandle>) -> String {
    match handle {
        Some(handle) => format!("document {handle} is not tracked by this repository"),
        None => "document is not tracked by any repository".to_string(),
    }
}

impl From<AppendError> for Error {
    fn from(err: AppendError) -> Self {
        match err {
            AppendError::Conflict(conflict) => Error::Conflict(conflict),
            AppendError::Io(e) => Error::Storage(e),
        }
    }
}

impl From<ConcurrencyConflict> for Error {
    fn from(conflict: ConcurrencyConflict) -> Self {
        Error::Conflict(conflict)
    }
}
