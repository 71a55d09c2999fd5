//! Remote stores: the relational backing store and the secondary document store

mod documents;
mod relational;

pub use documents::{DataApiConfig, DataApiDocumentStore, DocumentStore, MemoryDocumentStore};
pub use relational::{
    ChangeBatch, FetchedRow, LibSqlRelationalStore, MalformedRow, RelationalStore,
};

use thiserror::Error;

/// Result type for remote store calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Failure talking to a remote store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The store could not be reached or failed as a whole; aborts the pass
    #[error("Remote store unavailable: {0}")]
    Transport(String),

    /// The store refused one record; isolated to that record
    #[error("Remote store rejected record: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether the failure should abort the current pass
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<libsql::Error> for RemoteError {
    fn from(error: libsql::Error) -> Self {
        let message = crate::util::sanitize(&error);
        if message.to_ascii_lowercase().contains("constraint") {
            Self::Rejected(message)
        } else {
            Self::Transport(message)
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(crate::util::sanitize(&error))
    }
}
