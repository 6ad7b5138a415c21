//! Error taxonomy for retrieval and fusion.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SearchError {
    /// A lexical query was attempted before any snapshot was indexed.
    #[error("lexical index has not been built")]
    NotInitialized,

    /// A build was attempted with zero usable documents.
    #[error("corpus snapshot contains no indexable documents")]
    EmptyCorpus,

    /// A retrieval collaborator (vector store, corpus source) could not be reached.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// Unexpected failure while normalizing or merging score maps.
    #[error("fusion failed: {0}")]
    FusionFailure(String),

    /// The caller supplied parameters outside their valid range.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, SearchError>;
