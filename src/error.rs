//! Crate-level error taxonomy and process exit-code mapping
//!
//! Modules define their own `thiserror` enums; this module aggregates
//! them into the single `Error` the managers return, and owns the
//! translation to the exit codes the hosting CLI documents. Only the
//! outermost run boundary should ever call [`Error::exit_code`].

use crate::config::ConfigError;
use crate::provider::ProviderError;
use crate::query::QueryError;
use crate::store::StoreError;
use crate::walker::WalkError;

/// Unified error for index and query runs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Exit code contract for the hosting CLI:
    /// 0 success, 2 invalid arguments, 3 configuration error,
    /// 4 provider auth/permanent failure, 5 dimension mismatch
    /// requiring re-index, 6 disk/store I/O failure, 7 cancelled,
    /// 1 anything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArguments(_) => 2,
            Error::Config(_) => 3,
            Error::Provider(e) if !e.is_transient() => 4,
            Error::Store(StoreError::DimensionMismatch { .. })
            | Error::Store(StoreError::ProviderMismatch { .. }) => 5,
            Error::Store(_) => 6,
            Error::Query(QueryError::Store(StoreError::DimensionMismatch { .. })) => 5,
            Error::Query(QueryError::Store(_)) => 6,
            Error::Query(QueryError::Provider(e)) if !e.is_transient() => 4,
            Error::Query(QueryError::ScopeNotFound(_)) | Error::Query(QueryError::EmptyQuery) => 2,
            Error::Cancelled => 7,
            _ => 1,
        }
    }
}
