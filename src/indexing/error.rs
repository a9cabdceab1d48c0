//! Error types for the indexing module

use crate::error::AppError;
use crate::search::SearchError;

/// Result type for indexing operations
pub type IndexingResult<T> = std::result::Result<T, IndexingError>;

/// Errors that can occur while reindexing
#[derive(Debug, thiserror::Error)]
pub enum IndexingError {
    /// A bulk upsert reported item-level failures
    #[error("Bulk upsert failed: {detail}")]
    BulkUpsert { detail: String },

    /// The search backend could not be reached or rejected a call
    #[error("Search backend error: {0}")]
    Backend(#[from] SearchError),

    /// Records could not be read from, or written back to, the record source
    #[error("Record source error: {0}")]
    Source(String),

    /// Job state could not be loaded or saved
    #[error("Job state storage error: {0}")]
    Storage(String),

    /// Job state or records could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Scheduler failed to start, stop or register the tick job
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl From<sled::Error> for IndexingError {
    fn from(err: sled::Error) -> Self {
        IndexingError::Storage(err.to_string())
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for IndexingError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        IndexingError::Scheduler(err.to_string())
    }
}

impl From<IndexingError> for AppError {
    fn from(err: IndexingError) -> Self {
        match err {
            IndexingError::Backend(err) => err.into(),
            IndexingError::BulkUpsert { detail } => AppError::Backend(detail),
            IndexingError::Storage(msg) => AppError::Storage(msg),
            IndexingError::Serialization(err) => AppError::Serialization(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_bulk_failure_maps_to_bad_gateway() {
        let err: AppError = IndexingError::BulkUpsert {
            detail: "document a1-en_NZ failed with status 400".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("a1-en_NZ"));
    }

    #[test]
    fn test_storage_error_code() {
        let err: AppError = IndexingError::Storage("locked".to_string()).into();
        assert_eq!(err.error_code(), "STORAGE_ERROR");
    }
}
