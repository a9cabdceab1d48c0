//! Error types for search operations

use crate::error::AppError;

/// Result type for search operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during search operations
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Missing or invalid backend connection parameters
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The backend could not be reached or rejected a search call
    #[error("Search backend error: {0}")]
    Backend(String),

    /// Document indexing failed
    #[error("Document indexing failed: {0}")]
    IndexingFailed(String),

    /// Document deletion failed
    #[error("Document deletion failed: {0}")]
    DeletionFailed(String),

    /// Embedded index could not be opened or created
    #[error("Index initialization failed: {0}")]
    IndexInitFailed(String),

    /// Tantivy error
    #[error("Tantivy error: {0}")]
    TantivyError(String),
}

impl From<tantivy::TantivyError> for SearchError {
    fn from(err: tantivy::TantivyError) -> Self {
        SearchError::TantivyError(err.to_string())
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        SearchError::Backend(err.to_string())
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Configuration(msg) => AppError::Configuration(msg),
            SearchError::Backend(msg) => AppError::Backend(msg),
            _ => AppError::Internal(err.to_string()),
        }
    }
}
