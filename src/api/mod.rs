pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::indexing::JobHost;
use crate::search::SearchService;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchService>,
    pub reindex: Option<Arc<JobHost>>,
    pub metrics_enabled: bool,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(search: Arc<SearchService>) -> Self {
        Self {
            search,
            reindex: None,
            metrics_enabled: true,
            started_at: Instant::now(),
        }
    }

    /// Expose reindex progress through the status endpoint
    pub fn with_reindex(mut self, host: Arc<JobHost>) -> Self {
        self.reindex = Some(host);
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }
}
