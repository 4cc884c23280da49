use async_trait::async_trait;

use crate::{FetchError, StoreError};

/// Anything that can hand back the raw synthesis page
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_synthesis(&self) -> Result<String, FetchError>;
}

/// Read access to previously stored potentials, newest first
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn potential_history(&self, code: &str, limit: usize) -> Result<Vec<f64>, StoreError>;
}
