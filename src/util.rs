//! Shared utility functions.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::{Error, Result};

/// Run a collaborator call under a time budget.
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, fut).await {
        Ok(inner) => inner,
        Err(_) => Err(Error::Timeout(duration)),
    }
}
