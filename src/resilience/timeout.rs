use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Extension trait to add timeout functionality to futures
pub trait TimeoutExt<T>: Sized {
    /// Add a timeout to a future; elapsing maps to a transient error.
    fn with_timeout_duration(
        self,
        duration: Duration,
    ) -> impl Future<Output = Result<T>> + Send;
}

impl<F, T> TimeoutExt<T> for F
where
    F: Future<Output = T> + Send,
    T: Send,
{
    async fn with_timeout_duration(self, duration: Duration) -> Result<T> {
        match timeout(duration, self).await {
            Ok(result) => Ok(result),
            Err(_) => Err(Error::NetworkTimeout {
                timeout: duration,
                message: "operation timed out".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_deadline() {
        let result = async { 7u32 }
            .with_timeout_duration(Duration::from_secs(1))
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn elapsed_deadline_is_transient() {
        let result = tokio::time::sleep(Duration::from_millis(50))
            .with_timeout_duration(Duration::from_millis(5))
            .await;
        let error = result.unwrap_err();
        assert!(error.is_retryable());
    }
}
