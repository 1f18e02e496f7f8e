//! Timeout helpers
//!
//! Network calls already carry a client-side timeout. These helpers add an
//! outer deadline so a stuck future can never outlive its budget.

use std::time::Duration;

/// Extra time granted on top of a request timeout before the outer deadline fires
pub const DEFAULT_GRACE: Duration = Duration::from_millis(250);

/// Outer deadline for an operation whose inner timeout is `timeout`
pub fn deadline_with_grace(timeout: Duration, grace: Duration) -> Duration {
    timeout.saturating_add(grace)
}

/// Apply timeout to an async operation
///
/// Returns `Err` with the original error type if the operation fails, or
/// `TimeoutError::Timeout` if it does not finish in time.
pub async fn with_timeout<T, E>(
    timeout: Duration,
    future: impl std::future::Future<Output = Result<T, E>>,
) -> Result<T, TimeoutError<E>> {
    match tokio::time::timeout(timeout, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TimeoutError::Inner(err)),
        Err(_) => Err(TimeoutError::Timeout(timeout)),
    }
}

/// Error type for timeout operations
#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Inner(E),
}

impl<E> TimeoutError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TimeoutError::Timeout(_))
    }

    /// Get the inner error if not a timeout
    pub fn into_inner(self) -> Option<E> {
        match self {
            TimeoutError::Inner(e) => Some(e),
            TimeoutError::Timeout(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_helpers() {
        assert_eq!(
            deadline_with_grace(Duration::from_millis(200), DEFAULT_GRACE),
            Duration::from_millis(450)
        );
        assert_eq!(deadline_with_grace(Duration::MAX, DEFAULT_GRACE), Duration::MAX);
    }

    #[tokio::test]
    async fn test_with_timeout_inner_error() {
        let result: Result<i32, TimeoutError<String>> = with_timeout(
            Duration::from_secs(1),
            async { Err::<i32, _>("refused".to_string()) },
        )
        .await;

        let err = result.unwrap_err();
        assert!(!err.is_timeout());
        assert_eq!(err.into_inner(), Some("refused".to_string()));
    }

    #[tokio::test]
    async fn test_with_timeout_timeout() {
        let result: Result<i32, TimeoutError<String>> = with_timeout(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, String>(42)
            },
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.into_inner().is_none());
    }
}
