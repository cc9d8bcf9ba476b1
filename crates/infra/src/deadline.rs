//! Request deadlines.
//!
//! Dropping a future on expiry drops any `sqlx::Transaction` it holds, which
//! rolls the transaction back.

use std::future::Future;

use tokio::time::{Instant, timeout_at};
use tracing::warn;

use windcms_core::{DomainError, DomainResult};

/// Run `fut` until `deadline`; `SERVICE_UNAVAILABLE` when it passes first.
pub async fn within<F, T>(deadline: Instant, fut: F) -> DomainResult<T>
where
    F: Future<Output = DomainResult<T>>,
{
    match timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("request deadline exceeded");
            Err(DomainError::service_unavailable("deadline exceeded"))
        }
    }
}

/// Deadline `budget` from now.
pub fn after(budget: std::time::Duration) -> Instant {
    Instant::now() + budget
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use windcms_core::ErrorCode;

    use super::*;

    #[tokio::test]
    async fn completes_before_deadline() {
        let out = within(after(Duration::from_secs(1)), async { Ok::<_, DomainError>(7) }).await;
        assert_eq!(out.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_service_unavailable() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, DomainError>(())
        };
        let err = within(after(Duration::from_millis(50)), slow).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
        assert_eq!(err.message(), "deadline exceeded");
    }
}
