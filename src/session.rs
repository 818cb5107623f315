//! Per-request session coordination.
//!
//! Each submitted request gets a correlation id, a deadline, and a permit
//! from the bounded session pool before its operation runs. Cancellation is
//! cooperative: the deadline fires at the operation's await points, and an
//! aborted request never exposes partial state beyond what the store has
//! already committed atomically.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::CatalogError;
use crate::ops::{OpOutput, OpRequest, OperationTable};

/// A completed request: the operation output plus the id that ties it to
/// the logs.
#[derive(Debug)]
pub struct OpResult {
    pub correlation_id: Uuid,
    pub output: OpOutput,
    pub elapsed: Duration,
}

/// A failed request. Carries the error kind and correlation id so callers
/// can cross-reference logs without parsing messages.
#[derive(Debug, thiserror::Error)]
#[error("[{correlation_id}] {error}")]
pub struct RequestError {
    pub correlation_id: Uuid,
    pub error: CatalogError,
}

impl RequestError {
    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }

    /// Whether a full-request retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.error,
            CatalogError::StoreUnavailable { transient: true, .. }
                | CatalogError::DeadlineExceeded { .. }
        )
    }
}

pub struct SessionCoordinator {
    ops: Arc<OperationTable>,
    permits: Arc<Semaphore>,
    default_deadline: Duration,
}

impl SessionCoordinator {
    pub fn new(ops: Arc<OperationTable>, config: &StoreConfig) -> Self {
        Self {
            ops,
            permits: Arc::new(Semaphore::new(config.max_sessions as usize)),
            default_deadline: config.request_timeout,
        }
    }

    /// Run one operation under the default deadline.
    pub async fn submit(&self, name: &str, request: OpRequest) -> Result<OpResult, RequestError> {
        self.submit_with_deadline(name, request, self.default_deadline)
            .await
    }

    /// Run one operation with an explicit deadline.
    pub async fn submit_with_deadline(
        &self,
        name: &str,
        request: OpRequest,
        deadline: Duration,
    ) -> Result<OpResult, RequestError> {
        let correlation_id = Uuid::new_v4();
        let started = Instant::now();
        let fail = |error: CatalogError| RequestError {
            correlation_id,
            error,
        };

        let _permit = tokio::time::timeout(deadline, self.permits.acquire())
            .await
            .map_err(|_| {
                fail(CatalogError::StoreUnavailable {
                    detail: "session pool exhausted".to_string(),
                    transient: true,
                })
            })?
            .map_err(|_| {
                fail(CatalogError::StoreUnavailable {
                    detail: "session pool closed".to_string(),
                    transient: false,
                })
            })?;

        let remaining = deadline.saturating_sub(started.elapsed());
        let span = info_span!("request", op = name, %correlation_id);
        let output = run_with_deadline(self.ops.execute(name, request), remaining)
            .instrument(span)
            .await
            .map_err(fail)?;

        Ok(OpResult {
            correlation_id,
            output,
            elapsed: started.elapsed(),
        })
    }
}

/// Enforce a deadline on an operation future. The future is dropped on
/// expiry, which aborts the in-flight work at its next suspension point.
async fn run_with_deadline<F>(future: F, deadline: Duration) -> Result<OpOutput, CatalogError>
where
    F: std::future::Future<Output = Result<OpOutput, CatalogError>>,
{
    let started = Instant::now();
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(CatalogError::DeadlineExceeded {
            elapsed_ms: started.elapsed().as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::WriteOutcome;

    #[tokio::test]
    async fn expired_deadline_maps_to_deadline_exceeded() {
        let err = run_with_deadline(
            std::future::pending::<Result<OpOutput, CatalogError>>(),
            Duration::from_millis(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CatalogError::DeadlineExceeded { .. }));
    }

    #[tokio::test]
    async fn completed_future_beats_the_deadline() {
        let out = run_with_deadline(
            async {
                Ok(OpOutput::Write(WriteOutcome {
                    urn: "urn:li:tag:x".to_string(),
                    ..WriteOutcome::default()
                }))
            },
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert!(matches!(out, OpOutput::Write(_)));
    }

    #[test]
    fn request_error_reports_kind_and_transience() {
        let err = RequestError {
            correlation_id: Uuid::new_v4(),
            error: CatalogError::DeadlineExceeded { elapsed_ms: 12 },
        };
        assert_eq!(err.kind(), "deadline_exceeded");
        assert!(err.is_transient());
        assert!(err.to_string().contains("12ms"));
    }
}
