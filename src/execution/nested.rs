//! Nested executions: connection checks and the sync itself run as separately
//! identified units of work that the control loop awaits and can cancel.

use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::NestedExecutionError;
use crate::models::{CheckConnectionOutput, CheckRequest, SyncInput, SyncOutput};

/// Runs a connection check for one actor.
#[async_trait]
pub trait CheckExecution: Send + Sync {
    async fn check(
        &self,
        request: CheckRequest,
        cancellation: CancellationToken,
    ) -> Result<CheckConnectionOutput, NestedExecutionError>;
}

/// Runs the replication for one job attempt.
#[async_trait]
pub trait SyncExecution: Send + Sync {
    async fn sync(
        &self,
        input: SyncInput,
        cancellation: CancellationToken,
    ) -> Result<SyncOutput, NestedExecutionError>;
}

/// Await a nested execution, ending it with
/// [`NestedExecutionError::Cancelled`] when `cancellation` fires first.
pub async fn run_nested<T, Fut>(
    execution_id: &str,
    cancellation: &CancellationToken,
    execution: Fut,
) -> Result<T, NestedExecutionError>
where
    Fut: Future<Output = Result<T, NestedExecutionError>>,
{
    tokio::select! {
        biased;
        result = execution => result,
        _ = cancellation.cancelled() => {
            debug!(execution_id = %execution_id, "Nested execution cancelled");
            Err(NestedExecutionError::Cancelled {
                execution_id: execution_id.to_string(),
            })
        }
    }
}
