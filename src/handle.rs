use crate::error::PoolError;
use crate::task::TaskLabel;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing;

/// A handle to a task submitted to a `SprayPool`.
///
/// Results never travel through the handle; they go to the pool's result
/// channel. The handle exists to interrupt the task and to learn whether it
/// was interrupted. Dropping it detaches the task.
#[derive(Debug)]
pub struct TaskHandle {
  pub(crate) task_id: u64,
  pub(crate) slot: usize,
  pub(crate) label: TaskLabel,
  pub(crate) cancellation_token: CancellationToken,
  pub(crate) join_handle: JoinHandle<Result<(), PoolError>>,
}

impl TaskHandle {
  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.task_id
  }

  /// Returns the index of the slot the task occupies.
  pub fn slot(&self) -> usize {
    self.slot
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn is_cancellation_requested(&self) -> bool {
    self.cancellation_token.is_cancelled()
  }

  pub fn is_finished(&self) -> bool {
    self.join_handle.is_finished()
  }

  /// Requests interruption of this task.
  ///
  /// An async task is dropped at its next suspension point. A blocking task
  /// is only stopped if it has not started yet.
  pub fn cancel(&self) {
    tracing::debug!(task_id = %self.task_id, "TaskHandle: Interruption requested.");
    self.cancellation_token.cancel();
  }

  /// Waits for the task's execution wrapper to return.
  ///
  /// # Errors
  /// Returns `PoolError::TaskInterrupted` if the task was interrupted.
  /// Returns `PoolError::TaskJoinError` if the execution context itself was torn down
  /// (for example by the runtime shutting down).
  /// A task that failed is not an error here: failures are contained by the pool.
  pub async fn wait(self) -> Result<(), PoolError> {
    match self.join_handle.await {
      Ok(outcome) => outcome,
      Err(join_error) => {
        tracing::warn!(task_id = %self.task_id, "Task execution context join error: {}", join_error);
        Err(PoolError::TaskJoinError(join_error.to_string()))
      }
    }
  }
}
