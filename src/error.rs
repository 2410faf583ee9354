use thiserror::Error;

/// Errors that can occur within the spray pool.
#[derive(Error, Debug, PartialEq)]
pub enum PoolError {
  #[error("Pool capacity must be a positive number of slots, got {0}")]
  InvalidCapacity(usize),

  #[error("All pool slots are occupied")]
  AtCapacity,

  #[error("A capacity permit was granted but no idle slot was found in the slot table")]
  SlotTableExhausted,

  #[error("Pool's internal semaphore was closed unexpectedly")]
  SemaphoreClosed,

  #[error("Task was interrupted")]
  TaskInterrupted,

  #[error("Task execution context could not be joined: {0}")]
  TaskJoinError(String),
}
