use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, error, trace, warn};

use crate::task::TaskLabel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEventStatus {
  /// The task returned a value and it was pushed to the result channel.
  Delivered,
  /// The task completed without producing anything.
  Empty,
  /// The task raised an error or panicked. Nothing was pushed.
  Failed { detail: String },
  /// The task's cancellation token fired before it finished.
  Interrupted,
  /// The task returned a value after the pool was closed.
  Discarded,
}

#[derive(Debug, Clone)]
pub struct TaskEvent {
  pub task_id: u64,
  pub pool_name: Arc<String>,
  pub label: TaskLabel,
  pub slot: usize,
  pub status: TaskEventStatus,
  pub completion_time: SystemTime,
}

/// Receives one event per finished task.
///
/// This is the only place task failures become visible: the result channel
/// carries values, never errors. Sinks are called from the worker that ran
/// the task, so they should return quickly.
pub trait DiagnosticsSink: Send + Sync + 'static {
  fn record(&self, event: &TaskEvent);
}

impl<F> DiagnosticsSink for F
where
  F: Fn(&TaskEvent) + Send + Sync + 'static,
{
  fn record(&self, event: &TaskEvent) {
    self(event)
  }
}

/// Default sink: turns task events into `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
  fn record(&self, event: &TaskEvent) {
    let pool_name = &*event.pool_name;
    match &event.status {
      TaskEventStatus::Delivered => {
        trace!(%pool_name, task_id = event.task_id, slot = event.slot, label = %event.label, "Task delivered a result.")
      }
      TaskEventStatus::Empty => {
        trace!(%pool_name, task_id = event.task_id, slot = event.slot, label = %event.label, "Task finished without a result.")
      }
      TaskEventStatus::Failed { detail } => {
        error!(%pool_name, task_id = event.task_id, slot = event.slot, label = %event.label, "Task failed: {}", detail)
      }
      TaskEventStatus::Interrupted => {
        warn!(%pool_name, task_id = event.task_id, slot = event.slot, label = %event.label, "Task interrupted.")
      }
      TaskEventStatus::Discarded => {
        debug!(%pool_name, task_id = event.task_id, slot = event.slot, label = %event.label, "Pool closed before the task's result could be delivered.")
      }
    }
  }
}

/// Calls the sink, keeping a panicking sink from taking the worker down with it.
pub(crate) fn dispatch(sink: &Arc<dyn DiagnosticsSink>, event: TaskEvent) {
  let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink.record(&event)));
  if result.is_err() {
    error!(
      pool_name = %*event.pool_name,
      task_id = event.task_id,
      "A diagnostics sink panicked while recording a task event."
    );
  }
}

impl fmt::Display for TaskEventStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TaskEventStatus::Delivered => f.write_str("delivered"),
      TaskEventStatus::Empty => f.write_str("empty"),
      TaskEventStatus::Failed { detail } => write!(f, "failed: {}", detail),
      TaskEventStatus::Interrupted => f.write_str("interrupted"),
      TaskEventStatus::Discarded => f.write_str("discarded"),
    }
  }
}

/// Renders a panic payload the way `std` prints it, when it is a string.
pub(crate) fn panic_detail(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    format!("panicked: {}", message)
  } else if let Some(message) = payload.downcast_ref::<String>() {
    format!("panicked: {}", message)
  } else {
    "panicked with a non-string payload".to_string()
  }
}

/// Renders an error together with its `source()` chain.
pub(crate) fn error_detail(err: &(dyn std::error::Error + 'static)) -> String {
  let mut detail = err.to_string();
  let mut source = err.source();
  while let Some(cause) = source {
    detail.push_str(": ");
    detail.push_str(&cause.to_string());
    source = cause.source();
  }
  detail
}
