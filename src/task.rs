use std::future::Future;
use std::pin::Pin;

/// A descriptive label for a task, used to tag spans and diagnostics.
pub type TaskLabel = String;

/// The failure type a task may raise. Any error that can cross threads fits.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a task hands back to the pool.
///
/// `Ok(Some(value))` is delivered through the result channel, `Ok(None)`
/// contributes nothing, and `Err(_)` is contained by the pool and reported
/// only to the diagnostics sink.
pub type TaskOutput<R> = Result<Option<R>, TaskError>;

/// The type of future that the pool executes.
pub type TaskToExecute<R> = Pin<Box<dyn Future<Output = TaskOutput<R>> + Send + 'static>>;

/// The type of closure the pool runs on the blocking thread pool.
pub type BlockingTask<R> = Box<dyn FnOnce() -> TaskOutput<R> + Send + 'static>;
