use crate::channel::{Drain, ResultChannel, ResultConsumer, ResultProducer};
use crate::diagnostics::{self, DiagnosticsSink, TaskEvent, TaskEventStatus, TracingSink};
use crate::error::PoolError;
use crate::handle::TaskHandle;
use crate::slots::{Occupant, SlotGuard, SlotSnapshot, SlotTable};
use crate::task::{BlockingTask, TaskLabel, TaskOutput, TaskToExecute};

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use futures::stream::{self, Stream, StreamExt};
use futures::FutureExt;
use tokio::runtime::Handle as TokioHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_POOL_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Work waiting for a slot.
enum Work<R: Send + 'static> {
  Async(TaskToExecute<R>),
  Blocking(BlockingTask<R>),
}

/// How a task's execution ended, before the pool decides what to do with it.
enum Execution<R> {
  Finished(TaskOutput<R>),
  Panicked(String),
  Interrupted,
}

/// Everything a spawned task needs besides its work.
struct TaskContext<R: Send + 'static> {
  task_id: u64,
  label: TaskLabel,
  pool_name: Arc<String>,
  token: CancellationToken,
  producer: ResultProducer<R>,
  sink: Arc<dyn DiagnosticsSink>,
  guard: SlotGuard,
}

/// A bounded-concurrency pool that runs independent tasks and collects what
/// they return.
///
/// At most `capacity` tasks run at once. `submit` waits for a free slot.
/// Results come back in completion order through [`drain_available`](Self::drain_available)
/// and [`join`](Self::join). Task failures are contained and only reported to
/// the pool's [`DiagnosticsSink`].
///
/// Dropping the pool, or calling [`close`](Self::close), discards any results
/// that were not drained. Tasks still running are left to finish; their
/// results are dropped.
pub struct SprayPool<R: Send + 'static> {
  pool_name: Arc<String>,
  slots: Arc<SlotTable>,
  producer: ResultProducer<R>,
  consumer: ResultConsumer<R>,
  sink: Arc<dyn DiagnosticsSink>,
  tokio_handle: TokioHandle,
  closed: bool,
}

impl<R: Send + 'static> fmt::Debug for SprayPool<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SprayPool")
      .field("pool_name", &self.pool_name)
      .field("slots", &self.slots)
      .field("buffered_results", &self.consumer.len())
      .finish_non_exhaustive()
  }
}

impl<R: Send + 'static> SprayPool<R> {
  /// Creates a pool that reports task outcomes through `tracing`.
  pub fn new(capacity: usize, tokio_handle: TokioHandle, pool_name: &str) -> Result<Self, PoolError> {
    Self::with_sink(capacity, tokio_handle, pool_name, Arc::new(TracingSink))
  }

  /// Creates a pool that reports task outcomes to `sink`.
  pub fn with_sink(
    capacity: usize,
    tokio_handle: TokioHandle,
    pool_name: &str,
    sink: Arc<dyn DiagnosticsSink>,
  ) -> Result<Self, PoolError> {
    if capacity == 0 {
      return Err(PoolError::InvalidCapacity(capacity));
    }
    let (producer, consumer) = ResultChannel::new().split();
    info!(%pool_name, capacity, "Pool opened.");
    Ok(Self {
      pool_name: Arc::new(pool_name.to_string()),
      slots: SlotTable::new(capacity),
      producer,
      consumer,
      sink,
      tokio_handle,
      closed: false,
    })
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn capacity(&self) -> usize {
    self.slots.capacity()
  }

  pub fn active_task_count(&self) -> usize {
    self.slots.busy_count()
  }

  pub fn idle_slot_count(&self) -> usize {
    self.capacity() - self.active_task_count()
  }

  /// Returns the slots that are busy right now and what occupies them.
  pub fn active_slots(&self) -> Vec<SlotSnapshot> {
    self.slots.snapshot()
  }

  /// Submits an async task, waiting while every slot is occupied.
  pub async fn submit(&self, label: impl Into<TaskLabel>, task_future: TaskToExecute<R>) -> Result<TaskHandle, PoolError> {
    let (occupant, label) = Self::occupant(label.into());
    let guard = self.slots.acquire(occupant.clone()).await?;
    Ok(self.spawn(guard, occupant, label, Work::Async(task_future)))
  }

  /// Submits a closure to run on the runtime's blocking thread pool, waiting
  /// while every slot is occupied.
  pub async fn submit_blocking<F>(&self, label: impl Into<TaskLabel>, task_fn: F) -> Result<TaskHandle, PoolError>
  where
    F: FnOnce() -> TaskOutput<R> + Send + 'static,
  {
    let (occupant, label) = Self::occupant(label.into());
    let guard = self.slots.acquire(occupant.clone()).await?;
    Ok(self.spawn(guard, occupant, label, Work::Blocking(Box::new(task_fn))))
  }

  /// Submits an async task only if a slot is free right now.
  ///
  /// # Errors
  /// Returns `PoolError::AtCapacity` when every slot is occupied.
  pub fn try_submit(&self, label: impl Into<TaskLabel>, task_future: TaskToExecute<R>) -> Result<TaskHandle, PoolError> {
    let (occupant, label) = Self::occupant(label.into());
    let guard = self.slots.try_acquire(occupant.clone())?;
    Ok(self.spawn(guard, occupant, label, Work::Async(task_future)))
  }

  /// Interrupts every running task submitted with `label`. Returns how many were signalled.
  pub fn cancel_tasks_by_label(&self, label: &str) -> usize {
    let cancelled = self.slots.cancel_label(label);
    info!(pool_name = %self.pool_name, %label, cancelled, "Requested interruption of labelled tasks.");
    cancelled
  }

  /// Returns the results buffered right now, without waiting for running tasks.
  pub fn drain_available(&mut self) -> Drain<'_, R> {
    Drain {
      consumer: &mut self.consumer,
    }
  }

  /// Yields every result still to come.
  ///
  /// The stream waits for results until no slot is occupied, then drains
  /// what is left in the channel and ends. After it ends, `drain_available`
  /// yields nothing.
  pub fn join(&mut self) -> impl Stream<Item = R> + '_ {
    let slots = self.slots.clone();
    debug!(pool_name = %self.pool_name, active = slots.busy_count(), "Joining pool.");
    stream::unfold((&mut self.consumer, false), move |(consumer, settled)| {
      let slots = slots.clone();
      async move {
        if settled {
          return consumer.try_next().map(|value| (value, (consumer, true)));
        }
        let received = tokio::select! {
          biased;
          Some(value) = consumer.recv() => Some(value),
          _ = slots.wait_idle() => None,
        };
        match received {
          Some(value) => Some((value, (consumer, false))),
          None => {
            trace!("Every slot is idle. Draining the remainder.");
            consumer.try_next().map(|value| (value, (consumer, true)))
          }
        }
      }
    })
  }

  /// Collects [`join`](Self::join) into a `Vec`.
  pub async fn join_all(&mut self) -> Vec<R> {
    self.join().collect().await
  }

  /// Closes the pool, discarding results that were never drained.
  /// Returns how many were discarded.
  pub fn close(mut self) -> usize {
    self.discard_remaining()
  }

  fn discard_remaining(&mut self) -> usize {
    if self.closed {
      return 0;
    }
    self.closed = true;
    let discarded = self.consumer.close_and_discard();
    info!(
      pool_name = %self.pool_name,
      discarded,
      still_running = self.slots.busy_count(),
      "Pool closed."
    );
    discarded
  }

  fn occupant(label: TaskLabel) -> (Occupant, TaskLabel) {
    let occupant = Occupant {
      task_id: NEXT_POOL_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
      label: label.clone(),
      token: CancellationToken::new(),
      started: Instant::now(),
    };
    (occupant, label)
  }

  fn spawn(&self, guard: SlotGuard, occupant: Occupant, label: TaskLabel, work: Work<R>) -> TaskHandle {
    let slot = guard.index();
    let task_id = occupant.task_id;
    let token = occupant.token;
    debug!(pool_name = %self.pool_name, %task_id, slot, %label, "Dispatching task to slot.");

    let context = TaskContext {
      task_id,
      label: label.clone(),
      pool_name: self.pool_name.clone(),
      token: token.clone(),
      producer: self.producer.clone(),
      sink: self.sink.clone(),
      guard,
    };

    let join_handle = self.tokio_handle.spawn(
      Self::run_task(context, work).instrument(info_span!(
        "pool_task",
        pool_name = %*self.pool_name,
        %task_id,
        slot,
        label = %label
      )),
    );

    TaskHandle {
      task_id,
      slot,
      label,
      cancellation_token: token,
      join_handle,
    }
  }

  async fn run_task(context: TaskContext<R>, work: Work<R>) -> Result<(), PoolError> {
    let execution = match work {
      Work::Async(task_future) => {
        tokio::select! {
          biased;
          _ = context.token.cancelled() => Execution::Interrupted,
          outcome = AssertUnwindSafe(task_future).catch_unwind() => match outcome {
            Ok(output) => Execution::Finished(output),
            Err(payload) => Execution::Panicked(diagnostics::panic_detail(&*payload)),
          }
        }
      }
      Work::Blocking(task_fn) => {
        if context.token.is_cancelled() {
          Execution::Interrupted
        } else {
          let outcome = tokio::task::spawn_blocking(move || std::panic::catch_unwind(AssertUnwindSafe(task_fn))).await;
          match outcome {
            Ok(Ok(output)) => Execution::Finished(output),
            Ok(Err(payload)) => Execution::Panicked(diagnostics::panic_detail(&*payload)),
            Err(join_error) => Execution::Panicked(join_error.to_string()),
          }
        }
      }
    };
    Self::settle(context, execution)
  }

  /// Pushes the value, reports the outcome, then frees the slot.
  fn settle(context: TaskContext<R>, execution: Execution<R>) -> Result<(), PoolError> {
    let status = match execution {
      Execution::Finished(Ok(Some(value))) => match context.producer.send(value) {
        Ok(()) => TaskEventStatus::Delivered,
        Err(_dropped) => TaskEventStatus::Discarded,
      },
      Execution::Finished(Ok(None)) => TaskEventStatus::Empty,
      Execution::Finished(Err(err)) => TaskEventStatus::Failed {
        detail: diagnostics::error_detail(&*err),
      },
      Execution::Panicked(detail) => TaskEventStatus::Failed { detail },
      Execution::Interrupted => TaskEventStatus::Interrupted,
    };
    let interrupted = status == TaskEventStatus::Interrupted;

    diagnostics::dispatch(
      &context.sink,
      TaskEvent {
        task_id: context.task_id,
        pool_name: context.pool_name,
        label: context.label,
        slot: context.guard.index(),
        status,
        completion_time: SystemTime::now(),
      },
    );
    drop(context.guard);

    if interrupted {
      Err(PoolError::TaskInterrupted)
    } else {
      Ok(())
    }
  }
}

impl<R: Send + 'static> Drop for SprayPool<R> {
  fn drop(&mut self) {
    if !self.closed {
      trace!(pool_name = %*self.pool_name, "SprayPool dropped without close. Discarding buffered results.");
    }
    self.discard_remaining();
  }
}
