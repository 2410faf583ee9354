use crate::error::PoolError;
use crate::task::TaskLabel;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// What a busy slot knows about the task running in it.
#[derive(Debug, Clone)]
pub(crate) struct Occupant {
  pub(crate) task_id: u64,
  pub(crate) label: TaskLabel,
  pub(crate) token: CancellationToken,
  pub(crate) started: Instant,
}

/// A point-in-time view of one busy slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
  pub index: usize,
  pub task_id: u64,
  pub label: TaskLabel,
  pub running_for: Duration,
}

/// Fixed-size table of worker slots.
///
/// The table is the only record of what is running. A slot is claimed while
/// holding one of `capacity` semaphore permits, so a free permit always
/// implies an idle slot. Releasing a slot clears it before the permit goes
/// back to the semaphore.
pub(crate) struct SlotTable {
  slots: Mutex<Vec<Option<Occupant>>>,
  permits: Arc<Semaphore>,
  idle: Notify,
}

impl fmt::Debug for SlotTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SlotTable")
      .field("capacity", &self.capacity())
      .field("busy", &self.busy_count())
      .field("available_permits", &self.permits.available_permits())
      .finish()
  }
}

impl SlotTable {
  pub(crate) fn new(capacity: usize) -> Arc<Self> {
    Arc::new(Self {
      slots: Mutex::new(vec![None; capacity]),
      permits: Arc::new(Semaphore::new(capacity)),
      idle: Notify::new(),
    })
  }

  pub(crate) fn capacity(&self) -> usize {
    self.slots.lock().len()
  }

  pub(crate) fn busy_count(&self) -> usize {
    self.slots.lock().iter().filter(|slot| slot.is_some()).count()
  }

  pub(crate) fn is_idle(&self) -> bool {
    self.slots.lock().iter().all(Option::is_none)
  }

  /// Waits for a permit, then places `occupant` on the first idle slot.
  pub(crate) async fn acquire(self: &Arc<Self>, occupant: Occupant) -> Result<SlotGuard, PoolError> {
    let permit = self
      .permits
      .clone()
      .acquire_owned()
      .await
      .map_err(|_| PoolError::SemaphoreClosed)?;
    self.claim(permit, occupant)
  }

  /// Like `acquire`, but fails with `AtCapacity` instead of waiting.
  pub(crate) fn try_acquire(self: &Arc<Self>, occupant: Occupant) -> Result<SlotGuard, PoolError> {
    let permit = match self.permits.clone().try_acquire_owned() {
      Ok(permit) => permit,
      Err(TryAcquireError::NoPermits) => return Err(PoolError::AtCapacity),
      Err(TryAcquireError::Closed) => return Err(PoolError::SemaphoreClosed),
    };
    self.claim(permit, occupant)
  }

  fn claim(self: &Arc<Self>, permit: OwnedSemaphorePermit, mut occupant: Occupant) -> Result<SlotGuard, PoolError> {
    occupant.started = Instant::now();
    let mut slots = self.slots.lock();
    let Some(index) = slots.iter().position(Option::is_none) else {
      warn!(task_id = occupant.task_id, "Permit granted with every slot occupied.");
      return Err(PoolError::SlotTableExhausted);
    };
    trace!(task_id = occupant.task_id, slot = index, "Slot claimed.");
    slots[index] = Some(occupant);
    Ok(SlotGuard {
      table: self.clone(),
      index,
      _permit: permit,
    })
  }

  fn release(&self, index: usize) {
    let now_idle = {
      let mut slots = self.slots.lock();
      if let Some(occupant) = slots[index].take() {
        trace!(task_id = occupant.task_id, slot = index, "Slot released.");
      }
      slots.iter().all(Option::is_none)
    };
    if now_idle {
      self.idle.notify_waiters();
    }
  }

  /// Resolves once no slot is occupied.
  pub(crate) async fn wait_idle(&self) {
    loop {
      // Registered before the check so a release in between is not missed.
      let notified = self.idle.notified();
      if self.is_idle() {
        return;
      }
      notified.await;
    }
  }

  /// Signals the tokens of every running task whose label matches.
  pub(crate) fn cancel_label(&self, label: &str) -> usize {
    let slots = self.slots.lock();
    let mut cancelled = 0;
    for occupant in slots.iter().flatten() {
      if occupant.label == label {
        occupant.token.cancel();
        cancelled += 1;
      }
    }
    cancelled
  }

  pub(crate) fn snapshot(&self) -> Vec<SlotSnapshot> {
    let slots = self.slots.lock();
    slots
      .iter()
      .enumerate()
      .filter_map(|(index, slot)| {
        slot.as_ref().map(|occupant| SlotSnapshot {
          index,
          task_id: occupant.task_id,
          label: occupant.label.clone(),
          running_for: occupant.started.elapsed(),
        })
      })
      .collect()
  }
}

/// Occupancy of one slot. Dropping it frees the slot, then the permit.
#[derive(Debug)]
pub(crate) struct SlotGuard {
  table: Arc<SlotTable>,
  index: usize,
  _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
  pub(crate) fn index(&self) -> usize {
    self.index
  }
}

impl Drop for SlotGuard {
  fn drop(&mut self) {
    self.table.release(self.index);
  }
}
