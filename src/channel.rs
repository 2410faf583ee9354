use std::fmt;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

/// Multi-producer, single-consumer conduit carrying task results back to the
/// pool's owner in completion order.
#[derive(Debug)]
pub(crate) struct ResultChannel<R: Send + 'static> {
  tx: UnboundedSender<R>,
  rx: UnboundedReceiver<R>,
}

impl<R: Send + 'static> ResultChannel<R> {
  pub(crate) fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Splits the channel into its producer and consumer halves.
  pub(crate) fn split(self) -> (ResultProducer<R>, ResultConsumer<R>) {
    (ResultProducer { tx: self.tx }, ResultConsumer { rx: self.rx })
  }
}

/// The producer half. Cloned into every running task.
pub(crate) struct ResultProducer<R: Send + 'static> {
  tx: UnboundedSender<R>,
}

impl<R: Send + 'static> Clone for ResultProducer<R> {
  fn clone(&self) -> Self {
    Self { tx: self.tx.clone() }
  }
}

impl<R: Send + 'static> fmt::Debug for ResultProducer<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultProducer")
      .field("closed", &self.tx.is_closed())
      .finish_non_exhaustive()
  }
}

impl<R: Send + 'static> ResultProducer<R> {
  /// Pushes a result. Hands the value back if the consumer has gone away.
  pub(crate) fn send(&self, value: R) -> Result<(), R> {
    self.tx.send(value).map_err(|e| e.0)
  }
}

/// The consumer half. Not cloneable, which keeps a single reader.
#[derive(Debug)]
pub(crate) struct ResultConsumer<R: Send + 'static> {
  rx: UnboundedReceiver<R>,
}

impl<R: Send + 'static> ResultConsumer<R> {
  /// Takes one buffered result without waiting.
  pub(crate) fn try_next(&mut self) -> Option<R> {
    match self.rx.try_recv() {
      Ok(value) => Some(value),
      Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
    }
  }

  /// Waits for the next result. `None` once every producer is gone.
  pub(crate) async fn recv(&mut self) -> Option<R> {
    self.rx.recv().await
  }

  /// Refuses further sends and throws away whatever is buffered.
  pub(crate) fn close_and_discard(&mut self) -> usize {
    self.rx.close();
    let mut discarded = 0;
    while self.try_next().is_some() {
      discarded += 1;
    }
    discarded
  }

  pub(crate) fn len(&self) -> usize {
    self.rx.len()
  }
}

/// Iterator over the results buffered at the time of each `next` call.
///
/// Never waits. Returned by [`SprayPool::drain_available`](crate::SprayPool::drain_available).
#[derive(Debug)]
pub struct Drain<'a, R: Send + 'static> {
  pub(crate) consumer: &'a mut ResultConsumer<R>,
}

impl<R: Send + 'static> Iterator for Drain<'_, R> {
  type Item = R;

  fn next(&mut self) -> Option<R> {
    self.consumer.try_next()
  }
}
