use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Process-wide idle flag with broadcast wake-up.
///
/// Backed by a `watch` channel: every waiter parked in [`IdleSignal::wait_idle`]
/// is released together when the flag flips to idle, and a later switch back to
/// busy re-arms the wait for new waiters. The flag has its own lock, separate
/// from the queue's coordinating lock.
#[derive(Debug)]
pub(crate) struct IdleSignal {
  tx: watch::Sender<bool>,
}

impl IdleSignal {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(false);
    Self { tx }
  }

  /// Updates the flag. Returns true if the value changed.
  pub fn set(&self, idle: bool) -> bool {
    self.tx.send_if_modified(|current| {
      if *current == idle {
        false
      } else {
        *current = idle;
        true
      }
    })
  }

  pub fn is_idle(&self) -> bool {
    *self.tx.borrow()
  }

  /// Waits until the system is idle or `shutdown` fires.
  /// Returns true if idle was observed.
  pub async fn wait_idle(&self, shutdown: &CancellationToken) -> bool {
    let mut rx = self.tx.subscribe();
    tokio::select! {
      biased;
      _ = shutdown.cancelled() => false,
      res = rx.wait_for(|idle| *idle) => res.is_ok(),
    }
  }
}
