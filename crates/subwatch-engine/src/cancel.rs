use std::sync::Arc;

use tokio::sync::watch;

/// Cooperative cancellation shared by the watch loop and the process.
///
/// Once cancelled it stays cancelled. Clones observe the same signal.
#[derive(Clone, Debug)]
pub struct CancelToken {
  tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
  pub fn new() -> Self {
    let (tx, _) = watch::channel(false);
    Self { tx: Arc::new(tx) }
  }

  pub fn cancel(&self) { self.tx.send_replace(true); }

  pub fn is_cancelled(&self) -> bool { *self.tx.borrow() }

  /// Resolves once [`cancel`](Self::cancel) has been called.
  pub async fn cancelled(&self) {
    let mut rx = self.tx.subscribe();
    let _ = rx.wait_for(|cancelled| *cancelled).await;
  }
}

impl Default for CancelToken {
  fn default() -> Self { Self::new() }
}
