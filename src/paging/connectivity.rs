use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Network reachability signal.
///
/// Whoever can observe the network flips it; pagers subscribe to it and
/// retry a failed load when the network comes back.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        return false;
      }
      *current = online;
      true
    });
    if changed {
      info!(online, "connectivity changed");
    }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Run `check` every `interval` and publish its result. The task runs
  /// until the returned handle is aborted.
  pub fn monitor<F, Fut>(&self, interval: Duration, check: F) -> JoinHandle<()>
  where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send,
  {
    let this = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        this.set_online(check().await);
      }
    })
  }

  /// Wait until the network is reported online. Returns false on timeout.
  pub async fn wait_online(&self, timeout: Duration) -> bool {
    let mut rx = self.subscribe();
    let online = matches!(
      tokio::time::timeout(timeout, rx.wait_for(|online| *online)).await,
      Ok(Ok(_))
    );
    online
  }
}
