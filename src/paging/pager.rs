use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::LoadState;
use crate::cache::{CacheStorage, Listed};
use crate::error::StoreError;
use crate::selection::Invalidation;
use crate::sync::{ListScope, LoadType, LoadWindow, SyncCoordinator, SyncOutcome};

/// Restartable cursor over one cached list scope.
pub struct Pager<L: ListScope, S: CacheStorage> {
  coordinator: SyncCoordinator<L, S>,
  /// Append once the reader is this close to the end of the buffer
  prefetch_distance: usize,
  state: watch::Sender<LoadState>,
  last_failed: Option<LoadWindow>,
  cursor: usize,
  invalidations: Option<mpsc::UnboundedReceiver<Invalidation>>,
  connectivity: Option<watch::Receiver<bool>>,
  online: bool,
}

impl<L: ListScope, S: CacheStorage> Pager<L, S> {
  pub fn new(coordinator: SyncCoordinator<L, S>, prefetch_distance: usize) -> Self {
    let (state, _) = watch::channel(LoadState::default());
    Self {
      coordinator,
      prefetch_distance,
      state,
      last_failed: None,
      cursor: 0,
      invalidations: None,
      connectivity: None,
      online: true,
    }
  }

  /// Refresh whenever an invalidation for this scope arrives.
  pub fn with_invalidations(mut self, invalidations: mpsc::UnboundedReceiver<Invalidation>) -> Self {
    self.invalidations = Some(invalidations);
    self
  }

  /// Retry a failed load once each time the network comes back.
  pub fn with_connectivity(mut self, mut connectivity: watch::Receiver<bool>) -> Self {
    self.online = *connectivity.borrow_and_update();
    self.connectivity = Some(connectivity);
    self
  }

  pub fn load_state(&self) -> LoadState {
    self.state.borrow().clone()
  }

  /// Position the next call to [`next_item`](Self::next_item) reads.
  pub fn position(&self) -> usize {
    self.cursor
  }

  /// Rebuild the list from its first page.
  pub async fn refresh(&mut self) -> LoadState {
    let state = self.load(LoadWindow::refresh().anchored(self.cursor)).await;
    self.clamp_cursor().await;
    state
  }

  /// Extend the list past its last cached item.
  pub async fn append(&mut self) -> LoadState {
    self.load(LoadWindow::append().anchored(self.cursor)).await
  }

  /// Re-issue the last failed load. Does nothing if the last load succeeded.
  pub async fn retry(&mut self) -> LoadState {
    let Some(window) = self.last_failed else {
      return self.load_state();
    };
    info!(scope = %self.coordinator.scope_key(), load_type = ?window.load_type, "retrying load");
    let state = self.load(window).await;
    if window.load_type == LoadType::Refresh {
      self.clamp_cursor().await;
    }
    state
  }

  /// Item at `position`, appending first when the reader nears the end of
  /// the buffer.
  ///
  /// Load failures show up in [`load_state`](Self::load_state); only cache
  /// read failures are returned here.
  pub async fn get(&mut self, position: usize) -> Result<Option<Listed<L::Entity>>, StoreError> {
    let buffered = self.buffered().await?;
    if position + self.prefetch_distance >= buffered && self.can_append() {
      debug!(position, buffered, "prefetching next page");
      self.append().await;
    }

    let key = self.coordinator.scope_key();
    let rows = self
      .with_store(move |s| s.select_ordered_window::<Listed<L::Entity>>(key, position, 1))
      .await?;
    Ok(rows.into_iter().next().map(|row| row.payload))
  }

  /// Item under the cursor, advancing it. Returns None at the end of the
  /// list, or when a load failed before more items arrived.
  pub async fn next_item(&mut self) -> Result<Option<Listed<L::Entity>>, StoreError> {
    let item = self.get(self.cursor).await?;
    if item.is_some() {
      self.cursor += 1;
    }
    Ok(item)
  }

  pub fn rewind(&mut self) {
    self.cursor = 0;
  }

  /// Everything currently buffered, in list order.
  pub async fn window(&self) -> Result<Vec<Listed<L::Entity>>, StoreError> {
    let key = self.coordinator.scope_key();
    let rows = self
      .with_store(move |s| {
        let count = s.count(key)?;
        s.select_ordered_window::<Listed<L::Entity>>(key, 0, count)
      })
      .await?;
    Ok(rows.into_iter().map(|row| row.payload).collect())
  }

  /// Handle pending invalidations and connectivity changes.
  ///
  /// Returns true if a load was issued.
  pub async fn pump(&mut self) -> bool {
    let key = self.coordinator.scope_key();

    let mut invalidated = false;
    if let Some(rx) = self.invalidations.as_mut() {
      while let Ok(invalidation) = rx.try_recv() {
        if invalidation.scope == key {
          debug!(scope = %key, reason = ?invalidation.reason, "scope invalidated");
          invalidated = true;
        }
      }
    }

    let mut reconnected = false;
    if let Some(rx) = self.connectivity.as_mut() {
      if rx.has_changed().unwrap_or(false) {
        let online = *rx.borrow_and_update();
        reconnected = online && !self.online;
        self.online = online;
      }
    }

    if invalidated {
      self.refresh().await;
      return true;
    }
    if reconnected && self.state.borrow().is_error() {
      info!(scope = %key, "network is back, retrying failed load");
      self.retry().await;
      return true;
    }
    false
  }

  async fn load(&mut self, window: LoadWindow) -> LoadState {
    let previous = self.state.send_replace(LoadState::Loading);

    let next = match self.coordinator.load(window).await {
      Ok(SyncOutcome::Coalesced) => previous,
      Ok(outcome) => {
        self.last_failed = None;
        LoadState::NotLoading {
          end_of_pagination_reached: outcome.end_of_pagination_reached(),
        }
      }
      Err(e) => {
        warn!(scope = %self.coordinator.scope_key(), error = %e, "load failed");
        self.last_failed = Some(window);
        LoadState::Error(Arc::new(e))
      }
    };

    self.state.send_replace(next.clone());
    next
  }

  fn can_append(&self) -> bool {
    matches!(
      *self.state.borrow(),
      LoadState::NotLoading {
        end_of_pagination_reached: false
      }
    )
  }

  async fn buffered(&self) -> Result<usize, StoreError> {
    let key = self.coordinator.scope_key();
    self.with_store(move |s| s.count(key)).await
  }

  async fn clamp_cursor(&mut self) {
    match self.buffered().await {
      Ok(buffered) => self.cursor = self.cursor.min(buffered),
      Err(e) => warn!(error = %e, "could not read buffer size"),
    }
  }

  async fn with_store<T, F>(&self, f: F) -> Result<T, StoreError>
  where
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T, StoreError> + Send + 'static,
  {
    let storage = Arc::clone(self.coordinator.storage());
    tokio::task::spawn_blocking(move || f(&storage)).await?
  }
}
