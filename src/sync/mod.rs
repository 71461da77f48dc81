//! Incremental synchronization of paginated remote lists into the cache.
//!
//! A [`SyncCoordinator`] owns the writes to one scope of the item cache and
//! remote key store. Each load request is planned against the current
//! selection snapshot and the cached window, fetched from the scope's remote
//! source, and committed in one atomic batch.

mod in_flight;
mod mediator;
pub mod remote_keys;

use async_trait::async_trait;

use crate::cache::{CachedItem, Cacheable, Listed, RemoteKey, ScopeKey};
use crate::catalog::{PageRequest, RemotePage};
use crate::error::FetchError;
use crate::selection::{SelectionEntry, SelectionSnapshot};

pub use in_flight::InFlight;
pub use mediator::SyncCoordinator;
pub use remote_keys::PageWindow;

/// Kind of load a consumer asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadType {
  /// Rebuild the window from offset zero
  Refresh,
  /// Extend the window past its tail
  Append,
}

/// A load request issued by the paging façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadWindow {
  pub load_type: LoadType,
  /// Read position of the consumer when the load was issued
  pub anchor_position: Option<usize>,
}

impl LoadWindow {
  pub fn refresh() -> Self {
    Self {
      load_type: LoadType::Refresh,
      anchor_position: None,
    }
  }

  pub fn append() -> Self {
    Self {
      load_type: LoadType::Append,
      anchor_position: None,
    }
  }

  pub fn anchored(mut self, position: usize) -> Self {
    self.anchor_position = Some(position);
    self
  }
}

/// Terminal state of a successful sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  /// A page was fetched and committed
  Success { end_of_pagination_reached: bool },
  /// Nothing left to fetch; no network call was made
  EndOfData,
  /// Another run for the same scope was in progress
  Coalesced,
}

impl SyncOutcome {
  pub fn end_of_pagination_reached(&self) -> bool {
    match self {
      Self::Success {
        end_of_pagination_reached,
      } => *end_of_pagination_reached,
      Self::EndOfData => true,
      Self::Coalesced => false,
    }
  }
}

/// Capabilities one list scope plugs into the generic coordinator.
#[async_trait]
pub trait ListScope: Send + Sync + 'static {
  type Entity: Cacheable;

  fn scope_key(&self) -> ScopeKey;

  fn page_size(&self) -> u32;

  /// Current selection and sort. Selection-scoped lists page through the
  /// entries; catalog lists only use the sort.
  fn snapshot(&self) -> SelectionSnapshot;

  async fn fetch_page(&self, request: PageRequest) -> Result<RemotePage<Self::Entity>, FetchError>;

  fn to_cache_row(
    &self,
    entity: Self::Entity,
    index: i64,
    selection: Option<&SelectionEntry>,
  ) -> CachedItem<Listed<Self::Entity>> {
    CachedItem {
      index,
      payload: Listed {
        entity,
        date_added: selection.map(|s| s.date_added),
      },
    }
  }

  fn to_remote_key(&self, entity: &Self::Entity, window: &PageWindow) -> RemoteKey {
    RemoteKey {
      id: entity.cache_id(),
      prev_offset: window.prev_offset,
      next_offset: window.next_offset,
    }
  }
}
