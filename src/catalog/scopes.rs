//! List scope implementations for catalog entity types.

use std::marker::PhantomData;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{PageRequest, RemotePage, RemoteSource, MAX_PAGE_SIZE};
use crate::cache::{Cacheable, ListPurpose, ScopeKey};
use crate::error::FetchError;
use crate::selection::SelectionSnapshot;
use crate::sync::ListScope;

/// A paged list of one entity type, backed by a remote source.
///
/// One type serves every entity type; the scope purpose decides whether it
/// pages through the user's selection or the whole catalog.
pub struct CatalogScope<E, R> {
  key: ScopeKey,
  remote: R,
  page_size: u32,
  snapshots: watch::Receiver<SelectionSnapshot>,
  _entity: PhantomData<fn() -> E>,
}

impl<E: Cacheable, R: RemoteSource<E>> CatalogScope<E, R> {
  pub fn new(
    purpose: ListPurpose,
    remote: R,
    page_size: u32,
    snapshots: watch::Receiver<SelectionSnapshot>,
  ) -> Self {
    Self {
      key: ScopeKey::new(E::entity_type(), purpose),
      remote,
      page_size: page_size.clamp(1, MAX_PAGE_SIZE),
      snapshots,
      _entity: PhantomData,
    }
  }

  /// Favorites of `E`, paged in selection order
  pub fn favorites(
    remote: R,
    page_size: u32,
    snapshots: watch::Receiver<SelectionSnapshot>,
  ) -> Self {
    Self::new(ListPurpose::Favorites, remote, page_size, snapshots)
  }

  /// All of `E`, paged in remote order
  pub fn catalog(
    remote: R,
    page_size: u32,
    snapshots: watch::Receiver<SelectionSnapshot>,
  ) -> Self {
    Self::new(ListPurpose::Catalog, remote, page_size, snapshots)
  }
}

#[async_trait]
impl<E: Cacheable, R: RemoteSource<E>> ListScope for CatalogScope<E, R> {
  type Entity = E;

  fn scope_key(&self) -> ScopeKey {
    self.key
  }

  fn page_size(&self) -> u32 {
    self.page_size
  }

  fn snapshot(&self) -> SelectionSnapshot {
    self.snapshots.borrow().clone()
  }

  async fn fetch_page(&self, request: PageRequest) -> Result<RemotePage<E>, FetchError> {
    self.remote.fetch_page(request).await
  }
}
