//! Remote catalog access.
//!
//! [`RemoteSource`] is the paginated contract the sync engine consumes;
//! [`CatalogClient`] implements it over the REST API for every
//! [`CatalogResource`] entity type.

pub mod api_types;
pub mod client;
pub mod scopes;
pub mod types;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::cache::{Cacheable, ItemId};
use crate::error::FetchError;
use crate::selection::SortSpec;

pub use client::CatalogClient;
pub use scopes::CatalogScope;

/// Largest `limit` the list endpoints honor.
pub const MAX_PAGE_SIZE: u32 = 100;

/// One paginated list request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
  pub offset: u32,
  pub limit: u32,
  pub sort: SortSpec,
  /// Restrict the query to these ids
  pub id_filter: Option<Vec<ItemId>>,
}

/// One page of remote results.
#[derive(Debug, Clone)]
pub struct RemotePage<E> {
  pub items: Vec<E>,
  /// Total number of results the query matches
  pub total_count: u32,
}

/// Paginated remote data source for one entity type.
#[async_trait]
pub trait RemoteSource<E: Cacheable>: Send + Sync + 'static {
  async fn fetch_page(&self, request: PageRequest) -> Result<RemotePage<E>, FetchError>;

  async fn fetch_by_id(&self, id: ItemId) -> Result<E, FetchError>;
}

/// Entity types exposed by the catalog API.
pub trait CatalogResource: Cacheable {
  /// Wire shape of one result
  type Api: DeserializeOwned + Send;

  /// Path segment of the list endpoint, e.g. "characters"
  const LIST_RESOURCE: &'static str;
  /// Path segment of the detail endpoint, e.g. "character"
  const DETAIL_RESOURCE: &'static str;
  /// Resource type prefix used in detail ids, e.g. "4005"
  const TYPE_PREFIX: &'static str;
  /// Fields requested from the API
  const FIELD_LIST: &'static str;

  fn from_api(api: Self::Api) -> Self;

  /// One-line label for listings.
  fn title(&self) -> String;
}
