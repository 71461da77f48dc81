//! Core traits and types for the list cache.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Remote identifier of a catalog entity.
pub type ItemId = i64;

/// Trait for entities that can be cached.
///
/// Implementors provide their remote id and the entity type name used to
/// partition the cache tables.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier for this entity within its entity type
  fn cache_id(&self) -> ItemId;

  /// Entity type name for storage organization (e.g., "character", "volume")
  fn entity_type() -> &'static str;
}

/// What a cached list represents for its entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListPurpose {
  /// Entities the user selected, paged in selection order
  Favorites,
  /// The full remote catalog in remote order
  Catalog,
}

impl ListPurpose {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Favorites => "favorites",
      Self::Catalog => "catalog",
    }
  }
}

/// Identifies one independent cache partition: an (entity type, purpose) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeKey {
  pub entity_type: &'static str,
  pub purpose: ListPurpose,
}

impl ScopeKey {
  pub fn new(entity_type: &'static str, purpose: ListPurpose) -> Self {
    Self {
      entity_type,
      purpose,
    }
  }

  pub fn favorites<T: Cacheable>() -> Self {
    Self::new(T::entity_type(), ListPurpose::Favorites)
  }

  pub fn catalog<T: Cacheable>() -> Self {
    Self::new(T::entity_type(), ListPurpose::Catalog)
  }

  pub fn is_selection_scoped(&self) -> bool {
    self.purpose == ListPurpose::Favorites
  }
}

impl fmt::Display for ScopeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.entity_type, self.purpose.as_str())
  }
}

/// A materialized list row.
///
/// `index` orders rows within a scope and is assigned at insertion time.
/// Rows are never updated in place; a changed entity is deleted and reinserted.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedItem<T> {
  pub index: i64,
  pub payload: T,
}

/// Offset window an item was fetched in.
///
/// `prev_offset == None` marks the head of the known window and
/// `next_offset == None` marks the end of pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteKey {
  pub id: ItemId,
  pub prev_offset: Option<u32>,
  pub next_offset: Option<u32>,
}

/// A remote entity together with locally attached list metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listed<E> {
  pub entity: E,
  /// When the entity was added to the selection, for selection-scoped lists
  #[serde(default)]
  pub date_added: Option<DateTime<Utc>>,
}

impl<E: Cacheable> Cacheable for Listed<E> {
  fn cache_id(&self) -> ItemId {
    self.entity.cache_id()
  }

  fn entity_type() -> &'static str {
    E::entity_type()
  }
}
