//! Selection sets and sort preferences.
//!
//! The user's favorites and preferred sort order live outside the sync
//! engine. This module stores them, exposes them as streams, and turns
//! their changes into [`Invalidation`] messages for the list scopes that
//! depend on them.

mod prefs;
mod store;
mod watcher;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::cache::ItemId;

pub use prefs::SortPreferences;
pub use store::SelectionStore;
pub use watcher::{Invalidation, InvalidationReason, SelectionWatch, SelectionWatcher};

/// One member of a selection set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionEntry {
  pub entity_id: ItemId,
  pub date_added: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
  DateAdded,
  Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
  Asc,
  Desc,
}

/// Sort order of a list, e.g. date added descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortSpec {
  pub field: SortField,
  pub direction: SortDirection,
}

impl Default for SortSpec {
  fn default() -> Self {
    Self {
      field: SortField::DateAdded,
      direction: SortDirection::Desc,
    }
  }
}

impl SortSpec {
  pub fn new(field: SortField, direction: SortDirection) -> Self {
    Self { field, direction }
  }

  /// Stable fingerprint used to detect sort changes between refreshes.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for SortSpec {
  /// Formats as the API's `field:direction` sort parameter.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let field = match self.field {
      SortField::DateAdded => "date_added",
      SortField::Id => "id",
    };
    let direction = match self.direction {
      SortDirection::Asc => "asc",
      SortDirection::Desc => "desc",
    };
    write!(f, "{}:{}", field, direction)
  }
}

impl FromStr for SortSpec {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (field, direction) = s
      .trim()
      .split_once(':')
      .ok_or_else(|| format!("expected field:direction, got '{}'", s))?;

    let field = match field.to_lowercase().as_str() {
      "date_added" | "date-added" | "added" => SortField::DateAdded,
      "id" => SortField::Id,
      other => return Err(format!("unknown sort field '{}'", other)),
    };
    let direction = match direction.to_lowercase().as_str() {
      "asc" => SortDirection::Asc,
      "desc" => SortDirection::Desc,
      other => return Err(format!("unknown sort direction '{}'", other)),
    };

    Ok(Self { field, direction })
  }
}

/// The selection set and sort order a sync run works against.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectionSnapshot {
  /// Entries ordered by `sort`
  pub entries: Vec<SelectionEntry>,
  pub sort: SortSpec,
}

impl SelectionSnapshot {
  pub fn ids(&self) -> Vec<ItemId> {
    self.entries.iter().map(|e| e.entity_id).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sort_spec_parse_and_display() {
    let spec: SortSpec = "date_added:asc".parse().unwrap();
    assert_eq!(spec, SortSpec::new(SortField::DateAdded, SortDirection::Asc));
    assert_eq!(spec.to_string(), "date_added:asc");

    let spec: SortSpec = "ID:DESC".parse().unwrap();
    assert_eq!(spec.to_string(), "id:desc");

    assert!("name".parse::<SortSpec>().is_err());
    assert!("name:asc".parse::<SortSpec>().is_err());
    assert!("id:up".parse::<SortSpec>().is_err());
  }

  #[test]
  fn test_fingerprint_distinguishes_direction() {
    let asc = SortSpec::new(SortField::DateAdded, SortDirection::Asc);
    let desc = SortSpec::new(SortField::DateAdded, SortDirection::Desc);
    assert_ne!(asc.fingerprint(), desc.fingerprint());
    assert_eq!(asc.fingerprint(), asc.fingerprint());
    assert_eq!(asc.fingerprint().len(), 64);
  }
}
