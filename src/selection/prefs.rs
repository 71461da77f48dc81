//! Sort preference store.

use futures::stream::{self, BoxStream, StreamExt};
use rusqlite::{params, OptionalExtension};
use tokio::sync::watch;
use tracing::warn;

use super::SortSpec;
use crate::db::Database;
use crate::error::StoreError;

/// Key-value store for the user's per-entity-type sort order.
#[derive(Clone)]
pub struct SortPreferences {
  db: Database,
  revision: watch::Sender<u64>,
}

fn sort_key(entity_type: &str) -> String {
  format!("sort.{}", entity_type)
}

impl SortPreferences {
  pub fn new(db: Database) -> Self {
    let (revision, _) = watch::channel(0);
    Self { db, revision }
  }

  pub fn set_sort(&self, entity_type: &str, sort: SortSpec) -> Result<(), StoreError> {
    self.db.with_conn(|conn| {
      conn.execute(
        "INSERT OR REPLACE INTO preferences (key, value) VALUES (?, ?)",
        params![sort_key(entity_type), sort.to_string()],
      )?;
      Ok(())
    })?;
    self.revision.send_modify(|rev| *rev += 1);
    Ok(())
  }

  /// Stored sort for `entity_type`, or the default when unset or unreadable.
  pub fn sort(&self, entity_type: &str) -> Result<SortSpec, StoreError> {
    let raw: Option<String> = self.db.with_conn(|conn| {
      Ok(
        conn
          .query_row(
            "SELECT value FROM preferences WHERE key = ?",
            params![sort_key(entity_type)],
            |row| row.get(0),
          )
          .optional()?,
      )
    })?;

    Ok(match raw {
      Some(value) => value.parse().unwrap_or_else(|e| {
        warn!(entity_type, value, error = %e, "ignoring malformed sort preference");
        SortSpec::default()
      }),
      None => SortSpec::default(),
    })
  }

  /// Stream of the sort for `entity_type`: the current value, then one per write.
  ///
  /// Read failures fall back to the default sort rather than ending the stream.
  pub fn observe_sort(&self, entity_type: &'static str) -> BoxStream<'static, SortSpec> {
    let prefs = self.clone();
    let rx = self.revision.subscribe();

    stream::unfold((prefs, rx, true), move |(prefs, mut rx, first)| async move {
      if !first && rx.changed().await.is_err() {
        return None;
      }
      rx.borrow_and_update();

      let reader = prefs.clone();
      let sort = match tokio::task::spawn_blocking(move || reader.sort(entity_type)).await {
        Ok(Ok(sort)) => sort,
        Ok(Err(e)) => {
          warn!(entity_type, error = %e, "failed to read sort preference");
          SortSpec::default()
        }
        Err(e) => {
          warn!(entity_type, error = %e, "sort preference task failed");
          SortSpec::default()
        }
      };

      Some((sort, (prefs, rx, false)))
    })
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::selection::{SortDirection, SortField};

  fn prefs() -> SortPreferences {
    SortPreferences::new(Database::in_memory().unwrap())
  }

  #[test]
  fn test_default_when_unset() {
    assert_eq!(prefs().sort("character").unwrap(), SortSpec::default());
  }

  #[test]
  fn test_set_is_per_entity_type() {
    let prefs = prefs();
    let asc = SortSpec::new(SortField::DateAdded, SortDirection::Asc);
    prefs.set_sort("volume", asc).unwrap();

    assert_eq!(prefs.sort("volume").unwrap(), asc);
    assert_eq!(prefs.sort("character").unwrap(), SortSpec::default());
  }

  #[test]
  fn test_malformed_value_falls_back() {
    let prefs = prefs();
    prefs
      .db
      .with_conn(|conn| {
        conn.execute(
          "INSERT INTO preferences (key, value) VALUES ('sort.issue', 'sideways')",
          [],
        )?;
        Ok(())
      })
      .unwrap();
    assert_eq!(prefs.sort("issue").unwrap(), SortSpec::default());
  }

  #[tokio::test]
  async fn test_observe_sort_follows_writes() {
    let prefs = prefs();
    let mut sorts = prefs.observe_sort("character");
    assert_eq!(sorts.next().await, Some(SortSpec::default()));

    let id_asc = SortSpec::new(SortField::Id, SortDirection::Asc);
    prefs.set_sort("character", id_asc).unwrap();
    assert_eq!(sorts.next().await, Some(id_asc));
  }
}
