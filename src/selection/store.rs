//! Favorites store.

use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use rusqlite::params;
use tokio::sync::watch;
use tracing::debug;

use super::{SelectionEntry, SortDirection, SortField, SortSpec};
use crate::cache::ItemId;
use crate::db::Database;
use crate::error::{SelectionError, StoreError};

/// Persistent selection sets, one per entity type.
#[derive(Clone)]
pub struct SelectionStore {
  db: Database,
  /// Bumped on every write
  revision: watch::Sender<u64>,
}

impl SelectionStore {
  pub fn new(db: Database) -> Self {
    let (revision, _) = watch::channel(0);
    Self { db, revision }
  }

  /// Add `id` to the selection. Re-adding keeps the original date.
  pub fn add(
    &self,
    entity_type: &str,
    id: ItemId,
    date_added: DateTime<Utc>,
  ) -> Result<bool, StoreError> {
    let inserted = self.db.with_conn(|conn| {
      Ok(conn.execute(
        "INSERT OR IGNORE INTO selections (entity_type, entity_id, date_added) VALUES (?, ?, ?)",
        params![
          entity_type,
          id,
          date_added.to_rfc3339_opts(SecondsFormat::Micros, true)
        ],
      )?)
    })?;

    if inserted > 0 {
      debug!(entity_type, id, "selection added");
      self.bump();
    }
    Ok(inserted > 0)
  }

  pub fn remove(&self, entity_type: &str, id: ItemId) -> Result<bool, StoreError> {
    let removed = self.db.with_conn(|conn| {
      Ok(conn.execute(
        "DELETE FROM selections WHERE entity_type = ? AND entity_id = ?",
        params![entity_type, id],
      )?)
    })?;

    if removed > 0 {
      debug!(entity_type, id, "selection removed");
      self.bump();
    }
    Ok(removed > 0)
  }

  pub fn contains(&self, entity_type: &str, id: ItemId) -> Result<bool, StoreError> {
    self.db.with_conn(|conn| {
      let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM selections WHERE entity_type = ? AND entity_id = ?",
        params![entity_type, id],
        |row| row.get(0),
      )?;
      Ok(count > 0)
    })
  }

  /// Current selection ordered by `sort`.
  pub fn list(&self, entity_type: &str, sort: SortSpec) -> Result<Vec<SelectionEntry>, StoreError> {
    let column = match sort.field {
      SortField::DateAdded => "date_added",
      SortField::Id => "entity_id",
    };
    let direction = match sort.direction {
      SortDirection::Asc => "ASC",
      SortDirection::Desc => "DESC",
    };
    // entity_id breaks ties between entries added in the same instant
    let sql = format!(
      "SELECT entity_id, date_added FROM selections WHERE entity_type = ?
       ORDER BY {column} {direction}, entity_id {direction}"
    );

    let rows: Vec<(ItemId, String)> = self.db.with_conn(|conn| {
      let mut stmt = conn.prepare(&sql)?;
      let rows = stmt
        .query_map(params![entity_type], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(rows)
    })?;

    rows
      .into_iter()
      .map(|(entity_id, raw)| {
        let date_added = DateTime::parse_from_rfc3339(&raw)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| {
            StoreError::Sqlite(rusqlite::Error::FromSqlConversionFailure(
              1,
              rusqlite::types::Type::Text,
              Box::new(e),
            ))
          })?;
        Ok(SelectionEntry {
          entity_id,
          date_added,
        })
      })
      .collect()
  }

  /// Stream of the selection, emitting the current list and then once per change.
  pub fn observe(
    &self,
    entity_type: &'static str,
    sort: SortSpec,
  ) -> BoxStream<'static, Result<Vec<SelectionEntry>, SelectionError>> {
    let store = self.clone();
    let rx = self.revision.subscribe();

    stream::unfold((store, rx, true), move |(store, mut rx, first)| async move {
      if !first && rx.changed().await.is_err() {
        return None;
      }
      rx.borrow_and_update();

      let reader = store.clone();
      let list = tokio::task::spawn_blocking(move || reader.list(entity_type, sort))
        .await
        .map_err(StoreError::from)
        .and_then(|r| r)
        .map_err(|e| SelectionError::Io(e.to_string()));

      Some((list, (store, rx, false)))
    })
    .boxed()
  }

  fn bump(&self) {
    self.revision.send_modify(|rev| *rev += 1);
  }
}
