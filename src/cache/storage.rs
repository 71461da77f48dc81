//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::traits::{CachedItem, Cacheable, ItemId, RemoteKey, ScopeKey};
use crate::db::Database;
use crate::error::StoreError;

/// Trait for cache storage backends.
///
/// Every operation is scoped; rows of different scopes are never touched by
/// the same call.
pub trait CacheStorage: Send + Sync + 'static {
  /// Get a single cached row by id.
  fn get_item<T: Cacheable>(
    &self,
    scope: ScopeKey,
    id: ItemId,
  ) -> Result<Option<CachedItem<T>>, StoreError>;

  /// Get the remote key of a single cached row.
  fn get_remote_key(&self, scope: ScopeKey, id: ItemId) -> Result<Option<RemoteKey>, StoreError>;

  /// Remote key of the last row in cache order.
  fn tail_remote_key(&self, scope: ScopeKey) -> Result<Option<RemoteKey>, StoreError>;

  /// All remote keys in cache order.
  fn remote_keys(&self, scope: ScopeKey) -> Result<Vec<RemoteKey>, StoreError>;

  /// Ids of all cached rows in cache order.
  fn cached_ids(&self, scope: ScopeKey) -> Result<Vec<ItemId>, StoreError>;

  /// Number of cached rows.
  fn count(&self, scope: ScopeKey) -> Result<usize, StoreError>;

  /// Ids the remote omitted from pages already fetched into the scope.
  fn skipped_ids(&self, scope: ScopeKey) -> Result<Vec<ItemId>, StoreError>;

  /// Delete rows, their remote keys and skip markers in one transaction.
  /// Returns the number of rows removed.
  fn delete_by_ids(&self, scope: ScopeKey, ids: &[ItemId]) -> Result<usize, StoreError>;

  /// Optionally clear the scope, then insert a batch of rows and keys, in one transaction.
  ///
  /// `skipped` holds ids that were requested for the batch but not returned
  /// by the remote; they are recorded so later loads treat them as covered.
  fn save_all<T: Cacheable>(
    &self,
    scope: ScopeKey,
    items: &[CachedItem<T>],
    keys: &[RemoteKey],
    skipped: &[ItemId],
    clear_before_save: bool,
  ) -> Result<(), StoreError>;

  /// Read rows in cache order.
  fn select_ordered_window<T: Cacheable>(
    &self,
    scope: ScopeKey,
    offset: usize,
    limit: usize,
  ) -> Result<Vec<CachedItem<T>>, StoreError>;

  /// Sort fingerprint the scope was last refreshed under.
  fn sort_tag(&self, scope: ScopeKey) -> Result<Option<String>, StoreError>;

  /// Record the sort fingerprint of a completed refresh.
  fn set_sort_tag(&self, scope: ScopeKey, tag: &str) -> Result<(), StoreError>;

  /// When the scope was last refreshed.
  fn refreshed_at(&self, scope: ScopeKey) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

const KEYS_IN_ORDER: &str = "SELECT rk.id, rk.prev_offset, rk.next_offset FROM remote_keys rk
   INNER JOIN items i ON i.scope_key = rk.scope_key AND i.id = rk.id
   WHERE rk.scope_key = ?
   ORDER BY i.idx";

fn remote_key_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RemoteKey> {
  Ok(RemoteKey {
    id: row.get(0)?,
    prev_offset: row.get(1)?,
    next_offset: row.get(2)?,
  })
}

impl CacheStorage for SqliteStorage {
  fn get_item<T: Cacheable>(
    &self,
    scope: ScopeKey,
    id: ItemId,
  ) -> Result<Option<CachedItem<T>>, StoreError> {
    let row: Option<(i64, Vec<u8>)> = self.db.with_conn(|conn| {
      Ok(
        conn
          .query_row(
            "SELECT idx, payload FROM items WHERE scope_key = ? AND id = ?",
            params![scope.to_string(), id],
            |row| Ok((row.get(0)?, row.get(1)?)),
          )
          .optional()?,
      )
    })?;

    match row {
      Some((index, data)) => Ok(Some(CachedItem {
        index,
        payload: serde_json::from_slice(&data)?,
      })),
      None => Ok(None),
    }
  }

  fn get_remote_key(&self, scope: ScopeKey, id: ItemId) -> Result<Option<RemoteKey>, StoreError> {
    self.db.with_conn(|conn| {
      Ok(
        conn
          .query_row(
            "SELECT id, prev_offset, next_offset FROM remote_keys WHERE scope_key = ? AND id = ?",
            params![scope.to_string(), id],
            remote_key_from_row,
          )
          .optional()?,
      )
    })
  }

  fn tail_remote_key(&self, scope: ScopeKey) -> Result<Option<RemoteKey>, StoreError> {
    self.db.with_conn(|conn| {
      Ok(
        conn
          .query_row(
            "SELECT rk.id, rk.prev_offset, rk.next_offset FROM remote_keys rk
             INNER JOIN items i ON i.scope_key = rk.scope_key AND i.id = rk.id
             WHERE rk.scope_key = ?
             ORDER BY i.idx DESC
             LIMIT 1",
            params![scope.to_string()],
            remote_key_from_row,
          )
          .optional()?,
      )
    })
  }

  fn remote_keys(&self, scope: ScopeKey) -> Result<Vec<RemoteKey>, StoreError> {
    self.db.with_conn(|conn| {
      let mut stmt = conn.prepare(KEYS_IN_ORDER)?;
      let keys = stmt
        .query_map(params![scope.to_string()], remote_key_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(keys)
    })
  }

  fn cached_ids(&self, scope: ScopeKey) -> Result<Vec<ItemId>, StoreError> {
    self.db.with_conn(|conn| {
      let mut stmt = conn.prepare("SELECT id FROM items WHERE scope_key = ? ORDER BY idx")?;
      let ids = stmt
        .query_map(params![scope.to_string()], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<ItemId>>>()?;
      Ok(ids)
    })
  }

  fn count(&self, scope: ScopeKey) -> Result<usize, StoreError> {
    self.db.with_conn(|conn| {
      let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM items WHERE scope_key = ?",
        params![scope.to_string()],
        |row| row.get(0),
      )?;
      Ok(count as usize)
    })
  }

  fn skipped_ids(&self, scope: ScopeKey) -> Result<Vec<ItemId>, StoreError> {
    self.db.with_conn(|conn| {
      let mut stmt = conn.prepare("SELECT id FROM skipped_ids WHERE scope_key = ? ORDER BY id")?;
      let ids = stmt
        .query_map(params![scope.to_string()], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(ids)
    })
  }

  fn delete_by_ids(&self, scope: ScopeKey, ids: &[ItemId]) -> Result<usize, StoreError> {
    if ids.is_empty() {
      return Ok(0);
    }

    let scope_key = scope.to_string();
    self.db.with_conn(|conn| {
      let tx = conn.transaction()?;
      let mut removed = 0;
      {
        let mut delete_item = tx.prepare("DELETE FROM items WHERE scope_key = ? AND id = ?")?;
        let mut delete_key = tx.prepare("DELETE FROM remote_keys WHERE scope_key = ? AND id = ?")?;
        let mut delete_skip = tx.prepare("DELETE FROM skipped_ids WHERE scope_key = ? AND id = ?")?;
        for id in ids {
          removed += delete_item.execute(params![scope_key, id])?;
          delete_key.execute(params![scope_key, id])?;
          delete_skip.execute(params![scope_key, id])?;
        }
      }
      tx.commit()?;
      Ok(removed)
    })
  }

  fn save_all<T: Cacheable>(
    &self,
    scope: ScopeKey,
    items: &[CachedItem<T>],
    keys: &[RemoteKey],
    skipped: &[ItemId],
    clear_before_save: bool,
  ) -> Result<(), StoreError> {
    let scope_key = scope.to_string();

    // Encode before taking the lock so a bad payload never opens a transaction
    let encoded = items
      .iter()
      .map(|item| Ok((item.payload.cache_id(), item.index, serde_json::to_vec(&item.payload)?)))
      .collect::<Result<Vec<_>, StoreError>>()?;

    self.db.with_conn(|conn| {
      let tx = conn.transaction()?;

      if clear_before_save {
        tx.execute("DELETE FROM items WHERE scope_key = ?", params![scope_key])?;
        tx.execute(
          "DELETE FROM remote_keys WHERE scope_key = ?",
          params![scope_key],
        )?;
        tx.execute("DELETE FROM skipped_ids WHERE scope_key = ?", params![scope_key])?;
      }

      {
        let mut insert_item = tx.prepare(
          "INSERT OR REPLACE INTO items (scope_key, id, idx, payload) VALUES (?, ?, ?, ?)",
        )?;
        for (id, index, payload) in &encoded {
          insert_item.execute(params![scope_key, id, index, payload])?;
        }

        let mut insert_key = tx.prepare(
          "INSERT OR REPLACE INTO remote_keys (scope_key, id, prev_offset, next_offset)
           VALUES (?, ?, ?, ?)",
        )?;
        for key in keys {
          insert_key.execute(params![scope_key, key.id, key.prev_offset, key.next_offset])?;
        }

        let mut insert_skip =
          tx.prepare("INSERT OR IGNORE INTO skipped_ids (scope_key, id) VALUES (?, ?)")?;
        for id in skipped {
          insert_skip.execute(params![scope_key, id])?;
        }
      }

      tx.commit()?;
      Ok(())
    })
  }

  fn select_ordered_window<T: Cacheable>(
    &self,
    scope: ScopeKey,
    offset: usize,
    limit: usize,
  ) -> Result<Vec<CachedItem<T>>, StoreError> {
    let rows: Vec<(i64, Vec<u8>)> = self.db.with_conn(|conn| {
      let mut stmt = conn.prepare(
        "SELECT idx, payload FROM items WHERE scope_key = ?
         ORDER BY idx
         LIMIT ? OFFSET ?",
      )?;
      let rows = stmt
        .query_map(
          params![scope.to_string(), limit as i64, offset as i64],
          |row| Ok((row.get(0)?, row.get(1)?)),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(rows)
    })?;

    rows
      .into_iter()
      .map(|(index, data)| {
        Ok(CachedItem {
          index,
          payload: serde_json::from_slice(&data)?,
        })
      })
      .collect()
  }

  fn sort_tag(&self, scope: ScopeKey) -> Result<Option<String>, StoreError> {
    self.db.with_conn(|conn| {
      Ok(
        conn
          .query_row(
            "SELECT sort_tag FROM sync_state WHERE scope_key = ?",
            params![scope.to_string()],
            |row| row.get(0),
          )
          .optional()?,
      )
    })
  }

  fn set_sort_tag(&self, scope: ScopeKey, tag: &str) -> Result<(), StoreError> {
    self.db.with_conn(|conn| {
      conn.execute(
        "INSERT OR REPLACE INTO sync_state (scope_key, sort_tag, refreshed_at)
         VALUES (?, ?, datetime('now'))",
        params![scope.to_string(), tag],
      )?;
      Ok(())
    })
  }

  fn refreshed_at(&self, scope: ScopeKey) -> Result<Option<DateTime<Utc>>, StoreError> {
    let raw: Option<String> = self.db.with_conn(|conn| {
      Ok(
        conn
          .query_row(
            "SELECT refreshed_at FROM sync_state WHERE scope_key = ?",
            params![scope.to_string()],
            |row| row.get(0),
          )
          .optional()?,
      )
    })?;

    // SQLite stores as "YYYY-MM-DD HH:MM:SS"; an unparseable value reads as unknown
    Ok(raw.and_then(|s| {
      chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ListPurpose, Listed};
  use crate::testing::TestEntity;

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Database::in_memory().unwrap())
  }

  fn scope() -> ScopeKey {
    ScopeKey::favorites::<TestEntity>()
  }

  fn rows(ids: &[ItemId], first_index: i64) -> Vec<CachedItem<Listed<TestEntity>>> {
    ids
      .iter()
      .enumerate()
      .map(|(i, id)| CachedItem {
        index: first_index + i as i64,
        payload: Listed {
          entity: TestEntity::new(*id),
          date_added: None,
        },
      })
      .collect()
  }

  fn keys(ids: &[ItemId], prev: Option<u32>, next: Option<u32>) -> Vec<RemoteKey> {
    ids
      .iter()
      .map(|id| RemoteKey {
        id: *id,
        prev_offset: prev,
        next_offset: next,
      })
      .collect()
  }

  #[test]
  fn test_save_all_and_read_window_in_order() {
    let storage = storage();
    let ids = [30, 10, 20];
    storage
      .save_all(scope(), &rows(&ids, 0), &keys(&ids, None, Some(3)), &[], true)
      .unwrap();

    let window = storage
      .select_ordered_window::<Listed<TestEntity>>(scope(), 0, 10)
      .unwrap();
    let read: Vec<ItemId> = window.iter().map(|r| r.payload.cache_id()).collect();
    assert_eq!(read, vec![30, 10, 20]);

    let window = storage
      .select_ordered_window::<Listed<TestEntity>>(scope(), 1, 1)
      .unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].index, 1);
    assert_eq!(window[0].payload.entity.id, 10);
  }

  #[test]
  fn test_save_all_with_clear_replaces_scope() {
    let storage = storage();
    storage
      .save_all(scope(), &rows(&[1, 2], 0), &keys(&[1, 2], None, Some(2)), &[], true)
      .unwrap();
    storage
      .save_all(scope(), &rows(&[3], 0), &keys(&[3], None, None), &[], true)
      .unwrap();

    assert_eq!(storage.cached_ids(scope()).unwrap(), vec![3]);
    assert!(storage.get_remote_key(scope(), 1).unwrap().is_none());
    assert_eq!(storage.remote_keys(scope()).unwrap().len(), 1);
  }

  #[test]
  fn test_scopes_are_partitioned() {
    let storage = storage();
    let catalog = ScopeKey::new(TestEntity::entity_type(), ListPurpose::Catalog);

    storage
      .save_all(scope(), &rows(&[1], 0), &keys(&[1], None, None), &[], true)
      .unwrap();
    storage
      .save_all(catalog, &rows(&[1, 2], 0), &keys(&[1, 2], None, None), &[], true)
      .unwrap();
    storage.delete_by_ids(scope(), &[1]).unwrap();

    assert_eq!(storage.count(scope()).unwrap(), 0);
    assert_eq!(storage.count(catalog).unwrap(), 2);
    assert!(storage.get_remote_key(catalog, 1).unwrap().is_some());
  }

  #[test]
  fn test_delete_by_ids_removes_items_and_keys() {
    let storage = storage();
    let ids = [1, 2, 3];
    storage
      .save_all(scope(), &rows(&ids, 0), &keys(&ids, None, None), &[], true)
      .unwrap();

    let removed = storage.delete_by_ids(scope(), &[2, 99]).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(storage.cached_ids(scope()).unwrap(), vec![1, 3]);
    assert!(storage.get_item::<Listed<TestEntity>>(scope(), 2).unwrap().is_none());
    assert!(storage.get_remote_key(scope(), 2).unwrap().is_none());
  }

  #[test]
  fn test_skipped_ids_follow_scope_lifecycle() {
    let storage = storage();
    storage
      .save_all(scope(), &rows(&[1, 2], 0), &keys(&[1, 2], None, Some(3)), &[7], true)
      .unwrap();
    storage
      .save_all(scope(), &rows(&[4], 3), &keys(&[4], Some(0), None), &[5, 7], false)
      .unwrap();
    assert_eq!(storage.skipped_ids(scope()).unwrap(), vec![5, 7]);
    // Skip markers are not rows
    assert_eq!(storage.count(scope()).unwrap(), 3);

    storage.delete_by_ids(scope(), &[5]).unwrap();
    assert_eq!(storage.skipped_ids(scope()).unwrap(), vec![7]);

    storage
      .save_all(scope(), &rows(&[1], 0), &keys(&[1], None, None), &[], true)
      .unwrap();
    assert!(storage.skipped_ids(scope()).unwrap().is_empty());
  }

  #[test]
  fn test_tail_remote_key_follows_index() {
    let storage = storage();
    storage
      .save_all(scope(), &rows(&[1, 2], 0), &keys(&[1, 2], None, Some(2)), &[], true)
      .unwrap();
    storage
      .save_all(scope(), &rows(&[3], 2), &keys(&[3], Some(0), None), &[], false)
      .unwrap();

    let tail = storage.tail_remote_key(scope()).unwrap().unwrap();
    assert_eq!(tail.id, 3);
    assert_eq!(tail.next_offset, None);
    assert_eq!(tail.prev_offset, Some(0));
  }

  #[test]
  fn test_empty_scope_has_no_tail() {
    let storage = storage();
    assert!(storage.tail_remote_key(scope()).unwrap().is_none());
    assert!(storage.cached_ids(scope()).unwrap().is_empty());
  }

  #[test]
  fn test_sort_tag_round_trip() {
    let storage = storage();
    assert_eq!(storage.sort_tag(scope()).unwrap(), None);
    assert_eq!(storage.refreshed_at(scope()).unwrap(), None);

    storage.set_sort_tag(scope(), "abc").unwrap();
    storage.set_sort_tag(scope(), "def").unwrap();
    assert_eq!(storage.sort_tag(scope()).unwrap().as_deref(), Some("def"));
    assert!(storage.refreshed_at(scope()).unwrap().is_some());
  }
}
