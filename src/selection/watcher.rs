//! Turns selection and sort changes into snapshots and invalidations.

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{SelectionSnapshot, SelectionStore, SortPreferences};
use crate::cache::ScopeKey;
use crate::error::SelectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
  /// The selection set gained or lost members
  Membership,
  /// The user picked a different sort order
  Sort,
}

/// Tells the owner of a list scope that its cached list no longer matches
/// its inputs and should be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invalidation {
  pub scope: ScopeKey,
  pub reason: InvalidationReason,
}

/// Handles produced by [`SelectionWatcher::start`].
///
/// The background task stops once every snapshot receiver is gone.
pub struct SelectionWatch {
  pub snapshots: watch::Receiver<SelectionSnapshot>,
  pub invalidations: mpsc::UnboundedReceiver<Invalidation>,
  pub task: JoinHandle<()>,
}

pub struct SelectionWatcher;

impl SelectionWatcher {
  /// Read the current selection and sort for `scope`, then keep following both.
  ///
  /// Fails only if the initial selection cannot be read. Later read errors
  /// are logged and the last good snapshot stays published.
  pub async fn start(
    scope: ScopeKey,
    store: SelectionStore,
    prefs: SortPreferences,
  ) -> Result<SelectionWatch, SelectionError> {
    let entity_type = scope.entity_type;

    let mut sorts = prefs.observe_sort(entity_type);
    let sort = sorts.next().await.unwrap_or_default();
    let mut selection = store.observe(entity_type, sort);
    let entries = selection.next().await.unwrap_or_else(|| Ok(Vec::new()))?;

    let (snapshot_tx, snapshots) = watch::channel(SelectionSnapshot { entries, sort });
    let (invalidation_tx, invalidations) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = snapshot_tx.closed() => break,
          next = sorts.next() => {
            let Some(sort) = next else { break };
            if sort == snapshot_tx.borrow().sort {
              continue;
            }

            selection = store.observe(entity_type, sort);
            let entries = match selection.next().await {
              Some(Ok(entries)) => entries,
              Some(Err(e)) => {
                warn!(%scope, error = %e, "failed to reload selection after sort change");
                continue;
              }
              None => break,
            };

            debug!(%scope, %sort, "sort changed");
            snapshot_tx.send_replace(SelectionSnapshot { entries, sort });
            let _ = invalidation_tx.send(Invalidation {
              scope,
              reason: InvalidationReason::Sort,
            });
          }
          next = selection.next() => {
            let entries = match next {
              Some(Ok(entries)) => entries,
              Some(Err(e)) => {
                warn!(%scope, error = %e, "failed to read selection");
                continue;
              }
              None => break,
            };

            let changed = snapshot_tx.send_if_modified(|snapshot| {
              if snapshot.entries == entries {
                return false;
              }
              snapshot.entries = entries;
              true
            });

            if changed && scope.is_selection_scoped() {
              debug!(%scope, "selection membership changed");
              let _ = invalidation_tx.send(Invalidation {
                scope,
                reason: InvalidationReason::Membership,
              });
            }
          }
        }
      }
      debug!(%scope, "selection watcher stopped");
    });

    Ok(SelectionWatch {
      snapshots,
      invalidations,
      task,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ListPurpose;
  use crate::db::Database;
  use crate::selection::{SortDirection, SortField, SortSpec};
  use crate::testing::base_time;
  use chrono::Duration;

  fn stores() -> (SelectionStore, SortPreferences) {
    let db = Database::in_memory().unwrap();
    (SelectionStore::new(db.clone()), SortPreferences::new(db))
  }

  fn favorites() -> ScopeKey {
    ScopeKey::new("character", ListPurpose::Favorites)
  }

  #[tokio::test]
  async fn test_initial_snapshot_reflects_store() {
    let (store, prefs) = stores();
    store.add("character", 1, base_time()).unwrap();
    store.add("character", 2, base_time() + Duration::minutes(1)).unwrap();

    let watch = SelectionWatcher::start(favorites(), store, prefs).await.unwrap();
    let snapshot = watch.snapshots.borrow().clone();
    assert_eq!(snapshot.ids(), vec![2, 1]);
    assert_eq!(snapshot.sort, SortSpec::default());
  }

  #[tokio::test]
  async fn test_membership_change_invalidates_favorites() {
    let (store, prefs) = stores();
    let mut watch = SelectionWatcher::start(favorites(), store.clone(), prefs)
      .await
      .unwrap();

    store.add("character", 5, base_time()).unwrap();

    let invalidation = watch.invalidations.recv().await.unwrap();
    assert_eq!(invalidation.scope, favorites());
    assert_eq!(invalidation.reason, InvalidationReason::Membership);
    assert_eq!(watch.snapshots.borrow().ids(), vec![5]);
  }

  #[tokio::test]
  async fn test_sort_change_reorders_and_invalidates() {
    let (store, prefs) = stores();
    store.add("character", 1, base_time()).unwrap();
    store.add("character", 2, base_time() + Duration::minutes(1)).unwrap();
    let mut watch = SelectionWatcher::start(favorites(), store, prefs.clone())
      .await
      .unwrap();

    let asc = SortSpec::new(SortField::DateAdded, SortDirection::Asc);
    prefs.set_sort("character", asc).unwrap();

    let invalidation = watch.invalidations.recv().await.unwrap();
    assert_eq!(invalidation.reason, InvalidationReason::Sort);
    let snapshot = watch.snapshots.borrow().clone();
    assert_eq!(snapshot.sort, asc);
    assert_eq!(snapshot.ids(), vec![1, 2]);
  }

  #[tokio::test]
  async fn test_catalog_scope_ignores_membership() {
    let (store, prefs) = stores();
    let catalog = ScopeKey::new("character", ListPurpose::Catalog);
    let mut watch = SelectionWatcher::start(catalog, store.clone(), prefs.clone())
      .await
      .unwrap();

    store.add("character", 5, base_time()).unwrap();
    prefs
      .set_sort("character", SortSpec::new(SortField::Id, SortDirection::Asc))
      .unwrap();

    // The first message must be the sort change; membership is not reported
    let invalidation = watch.invalidations.recv().await.unwrap();
    assert_eq!(invalidation.reason, InvalidationReason::Sort);
    assert_eq!(invalidation.scope, catalog);
  }

  #[tokio::test]
  async fn test_other_entity_types_are_ignored() {
    let (store, prefs) = stores();
    let mut watch = SelectionWatcher::start(favorites(), store.clone(), prefs)
      .await
      .unwrap();

    store.add("volume", 9, base_time()).unwrap();
    store.add("character", 1, base_time()).unwrap();

    let invalidation = watch.invalidations.recv().await.unwrap();
    assert_eq!(invalidation.reason, InvalidationReason::Membership);
    assert_eq!(watch.snapshots.borrow().ids(), vec![1]);
    assert!(watch.invalidations.try_recv().is_err());
  }
}
