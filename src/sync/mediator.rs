//! Sync coordinator: plans, fetches and reconciles one scope.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::in_flight::InFlight;
use super::remote_keys::{check_contiguity, page_window, ContiguityReport};
use super::{ListScope, LoadType, LoadWindow, SyncOutcome};
use crate::cache::{CacheStorage, Cacheable, ItemId, Listed, RemoteKey, ScopeKey};
use crate::catalog::PageRequest;
use crate::error::{StoreError, SyncError};
use crate::selection::{SelectionEntry, SelectionSnapshot};

/// Cache state observed at the start of a run.
#[derive(Debug)]
pub(crate) struct Observed<'a> {
  pub snapshot: &'a SelectionSnapshot,
  pub selection_scoped: bool,
  pub cached_ids: &'a [ItemId],
  /// Ids a previous fetch asked for and the remote did not return
  pub skipped_ids: &'a [ItemId],
  pub stored_sort_tag: Option<&'a str>,
  pub tail: Option<RemoteKey>,
  pub page_size: u32,
}

/// What a run will do, decided before any network call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Plan {
  /// Nothing to fetch; only drop stale rows
  EndOfData { stale_ids: Vec<ItemId> },
  /// Refresh of an empty selection
  ClearScope,
  Fetch(FetchPlan),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FetchPlan {
  pub load_type: LoadType,
  pub offset: u32,
  pub limit: u32,
  pub stale_ids: Vec<ItemId>,
  /// Selection entries covered by this page, for selection-scoped lists
  pub slice: Option<Vec<SelectionEntry>>,
}

/// Decide the load type, offset and stale rows for one run.
pub(crate) fn plan_load(requested: LoadType, observed: &Observed<'_>) -> Plan {
  let snapshot = observed.snapshot;
  let limit = observed.page_size;
  let covered: HashSet<ItemId> = observed
    .cached_ids
    .iter()
    .chain(observed.skipped_ids)
    .copied()
    .collect();

  let selection_ids: Vec<ItemId> = if observed.selection_scoped {
    snapshot.ids()
  } else {
    Vec::new()
  };

  let load_type = match requested {
    LoadType::Refresh => LoadType::Refresh,
    LoadType::Append => {
      let sort_tag = snapshot.sort.fingerprint();
      if observed.stored_sort_tag != Some(sort_tag.as_str()) {
        // Never refreshed, or refreshed under another sort
        LoadType::Refresh
      } else if observed.selection_scoped
        && has_unreachable_ids(&selection_ids, &covered, observed.tail)
      {
        LoadType::Refresh
      } else {
        LoadType::Append
      }
    }
  };

  let stale_ids: Vec<ItemId> = match load_type {
    // A refresh clears the scope, so nothing is left to be stale
    LoadType::Refresh => Vec::new(),
    LoadType::Append if observed.selection_scoped => {
      let selected: HashSet<ItemId> = selection_ids.iter().copied().collect();
      let mut stale: Vec<ItemId> = covered
        .iter()
        .copied()
        .filter(|id| !selected.contains(id))
        .collect();
      stale.sort_unstable();
      stale
    }
    LoadType::Append => Vec::new(),
  };

  let offset = match load_type {
    LoadType::Refresh => 0,
    LoadType::Append => match observed.tail.and_then(|t| t.next_offset) {
      Some(next) => next,
      None => return Plan::EndOfData { stale_ids },
    },
  };

  let slice = if observed.selection_scoped {
    let len = snapshot.entries.len();
    let start = (offset as usize).min(len);
    let end = start.saturating_add(limit as usize).min(len);
    let slice = snapshot.entries[start..end].to_vec();

    if slice.is_empty() {
      return match load_type {
        LoadType::Refresh => Plan::ClearScope,
        LoadType::Append => Plan::EndOfData { stale_ids },
      };
    }
    Some(slice)
  } else {
    None
  };

  Plan::Fetch(FetchPlan {
    load_type,
    offset,
    limit,
    stale_ids,
    slice,
  })
}

/// Selected ids that sit before the point an append would resume from but
/// were never fetched can only be picked up by a refresh. Ids the remote
/// already declined count as fetched.
fn has_unreachable_ids(
  selection_ids: &[ItemId],
  covered: &HashSet<ItemId>,
  tail: Option<RemoteKey>,
) -> bool {
  let reachable_from = tail
    .and_then(|t| t.next_offset)
    .map(|n| n as usize)
    .unwrap_or(selection_ids.len())
    .min(selection_ids.len());

  selection_ids[..reachable_from]
    .iter()
    .any(|id| !covered.contains(id))
}

/// Generic sync coordinator, instantiated once per list scope.
pub struct SyncCoordinator<L: ListScope, S: CacheStorage> {
  scope: Arc<L>,
  storage: Arc<S>,
  in_flight: InFlight,
}

impl<L: ListScope, S: CacheStorage> SyncCoordinator<L, S> {
  pub fn new(scope: L, storage: Arc<S>, in_flight: InFlight) -> Self {
    Self {
      scope: Arc::new(scope),
      storage,
      in_flight,
    }
  }

  pub fn scope_key(&self) -> ScopeKey {
    self.scope.scope_key()
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Run one sync for `window`.
  ///
  /// Returns `Coalesced` without doing anything if a run for the same scope
  /// is already in progress. The run itself is spawned, so dropping the
  /// returned future only drops the report; fetch and writes complete.
  pub async fn load(&self, window: LoadWindow) -> Result<SyncOutcome, SyncError> {
    let key = self.scope.scope_key();
    let Some(guard) = self.in_flight.try_acquire(key) else {
      debug!(scope = %key, "sync already in flight, coalescing");
      return Ok(SyncOutcome::Coalesced);
    };

    let this = self.clone();
    let run = tokio::spawn(async move {
      let _guard = guard;
      this.run(window).await
    });

    run.await.map_err(|e| SyncError::CacheIo(StoreError::Join(e)))?
  }

  /// Walk the cached remote keys and report gaps.
  pub async fn verify_window(&self) -> Result<ContiguityReport, SyncError> {
    let key = self.scope.scope_key();
    let page_size = self.scope.page_size();
    let keys = self.with_store(move |s| s.remote_keys(key)).await?;
    Ok(check_contiguity(&keys, page_size))
  }

  #[instrument(skip(self), fields(scope = %self.scope.scope_key()))]
  async fn run(&self, window: LoadWindow) -> Result<SyncOutcome, SyncError> {
    let key = self.scope.scope_key();
    // Later snapshots apply to the next run, never to this one
    let snapshot = self.scope.snapshot();
    let sort_tag = snapshot.sort.fingerprint();

    let (cached_ids, skipped_ids, stored_sort_tag, tail) = self
      .with_store(move |s| {
        Ok((
          s.cached_ids(key)?,
          s.skipped_ids(key)?,
          s.sort_tag(key)?,
          s.tail_remote_key(key)?,
        ))
      })
      .await?;

    let plan = plan_load(
      window.load_type,
      &Observed {
        snapshot: &snapshot,
        selection_scoped: key.is_selection_scoped(),
        cached_ids: &cached_ids,
        skipped_ids: &skipped_ids,
        stored_sort_tag: stored_sort_tag.as_deref(),
        tail,
        page_size: self.scope.page_size(),
      },
    );
    debug!(requested = ?window.load_type, ?plan, "planned sync");

    match plan {
      Plan::EndOfData { stale_ids } => {
        self.delete_stale(stale_ids).await?;
        Ok(SyncOutcome::EndOfData)
      }
      Plan::ClearScope => {
        self
          .with_store(move |s| {
            s.save_all::<Listed<L::Entity>>(key, &[], &[], &[], true)?;
            s.set_sort_tag(key, &sort_tag)
          })
          .await?;
        info!("selection is empty, cleared scope");
        Ok(SyncOutcome::Success {
          end_of_pagination_reached: true,
        })
      }
      Plan::Fetch(fetch) => self.fetch_and_reconcile(fetch, &snapshot, sort_tag).await,
    }
  }

  async fn fetch_and_reconcile(
    &self,
    plan: FetchPlan,
    snapshot: &SelectionSnapshot,
    sort_tag: String,
  ) -> Result<SyncOutcome, SyncError> {
    let key = self.scope.scope_key();

    let request = match &plan.slice {
      // The id filter already restricts the query to this page
      Some(slice) => PageRequest {
        offset: 0,
        limit: slice.len() as u32,
        sort: snapshot.sort,
        id_filter: Some(slice.iter().map(|e| e.entity_id).collect()),
      },
      None => PageRequest {
        offset: plan.offset,
        limit: plan.limit,
        sort: snapshot.sort,
        id_filter: None,
      },
    };

    let page = self.scope.fetch_page(request).await.map_err(|e| {
      warn!(offset = plan.offset, error = %e, "fetch failed, cache left untouched");
      SyncError::from(e)
    })?;

    let mut skipped = Vec::new();
    let (fetched, total) = match &plan.slice {
      Some(slice) => {
        let mut by_id: HashMap<ItemId, L::Entity> = page
          .items
          .into_iter()
          .map(|e| (e.cache_id(), e))
          .collect();
        // Restore selection order; ids the remote no longer knows are
        // recorded as skipped so the window can move past them
        let mut ordered: Vec<(usize, L::Entity, Option<SelectionEntry>)> =
          Vec::with_capacity(slice.len());
        for (pos, entry) in slice.iter().enumerate() {
          match by_id.remove(&entry.entity_id) {
            Some(e) => ordered.push((pos, e, Some(*entry))),
            None => skipped.push(entry.entity_id),
          }
        }
        if !skipped.is_empty() {
          warn!(?skipped, "remote returned no entity for selected ids");
        }
        (ordered, snapshot.entries.len() as u32)
      }
      None => (
        page
          .items
          .into_iter()
          .enumerate()
          .map(|(pos, e)| (pos, e, None))
          .collect(),
        page.total_count,
      ),
    };

    let window = page_window(plan.offset, plan.limit, total);

    let mut rows = Vec::with_capacity(fetched.len());
    let mut keys = Vec::with_capacity(fetched.len());
    for (pos, entity, entry) in fetched {
      keys.push(self.scope.to_remote_key(&entity, &window));
      rows.push(
        self
          .scope
          .to_cache_row(entity, plan.offset as i64 + pos as i64, entry.as_ref()),
      );
    }

    let written = rows.len();
    let clear_before_save = plan.load_type == LoadType::Refresh;
    self
      .with_store(move |s| {
        s.save_all(key, &rows, &keys, &skipped, clear_before_save)?;
        if clear_before_save {
          s.set_sort_tag(key, &sort_tag)?;
        }
        Ok(())
      })
      .await?;

    self.delete_stale(plan.stale_ids).await?;

    info!(
      load_type = ?plan.load_type,
      offset = plan.offset,
      written,
      next_offset = ?window.next_offset,
      "sync committed"
    );

    Ok(SyncOutcome::Success {
      end_of_pagination_reached: window.next_offset.is_none(),
    })
  }

  async fn delete_stale(&self, stale_ids: Vec<ItemId>) -> Result<(), SyncError> {
    if stale_ids.is_empty() {
      return Ok(());
    }
    let key = self.scope.scope_key();
    let removed = self
      .with_store(move |s| s.delete_by_ids(key, &stale_ids))
      .await?;
    debug!(removed, "dropped stale rows");
    Ok(())
  }

  /// Run a store call off the async runtime.
  async fn with_store<T, F>(&self, f: F) -> Result<T, StoreError>
  where
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T, StoreError> + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    tokio::task::spawn_blocking(move || f(&storage)).await?
  }
}

impl<L: ListScope, S: CacheStorage> Clone for SyncCoordinator<L, S> {
  fn clone(&self) -> Self {
    Self {
      scope: Arc::clone(&self.scope),
      storage: Arc::clone(&self.storage),
      in_flight: self.in_flight.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::selection::{SortDirection, SortField, SortSpec};
  use crate::testing::entries;

  fn snapshot(ids: &[ItemId]) -> SelectionSnapshot {
    SelectionSnapshot {
      entries: entries(ids),
      sort: SortSpec::default(),
    }
  }

  fn key(id: ItemId, prev: Option<u32>, next: Option<u32>) -> RemoteKey {
    RemoteKey {
      id,
      prev_offset: prev,
      next_offset: next,
    }
  }

  #[test]
  fn test_refresh_plans_first_slice() {
    let snapshot = snapshot(&[1, 2, 3, 4, 5]);
    let plan = plan_load(
      LoadType::Refresh,
      &Observed {
        snapshot: &snapshot,
        selection_scoped: true,
        cached_ids: &[],
        skipped_ids: &[],
        stored_sort_tag: None,
        tail: None,
        page_size: 2,
      },
    );

    let fetch = match plan {
      Plan::Fetch(fetch) => fetch,
      other => panic!("expected fetch, got {:?}", other),
    };
    assert_eq!(fetch.offset, 0);
    assert_eq!(
      fetch.slice.unwrap().iter().map(|e| e.entity_id).collect::<Vec<_>>(),
      vec![1, 2]
    );
  }

  #[test]
  fn test_append_without_prior_refresh_becomes_refresh() {
    let snapshot = snapshot(&[1, 2, 3]);
    let plan = plan_load(
      LoadType::Append,
      &Observed {
        snapshot: &snapshot,
        selection_scoped: true,
        cached_ids: &[],
        skipped_ids: &[],
        stored_sort_tag: None,
        tail: None,
        page_size: 2,
      },
    );
    assert!(matches!(plan, Plan::Fetch(FetchPlan { load_type: LoadType::Refresh, .. })));
  }

  #[test]
  fn test_sort_change_forces_refresh() {
    let snapshot = snapshot(&[1, 2, 3]);
    let old_tag = SortSpec::new(SortField::DateAdded, SortDirection::Asc).fingerprint();
    let plan = plan_load(
      LoadType::Append,
      &Observed {
        snapshot: &snapshot,
        selection_scoped: true,
        cached_ids: &[1, 2],
        skipped_ids: &[],
        stored_sort_tag: Some(&old_tag),
        tail: Some(key(2, None, Some(2))),
        page_size: 2,
      },
    );
    assert!(matches!(plan, Plan::Fetch(FetchPlan { load_type: LoadType::Refresh, offset: 0, .. })));
  }

  #[test]
  fn test_append_at_tail_end_is_end_of_data_with_stale_ids() {
    let snapshot = snapshot(&[1]);
    let tag = snapshot.sort.fingerprint();
    let plan = plan_load(
      LoadType::Append,
      &Observed {
        snapshot: &snapshot,
        selection_scoped: true,
        cached_ids: &[1, 2],
        skipped_ids: &[],
        stored_sort_tag: Some(&tag),
        tail: Some(key(2, None, None)),
        page_size: 2,
      },
    );
    assert_eq!(plan, Plan::EndOfData { stale_ids: vec![2] });
  }

  #[test]
  fn test_new_id_before_tail_forces_refresh() {
    // 9 was selected after the first page was cached and sorts into it
    let snapshot = snapshot(&[9, 1, 2, 3]);
    let tag = snapshot.sort.fingerprint();
    let plan = plan_load(
      LoadType::Append,
      &Observed {
        snapshot: &snapshot,
        selection_scoped: true,
        cached_ids: &[1, 2],
        skipped_ids: &[],
        stored_sort_tag: Some(&tag),
        tail: Some(key(2, None, Some(2))),
        page_size: 2,
      },
    );
    assert!(matches!(plan, Plan::Fetch(FetchPlan { load_type: LoadType::Refresh, .. })));
  }

  #[test]
  fn test_skipped_id_before_tail_still_appends() {
    // 2 was requested in the first page but the remote never returned it
    let snapshot = snapshot(&[1, 2, 3, 4]);
    let tag = snapshot.sort.fingerprint();
    let plan = plan_load(
      LoadType::Append,
      &Observed {
        snapshot: &snapshot,
        selection_scoped: true,
        cached_ids: &[1],
        skipped_ids: &[2],
        stored_sort_tag: Some(&tag),
        tail: Some(key(1, None, Some(2))),
        page_size: 2,
      },
    );
    assert!(matches!(
      plan,
      Plan::Fetch(FetchPlan { load_type: LoadType::Append, offset: 2, .. })
    ));
  }

  #[test]
  fn test_unselected_skipped_id_is_stale() {
    let snapshot = snapshot(&[1]);
    let tag = snapshot.sort.fingerprint();
    let plan = plan_load(
      LoadType::Append,
      &Observed {
        snapshot: &snapshot,
        selection_scoped: true,
        cached_ids: &[1],
        skipped_ids: &[5],
        stored_sort_tag: Some(&tag),
        tail: Some(key(1, None, None)),
        page_size: 2,
      },
    );
    assert_eq!(plan, Plan::EndOfData { stale_ids: vec![5] });
  }

  #[test]
  fn test_catalog_append_uses_tail_offset() {
    let snapshot = snapshot(&[]);
    let tag = snapshot.sort.fingerprint();
    let plan = plan_load(
      LoadType::Append,
      &Observed {
        snapshot: &snapshot,
        selection_scoped: false,
        cached_ids: &[10, 11],
        skipped_ids: &[],
        stored_sort_tag: Some(&tag),
        tail: Some(key(11, None, Some(2))),
        page_size: 2,
      },
    );
    assert_eq!(
      plan,
      Plan::Fetch(FetchPlan {
        load_type: LoadType::Append,
        offset: 2,
        limit: 2,
        stale_ids: vec![],
        slice: None,
      })
    );
  }

  #[test]
  fn test_refresh_of_empty_selection_clears_scope() {
    let snapshot = snapshot(&[]);
    let plan = plan_load(
      LoadType::Refresh,
      &Observed {
        snapshot: &snapshot,
        selection_scoped: true,
        cached_ids: &[1, 2, 3],
        skipped_ids: &[],
        stored_sort_tag: None,
        tail: Some(key(3, None, None)),
        page_size: 10,
      },
    );
    assert_eq!(plan, Plan::ClearScope);
  }
}
