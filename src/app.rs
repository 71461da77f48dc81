use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::{CacheStorage, ItemId, ListPurpose, Listed, ScopeKey, SqliteStorage};
use crate::catalog::{CatalogClient, CatalogResource, CatalogScope, RemoteSource};
use crate::config::Config;
use crate::db::Database;
use crate::error::{StoreError, SyncError};
use crate::paging::{Connectivity, LoadState, Pager};
use crate::selection::{
  SelectionSnapshot, SelectionStore, SelectionWatcher, SortPreferences, SortSpec,
};
use crate::sync::{InFlight, ListScope, LoadType, LoadWindow, SyncCoordinator, SyncOutcome};

type CatalogCoordinator<E> = SyncCoordinator<CatalogScope<E, CatalogClient>, SqliteStorage>;

/// How often the API host is checked while browsing
const REACHABILITY_INTERVAL: Duration = Duration::from_secs(2);
/// How long to wait for the network after a failed load
const RECONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Failed loads recovered through reconnects before giving up
const MAX_RECONNECTS: usize = 3;

/// Shared handles behind every CLI command.
pub struct App {
  config: Config,
  storage: Arc<SqliteStorage>,
  selections: SelectionStore,
  prefs: SortPreferences,
  in_flight: InFlight,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let db = Database::open(config.cache.path.as_deref())?;

    Ok(Self {
      storage: Arc::new(SqliteStorage::new(db.clone())),
      selections: SelectionStore::new(db.clone()),
      prefs: SortPreferences::new(db),
      in_flight: InFlight::new(),
      config,
    })
  }

  pub fn add_favorite<E: CatalogResource>(&self, id: ItemId) -> Result<()> {
    if self.selections.add(E::entity_type(), id, Utc::now())? {
      println!("Added {} {} to favorites", E::entity_type(), id);
    } else {
      println!("{} {} is already a favorite", E::entity_type(), id);
    }
    Ok(())
  }

  pub fn remove_favorite<E: CatalogResource>(&self, id: ItemId) -> Result<()> {
    if self.selections.remove(E::entity_type(), id)? {
      println!("Removed {} {} from favorites", E::entity_type(), id);
    } else {
      println!("{} {} is not a favorite", E::entity_type(), id);
    }
    Ok(())
  }

  pub fn list_favorites<E: CatalogResource>(&self) -> Result<()> {
    let sort = self.prefs.sort(E::entity_type())?;
    let entries = self.selections.list(E::entity_type(), sort)?;
    if entries.is_empty() {
      println!("No favorite {}s", E::entity_type());
    }
    for entry in entries {
      println!(
        "{:>10}  added {}",
        entry.entity_id,
        entry.date_added.format("%Y-%m-%d %H:%M")
      );
    }
    Ok(())
  }

  pub fn set_sort<E: CatalogResource>(&self, sort: SortSpec) -> Result<()> {
    self.prefs.set_sort(E::entity_type(), sort)?;
    println!("Sorting {}s by {}", E::entity_type(), sort);
    Ok(())
  }

  /// Refresh the list and print up to `count` items, fetching pages as needed.
  pub async fn browse<E: CatalogResource>(&self, purpose: ListPurpose, count: usize) -> Result<()> {
    let watch = SelectionWatcher::start(
      ScopeKey::new(E::entity_type(), purpose),
      self.selections.clone(),
      self.prefs.clone(),
    )
    .await?;
    let coordinator = self.coordinator::<E>(purpose, watch.snapshots)?;

    let client = CatalogClient::new(&self.config)?;
    let connectivity = Connectivity::new(true);
    let monitor = connectivity.monitor(REACHABILITY_INTERVAL, move || {
      let client = client.clone();
      async move { client.is_reachable().await }
    });

    let mut pager = Pager::new(coordinator, self.config.paging.prefetch_distance)
      .with_invalidations(watch.invalidations)
      .with_connectivity(connectivity.subscribe());

    if let LoadState::Error(e) = pager.refresh().await {
      if !e.is_retryable() {
        monitor.abort();
        return Err(eyre!("{}", e.user_message()));
      }
    }

    let shown = read_items(&mut pager, &connectivity, count, RECONNECT_TIMEOUT, |n, item| {
      println!("{:>4}. {}", n, item.entity.title());
    })
    .await;
    monitor.abort();
    let shown = shown?;

    match pager.load_state() {
      LoadState::Error(e) => eprintln!("Stopped early: {}", e.user_message()),
      state if shown == 0 && state.end_of_pagination_reached() => println!("Nothing to show"),
      _ => {}
    }
    Ok(())
  }

  /// Run one sync and report what it did.
  pub async fn sync<E: CatalogResource>(&self, purpose: ListPurpose, load_type: LoadType) -> Result<()> {
    let key = ScopeKey::new(E::entity_type(), purpose);
    let watch = SelectionWatcher::start(key, self.selections.clone(), self.prefs.clone()).await?;
    let coordinator = self.coordinator::<E>(purpose, watch.snapshots)?;

    let window = match load_type {
      LoadType::Refresh => LoadWindow::refresh(),
      LoadType::Append => LoadWindow::append(),
    };
    let outcome = coordinator
      .load(window)
      .await
      .map_err(|e| eyre!("{}", e.user_message()))?;

    let cached = self.storage.count(key)?;
    match outcome {
      SyncOutcome::Success {
        end_of_pagination_reached,
      } => println!(
        "{}: {} cached{}",
        key,
        cached,
        if end_of_pagination_reached { ", end reached" } else { "" }
      ),
      SyncOutcome::EndOfData => println!("{}: nothing left to fetch ({} cached)", key, cached),
      SyncOutcome::Coalesced => println!("{}: another sync is already running", key),
    }

    let report = coordinator.verify_window().await?;
    if !report.is_contiguous() {
      info!(scope = %key, gaps = ?report.gaps, "cached window has gaps");
      println!("{}: cached window has gaps, run a refresh", key);
    }
    if let Some(at) = self.storage.refreshed_at(key)? {
      println!("{}: last refreshed {}", key, at.format("%Y-%m-%d %H:%M:%S"));
    }
    Ok(())
  }

  pub async fn show<E: CatalogResource>(&self, id: ItemId) -> Result<()> {
    let client = CatalogClient::new(&self.config)?;
    let entity: E = RemoteSource::<E>::fetch_by_id(&client, id)
      .await
      .map_err(|e| eyre!("{}", SyncError::from(e).user_message()))?;
    println!("{} {}: {}", E::entity_type(), entity.cache_id(), entity.title());
    Ok(())
  }

  fn coordinator<E: CatalogResource>(
    &self,
    purpose: ListPurpose,
    snapshots: watch::Receiver<SelectionSnapshot>,
  ) -> Result<CatalogCoordinator<E>> {
    let client = CatalogClient::new(&self.config)?;
    let scope = CatalogScope::new(purpose, client, self.config.paging.page_size, snapshots);
    Ok(SyncCoordinator::new(scope, self.storage.clone(), self.in_flight.clone()))
  }
}

/// Read up to `count` items from `pager`, handing each to `emit` with its
/// 1-based number. Returns how many were read.
///
/// A retryable load failure marks the network offline and waits for it to
/// come back, at which point the pager retries the failed load. Gives up
/// after `MAX_RECONNECTS` recoveries or when the network stays down for
/// `reconnect_timeout`.
async fn read_items<L, S>(
  pager: &mut Pager<L, S>,
  connectivity: &Connectivity,
  count: usize,
  reconnect_timeout: Duration,
  mut emit: impl FnMut(usize, &Listed<L::Entity>),
) -> Result<usize, StoreError>
where
  L: ListScope,
  S: CacheStorage,
{
  let mut shown = 0;
  let mut reconnects = 0;
  while shown < count {
    // Selection or sort changes rebuild the list before the next read
    pager.pump().await;

    if let Some(item) = pager.next_item().await? {
      shown += 1;
      emit(shown, &item);
      continue;
    }

    let retryable = pager.load_state().error().is_some_and(|e| e.is_retryable());
    if !retryable || reconnects >= MAX_RECONNECTS {
      break;
    }
    reconnects += 1;

    connectivity.set_online(false);
    pager.pump().await;
    if !connectivity.wait_online(reconnect_timeout).await {
      warn!("network did not come back, giving up");
      break;
    }
    // The monitor may flip back online before the pager saw it go offline
    if !pager.pump().await {
      pager.retry().await;
    }
  }
  Ok(shown)
}
