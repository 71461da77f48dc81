//! Test fixtures shared across module tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};

use crate::cache::{Cacheable, ItemId};
use crate::catalog::{PageRequest, RemotePage, RemoteSource};
use crate::error::FetchError;
use crate::selection::{SelectionEntry, SelectionSnapshot, SortSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEntity {
  pub id: ItemId,
  pub name: String,
}

impl TestEntity {
  pub fn new(id: ItemId) -> Self {
    Self {
      id,
      name: format!("entity {}", id),
    }
  }
}

impl Cacheable for TestEntity {
  fn cache_id(&self) -> ItemId {
    self.id
  }

  fn entity_type() -> &'static str {
    "test_entity"
  }
}

/// In-memory remote catalog that records every request.
#[derive(Clone, Default)]
pub struct FakeRemote {
  catalog: Arc<Mutex<Vec<TestEntity>>>,
  calls: Arc<Mutex<Vec<PageRequest>>>,
  failures: Arc<Mutex<VecDeque<FetchError>>>,
  gate: Arc<Mutex<Option<Arc<Notify>>>>,
}

impl FakeRemote {
  pub fn with_ids(ids: impl IntoIterator<Item = ItemId>) -> Self {
    let remote = Self::default();
    *remote.catalog.lock().unwrap() = ids.into_iter().map(TestEntity::new).collect();
    remote
  }

  /// Fail the next fetch with `err`.
  pub fn fail_next(&self, err: FetchError) {
    self.failures.lock().unwrap().push_back(err);
  }

  /// Hold every fetch until the returned notify is signalled.
  pub fn hold(&self) -> Arc<Notify> {
    let notify = Arc::new(Notify::new());
    *self.gate.lock().unwrap() = Some(notify.clone());
    notify
  }

  pub fn calls(&self) -> Vec<PageRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl RemoteSource<TestEntity> for FakeRemote {
  async fn fetch_page(&self, request: PageRequest) -> Result<RemotePage<TestEntity>, FetchError> {
    self.calls.lock().unwrap().push(request.clone());

    let gate = self.gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      gate.notified().await;
    }

    if let Some(err) = self.failures.lock().unwrap().pop_front() {
      return Err(err);
    }

    let catalog = self.catalog.lock().unwrap().clone();
    let matching: Vec<TestEntity> = match &request.id_filter {
      Some(ids) => {
        // Filtered queries come back in id order, not filter order
        let mut found: Vec<TestEntity> = catalog
          .into_iter()
          .filter(|e| ids.contains(&e.id))
          .collect();
        found.sort_by_key(|e| e.id);
        found
      }
      None => catalog,
    };

    let total = matching.len() as u32;
    let items = matching
      .into_iter()
      .skip(request.offset as usize)
      .take(request.limit as usize)
      .collect();

    Ok(RemotePage {
      items,
      total_count: total,
    })
  }

  async fn fetch_by_id(&self, id: ItemId) -> Result<TestEntity, FetchError> {
    self
      .catalog
      .lock()
      .unwrap()
      .iter()
      .find(|e| e.id == id)
      .cloned()
      .ok_or_else(|| FetchError::Service {
        status: crate::error::ServiceStatus::ObjectNotFound,
        message: "Object Not Found".to_string(),
      })
  }
}

pub fn base_time() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Selection entries in the given order, each added one minute after the previous.
pub fn entries(ids: &[ItemId]) -> Vec<SelectionEntry> {
  ids
    .iter()
    .enumerate()
    .map(|(i, id)| SelectionEntry {
      entity_id: *id,
      date_added: base_time() + Duration::minutes(i as i64),
    })
    .collect()
}

pub fn snapshot_channel(
  ids: &[ItemId],
  sort: SortSpec,
) -> (watch::Sender<SelectionSnapshot>, watch::Receiver<SelectionSnapshot>) {
  watch::channel(SelectionSnapshot {
    entries: entries(ids),
    sort,
  })
}
