//! Single-flight registry for sync runs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::cache::ScopeKey;

/// Tracks which scopes have a sync run in progress.
///
/// Shared by every coordinator so two coordinators for the same scope
/// still coalesce.
#[derive(Clone, Default)]
pub struct InFlight {
  active: Arc<Mutex<HashSet<ScopeKey>>>,
}

impl InFlight {
  pub fn new() -> Self {
    Self::default()
  }

  /// Claim `scope`, or return None if a run already holds it.
  pub fn try_acquire(&self, scope: ScopeKey) -> Option<FlightGuard> {
    let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
    if !active.insert(scope) {
      return None;
    }
    Some(FlightGuard {
      active: Arc::clone(&self.active),
      scope,
    })
  }
}

/// Releases the scope when dropped.
pub struct FlightGuard {
  active: Arc<Mutex<HashSet<ScopeKey>>>,
  scope: ScopeKey,
}

impl Drop for FlightGuard {
  fn drop(&mut self) {
    self
      .active
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .remove(&self.scope);
  }
}
