//! Read-side cursor over a cached list scope.
//!
//! A [`Pager`] serves items straight from the cache and asks its
//! [`SyncCoordinator`](crate::sync::SyncCoordinator) for more when the reader
//! gets close to the end of what is buffered. It does no network or
//! reconciliation work itself; it only tracks where the reader is and
//! reports the state of the last load.
//!
//! # Example
//!
//! ```ignore
//! let mut pager = Pager::new(coordinator, 5)
//!   .with_invalidations(watch.invalidations)
//!   .with_connectivity(connectivity.subscribe());
//!
//! pager.refresh().await;
//! while let Some(item) = pager.next_item().await? {
//!   println!("{}", item.entity.title());
//! }
//!
//! match pager.load_state() {
//!   LoadState::Error(e) => eprintln!("{}", e.user_message()),
//!   _ => {}
//! }
//! ```

mod connectivity;
mod pager;

use std::sync::Arc;

use crate::error::SyncError;

pub use connectivity::Connectivity;
pub use pager::Pager;

/// State of the most recent load issued by a pager.
#[derive(Debug, Clone)]
pub enum LoadState {
  /// No load running
  NotLoading { end_of_pagination_reached: bool },
  /// A load is running
  Loading,
  /// The last load failed; `retry()` re-issues it
  Error(Arc<SyncError>),
}

impl Default for LoadState {
  fn default() -> Self {
    LoadState::NotLoading {
      end_of_pagination_reached: false,
    }
  }
}

impl LoadState {
  pub fn is_loading(&self) -> bool {
    matches!(self, LoadState::Loading)
  }

  pub fn is_error(&self) -> bool {
    matches!(self, LoadState::Error(_))
  }

  pub fn end_of_pagination_reached(&self) -> bool {
    matches!(
      self,
      LoadState::NotLoading {
        end_of_pagination_reached: true
      }
    )
  }

  pub fn error(&self) -> Option<&SyncError> {
    match self {
      LoadState::Error(e) => Some(e.as_ref()),
      _ => None,
    }
  }
}
