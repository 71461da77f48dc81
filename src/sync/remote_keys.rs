//! Page boundary arithmetic for remote keys.

use crate::cache::{ItemId, RemoteKey};

/// Offset window of one fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
  pub offset: u32,
  pub limit: u32,
  pub prev_offset: Option<u32>,
  pub next_offset: Option<u32>,
}

/// Compute the boundaries of the page at `offset` in a result set of `total` rows.
pub fn page_window(offset: u32, limit: u32, total: u32) -> PageWindow {
  let prev_offset = if offset == 0 {
    None
  } else {
    Some(offset.saturating_sub(limit))
  };
  let end = offset.saturating_add(limit);
  let next_offset = if end < total { Some(end) } else { None };

  PageWindow {
    offset,
    limit,
    prev_offset,
    next_offset,
  }
}

/// Offset of the page a key belongs to.
fn key_offset(key: &RemoteKey, page_size: u32) -> u32 {
  key.prev_offset.map(|p| p + page_size).unwrap_or(0)
}

/// Result of walking the remote keys of one scope in cache order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContiguityReport {
  /// Number of keys visited
  pub visited: usize,
  /// The first key marks the head of the window
  pub starts_at_head: bool,
  /// The last key marks the end of pagination
  pub reaches_end: bool,
  /// Adjacent pairs whose offsets do not line up
  pub gaps: Vec<(ItemId, ItemId)>,
}

impl ContiguityReport {
  pub fn is_contiguous(&self) -> bool {
    self.gaps.is_empty() && (self.visited == 0 || self.starts_at_head)
  }
}

/// Walk keys in cache order and check that page windows chain without gaps.
///
/// Adjacent keys either share a window or the earlier key's `next_offset`
/// equals the offset of the later key's window.
pub fn check_contiguity(keys: &[RemoteKey], page_size: u32) -> ContiguityReport {
  let mut report = ContiguityReport {
    visited: keys.len(),
    starts_at_head: keys.first().map(|k| k.prev_offset.is_none()).unwrap_or(false),
    reaches_end: keys.last().map(|k| k.next_offset.is_none()).unwrap_or(false),
    gaps: Vec::new(),
  };

  for pair in keys.windows(2) {
    let (earlier, later) = (&pair[0], &pair[1]);
    let same_window =
      earlier.prev_offset == later.prev_offset && earlier.next_offset == later.next_offset;
    let chained = earlier.next_offset == Some(key_offset(later, page_size));
    if !same_window && !chained {
      report.gaps.push((earlier.id, later.id));
    }
  }

  report
}
