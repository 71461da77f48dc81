//! Error taxonomy for the sync engine.
//!
//! Remote failures are split into service errors (the API answered but
//! rejected the request) and transport errors (the request or its decoding
//! failed). Local store failures are their own kind so a caller can tell a
//! broken cache apart from a broken network.

use std::fmt;

use thiserror::Error;

/// Status codes reported in the API response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
  Ok,
  InvalidApiKey,
  ObjectNotFound,
  UrlFormatError,
  JsonpCallbackMissing,
  FilterError,
  SubscriberOnly,
  RateLimitExceeded,
  Unknown(i64),
}

impl ServiceStatus {
  pub fn from_code(code: i64) -> Self {
    match code {
      1 => Self::Ok,
      100 => Self::InvalidApiKey,
      101 => Self::ObjectNotFound,
      102 => Self::UrlFormatError,
      103 => Self::JsonpCallbackMissing,
      104 => Self::FilterError,
      105 => Self::SubscriberOnly,
      107 => Self::RateLimitExceeded,
      other => Self::Unknown(other),
    }
  }

  pub fn code(&self) -> i64 {
    match self {
      Self::Ok => 1,
      Self::InvalidApiKey => 100,
      Self::ObjectNotFound => 101,
      Self::UrlFormatError => 102,
      Self::JsonpCallbackMissing => 103,
      Self::FilterError => 104,
      Self::SubscriberOnly => 105,
      Self::RateLimitExceeded => 107,
      Self::Unknown(code) => *code,
    }
  }
}

impl fmt::Display for ServiceStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Ok => "OK",
      Self::InvalidApiKey => "InvalidAPIKey",
      Self::ObjectNotFound => "ObjectNotFound",
      Self::UrlFormatError => "URLFormatError",
      Self::JsonpCallbackMissing => "JSONPCallbackMissing",
      Self::FilterError => "FilterError",
      Self::SubscriberOnly => "SubscriberOnly",
      Self::RateLimitExceeded => "RateLimitExceeded",
      Self::Unknown(_) => "Unknown",
    };
    write!(f, "{} ({})", name, self.code())
  }
}

/// Failure of a single remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("service error {status}: {message}")]
  Service {
    status: ServiceStatus,
    message: String,
  },
  #[error("transport error: {cause}")]
  Transport { cause: String },
}

impl FetchError {
  pub fn transport(cause: impl fmt::Display) -> Self {
    Self::Transport {
      cause: cause.to_string(),
    }
  }
}

/// Failure of a local store operation.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("payload encoding error: {0}")]
  Payload(#[from] serde_json::Error),
  #[error("store lock poisoned")]
  Poisoned,
  #[error("blocking store task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

/// Failure reading a selection set, as delivered on its stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
  #[error("selection store unavailable: {0}")]
  Io(String),
}

/// Outcome-level error of one sync run, surfaced through the pager's load state.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error("service error {status}: {message}")]
  Service {
    status: ServiceStatus,
    message: String,
  },
  #[error("network error: {cause}")]
  Transport { cause: String },
  #[error("cache error: {0}")]
  CacheIo(#[from] StoreError),
}

impl From<FetchError> for SyncError {
  fn from(err: FetchError) -> Self {
    match err {
      FetchError::Service { status, message } => Self::Service { status, message },
      FetchError::Transport { cause } => Self::Transport { cause },
    }
  }
}

impl SyncError {
  /// Whether a user-initiated retry can be expected to help.
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::Service { status, .. } => matches!(
        status,
        ServiceStatus::RateLimitExceeded | ServiceStatus::Unknown(_)
      ),
      Self::Transport { .. } => true,
      Self::CacheIo(_) => true,
    }
  }

  /// Text shown to the user. Service messages are passed through verbatim.
  pub fn user_message(&self) -> String {
    match self {
      Self::Service { status, message } => format!("{}: {}", status, message),
      Self::Transport { .. } => "Could not reach the catalog. Check your connection.".to_string(),
      Self::CacheIo(_) => "The local cache could not be updated.".to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_code_mapping() {
    assert_eq!(ServiceStatus::from_code(100), ServiceStatus::InvalidApiKey);
    assert_eq!(ServiceStatus::from_code(107), ServiceStatus::RateLimitExceeded);
    assert_eq!(ServiceStatus::from_code(42), ServiceStatus::Unknown(42));
    assert_eq!(ServiceStatus::Unknown(42).code(), 42);
  }

  #[test]
  fn test_fetch_error_converts_to_sync_error() {
    let err: SyncError = FetchError::Service {
      status: ServiceStatus::InvalidApiKey,
      message: "Invalid API Key".to_string(),
    }
    .into();
    assert!(matches!(
      err,
      SyncError::Service {
        status: ServiceStatus::InvalidApiKey,
        ..
      }
    ));
    assert!(!err.is_retryable());
    assert_eq!(err.user_message(), "InvalidAPIKey (100): Invalid API Key");

    let err: SyncError = FetchError::transport("connection reset").into();
    assert!(err.is_retryable());
  }
}
