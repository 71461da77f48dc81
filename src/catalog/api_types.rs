//! Serde-deserializable types matching catalog API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::{de::DeserializeOwned, Deserialize};

use super::types::{Character, Issue, Volume};
use super::CatalogResource;
use crate::cache::ItemId;
use crate::error::{FetchError, ServiceStatus};

// ============================================================================
// Response envelope
// ============================================================================

/// Envelope wrapped around every API response, successful or not.
///
/// `results` is kept as raw JSON because failed responses carry an empty
/// array even on detail endpoints that normally return an object.
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
  pub status_code: i64,
  #[serde(default)]
  pub error: String,
  #[serde(default)]
  pub limit: u32,
  #[serde(default)]
  pub offset: u32,
  #[serde(default)]
  pub number_of_page_results: u32,
  #[serde(default)]
  pub number_of_total_results: u32,
  #[serde(default)]
  pub results: serde_json::Value,
}

impl ApiResponse {
  /// Turn a non-OK envelope status into a service error.
  pub fn check_status(&self) -> Result<(), FetchError> {
    match ServiceStatus::from_code(self.status_code) {
      ServiceStatus::Ok => Ok(()),
      status => Err(FetchError::Service {
        status,
        message: self.error.clone(),
      }),
    }
  }

  /// Decode `results` into `T`.
  pub fn results<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
    reserialize(&self.results).map_err(|e| FetchError::transport(format!("bad results: {}", e)))
  }
}

/// Decode a raw JSON value into a typed struct.
pub fn reserialize<T: DeserializeOwned>(value: &serde_json::Value) -> serde_json::Result<T> {
  T::deserialize(value)
}

// ============================================================================
// Common nested field types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiImage {
  pub medium_url: Option<String>,
  pub original_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiNamedRef {
  pub name: Option<String>,
}

fn image_url(image: Option<ApiImage>) -> Option<String> {
  image.and_then(|i| i.medium_url.or(i.original_url))
}

fn ref_name(named: Option<ApiNamedRef>) -> Option<String> {
  named.and_then(|n| n.name)
}

// ============================================================================
// Resource results
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiCharacter {
  pub id: ItemId,
  #[serde(default)]
  pub name: Option<String>,
  pub real_name: Option<String>,
  pub deck: Option<String>,
  pub publisher: Option<ApiNamedRef>,
  pub image: Option<ApiImage>,
  pub date_last_updated: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiVolume {
  pub id: ItemId,
  #[serde(default)]
  pub name: Option<String>,
  pub start_year: Option<String>,
  pub count_of_issues: Option<u32>,
  pub publisher: Option<ApiNamedRef>,
  pub image: Option<ApiImage>,
  pub date_last_updated: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiIssue {
  pub id: ItemId,
  pub name: Option<String>,
  pub issue_number: Option<String>,
  pub volume: Option<ApiNamedRef>,
  pub cover_date: Option<String>,
  pub image: Option<ApiImage>,
  pub date_last_updated: Option<String>,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl CatalogResource for Character {
  type Api = ApiCharacter;

  const LIST_RESOURCE: &'static str = "characters";
  const DETAIL_RESOURCE: &'static str = "character";
  const TYPE_PREFIX: &'static str = "4005";
  const FIELD_LIST: &'static str = "id,name,real_name,deck,publisher,image,date_last_updated";

  fn from_api(api: ApiCharacter) -> Self {
    Character {
      id: api.id,
      name: api.name.unwrap_or_default(),
      real_name: api.real_name,
      deck: api.deck,
      publisher: ref_name(api.publisher),
      image_url: image_url(api.image),
      date_last_updated: api.date_last_updated,
    }
  }

  fn title(&self) -> String {
    match &self.real_name {
      Some(real) if !real.is_empty() => format!("{} ({})", self.name, real),
      _ => self.name.clone(),
    }
  }
}

impl CatalogResource for Volume {
  type Api = ApiVolume;

  const LIST_RESOURCE: &'static str = "volumes";
  const DETAIL_RESOURCE: &'static str = "volume";
  const TYPE_PREFIX: &'static str = "4050";
  const FIELD_LIST: &'static str =
    "id,name,start_year,count_of_issues,publisher,image,date_last_updated";

  fn from_api(api: ApiVolume) -> Self {
    Volume {
      id: api.id,
      name: api.name.unwrap_or_default(),
      start_year: api.start_year,
      count_of_issues: api.count_of_issues,
      publisher: ref_name(api.publisher),
      image_url: image_url(api.image),
      date_last_updated: api.date_last_updated,
    }
  }

  fn title(&self) -> String {
    match &self.start_year {
      Some(year) => format!("{} ({})", self.name, year),
      None => self.name.clone(),
    }
  }
}

impl CatalogResource for Issue {
  type Api = ApiIssue;

  const LIST_RESOURCE: &'static str = "issues";
  const DETAIL_RESOURCE: &'static str = "issue";
  const TYPE_PREFIX: &'static str = "4000";
  const FIELD_LIST: &'static str =
    "id,name,issue_number,volume,cover_date,image,date_last_updated";

  fn from_api(api: ApiIssue) -> Self {
    Issue {
      id: api.id,
      name: api.name,
      issue_number: api.issue_number,
      volume: ref_name(api.volume),
      cover_date: api.cover_date,
      image_url: image_url(api.image),
      date_last_updated: api.date_last_updated,
    }
  }

  fn title(&self) -> String {
    let volume = self.volume.as_deref().unwrap_or("Unknown volume");
    let number = self.issue_number.as_deref().unwrap_or("?");
    match &self.name {
      Some(name) if !name.is_empty() => format!("{} #{}: {}", volume, number, name),
      _ => format!("{} #{}", volume, number),
    }
  }
}
