use serde::{Deserialize, Serialize};

use crate::cache::{Cacheable, ItemId};

/// Comic character
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
  pub id: ItemId,
  pub name: String,
  pub real_name: Option<String>,
  pub deck: Option<String>,
  pub publisher: Option<String>,
  pub image_url: Option<String>,
  pub date_last_updated: Option<String>,
}

/// Comic volume (a series of issues)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
  pub id: ItemId,
  pub name: String,
  pub start_year: Option<String>,
  pub count_of_issues: Option<u32>,
  pub publisher: Option<String>,
  pub image_url: Option<String>,
  pub date_last_updated: Option<String>,
}

/// Single comic issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
  pub id: ItemId,
  pub name: Option<String>,
  pub issue_number: Option<String>,
  pub volume: Option<String>,
  pub cover_date: Option<String>,
  pub image_url: Option<String>,
  pub date_last_updated: Option<String>,
}

impl Cacheable for Character {
  fn cache_id(&self) -> ItemId {
    self.id
  }

  fn entity_type() -> &'static str {
    "character"
  }
}

impl Cacheable for Volume {
  fn cache_id(&self) -> ItemId {
    self.id
  }

  fn entity_type() -> &'static str {
    "volume"
  }
}

impl Cacheable for Issue {
  fn cache_id(&self) -> ItemId {
    self.id
  }

  fn entity_type() -> &'static str {
    "issue"
  }
}
