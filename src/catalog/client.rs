use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, warn};
use url::Url;

use super::api_types::ApiResponse;
use super::{CatalogResource, PageRequest, RemotePage, RemoteSource};
use crate::cache::ItemId;
use crate::config::Config;
use crate::error::FetchError;

const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Catalog API client
#[derive(Clone)]
pub struct CatalogClient {
  http: reqwest::Client,
  base_url: Url,
  api_key: String,
}

impl CatalogClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    Self::with_key(&config.api.url, api_key)
  }

  pub fn with_key(base_url: &str, api_key: String) -> Result<Self> {
    // Url::join drops the last path segment unless the base ends with '/'
    let mut base = base_url.trim_end_matches('/').to_string();
    base.push('/');
    let base_url = Url::parse(&base).map_err(|e| eyre!("Invalid API url {}: {}", base_url, e))?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("catsync/", env!("CARGO_PKG_VERSION")))
      .gzip(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      api_key,
    })
  }

  /// Whether the API host answers at all. Any HTTP status counts as reachable.
  pub async fn is_reachable(&self) -> bool {
    let result = self
      .http
      .head(self.base_url.clone())
      .timeout(REACHABILITY_TIMEOUT)
      .send()
      .await;
    match result {
      Ok(_) => true,
      Err(e) => {
        debug!(error = %e, "API host unreachable");
        false
      }
    }
  }

  /// Build the list endpoint url for a page request
  pub fn list_url<E: CatalogResource>(&self, request: &PageRequest) -> Result<Url, FetchError> {
    let mut url = self
      .base_url
      .join(&format!("{}/", E::LIST_RESOURCE))
      .map_err(FetchError::transport)?;

    {
      let mut query = url.query_pairs_mut();
      query
        .append_pair("api_key", &self.api_key)
        .append_pair("format", "json")
        .append_pair("field_list", E::FIELD_LIST)
        .append_pair("offset", &request.offset.to_string())
        .append_pair("limit", &request.limit.to_string())
        .append_pair("sort", &request.sort.to_string());

      if let Some(ids) = &request.id_filter {
        let joined = ids
          .iter()
          .map(|id| id.to_string())
          .collect::<Vec<_>>()
          .join("|");
        query.append_pair("filter", &format!("id:{}", joined));
      }
    }

    Ok(url)
  }

  /// Build the detail endpoint url for a single entity
  pub fn detail_url<E: CatalogResource>(&self, id: ItemId) -> Result<Url, FetchError> {
    let mut url = self
      .base_url
      .join(&format!("{}/{}-{}/", E::DETAIL_RESOURCE, E::TYPE_PREFIX, id))
      .map_err(FetchError::transport)?;

    url
      .query_pairs_mut()
      .append_pair("api_key", &self.api_key)
      .append_pair("format", "json")
      .append_pair("field_list", E::FIELD_LIST);

    Ok(url)
  }

  /// Issue a GET and decode the response envelope.
  ///
  /// The API reports its own failures (bad key, rate limit) inside the
  /// envelope, often alongside a non-2xx HTTP status, so the body is decoded
  /// before the HTTP status is considered.
  async fn get_envelope(&self, url: Url) -> Result<ApiResponse, FetchError> {
    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(FetchError::transport)?;

    let http_status = response.status();
    let body = response.bytes().await.map_err(FetchError::transport)?;

    match serde_json::from_slice::<ApiResponse>(&body) {
      Ok(envelope) => {
        envelope.check_status()?;
        Ok(envelope)
      }
      Err(e) if http_status.is_success() => Err(FetchError::transport(format!(
        "failed to decode response: {}",
        e
      ))),
      Err(_) => Err(FetchError::transport(format!("HTTP {}", http_status))),
    }
  }
}

#[async_trait]
impl<E: CatalogResource> RemoteSource<E> for CatalogClient {
  async fn fetch_page(&self, request: PageRequest) -> Result<RemotePage<E>, FetchError> {
    let url = self.list_url::<E>(&request)?;
    debug!(
      resource = E::LIST_RESOURCE,
      offset = request.offset,
      limit = request.limit,
      filtered = request.id_filter.is_some(),
      "fetching page"
    );

    let envelope = self.get_envelope(url).await.map_err(|e| {
      warn!(resource = E::LIST_RESOURCE, error = %e, "page fetch failed");
      e
    })?;

    debug!(
      resource = E::LIST_RESOURCE,
      offset = envelope.offset,
      limit = envelope.limit,
      returned = envelope.number_of_page_results,
      total = envelope.number_of_total_results,
      "page fetched"
    );

    let results: Vec<E::Api> = envelope.results()?;
    let items = results.into_iter().map(E::from_api).collect();

    Ok(RemotePage {
      items,
      total_count: envelope.number_of_total_results,
    })
  }

  async fn fetch_by_id(&self, id: ItemId) -> Result<E, FetchError> {
    let url = self.detail_url::<E>(id)?;
    debug!(resource = E::DETAIL_RESOURCE, id, "fetching entity");

    let envelope = self.get_envelope(url).await?;
    let result: E::Api = envelope.results()?;
    Ok(E::from_api(result))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::types::{Character, Volume};
  use crate::selection::{SortDirection, SortField, SortSpec};

  fn client() -> CatalogClient {
    CatalogClient::with_key("https://comicvine.gamespot.com/api", "secret".to_string()).unwrap()
  }

  #[test]
  fn test_list_url_with_filter() {
    let request = PageRequest {
      offset: 20,
      limit: 10,
      sort: SortSpec::new(SortField::DateAdded, SortDirection::Desc),
      id_filter: Some(vec![1699, 1440]),
    };

    let url = client().list_url::<Character>(&request).unwrap();
    assert_eq!(url.path(), "/api/characters/");

    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let get = |key: &str| {
      pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
    };
    assert_eq!(get("api_key").as_deref(), Some("secret"));
    assert_eq!(get("offset").as_deref(), Some("20"));
    assert_eq!(get("limit").as_deref(), Some("10"));
    assert_eq!(get("sort").as_deref(), Some("date_added:desc"));
    assert_eq!(get("filter").as_deref(), Some("id:1699|1440"));
  }

  #[test]
  fn test_list_url_without_filter() {
    let request = PageRequest {
      offset: 0,
      limit: 20,
      sort: SortSpec::default(),
      id_filter: None,
    };
    let url = client().list_url::<Volume>(&request).unwrap();
    assert!(url.query_pairs().all(|(k, _)| k != "filter"));
  }

  #[test]
  fn test_detail_url() {
    let url = client().detail_url::<Character>(1699).unwrap();
    assert_eq!(url.path(), "/api/character/4005-1699/");
  }

  #[test]
  fn test_trailing_slash_in_base_is_tolerated() {
    let client =
      CatalogClient::with_key("https://example.test/api/", "k".to_string()).unwrap();
    let url = client.detail_url::<Volume>(7).unwrap();
    assert_eq!(url.path(), "/api/volume/4050-7/");
  }
}
