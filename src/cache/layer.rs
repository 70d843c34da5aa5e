//! Cache layer that orchestrates caching policies with network fetching.

use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::traits::{CacheStorage, CachedResponse, RequestKey};
use crate::http::{FetchError, Fetcher, Request, Response};

/// Applies the cache-first and network-first policies over a storage backend.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  /// Bound on the dynamic partition; `None` leaves it unbounded
  dynamic_max_entries: Option<usize>,
}

impl<S: CacheStorage> CacheLayer<S> {
  pub fn new(storage: Arc<S>) -> Self {
    Self {
      storage,
      dynamic_max_entries: None,
    }
  }

  pub fn with_dynamic_max_entries(mut self, max: Option<usize>) -> Self {
    self.dynamic_max_entries = max.filter(|m| *m > 0);
    self
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Cache-first strategy.
  ///
  /// 1. Any cached copy is returned immediately
  /// 2. Otherwise fetch; a 2xx response is copied into `partition`
  /// 3. If the network fails, answer with a synthesized 503
  pub async fn cache_first<F: Fetcher + ?Sized>(
    &self,
    fetcher: &F,
    request: &Request,
    partition: &str,
  ) -> Response {
    let key = RequestKey::from(request);

    if let Some(hit) = self.lookup(|s| s.match_any(&key), &key) {
      debug!(%key, partition = %hit.partition, "Serving from cache");
      return hit.response;
    }

    match fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store(partition, &key, response.clone(), None);
          debug!(%key, partition, "Cached new resource");
        }
        response
      }
      Err(e) => {
        warn!(%key, error = %e, "Cache miss while offline");
        Response::service_unavailable()
      }
    }
  }

  /// Network-first strategy.
  ///
  /// 1. Fetch; a 2xx response is copied into `partition`
  /// 2. On network failure, return the entry cached in `partition` for this request
  /// 3. Navigations fall back to `fallback_document` from any partition
  /// 4. Otherwise the network error propagates
  pub async fn network_first<F: Fetcher + ?Sized>(
    &self,
    fetcher: &F,
    request: &Request,
    partition: &str,
    fallback_document: &Url,
  ) -> Result<Response, FetchError> {
    let key = RequestKey::from(request);

    let error = match fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store(partition, &key, response.clone(), self.dynamic_max_entries);
          debug!(%key, partition, "Cached network response");
        }
        return Ok(response);
      }
      Err(e) => e,
    };

    debug!(%key, error = %error, "Network failed, trying cache");
    if let Some(hit) = self.lookup(|s| s.match_in(partition, &key), &key) {
      return Ok(hit.response);
    }

    if request.is_navigation() {
      let fallback = RequestKey::get(fallback_document);
      return match self.lookup(|s| s.match_any(&fallback), &fallback) {
        Some(hit) => Ok(hit.response),
        None => Err(FetchError::NoFallback(request.url.clone())),
      };
    }

    Err(error)
  }

  /// Read through the storage, degrading lookup failures to a miss.
  fn lookup(
    &self,
    read: impl FnOnce(&S) -> color_eyre::Result<Option<CachedResponse>>,
    key: &RequestKey,
  ) -> Option<CachedResponse> {
    match read(self.storage.as_ref()) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(%key, error = %e, "Cache lookup failed");
        None
      }
    }
  }

  /// Store a copy of a response, then trim the partition to `bound`.
  /// Failures are logged and otherwise ignored.
  fn store(&self, partition: &str, key: &RequestKey, response: Response, bound: Option<usize>) {
    if let Err(e) = self.storage.put(partition, key, &response) {
      warn!(%key, partition, error = %e, "Cache write failed");
      return;
    }

    if let Some(max) = bound {
      match self.storage.trim(partition, max) {
        Ok(0) => {}
        Ok(evicted) => debug!(partition, evicted, "Evicted old cache entries"),
        Err(e) => warn!(partition, error = %e, "Cache trim failed"),
      }
    }
  }
}
