//! Background cache worker.
//!
//! Intercepts requests and answers them from the network or from the cache
//! partitions, following a per-resource policy:
//! - documents and static assets are cache-first into the static partition
//! - everything else is network-first into the dynamic partition
//! - non-GET requests pass through untouched
//!
//! The worker seeds its static partition at install time (all or nothing) and
//! purges partitions of older versions on activation.

mod classify;
mod lifecycle;
mod registration;

pub use classify::ResourceClass;
pub use lifecycle::{LifecycleEvent, WorkerState};
pub use registration::Registration;

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, PartitionNames, RequestKey};
use crate::config::Config;
use crate::http::{FetchError, Fetcher, Request, Response};

/// Messages a page posts to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  /// Activate the waiting worker now
  SkipWaiting,
  /// Keep a form payload in the worker's cache until the next background sync
  CacheFormData {
    #[serde(rename = "formData")]
    form_data: serde_json::Value,
  },
}

/// Background sync registrations the worker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
  ContactForm,
}

impl SyncTag {
  pub fn parse(tag: &str) -> Option<Self> {
    match tag {
      "contact-form-sync" => Some(SyncTag::ContactForm),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      SyncTag::ContactForm => "contact-form-sync",
    }
  }
}

/// What the worker decided to do with an intercepted request.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchDisposition {
  /// The worker did not intervene; the host performs the request itself
  Passthrough,
  Respond(Response),
}

/// Everything a worker version needs to know, resolved to absolute URLs.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub version: String,
  pub partitions: PartitionNames,
  pub shell: Vec<Url>,
  pub fallback_document: Url,
  pub form_data_url: Url,
  pub sync_endpoint: Url,
  pub dynamic_max_entries: Option<usize>,
  pub skip_waiting: bool,
}

impl WorkerSettings {
  pub fn from_config(config: &Config) -> Result<Self> {
    let origin = config.origin_url()?;
    let resolve = |path: &str| {
      origin
        .join(path)
        .map_err(|e| eyre!("Invalid URL {}: {}", path, e))
    };

    let shell = config
      .cache
      .shell
      .iter()
      .map(|path| resolve(path))
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      version: config.cache.version.clone(),
      partitions: PartitionNames::new(&config.cache.prefix, &config.cache.version, &shell),
      shell,
      fallback_document: resolve(&config.cache.fallback_document)?,
      form_data_url: resolve("/offline-form-data")?,
      sync_endpoint: resolve(&config.outbox.endpoint)?,
      dynamic_max_entries: config.cache.dynamic_max_entries,
      skip_waiting: config.cache.skip_waiting,
    })
  }
}

/// One version of the background cache worker.
pub struct CacheWorker<S: CacheStorage, F: Fetcher> {
  settings: WorkerSettings,
  layer: CacheLayer<S>,
  fetcher: Arc<F>,
  state: WorkerState,
  skip_waiting: bool,
}

impl<S: CacheStorage, F: Fetcher> CacheWorker<S, F> {
  pub fn new(settings: WorkerSettings, storage: Arc<S>, fetcher: Arc<F>) -> Self {
    let layer = CacheLayer::new(storage).with_dynamic_max_entries(settings.dynamic_max_entries);
    let skip_waiting = settings.skip_waiting;

    Self {
      settings,
      layer,
      fetcher,
      state: WorkerState::Parsed,
      skip_waiting,
    }
  }

  pub fn version(&self) -> &str {
    &self.settings.version
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn partitions(&self) -> &PartitionNames {
    &self.settings.partitions
  }

  pub fn request_skip_waiting(&mut self) {
    self.skip_waiting = true;
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting
  }

  fn advance(&mut self, event: LifecycleEvent) -> Result<()> {
    let next = self.state.on(event)?;
    debug!(version = %self.settings.version, from = %self.state, to = %next, "Worker transition");
    self.state = next;
    Ok(())
  }

  /// Seed the static partition with every shell resource.
  ///
  /// Any unreachable or non-2xx resource fails the whole install and nothing
  /// is written; the worker becomes redundant.
  pub async fn install(&mut self) -> Result<()> {
    self.advance(LifecycleEvent::InstallStarted)?;
    info!(
      version = %self.settings.version,
      resources = self.settings.shell.len(),
      "Installing worker"
    );

    let fetcher = &self.fetcher;
    let fetches = self.settings.shell.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let response = fetcher
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to fetch shell resource {}: {}", url, e))?;
      if !response.is_ok() {
        return Err(eyre!(
          "Shell resource {} returned {} {}",
          url,
          response.status,
          response.status_text
        ));
      }
      Ok::<_, color_eyre::Report>((RequestKey::from(&request), response))
    });

    let static_name = &self.settings.partitions.static_name;
    let seeded = try_join_all(fetches).await.and_then(|entries| {
      self.layer.storage().put_all(static_name, &entries)?;
      Ok(entries.len())
    });

    match seeded {
      Ok(count) => {
        self.advance(LifecycleEvent::InstallSucceeded)?;
        info!(partition = %self.settings.partitions.static_name, count, "Static files cached");
        Ok(())
      }
      Err(e) => {
        error!(version = %self.settings.version, error = %e, "Error caching static files");
        self.advance(LifecycleEvent::InstallFailed)?;
        Err(e)
      }
    }
  }

  /// Adopt a static partition seeded by an earlier run instead of installing.
  ///
  /// Returns false, leaving the worker untouched, if the partition is missing.
  pub fn restore(&mut self) -> Result<bool> {
    if self.state != WorkerState::Parsed
      || !self
        .layer
        .storage()
        .has_partition(&self.settings.partitions.static_name)?
    {
      return Ok(false);
    }

    self.advance(LifecycleEvent::InstallStarted)?;
    self.advance(LifecycleEvent::InstallSucceeded)?;
    Ok(true)
  }

  /// Delete every partition this version does not own.
  pub fn activate(&mut self) -> Result<()> {
    self.advance(LifecycleEvent::ActivateStarted)?;

    let storage = self.layer.storage();
    for name in storage.partition_names()? {
      if !self.settings.partitions.is_current(&name) {
        info!(partition = %name, "Deleting old cache");
        storage.delete_partition(&name)?;
      }
    }

    self.advance(LifecycleEvent::ActivateFinished)?;
    info!(version = %self.settings.version, "Worker activated");
    Ok(())
  }

  /// Mark this worker as superseded.
  pub fn retire(&mut self) {
    if let Err(e) = self.advance(LifecycleEvent::Replaced) {
      warn!(error = %e, "Retiring worker out of order");
      self.state = WorkerState::Redundant;
    }
  }

  /// Dispatch an intercepted request according to its resource class.
  pub async fn handle_fetch(&self, request: &Request) -> Result<FetchDisposition, FetchError> {
    let partitions = &self.settings.partitions;

    match ResourceClass::of(request) {
      ResourceClass::Passthrough => Ok(FetchDisposition::Passthrough),
      ResourceClass::Document | ResourceClass::StaticAsset => {
        let response = self
          .layer
          .cache_first(self.fetcher.as_ref(), request, &partitions.static_name)
          .await;
        Ok(FetchDisposition::Respond(response))
      }
      ResourceClass::Dynamic => self
        .layer
        .network_first(
          self.fetcher.as_ref(),
          request,
          &partitions.dynamic_name,
          &self.settings.fallback_document,
        )
        .await
        .map(FetchDisposition::Respond),
    }
  }

  /// Store a form payload in the dynamic partition for a later background sync.
  pub fn cache_form_data(&self, form_data: &serde_json::Value) -> Result<()> {
    let body =
      serde_json::to_vec(form_data).map_err(|e| eyre!("Failed to encode form data: {}", e))?;
    self.layer.storage().put(
      &self.settings.partitions.dynamic_name,
      &RequestKey::get(&self.settings.form_data_url),
      &Response::json(body),
    )?;
    debug!("Cached offline form data");
    Ok(())
  }

  /// Run a background sync. Returns true if stored data was delivered.
  pub async fn handle_sync(&self, tag: SyncTag) -> bool {
    match tag {
      SyncTag::ContactForm => self.sync_contact_form().await,
    }
  }

  async fn sync_contact_form(&self) -> bool {
    let storage = self.layer.storage();
    let partition = &self.settings.partitions.dynamic_name;
    let key = RequestKey::get(&self.settings.form_data_url);

    let stored = match storage.match_in(partition, &key) {
      Ok(Some(hit)) => hit.response.body,
      Ok(None) => return false,
      Err(e) => {
        error!(error = %e, "Error getting stored form data");
        return false;
      }
    };

    let request = Request::post_json(self.settings.sync_endpoint.clone(), stored);
    match self.fetcher.fetch(&request).await {
      Ok(response) if response.is_ok() => {
        info!("Contact form synced successfully");
        if let Err(e) = storage.delete(partition, &key) {
          error!(error = %e, "Error clearing stored form data");
        }
        true
      }
      Ok(response) => {
        warn!(status = response.status, "Contact form sync rejected");
        false
      }
      Err(e) => {
        error!(error = %e, "Error syncing contact form");
        false
      }
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;
  use crate::http::stub::StubFetcher;

  pub(crate) const ORIGIN: &str = "http://localhost:3000";

  pub(crate) fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  pub(crate) fn settings(version: &str, shell: &[&str]) -> WorkerSettings {
    let shell: Vec<Url> = shell.iter().map(|p| url(p)).collect();
    WorkerSettings {
      version: version.to_string(),
      partitions: PartitionNames::new("kalavrita", version, &shell),
      shell,
      fallback_document: url("/index.html"),
      form_data_url: url("/offline-form-data"),
      sync_endpoint: url("/api/contact"),
      dynamic_max_entries: None,
      skip_waiting: false,
    }
  }

  pub(crate) fn storage() -> Arc<SqliteStorage> {
    Arc::new(SqliteStorage::new(Arc::new(Database::open_in_memory().unwrap())))
  }

  /// Fetcher that serves every shell path with a small body.
  pub(crate) fn shell_fetcher(paths: &[&str]) -> Arc<StubFetcher> {
    let fetcher = StubFetcher::new();
    for path in paths {
      fetcher.route(url(path).as_str(), Response::new(200, "OK", format!("content of {}", path)));
    }
    Arc::new(fetcher)
  }

  const SHELL: &[&str] = &["/", "/index.html", "/styles/main.css", "/js/app.js"];

  async fn activated_worker(
    storage: Arc<SqliteStorage>,
    fetcher: Arc<StubFetcher>,
  ) -> CacheWorker<SqliteStorage, StubFetcher> {
    let mut worker = CacheWorker::new(settings("v1", SHELL), storage, fetcher);
    worker.install().await.unwrap();
    worker.activate().unwrap();
    worker
  }

  #[tokio::test]
  async fn test_install_seeds_static_partition() {
    let storage = storage();
    let fetcher = shell_fetcher(SHELL);
    let mut worker = CacheWorker::new(settings("v1", SHELL), storage.clone(), fetcher.clone());

    worker.install().await.unwrap();

    assert_eq!(worker.state(), WorkerState::Installed);
    assert_eq!(fetcher.calls(), SHELL.len());
    assert_eq!(
      storage.entry_count(&worker.partitions().static_name).unwrap(),
      SHELL.len()
    );
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let storage = storage();
    // "/js/app.js" is missing and answers 404
    let fetcher = shell_fetcher(&["/", "/index.html", "/styles/main.css"]);
    let mut worker = CacheWorker::new(settings("v1", SHELL), storage.clone(), fetcher);

    assert!(worker.install().await.is_err());
    assert_eq!(worker.state(), WorkerState::Redundant);
    assert!(storage.partition_names().unwrap().is_empty());
    assert!(worker.activate().is_err());
  }

  #[tokio::test]
  async fn test_install_fails_when_offline() {
    let fetcher = shell_fetcher(SHELL);
    fetcher.set_offline(true);
    let mut worker = CacheWorker::new(settings("v1", SHELL), storage(), fetcher);

    assert!(worker.install().await.is_err());
    assert_eq!(worker.state(), WorkerState::Redundant);
  }

  #[tokio::test]
  async fn test_activate_purges_foreign_partitions_only() {
    let storage = storage();
    let old = url("/old.css");
    storage
      .put("kalavrita-static-v0-deadbeef", &RequestKey::get(&old), &Response::new(200, "OK", ""))
      .unwrap();
    storage
      .put("kalavrita-dynamic-v1", &RequestKey::get(&url("/api/x")), &Response::new(200, "OK", ""))
      .unwrap();

    let worker = activated_worker(storage.clone(), shell_fetcher(SHELL)).await;

    assert_eq!(worker.state(), WorkerState::Activated);
    let names = storage.partition_names().unwrap();
    assert_eq!(
      names,
      vec![
        "kalavrita-dynamic-v1".to_string(),
        worker.partitions().static_name.clone()
      ]
    );
  }

  #[tokio::test]
  async fn test_restore_adopts_existing_partition() {
    let storage = storage();
    let fetcher = shell_fetcher(SHELL);
    activated_worker(storage.clone(), fetcher.clone()).await;
    let calls = fetcher.calls();

    let mut next = CacheWorker::new(settings("v1", SHELL), storage.clone(), fetcher.clone());
    assert!(next.restore().unwrap());
    assert_eq!(next.state(), WorkerState::Installed);
    assert_eq!(fetcher.calls(), calls);

    let mut other = CacheWorker::new(settings("v2", SHELL), storage, fetcher);
    assert!(!other.restore().unwrap());
    assert_eq!(other.state(), WorkerState::Parsed);
  }

  #[tokio::test]
  async fn test_shell_change_renames_static_partition() {
    let a = settings("v1", SHELL);
    let b = settings("v1", &["/", "/index.html"]);
    assert_ne!(a.partitions.static_name, b.partitions.static_name);
    assert_eq!(a.partitions.dynamic_name, b.partitions.dynamic_name);
    assert!(a.partitions.static_name.starts_with("kalavrita-static-v1-"));
  }

  #[tokio::test]
  async fn test_handle_fetch_dispatch() {
    let fetcher = shell_fetcher(SHELL);
    let worker = activated_worker(storage(), fetcher.clone()).await;
    fetcher.set_offline(true);

    // Shell is served from cache while offline
    let doc = worker.handle_fetch(&Request::navigate(url("/"))).await.unwrap();
    assert_eq!(
      doc,
      FetchDisposition::Respond(Response::new(200, "OK", "content of /"))
    );

    // Uncached static asset while offline
    let asset = worker
      .handle_fetch(&Request::get(url("/icons/icon-512x512.png")))
      .await
      .unwrap();
    assert_eq!(asset, FetchDisposition::Respond(Response::service_unavailable()));

    // Navigation to an uncached route falls back to the cached document
    let nav = worker
      .handle_fetch(&Request::navigate(url("/restaurants")))
      .await
      .unwrap();
    assert_eq!(
      nav,
      FetchDisposition::Respond(Response::new(200, "OK", "content of /index.html"))
    );

    // API calls propagate the failure
    assert!(worker
      .handle_fetch(&Request::get(url("/api/activities")))
      .await
      .is_err());

    // Non-GET is left to the host
    let calls = fetcher.calls();
    let post = worker
      .handle_fetch(&Request::post_json(url("/api/contact"), b"{}".to_vec()))
      .await
      .unwrap();
    assert_eq!(post, FetchDisposition::Passthrough);
    assert_eq!(fetcher.calls(), calls);
  }

  #[tokio::test]
  async fn test_message_decoding() {
    let skip: WorkerMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
    assert_eq!(skip, WorkerMessage::SkipWaiting);

    let form: WorkerMessage =
      serde_json::from_str(r#"{"type":"CACHE_FORM_DATA","formData":{"name":"Eleni"}}"#).unwrap();
    assert_eq!(
      form,
      WorkerMessage::CacheFormData {
        form_data: serde_json::json!({"name": "Eleni"})
      }
    );

    assert!(serde_json::from_str::<WorkerMessage>(r#"{"type":"PUSH"}"#).is_err());
    assert_eq!(SyncTag::parse("contact-form-sync"), Some(SyncTag::ContactForm));
    assert_eq!(SyncTag::parse("other"), None);
  }

  #[tokio::test]
  async fn test_form_data_background_sync() {
    let fetcher = shell_fetcher(SHELL);
    let worker = activated_worker(storage(), fetcher.clone()).await;

    // Nothing stored yet
    assert!(!worker.handle_sync(SyncTag::ContactForm).await);

    let form = serde_json::json!({"name": "Eleni", "message": "Table for 4?"});
    worker.cache_form_data(&form).unwrap();

    // Endpoint rejects: data is kept
    fetcher.route(url("/api/contact").as_str(), Response::new(500, "Internal Server Error", ""));
    assert!(!worker.handle_sync(SyncTag::ContactForm).await);

    fetcher.route(url("/api/contact").as_str(), Response::json(b"{}".to_vec()));
    assert!(worker.handle_sync(SyncTag::ContactForm).await);

    let sent = fetcher.requests().pop().unwrap();
    assert_eq!(sent.method, reqwest::Method::POST);
    assert_eq!(
      serde_json::from_slice::<serde_json::Value>(sent.body.as_deref().unwrap()).unwrap(),
      form
    );

    // Cleared after delivery
    assert!(!worker.handle_sync(SyncTag::ContactForm).await);
  }
}
