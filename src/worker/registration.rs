//! Host-side bookkeeping of which worker controls pages.

use color_eyre::Result;
use tracing::{info, warn};

use super::{CacheWorker, FetchDisposition, SyncTag, WorkerMessage};
use crate::cache::CacheStorage;
use crate::http::{FetchError, Fetcher, Request};

/// Tracks the active (controlling) worker and at most one waiting worker.
pub struct Registration<S: CacheStorage, F: Fetcher> {
  active: Option<CacheWorker<S, F>>,
  waiting: Option<CacheWorker<S, F>>,
}

impl<S: CacheStorage, F: Fetcher> Default for Registration<S, F> {
  fn default() -> Self {
    Self {
      active: None,
      waiting: None,
    }
  }
}

impl<S: CacheStorage, F: Fetcher> Registration<S, F> {
  pub fn new() -> Self {
    Self::default()
  }

  /// The worker currently in control of pages.
  pub fn controller(&self) -> Option<&CacheWorker<S, F>> {
    self.active.as_ref()
  }

  pub fn waiting(&self) -> Option<&CacheWorker<S, F>> {
    self.waiting.as_ref()
  }

  /// Install a new worker version.
  ///
  /// If installation fails the new worker is discarded and the current
  /// controller keeps control. Otherwise the worker activates immediately when
  /// nothing is in control or it asked to skip waiting, and waits otherwise.
  pub async fn update(&mut self, mut worker: CacheWorker<S, F>) -> Result<()> {
    if let Err(e) = worker.install().await {
      warn!(
        version = worker.version(),
        error = %e,
        "Worker install failed, keeping current controller"
      );
      return Err(e);
    }

    self.settle(worker)
  }

  /// Adopt a worker whose static partition survives from an earlier run,
  /// installing it if there is nothing to adopt.
  pub async fn restore(&mut self, mut worker: CacheWorker<S, F>) -> Result<()> {
    if !worker.restore()? {
      return self.update(worker).await;
    }

    info!(version = worker.version(), "Restored installed worker");
    self.settle(worker)
  }

  fn settle(&mut self, worker: CacheWorker<S, F>) -> Result<()> {
    if self.active.is_none() || worker.skip_waiting_requested() {
      self.promote(worker)
    } else {
      info!(version = worker.version(), "Worker installed, waiting");
      if let Some(mut previous) = self.waiting.replace(worker) {
        previous.retire();
      }
      Ok(())
    }
  }

  fn promote(&mut self, mut worker: CacheWorker<S, F>) -> Result<()> {
    worker.activate()?;
    if let Some(mut previous) = self.active.replace(worker) {
      info!(version = previous.version(), "Worker replaced");
      previous.retire();
    }
    Ok(())
  }

  /// Activate the waiting worker. Returns false if none is waiting.
  pub fn skip_waiting(&mut self) -> Result<bool> {
    match self.waiting.take() {
      Some(mut worker) => {
        worker.request_skip_waiting();
        self.promote(worker)?;
        Ok(true)
      }
      None => Ok(false),
    }
  }

  /// Route an intercepted request through the controller.
  pub async fn dispatch(&self, request: &Request) -> Result<FetchDisposition, FetchError> {
    match &self.active {
      Some(worker) => worker.handle_fetch(request).await,
      None => Ok(FetchDisposition::Passthrough),
    }
  }

  /// Deliver a page message.
  pub fn post_message(&mut self, message: WorkerMessage) -> Result<()> {
    match message {
      WorkerMessage::SkipWaiting => {
        self.skip_waiting()?;
      }
      WorkerMessage::CacheFormData { form_data } => match &self.active {
        Some(worker) => worker.cache_form_data(&form_data)?,
        None => warn!("No controlling worker, form data dropped"),
      },
    }
    Ok(())
  }

  /// Run a background sync on the controller.
  pub async fn sync(&self, tag: SyncTag) -> bool {
    match &self.active {
      Some(worker) => worker.handle_sync(tag).await,
      None => false,
    }
  }
}
