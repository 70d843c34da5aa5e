//! Network reachability tracking and queue draining on reconnect.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use url::Url;

use crate::http::HttpFetcher;
use crate::outbox::{SubmissionClient, Transport};

/// Host signals about connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
  Online,
  Offline,
}

/// Create the channel the host uses to report connectivity changes.
pub fn channel() -> (
  mpsc::UnboundedSender<ConnectivityEvent>,
  mpsc::UnboundedReceiver<ConnectivityEvent>,
) {
  mpsc::unbounded_channel()
}

/// Shared "is the network reachable" flag.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  /// Start from the host's current indicator.
  pub fn new(initially_online: bool) -> Self {
    let (tx, _rx) = watch::channel(initially_online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Set the flag. Returns true if the value changed.
  pub fn set_online(&self, online: bool) -> bool {
    self.tx.send_replace(online) != online
  }

  /// Receive every change of the flag.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Reacts to connectivity events by flipping the flag and draining the queue.
///
/// Drains run as tasks owned by the observer; `run` does not return while one
/// is still in flight, since a drain holds its snapshot outside the queue.
pub struct ConnectivityObserver<T: Transport + 'static> {
  client: Arc<SubmissionClient<T>>,
  initial_drain_delay: Duration,
  drains: JoinSet<()>,
}

impl<T: Transport + 'static> ConnectivityObserver<T> {
  pub fn new(client: Arc<SubmissionClient<T>>, initial_drain_delay: Duration) -> Self {
    Self {
      client,
      initial_drain_delay,
      drains: JoinSet::new(),
    }
  }

  /// Apply one event. Going online starts a drain right away; every online
  /// event does, even if the flag was already set. Returns whether a drain
  /// was started.
  pub fn handle(&mut self, event: ConnectivityEvent) -> bool {
    match event {
      ConnectivityEvent::Online => {
        self.client.connectivity().set_online(true);
        info!("Connection restored, draining queue");
        self.spawn_drain(Duration::ZERO);
        true
      }
      ConnectivityEvent::Offline => {
        self.client.connectivity().set_online(false);
        info!("Connection lost");
        false
      }
    }
  }

  /// Drain once after startup if already online, leaving time for page setup.
  pub fn schedule_initial_drain(&mut self) -> bool {
    if !self.client.connectivity().is_online() {
      return false;
    }
    self.spawn_drain(self.initial_drain_delay);
    true
  }

  fn spawn_drain(&mut self, delay: Duration) {
    let client = Arc::clone(&self.client);
    self.drains.spawn(async move {
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      match client.drain_queue().await {
        Ok(report) if report.attempted > 0 => info!(?report, "Queue drained"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Queue drain failed"),
      }
    });
  }

  /// Reap drains that already finished.
  fn reap(&mut self) {
    while let Some(result) = self.drains.try_join_next() {
      log_join(result);
    }
  }

  /// Wait for every started drain to finish.
  pub async fn settle(&mut self) {
    while let Some(result) = self.drains.join_next().await {
      log_join(result);
    }
  }

  /// Process events until the sender side closes, then wait for the drains.
  pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ConnectivityEvent>) {
    self.schedule_initial_drain();

    while let Some(event) = events.recv().await {
      debug!(?event, "Connectivity event");
      self.handle(event);
      self.reap();
    }

    self.settle().await;
  }
}

fn log_join(result: Result<(), JoinError>) {
  if let Err(e) = result {
    warn!(error = %e, "Queue drain task failed");
  }
}

/// Turns periodic reachability checks of the origin into connectivity events.
pub struct ReachabilityProbe {
  fetcher: HttpFetcher,
  target: Url,
  interval: Duration,
}

impl ReachabilityProbe {
  pub fn new(fetcher: HttpFetcher, target: Url, interval: Duration) -> Self {
    Self {
      fetcher,
      target,
      interval,
    }
  }

  /// Current reachability, used as the initial indicator.
  pub async fn check(&self) -> bool {
    self.fetcher.reachable(&self.target).await
  }

  /// Poll in the background, sending an event whenever reachability changes.
  pub fn spawn(
    self,
    mut last: bool,
    tx: mpsc::UnboundedSender<ConnectivityEvent>,
  ) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval);
      loop {
        ticker.tick().await;
        let now = self.check().await;
        if now == last {
          continue;
        }
        last = now;

        let event = if now {
          ConnectivityEvent::Online
        } else {
          ConnectivityEvent::Offline
        };
        if tx.send(event).is_err() {
          break;
        }
      }
    })
  }
}
