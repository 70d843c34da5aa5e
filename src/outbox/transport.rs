//! Delivery of messages to the submission endpoint.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::submission::{DeliveryReceipt, EmailMessage};
use crate::config::{Config, TransportKind};

#[derive(Debug, Error)]
pub enum DeliveryError {
  #[error("Email service temporarily unavailable")]
  Unavailable,

  #[error("endpoint rejected the message with status {status}")]
  Rejected { status: u16 },

  #[error("request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("invalid endpoint response: {0}")]
  Decode(#[from] serde_json::Error),
}

/// Sends one message and reports a receipt.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Posts the message as JSON to the endpoint.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  endpoint: Url,
}

impl HttpTransport {
  pub fn new(endpoint: Url, timeout: Duration) -> color_eyre::Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to build HTTP client: {}", e))?;
    Ok(Self { client, endpoint })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt, DeliveryError> {
    let body = serde_json::to_vec(message)?;

    let response = self
      .client
      .post(self.endpoint.clone())
      .header("content-type", "application/json")
      .body(body)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      return Err(DeliveryError::Rejected {
        status: status.as_u16(),
      });
    }

    let receipt: DeliveryReceipt = serde_json::from_slice(&response.bytes().await?)?;
    if !receipt.success {
      return Err(DeliveryError::Rejected {
        status: status.as_u16(),
      });
    }

    Ok(receipt)
  }
}

/// Stand-in for the email service with deterministic, scripted failures.
///
/// Each send consumes the next scripted outcome; once the script is exhausted
/// every send uses the fallback outcome.
pub struct SimulatedTransport {
  latency: Duration,
  script: Mutex<VecDeque<bool>>,
  fallback_succeeds: bool,
  attempts: AtomicUsize,
  delivered: Mutex<Vec<EmailMessage>>,
}

impl SimulatedTransport {
  /// Every send succeeds.
  pub fn succeeding() -> Self {
    Self::with_fallback(true)
  }

  /// Every send fails with `DeliveryError::Unavailable`.
  #[cfg(test)]
  pub fn failing() -> Self {
    Self::with_fallback(false)
  }

  fn with_fallback(fallback_succeeds: bool) -> Self {
    Self {
      latency: Duration::ZERO,
      script: Mutex::new(VecDeque::new()),
      fallback_succeeds,
      attempts: AtomicUsize::new(0),
      delivered: Mutex::new(Vec::new()),
    }
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  /// Queue outcomes for the next sends (`true` = delivered).
  #[cfg(test)]
  pub fn script(self, outcomes: impl IntoIterator<Item = bool>) -> Self {
    if let Ok(mut script) = self.script.lock() {
      script.extend(outcomes);
    }
    self
  }

  /// Number of send attempts so far.
  #[cfg(test)]
  pub fn attempts(&self) -> usize {
    self.attempts.load(Ordering::SeqCst)
  }

  /// Messages delivered so far, in order.
  #[cfg(test)]
  pub fn delivered(&self) -> Vec<EmailMessage> {
    self
      .delivered
      .lock()
      .map(|d| d.clone())
      .unwrap_or_default()
  }

  fn next_outcome(&self) -> bool {
    self
      .script
      .lock()
      .ok()
      .and_then(|mut s| s.pop_front())
      .unwrap_or(self.fallback_succeeds)
  }
}

#[async_trait]
impl Transport for SimulatedTransport {
  async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt, DeliveryError> {
    self.attempts.fetch_add(1, Ordering::SeqCst);
    let succeeds = self.next_outcome();

    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }

    if !succeeds {
      return Err(DeliveryError::Unavailable);
    }

    if let Ok(mut delivered) = self.delivered.lock() {
      delivered.push(message.clone());
    }

    let now = Utc::now();
    tracing::info!(subject = %message.subject, "Email sent successfully");
    Ok(DeliveryReceipt {
      success: true,
      message_id: format!("msg_{}", now.timestamp_millis()),
      timestamp: now.to_rfc3339(),
    })
  }
}

/// The transport selected in the configuration.
pub enum ConfiguredTransport {
  Http(HttpTransport),
  Simulated(SimulatedTransport),
}

impl ConfiguredTransport {
  pub fn from_config(config: &Config) -> color_eyre::Result<Self> {
    Ok(match config.outbox.transport {
      TransportKind::Http => ConfiguredTransport::Http(HttpTransport::new(
        config.endpoint_url()?,
        config.request_timeout(),
      )?),
      TransportKind::Simulated => ConfiguredTransport::Simulated(
        SimulatedTransport::succeeding().with_latency(Duration::from_millis(1000)),
      ),
    })
  }
}

#[async_trait]
impl Transport for ConfiguredTransport {
  async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt, DeliveryError> {
    match self {
      ConfiguredTransport::Http(t) => t.send(message).await,
      ConfiguredTransport::Simulated(t) => t.send(message).await,
    }
  }
}
