//! Submission client: send now, or queue and retry later.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use super::queue::QueueStore;
use super::submission::{
  Activity, BookingInquiry, ContactForm, DeliveryReceipt, EmailMessage, PendingSubmission,
};
use super::transport::{DeliveryError, Transport};
use crate::connectivity::Connectivity;

/// Failed replays after which a queued message is dropped for good.
pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum SubmitError {
  /// No connectivity; the message is queued and will be sent once online.
  #[error("Offline - message queued for later")]
  QueuedOffline,

  /// The endpoint call failed; the message is queued for retry.
  #[error("delivery failed, message queued for retry: {0}")]
  Delivery(#[from] DeliveryError),

  /// The message could not be persisted.
  #[error("failed to persist queued message: {0}")]
  Storage(color_eyre::Report),
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub attempted: usize,
  pub delivered: usize,
  pub requeued: usize,
  pub dropped: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSummary {
  pub subject: String,
  pub queued_at: chrono::DateTime<Utc>,
  pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
  pub is_online: bool,
  pub queue_length: usize,
  pub queued_emails: Vec<QueuedSummary>,
}

pub struct SubmissionClient<T: Transport> {
  transport: T,
  queue: QueueStore,
  connectivity: Connectivity,
  recipient: String,
}

impl<T: Transport> SubmissionClient<T> {
  pub fn new(
    transport: T,
    queue: QueueStore,
    connectivity: Connectivity,
    recipient: impl Into<String>,
  ) -> Self {
    Self {
      transport,
      queue,
      connectivity,
      recipient: recipient.into(),
    }
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  #[cfg(test)]
  pub fn queue(&self) -> &QueueStore {
    &self.queue
  }

  #[cfg(test)]
  pub fn transport(&self) -> &T {
    &self.transport
  }

  /// Send a contact form message.
  pub async fn submit(&self, form: &ContactForm) -> Result<DeliveryReceipt, SubmitError> {
    let message = EmailMessage::contact(&self.recipient, form, Utc::now());
    self.deliver_or_queue(message).await
  }

  /// Send a booking inquiry for an activity.
  pub async fn submit_booking(
    &self,
    activity: &Activity,
    inquiry: &BookingInquiry,
  ) -> Result<DeliveryReceipt, SubmitError> {
    let message = EmailMessage::booking(&self.recipient, activity, inquiry, Utc::now());
    self.deliver_or_queue(message).await
  }

  async fn deliver_or_queue(&self, message: EmailMessage) -> Result<DeliveryReceipt, SubmitError> {
    if !self.connectivity.is_online() {
      self.enqueue(message)?;
      return Err(SubmitError::QueuedOffline);
    }

    match self.transport.send(&message).await {
      Ok(receipt) => Ok(receipt),
      Err(e) => {
        error!(error = %e, subject = %message.subject, "Email failed, queuing for retry");
        self.enqueue(message)?;
        Err(SubmitError::Delivery(e))
      }
    }
  }

  fn enqueue(&self, message: EmailMessage) -> Result<(), SubmitError> {
    let length = self
      .queue
      .push(PendingSubmission::new(message))
      .map_err(SubmitError::Storage)?;
    info!(queue_length = length, "Email queued for retry");
    Ok(())
  }

  /// Replay every queued message, one at a time.
  ///
  /// The queue is emptied before the first send, so a drain that starts while
  /// this one is running sees nothing to do. Failed entries are appended back
  /// to the live queue until they reach `MAX_RETRIES`.
  pub async fn drain_queue(&self) -> color_eyre::Result<DrainReport> {
    let snapshot = self.queue.take_all()?;
    if snapshot.is_empty() {
      return Ok(DrainReport::default());
    }

    info!(count = snapshot.len(), "Processing queued emails");
    let mut report = DrainReport {
      attempted: snapshot.len(),
      ..Default::default()
    };
    let mut retained = Vec::new();

    for mut entry in snapshot {
      match self.transport.send(&entry.message).await {
        Ok(receipt) => {
          info!(
            subject = %entry.message.subject,
            message_id = %receipt.message_id,
            "Queued email sent successfully"
          );
          report.delivered += 1;
        }
        Err(e) => {
          entry.retry_count += 1;
          entry.last_error = Some(e.to_string());

          if entry.retry_count < MAX_RETRIES {
            warn!(
              subject = %entry.message.subject,
              retry_count = entry.retry_count,
              error = %e,
              "Failed to send queued email"
            );
            retained.push(entry);
            report.requeued += 1;
          } else {
            error!(
              subject = %entry.message.subject,
              destination = entry.destination(),
              error = %e,
              "Max retries exceeded for email, dropping"
            );
            report.dropped += 1;
          }
        }
      }
    }

    self.queue.requeue(retained)?;
    Ok(report)
  }

  /// Snapshot of connectivity and queued messages for display.
  pub fn queue_status(&self) -> color_eyre::Result<QueueStatus> {
    let queue = self.queue.load()?;
    Ok(QueueStatus {
      is_online: self.connectivity.is_online(),
      queue_length: queue.len(),
      queued_emails: queue
        .into_iter()
        .map(|e| QueuedSummary {
          subject: e.message.subject,
          queued_at: e.queued_at,
          retry_count: e.retry_count,
        })
        .collect(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::outbox::transport::SimulatedTransport;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  fn form(subject: &str) -> ContactForm {
    ContactForm {
      name: "Dimitris".to_string(),
      email: "dimitris@example.com".to_string(),
      subject: subject.to_string(),
      message: "Are there rooms free this weekend?".to_string(),
    }
  }

  fn client(transport: SimulatedTransport, online: bool) -> SubmissionClient<SimulatedTransport> {
    let queue = QueueStore::new(Arc::new(Database::open_in_memory().unwrap()));
    SubmissionClient::new(transport, queue, Connectivity::new(online), "hello@forcehook.com")
  }

  #[tokio::test]
  async fn test_online_submit_delivers() {
    let client = client(SimulatedTransport::succeeding(), true);

    let receipt = client.submit(&form("Rooms")).await.unwrap();
    assert!(receipt.success);
    assert_eq!(client.queue().len().unwrap(), 0);
    assert_eq!(
      client.transport().delivered()[0].subject,
      "Kalavrita Guide Contact: Rooms"
    );
  }

  #[tokio::test]
  async fn test_offline_submit_queues_without_network() {
    let client = client(SimulatedTransport::succeeding(), false);

    let err = client.submit(&form("Rooms")).await.unwrap_err();
    assert!(matches!(err, SubmitError::QueuedOffline));
    assert_eq!(client.transport().attempts(), 0);

    let queued = client.queue().load().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].retry_count, 0);
    assert_eq!(queued[0].destination(), "hello@forcehook.com");
  }

  #[tokio::test]
  async fn test_failed_online_submit_queues_and_reports() {
    let client = client(SimulatedTransport::failing(), true);

    let err = client.submit(&form("Rooms")).await.unwrap_err();
    assert!(matches!(err, SubmitError::Delivery(DeliveryError::Unavailable)));
    assert_eq!(client.queue().load().unwrap()[0].retry_count, 0);
  }

  #[tokio::test]
  async fn test_drain_empty_queue_is_noop() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let client = SubmissionClient::new(
      SimulatedTransport::succeeding(),
      QueueStore::new(db.clone()),
      Connectivity::new(true),
      "hello@forcehook.com",
    );

    let report = client.drain_queue().await.unwrap();
    assert_eq!(report, DrainReport::default());
    assert_eq!(client.transport().attempts(), 0);
    assert_eq!(db.get_slot(crate::outbox::queue::QUEUE_SLOT).unwrap(), None);
  }

  #[tokio::test]
  async fn test_offline_then_online_delivers_in_one_drain() {
    let client = client(SimulatedTransport::succeeding(), false);
    client.submit(&form("Rooms")).await.unwrap_err();
    assert_eq!(client.queue().len().unwrap(), 1);

    client.connectivity().set_online(true);
    let report = client.drain_queue().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(client.queue().len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_entry_dropped_exactly_at_ceiling() {
    let client = client(SimulatedTransport::failing(), false);
    client.submit(&form("Rooms")).await.unwrap_err();
    client.connectivity().set_online(true);

    for expected in 1..MAX_RETRIES {
      let report = client.drain_queue().await.unwrap();
      assert_eq!(report.requeued, 1);
      let queued = client.queue().load().unwrap();
      assert_eq!(queued[0].retry_count, expected);
      assert_eq!(
        queued[0].last_error.as_deref(),
        Some("Email service temporarily unavailable")
      );
    }

    let report = client.drain_queue().await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(client.queue().len().unwrap(), 0);
    assert_eq!(client.transport().attempts(), 3);

    // Nothing left to try
    client.drain_queue().await.unwrap();
    assert_eq!(client.transport().attempts(), 3);
  }

  #[tokio::test]
  async fn test_drain_is_sequential_and_ordered() {
    let transport = SimulatedTransport::succeeding().script([true, false, true]);
    let client = client(transport, false);
    for subject in ["one", "two", "three"] {
      client.submit(&form(subject)).await.unwrap_err();
    }

    let report = client.drain_queue().await.unwrap();
    assert_eq!(
      report,
      DrainReport {
        attempted: 3,
        delivered: 2,
        requeued: 1,
        dropped: 0
      }
    );

    let delivered: Vec<_> = client
      .transport()
      .delivered()
      .into_iter()
      .map(|m| m.subject)
      .collect();
    assert_eq!(
      delivered,
      vec![
        "Kalavrita Guide Contact: one",
        "Kalavrita Guide Contact: three"
      ]
    );
    assert_eq!(
      client.queue().load().unwrap()[0].message.subject,
      "Kalavrita Guide Contact: two"
    );
  }

  /// Counts how many sends overlap.
  #[derive(Default)]
  struct OverlapTransport {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    sent: AtomicUsize,
  }

  #[async_trait::async_trait]
  impl Transport for OverlapTransport {
    async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt, DeliveryError> {
      let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
      self.max_in_flight.fetch_max(now, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(10)).await;
      self.in_flight.fetch_sub(1, Ordering::SeqCst);
      self.sent.fetch_add(1, Ordering::SeqCst);

      Ok(DeliveryReceipt {
        success: true,
        message_id: format!("msg_{}", message.subject),
        timestamp: Utc::now().to_rfc3339(),
      })
    }
  }

  #[tokio::test]
  async fn test_drain_awaits_each_send_before_the_next() {
    let queue = QueueStore::new(Arc::new(Database::open_in_memory().unwrap()));
    let client = SubmissionClient::new(
      OverlapTransport::default(),
      queue,
      Connectivity::new(false),
      "hello@forcehook.com",
    );
    for subject in ["one", "two", "three", "four"] {
      client.submit(&form(subject)).await.unwrap_err();
    }

    let report = client.drain_queue().await.unwrap();

    assert_eq!(report.delivered, 4);
    assert_eq!(client.transport().sent.load(Ordering::SeqCst), 4);
    assert_eq!(client.transport().max_in_flight.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_concurrent_drain_sees_empty_snapshot() {
    let transport = SimulatedTransport::failing().with_latency(Duration::from_millis(20));
    let client = client(transport, false);
    client.submit(&form("Rooms")).await.unwrap_err();

    let (first, second) = tokio::join!(client.drain_queue(), client.drain_queue());

    assert_eq!(first.unwrap().attempted, 1);
    assert_eq!(second.unwrap(), DrainReport::default());
    assert_eq!(client.transport().attempts(), 1);
    assert_eq!(client.queue().load().unwrap()[0].retry_count, 1);
  }

  #[tokio::test]
  async fn test_message_queued_mid_drain_is_kept() {
    let transport = SimulatedTransport::failing().with_latency(Duration::from_millis(20));
    let client = client(transport, false);
    client.submit(&form("first")).await.unwrap_err();

    let second = form("second");
    let (report, submitted) = tokio::join!(client.drain_queue(), client.submit(&second));
    assert!(matches!(submitted, Err(SubmitError::QueuedOffline)));
    assert_eq!(report.unwrap().requeued, 1);

    let subjects: Vec<_> = client
      .queue()
      .load()
      .unwrap()
      .into_iter()
      .map(|e| e.message.subject)
      .collect();
    assert_eq!(
      subjects,
      vec![
        "Kalavrita Guide Contact: second",
        "Kalavrita Guide Contact: first"
      ]
    );
  }

  #[tokio::test]
  async fn test_booking_inquiry_carries_activity() {
    let client = client(SimulatedTransport::succeeding(), true);
    let activity = Activity {
      id: "odontotos".to_string(),
      name: "Odontotos Rack Railway".to_string(),
      kind: "Sightseeing".to_string(),
      duration: "1 hour".to_string(),
      difficulty: "Easy".to_string(),
      price: "€20".to_string(),
      season: "All year".to_string(),
    };
    let inquiry = BookingInquiry {
      name: "Sofia".to_string(),
      email: "sofia@example.com".to_string(),
      ..Default::default()
    };

    client.submit_booking(&activity, &inquiry).await.unwrap();

    let sent = &client.transport().delivered()[0];
    assert_eq!(sent.subject, "Booking Inquiry: Odontotos Rack Railway");
    assert_eq!(sent.activity_id.as_deref(), Some("odontotos"));
  }

  #[tokio::test]
  async fn test_queue_status() {
    let client = client(SimulatedTransport::succeeding(), false);
    client.submit(&form("Rooms")).await.unwrap_err();

    let status = client.queue_status().unwrap();
    assert!(!status.is_online);
    assert_eq!(status.queue_length, 1);
    assert_eq!(status.queued_emails[0].retry_count, 0);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["queueLength"], 1);
    assert_eq!(
      json["queuedEmails"][0]["subject"],
      "Kalavrita Guide Contact: Rooms"
    );
  }
}
