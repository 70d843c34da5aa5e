//! Submission payloads and the queued record that wraps them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::render;

/// A message typed into the contact form. Fields are validated upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactForm {
  pub name: String,
  pub email: String,
  pub subject: String,
  pub message: String,
}

/// An activity listing, as served by the guide's data module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub kind: String,
  pub duration: String,
  pub difficulty: String,
  pub price: String,
  pub season: String,
}

/// Customer details for a booking inquiry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingInquiry {
  pub name: String,
  pub email: String,
  pub phone: Option<String>,
  pub preferred_date: Option<String>,
  pub group_size: Option<String>,
  pub special_requests: Option<String>,
}

/// The record accepted by the submission endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
  pub to: String,
  pub from: String,
  pub subject: String,
  pub html: String,
  pub text: String,
  pub reply_to: String,
  pub timestamp: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub activity_id: Option<String>,
}

impl EmailMessage {
  pub fn contact(recipient: &str, form: &ContactForm, at: DateTime<Utc>) -> Self {
    Self {
      to: recipient.to_string(),
      from: form.email.clone(),
      subject: format!("Kalavrita Guide Contact: {}", form.subject),
      html: render::contact_html(form, at),
      text: render::contact_text(form, at),
      reply_to: form.email.clone(),
      timestamp: at,
      activity_id: None,
    }
  }

  pub fn booking(
    recipient: &str,
    activity: &Activity,
    inquiry: &BookingInquiry,
    at: DateTime<Utc>,
  ) -> Self {
    Self {
      to: recipient.to_string(),
      from: inquiry.email.clone(),
      subject: format!("Booking Inquiry: {}", activity.name),
      html: render::booking_html(activity, inquiry, at),
      text: render::booking_text(activity, inquiry, at),
      reply_to: inquiry.email.clone(),
      timestamp: at,
      activity_id: Some(activity.id.clone()),
    }
  }
}

/// What the endpoint answers on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
  pub success: bool,
  pub message_id: String,
  pub timestamp: String,
}

/// One message waiting in the persistent queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSubmission {
  #[serde(flatten)]
  pub message: EmailMessage,
  pub queued_at: DateTime<Utc>,
  #[serde(default)]
  pub retry_count: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error: Option<String>,
}

impl PendingSubmission {
  pub fn new(message: EmailMessage) -> Self {
    Self {
      message,
      queued_at: Utc::now(),
      retry_count: 0,
      last_error: None,
    }
  }

  pub fn destination(&self) -> &str {
    &self.message.to
  }
}
