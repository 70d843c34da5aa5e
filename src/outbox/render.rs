//! Html and plain-text bodies for outbound messages.

use chrono::{DateTime, Utc};

use super::submission::{Activity, BookingInquiry, ContactForm};

const STYLE: &str = "body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; }
    .container { max-width: 600px; margin: 0 auto; padding: 20px; }
    .header { background-color: #2c5530; color: white; padding: 20px; text-align: center; }
    .content { background-color: #f9f9f9; padding: 20px; }
    .activity-info { background-color: white; padding: 15px; margin: 15px 0; border-left: 4px solid #2c5530; }
    .field { margin-bottom: 15px; }
    .label { font-weight: bold; color: #2c5530; }
    .footer { background-color: #1a3d1f; color: white; padding: 15px; text-align: center; font-size: 12px; }";

fn escape(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      _ => out.push(c),
    }
  }
  out
}

fn format_time(at: DateTime<Utc>) -> String {
  at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn field(label: &str, value: &str) -> String {
  format!(
    "<div class=\"field\"><div class=\"label\">{}:</div><div class=\"value\">{}</div></div>\n",
    label,
    escape(value).replace('\n', "<br>")
  )
}

fn page(title: &str, heading: &str, content: &str, footer: &str) -> String {
  format!(
    "<!DOCTYPE html>
<html>
<head>
  <meta charset=\"UTF-8\">
  <title>{title}</title>
  <style>
    {STYLE}
  </style>
</head>
<body>
  <div class=\"container\">
    <div class=\"header\"><h2>{heading}</h2><p>Kalavrita Guide PWA</p></div>
    <div class=\"content\">
{content}    </div>
    <div class=\"footer\">
      <p>{footer}</p>
      <p>Reply directly to this email to respond to the {recipient}.</p>
    </div>
  </div>
</body>
</html>",
    recipient = if heading.contains("Booking") { "customer" } else { "user" },
  )
}

fn or_placeholder<'a>(value: &'a Option<String>, placeholder: &'a str) -> &'a str {
  value
    .as_deref()
    .filter(|v| !v.trim().is_empty())
    .unwrap_or(placeholder)
}

pub fn contact_html(form: &ContactForm, at: DateTime<Utc>) -> String {
  let content = [
    field("Name", &form.name),
    field("Email", &form.email),
    field("Subject", &form.subject),
    field("Message", &form.message),
    field("Submitted", &format_time(at)),
  ]
  .concat();

  page(
    "Contact Form Submission",
    "New Contact Form Submission",
    &content,
    "This email was sent from the Kalavrita Guide PWA contact form.",
  )
}

pub fn contact_text(form: &ContactForm, at: DateTime<Utc>) -> String {
  format!(
    "New Contact Form Submission - Kalavrita Guide PWA

Name: {}
Email: {}
Subject: {}

Message:
{}

Submitted: {}

---
This email was sent from the Kalavrita Guide PWA contact form.
Reply directly to this email to respond to the user.",
    form.name,
    form.email,
    form.subject,
    form.message,
    format_time(at)
  )
}

pub fn booking_html(activity: &Activity, inquiry: &BookingInquiry, at: DateTime<Utc>) -> String {
  let activity_info = format!(
    "<div class=\"activity-info\"><h3>{}</h3>
<p><strong>Type:</strong> {}</p>
<p><strong>Duration:</strong> {}</p>
<p><strong>Difficulty:</strong> {}</p>
<p><strong>Price:</strong> {}</p>
<p><strong>Season:</strong> {}</p></div>\n",
    escape(&activity.name),
    escape(&activity.kind),
    escape(&activity.duration),
    escape(&activity.difficulty),
    escape(&activity.price),
    escape(&activity.season),
  );

  let content = [
    activity_info,
    field("Customer Name", &inquiry.name),
    field("Email", &inquiry.email),
    field("Phone", or_placeholder(&inquiry.phone, "Not provided")),
    field(
      "Preferred Date",
      or_placeholder(&inquiry.preferred_date, "Not specified"),
    ),
    field("Group Size", or_placeholder(&inquiry.group_size, "Not specified")),
    field(
      "Special Requests",
      or_placeholder(&inquiry.special_requests, "None"),
    ),
    field("Submitted", &format_time(at)),
  ]
  .concat();

  page(
    "Booking Inquiry",
    "New Booking Inquiry",
    &content,
    "This booking inquiry was sent from the Kalavrita Guide PWA.",
  )
}

pub fn booking_text(activity: &Activity, inquiry: &BookingInquiry, at: DateTime<Utc>) -> String {
  format!(
    "New Booking Inquiry - Kalavrita Guide PWA

Activity: {}
Type: {}
Duration: {}
Difficulty: {}
Price: {}
Season: {}

Customer Details:
Name: {}
Email: {}
Phone: {}
Preferred Date: {}
Group Size: {}
Special Requests: {}

Submitted: {}

---
This booking inquiry was sent from the Kalavrita Guide PWA.
Reply directly to this email to respond to the customer.",
    activity.name,
    activity.kind,
    activity.duration,
    activity.difficulty,
    activity.price,
    activity.season,
    inquiry.name,
    inquiry.email,
    or_placeholder(&inquiry.phone, "Not provided"),
    or_placeholder(&inquiry.preferred_date, "Not specified"),
    or_placeholder(&inquiry.group_size, "Not specified"),
    or_placeholder(&inquiry.special_requests, "None"),
    format_time(at)
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 10, 5, 0).unwrap()
  }

  #[test]
  fn test_contact_html_escapes_user_text() {
    let form = ContactForm {
      name: "<script>".to_string(),
      email: "a@b.gr".to_string(),
      subject: "Q".to_string(),
      message: "line one\nline & two".to_string(),
    };
    let html = contact_html(&form, at());

    assert!(html.contains("&lt;script&gt;"));
    assert!(!html.contains("<script>"));
    assert!(html.contains("line one<br>line &amp; two"));
    assert!(html.contains("2026-02-01 10:05 UTC"));
    assert!(html.contains("respond to the user."));
  }

  #[test]
  fn test_booking_text_placeholders() {
    let activity = Activity {
      id: "ski-helmos".to_string(),
      name: "Skiing at Helmos".to_string(),
      kind: "Winter Sports".to_string(),
      duration: "Full day".to_string(),
      difficulty: "All levels".to_string(),
      price: "€30".to_string(),
      season: "Dec-Apr".to_string(),
    };
    let inquiry = BookingInquiry {
      name: "Nikos".to_string(),
      email: "nikos@example.com".to_string(),
      phone: Some("  ".to_string()),
      group_size: Some("4".to_string()),
      ..Default::default()
    };

    let text = booking_text(&activity, &inquiry, at());
    assert!(text.contains("Activity: Skiing at Helmos"));
    assert!(text.contains("Phone: Not provided"));
    assert!(text.contains("Preferred Date: Not specified"));
    assert!(text.contains("Group Size: 4"));
    assert!(text.contains("Special Requests: None"));

    let html = booking_html(&activity, &inquiry, at());
    assert!(html.contains("<h3>Skiing at Helmos</h3>"));
    assert!(html.contains("respond to the customer."));
  }
}
