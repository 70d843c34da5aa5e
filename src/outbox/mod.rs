//! Outbound contact messages and booking inquiries.
//!
//! A message is sent right away when the network is reachable. When it is not,
//! or when the send fails, it goes into a persistent queue that is drained on
//! the next reconnect, with a bounded number of retries per message.

mod client;
mod queue;
mod render;
mod submission;
mod transport;

pub use client::{SubmissionClient, SubmitError};
pub use queue::QueueStore;
pub use submission::{Activity, BookingInquiry, ContactForm, DeliveryReceipt};
pub use transport::{ConfiguredTransport, Transport};

#[cfg(test)]
pub use submission::{EmailMessage, PendingSubmission};
#[cfg(test)]
pub use transport::SimulatedTransport;
