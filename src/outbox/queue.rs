//! Persistent queue of pending submissions.
//!
//! The whole queue lives in one storage slot as a JSON array. Every operation
//! reads the full record, changes it, and writes it back.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use super::submission::PendingSubmission;
use crate::db::Database;

/// Storage slot holding the queue.
pub const QUEUE_SLOT: &str = "kalavrita_email_queue";

#[derive(Clone)]
pub struct QueueStore {
  db: Arc<Database>,
  slot: String,
}

impl QueueStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self {
      db,
      slot: QUEUE_SLOT.to_string(),
    }
  }

  /// Read the full queue. An unreadable record is treated as empty.
  pub fn load(&self) -> Result<Vec<PendingSubmission>> {
    let Some(raw) = self.db.get_slot(&self.slot)? else {
      return Ok(Vec::new());
    };

    match serde_json::from_str(&raw) {
      Ok(queue) => Ok(queue),
      Err(e) => {
        warn!(error = %e, "Failed to load offline queue, starting empty");
        Ok(Vec::new())
      }
    }
  }

  /// Replace the full queue.
  pub fn save(&self, queue: &[PendingSubmission]) -> Result<()> {
    let raw =
      serde_json::to_string(queue).map_err(|e| eyre!("Failed to encode offline queue: {}", e))?;
    self.db.put_slot(&self.slot, &raw)
  }

  /// Append one entry and persist.
  pub fn push(&self, entry: PendingSubmission) -> Result<usize> {
    let mut queue = self.load()?;
    debug!(subject = %entry.message.subject, "Email queued for retry");
    queue.push(entry);
    self.save(&queue)?;
    Ok(queue.len())
  }

  /// Take every entry, leaving the persisted queue empty.
  ///
  /// Nothing is written when the queue is already empty.
  pub fn take_all(&self) -> Result<Vec<PendingSubmission>> {
    let queue = self.load()?;
    if !queue.is_empty() {
      self.save(&[])?;
    }
    Ok(queue)
  }

  /// Append entries to whatever is queued now and persist.
  pub fn requeue(&self, entries: Vec<PendingSubmission>) -> Result<usize> {
    let mut queue = self.load()?;
    queue.extend(entries);
    self.save(&queue)?;
    Ok(queue.len())
  }

  #[cfg(test)]
  pub fn len(&self) -> Result<usize> {
    Ok(self.load()?.len())
  }
}
