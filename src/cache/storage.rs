//! SQLite implementation of the cache storage trait.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

use super::traits::{CacheStorage, CachedResponse, RequestKey};
use crate::db::Database;
use crate::http::Response;

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

const ENTRY_COLUMNS: &str = "e.partition, e.status, e.status_text, e.headers, e.body";

type EntryRow = (String, i64, String, String, Vec<u8>);

fn read_entry(row: &Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
  ))
}

fn into_cached((partition, status, status_text, headers, body): EntryRow) -> Result<CachedResponse> {
  let headers: Vec<(String, String)> =
    serde_json::from_str(&headers).map_err(|e| eyre!("Failed to decode cached headers: {}", e))?;

  Ok(CachedResponse {
    response: Response {
      status: u16::try_from(status).map_err(|_| eyre!("Invalid cached status {}", status))?,
      status_text,
      headers,
      body,
    },
    partition,
  })
}

impl CacheStorage for SqliteStorage {
  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn has_partition(&self, name: &str) -> Result<bool> {
    let conn = self.db.lock()?;
    let found: Option<String> = conn
      .query_row(
        "SELECT name FROM cache_partitions WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up partition {}: {}", name, e))?;
    Ok(found.is_some())
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE partition = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM cache_partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put_all(&self, partition: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;

    for (key, response) in entries {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to encode headers: {}", e))?;

      // REPLACE deletes and reinserts, so rowid tracks write order for trim()
      tx.execute(
        "INSERT OR REPLACE INTO cache_entries
           (partition, method, url, status, status_text, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          partition,
          key.method,
          key.url,
          response.status,
          response.status_text,
          headers,
          response.body
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn match_in(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.db.lock()?;
    let row = conn
      .query_row(
        &format!(
          "SELECT {} FROM cache_entries e
           WHERE e.partition = ? AND e.method = ? AND e.url = ?",
          ENTRY_COLUMNS
        ),
        params![partition, key.method, key.url],
        read_entry,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    row.map(into_cached).transpose()
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.db.lock()?;
    let row = conn
      .query_row(
        &format!(
          "SELECT {} FROM cache_entries e
           INNER JOIN cache_partitions p ON p.name = e.partition
           WHERE e.method = ? AND e.url = ?
           ORDER BY p.rowid
           LIMIT 1",
          ENTRY_COLUMNS
        ),
        params![key.method, key.url],
        read_entry,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    row.map(into_cached).transpose()
  }

  fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool> {
    let conn = self.db.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE partition = ? AND method = ? AND url = ?",
        params![partition, key.method, key.url],
      )
      .map_err(|e| eyre!("Failed to delete {}: {}", key, e))?;
    Ok(removed > 0)
  }

  #[cfg(test)]
  fn entry_count(&self, partition: &str) -> Result<usize> {
    let conn = self.db.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE partition = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", partition, e))?;
    Ok(count as usize)
  }

  fn trim(&self, partition: &str, max_entries: usize) -> Result<usize> {
    let conn = self.db.lock()?;
    let evicted = conn
      .execute(
        "DELETE FROM cache_entries
         WHERE partition = ?1 AND rowid NOT IN (
           SELECT rowid FROM cache_entries WHERE partition = ?1
           ORDER BY rowid DESC LIMIT ?2
         )",
        params![partition, max_entries],
      )
      .map_err(|e| eyre!("Failed to trim {}: {}", partition, e))?;
    Ok(evicted)
  }
}
