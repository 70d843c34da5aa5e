//! Core traits and types for the response cache.

use color_eyre::Result;
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::http::{Request, Response};

/// Request identity used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn get(url: &Url) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.to_string(),
    }
  }
}

impl From<&Request> for RequestKey {
  fn from(request: &Request) -> Self {
    Self {
      method: request.method.as_str().to_string(),
      url: request.url.to_string(),
    }
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// The two partition names owned by one worker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
  pub static_name: String,
  pub dynamic_name: String,
}

impl PartitionNames {
  /// Derive partition names for a worker version.
  ///
  /// The static name embeds a digest of the shell list, so any change to the
  /// shell produces a new partition and the old one is purged on activation.
  pub fn new(prefix: &str, version: &str, shell: &[Url]) -> Self {
    let mut hasher = Sha256::new();
    for url in shell {
      hasher.update(url.as_str().as_bytes());
      hasher.update(b"\n");
    }
    let digest = hex::encode(hasher.finalize());

    Self {
      static_name: format!("{}-static-{}-{}", prefix, version, &digest[..8]),
      dynamic_name: format!("{}-dynamic-{}", prefix, version),
    }
  }

  pub fn is_current(&self, name: &str) -> bool {
    name == self.static_name || name == self.dynamic_name
  }
}

/// A response read back from a partition.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub partition: String,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// All partition names, in creation order.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Whether a partition exists.
  fn has_partition(&self, name: &str) -> Result<bool>;

  /// Delete a partition and its entries. Returns false if it did not exist.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Create the partition if needed and store all entries in one transaction.
  fn put_all(&self, partition: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Store one entry, creating the partition if needed.
  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.put_all(partition, &[(key.clone(), response.clone())])
  }

  /// Look up an entry in one partition.
  fn match_in(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Look up an entry in any partition, oldest partition first.
  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Remove one entry. Returns false if it did not exist.
  fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool>;

  /// Number of entries in a partition.
  #[cfg(test)]
  fn entry_count(&self, partition: &str) -> Result<usize>;

  /// Evict the oldest entries beyond `max_entries`. Returns how many were evicted.
  fn trim(&self, partition: &str, max_entries: usize) -> Result<usize>;
}
