//! Core traits and types for the partitioned response cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;

use super::key::CacheKey;
use crate::http::Response;

/// What a partition is used for. Each purpose has exactly one current partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
  /// App-shell assets populated on install
  Static,
  /// Pages and images fetched at runtime
  Dynamic,
  /// Third-party API responses
  Api,
}

impl Purpose {
  pub fn as_str(&self) -> &'static str {
    match self {
      Purpose::Static => "static",
      Purpose::Dynamic => "dynamic",
      Purpose::Api => "api",
    }
  }
}

/// A response snapshot restored from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub response: Response,
  /// Readable URL the entry was stored for
  pub url: String,
  /// When the snapshot was captured
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Partitions are addressed by name only. Writes replace the whole snapshot
/// stored under a key, so concurrent writers resolve to last-write-wins.
pub trait CacheStore: Send + Sync {
  /// Names of every existing partition, sorted.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Create the partition if it does not exist yet.
  fn open(&self, partition: &str) -> Result<()>;

  /// Delete a partition and all of its entries. Returns false if it did not exist.
  fn delete_partition(&self, partition: &str) -> Result<bool>;

  /// Look up an entry, marking it as recently used.
  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CachedResponse>>;

  /// Store a snapshot, creating the partition on demand.
  fn put(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()>;

  /// Store several snapshots atomically: either all are written or none.
  fn put_all(&self, partition: &str, entries: &[(CacheKey, Response)]) -> Result<()>;

  /// Remove a single entry. Returns false if it did not exist.
  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool>;

  /// URLs stored in a partition, least recently used first.
  fn keys(&self, partition: &str) -> Result<Vec<String>>;

  /// Evict least recently used entries until at most `max_entries` remain.
  /// Returns the number of evicted entries.
  fn evict_to(&self, partition: &str, max_entries: usize) -> Result<usize>;

  fn has_partition(&self, partition: &str) -> Result<bool> {
    Ok(self.partitions()?.iter().any(|p| p == partition))
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Snapshot from a cache partition
  Cache,
  /// Synthesized by the offline fallback provider
  Fallback,
  /// Generated by the worker itself (share-target redirects)
  Worker,
}

/// A response together with metadata about its source.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
      cached_at: Some(cached.cached_at),
    }
  }

  pub fn fallback(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Fallback,
      cached_at: None,
    }
  }

  pub fn generated(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Worker,
      cached_at: None,
    }
  }
}
