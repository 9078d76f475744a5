//! Cache layer that sits between the strategies and a storage backend.

use std::sync::Arc;
use tracing::{debug, warn};

use super::key::CacheKey;
use super::traits::{CacheStore, CachedResponse};
use crate::http::{Request, Response};

/// Error-tolerant view of a cache store.
///
/// Storage faults during request handling are logged and treated as misses
/// (for reads) or dropped writes, so a broken cache degrades to network-only
/// behavior instead of failing the request.
pub struct CacheLayer<S: CacheStore> {
  storage: Arc<S>,
}

impl<S: CacheStore> CacheLayer<S> {
  pub fn new(storage: Arc<S>) -> Self {
    Self { storage }
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Look up the snapshot stored for a request.
  pub fn lookup(&self, partition: &str, request: &Request) -> Option<CachedResponse> {
    self.lookup_key(partition, &CacheKey::for_request(request))
  }

  pub fn lookup_key(&self, partition: &str, key: &CacheKey) -> Option<CachedResponse> {
    match self.storage.get(partition, key) {
      Ok(hit) => {
        debug!(partition, url = key.url(), hit = hit.is_some(), "cache lookup");
        hit
      }
      Err(e) => {
        warn!(partition, url = key.url(), error = %e, "cache read failed, treating as miss");
        None
      }
    }
  }

  /// Overwrite the snapshot for a request, then trim the partition to its cap.
  pub fn store(
    &self,
    partition: &str,
    max_entries: Option<usize>,
    request: &Request,
    response: &Response,
  ) {
    let key = CacheKey::for_request(request);
    if let Err(e) = self.storage.put(partition, &key, response) {
      warn!(partition, url = key.url(), error = %e, "cache write failed");
      return;
    }

    if let Some(max) = max_entries {
      match self.storage.evict_to(partition, max) {
        Ok(0) => {}
        Ok(evicted) => debug!(partition, evicted, "evicted least recently used entries"),
        Err(e) => warn!(partition, error = %e, "cache eviction failed"),
      }
    }
  }
}

impl<S: CacheStore> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}
