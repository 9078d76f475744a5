//! Canonical request identity used as the cache key.

use sha2::{Digest, Sha256};
use url::Url;

use crate::http::Request;

/// Cache key derived from method and URL.
///
/// The fragment is dropped since it never reaches the server. The stored key is
/// a SHA-256 digest of the canonical form, the readable URL travels alongside.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  canonical: String,
  url: String,
  hash: String,
}

impl CacheKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    let url = url.to_string();
    let canonical = format!("{} {}", method.to_ascii_uppercase(), url);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Self {
      canonical,
      url,
      hash,
    }
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(&request.method, &request.url)
  }

  pub fn for_url(url: &Url) -> Self {
    Self::new("GET", url)
  }

  pub fn hash(&self) -> &str {
    &self.hash
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn canonical(&self) -> &str {
    &self.canonical
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_fragment_is_ignored() {
    let a = CacheKey::for_url(&url("https://a.example/page.html#top"));
    let b = CacheKey::for_url(&url("https://a.example/page.html"));
    assert_eq!(a, b);
    assert_eq!(a.url(), "https://a.example/page.html");
  }

  #[test]
  fn test_query_is_significant() {
    let a = CacheKey::for_url(&url("https://a.example/search?q=1"));
    let b = CacheKey::for_url(&url("https://a.example/search?q=2"));
    assert_ne!(a.hash(), b.hash());
  }

  #[test]
  fn test_method_is_part_of_identity() {
    let u = url("https://a.example/x");
    assert_ne!(CacheKey::new("get", &u).hash(), CacheKey::new("HEAD", &u).hash());
    assert_eq!(CacheKey::new("get", &u), CacheKey::for_url(&u));
    assert_eq!(CacheKey::for_url(&u).hash().len(), 64);
  }
}
