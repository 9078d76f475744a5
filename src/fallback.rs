//! Terminal fallback for requests no strategy could satisfy. Never touches the network.

use crate::cache::{CacheKey, CacheLayer, CacheStore, CachedResponse, Purpose, Served};
use crate::config::Config;
use crate::http::{Destination, Request, Response};
use crate::routing::Classifier;

pub const PLACEHOLDER_SVG: &str = concat!(
  r##"<svg xmlns="http://www.w3.org/2000/svg" width="300" height="200" viewBox="0 0 300 200">"##,
  r##"<rect width="300" height="200" fill="#f3f4f6"/>"##,
  r##"<text x="150" y="100" text-anchor="middle" fill="#9ca3af" font-family="sans-serif" font-size="14">"##,
  "Image unavailable offline</text></svg>"
);

pub const OFFLINE_ERROR: &str = "Offline";
pub const OFFLINE_MESSAGE: &str = "This content is not available offline";

/// Structured 503 returned when nothing better is available.
pub fn offline_response() -> Response {
  let body = serde_json::json!({
    "error": OFFLINE_ERROR,
    "message": OFFLINE_MESSAGE,
  });
  Response::new(503, body.to_string()).with_header("content-type", "application/json")
}

pub fn placeholder_image() -> Response {
  Response::new(200, PLACEHOLDER_SVG).with_header("content-type", "image/svg+xml")
}

pub struct FallbackProvider<S: CacheStore> {
  cache: CacheLayer<S>,
  shell_partition: String,
  shell_key: Option<CacheKey>,
}

impl<S: CacheStore> FallbackProvider<S> {
  pub fn new(config: &Config, cache: CacheLayer<S>) -> Self {
    Self {
      cache,
      shell_partition: config.partition_name(Purpose::Static),
      shell_key: config
        .resolve(&config.shell.document)
        .ok()
        .map(|url| CacheKey::for_url(&url)),
    }
  }

  /// Substitute response for a request that could not be served.
  pub fn respond(&self, classifier: &Classifier, request: &Request) -> Served {
    if request.is_navigation() {
      if let Some(shell) = self.app_shell() {
        return Served::from_cache(shell);
      }
      return Served::fallback(offline_response());
    }

    if request.destination == Destination::Image || classifier.is_image(&request.url) {
      return Served::fallback(placeholder_image());
    }

    Served::fallback(offline_response())
  }

  fn app_shell(&self) -> Option<CachedResponse> {
    let key = self.shell_key.as_ref()?;
    self.cache.lookup_key(&self.shell_partition, key)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStore, ResponseSource};
  use std::sync::Arc;
  use url::Url;

  fn provider(store: Arc<MemoryStore>) -> (FallbackProvider<MemoryStore>, Classifier) {
    let config = Config::default();
    (
      FallbackProvider::new(&config, CacheLayer::new(store)),
      Classifier::new(&config),
    )
  }

  fn request(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_navigation_serves_cached_shell() {
    let store = Arc::new(MemoryStore::new());
    let shell = Response::new(200, "<html>shell</html>").with_header("content-type", "text/html");
    store
      .put(
        "travelai-static-v1",
        &CacheKey::for_url(&Url::parse("http://localhost:3000/ultimate-travel-app.html").unwrap()),
        &shell,
      )
      .unwrap();
    let (provider, classifier) = provider(store);

    let served = provider.respond(
      &classifier,
      &request("http://localhost:3000/trips/7").with_destination(Destination::Document),
    );
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response, shell);
  }

  #[test]
  fn test_navigation_without_shell_is_offline_json() {
    let (provider, classifier) = provider(Arc::new(MemoryStore::new()));
    let served = provider.respond(
      &classifier,
      &request("http://localhost:3000/").with_destination(Destination::Document),
    );
    assert_eq!(served.response.status, 503);
  }

  #[test]
  fn test_image_gets_placeholder_svg() {
    let (provider, classifier) = provider(Arc::new(MemoryStore::new()));

    let by_extension = provider.respond(&classifier, &request("https://cdn.example/a.webp"));
    assert_eq!(by_extension.response.content_type(), Some("image/svg+xml"));
    assert_eq!(by_extension.source, ResponseSource::Fallback);

    let by_destination = provider.respond(
      &classifier,
      &request("https://cdn.example/render?id=1").with_destination(Destination::Image),
    );
    assert_eq!(by_destination.response.body, PLACEHOLDER_SVG.as_bytes().to_vec());
  }

  #[test]
  fn test_other_requests_get_structured_503() {
    let (provider, classifier) = provider(Arc::new(MemoryStore::new()));
    let served = provider.respond(&classifier, &request("https://app.example/api/trips"));

    assert_eq!(served.response.status, 503);
    assert_eq!(served.response.content_type(), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(&served.response.body).unwrap();
    assert_eq!(body["error"], "Offline");
    assert_eq!(body["message"], OFFLINE_MESSAGE);
  }
}
