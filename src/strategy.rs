//! The four caching strategies.
//!
//! Each strategy returns `Ok` with the response it settled on, or the network
//! error that left it with nothing to serve. The caller turns that error into
//! an offline fallback, so no strategy ever surfaces a failure to the page.

use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::{CacheLayer, CacheStore, Served};
use crate::http::Request;
use crate::network::{Network, NetworkError};
use crate::routing::{Classifier, Route, StrategyKind};

pub struct Strategies<S: CacheStore, N: Network> {
  cache: CacheLayer<S>,
  network: Arc<N>,
  classifier: Arc<Classifier>,
  /// Background refreshes still in flight. Dropping the set aborts them.
  refreshes: Arc<Mutex<JoinSet<()>>>,
}

impl<S: CacheStore, N: Network> Clone for Strategies<S, N> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      network: Arc::clone(&self.network),
      classifier: Arc::clone(&self.classifier),
      refreshes: Arc::clone(&self.refreshes),
    }
  }
}

impl<S, N> Strategies<S, N>
where
  S: CacheStore + 'static,
  N: Network + 'static,
{
  pub fn new(cache: CacheLayer<S>, network: Arc<N>, classifier: Arc<Classifier>) -> Self {
    Self {
      cache,
      network,
      classifier,
      refreshes: Arc::new(Mutex::new(JoinSet::new())),
    }
  }

  /// Wait for every background refresh started so far, including ones
  /// spawned while draining.
  pub async fn drain(&self) {
    loop {
      let mut pending = match self.refreshes.lock() {
        Ok(mut set) => std::mem::take(&mut *set),
        Err(e) => {
          warn!(error = %e, "refresh set poisoned, not waiting");
          return;
        }
      };
      if pending.is_empty() {
        return;
      }

      debug!(pending = pending.len(), "waiting for background refreshes");
      while let Some(result) = pending.join_next().await {
        if let Err(e) = result {
          warn!(error = %e, "background refresh task failed");
        }
      }
    }
  }

  pub async fn run(&self, route: &Route, request: &Request) -> Result<Served, NetworkError> {
    debug!(url = %request.url, strategy = ?route.strategy, partition = %route.partition, "dispatch");
    match route.strategy {
      StrategyKind::CacheFirst => self.cache_first(route, request).await,
      StrategyKind::NetworkFirstWithCache => self.network_first_with_cache(route, request).await,
      StrategyKind::StaleWhileRevalidate => self.stale_while_revalidate(route, request).await,
      StrategyKind::NetworkFirst => self.network_first(route, request).await,
    }
  }

  /// Cached entry if present, otherwise the network (stored on success).
  pub async fn cache_first(&self, route: &Route, request: &Request) -> Result<Served, NetworkError> {
    if let Some(cached) = self.cache.lookup(&route.partition, request) {
      return Ok(Served::from_cache(cached));
    }

    let response = self.network.fetch(request).await?;
    if response.is_ok() {
      self
        .cache
        .store(&route.partition, route.max_entries, request, &response);
    }
    Ok(Served::from_network(response))
  }

  /// Network response (stored when successful and safe to cache), or the
  /// cached entry when the network fails.
  pub async fn network_first_with_cache(
    &self,
    route: &Route,
    request: &Request,
  ) -> Result<Served, NetworkError> {
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_ok() && self.classifier.is_safe_to_cache(&request.url) {
          self
            .cache
            .store(&route.partition, route.max_entries, request, &response);
        }
        Ok(Served::from_network(response))
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "network failed, trying cache");
        self
          .cache
          .lookup(&route.partition, request)
          .map(Served::from_cache)
          .ok_or(e)
      }
    }
  }

  /// Cached entry immediately with a detached refresh, or the network when
  /// nothing is cached.
  ///
  /// The caller never waits for the refresh; its only effect is the
  /// overwritten entry that later requests will see. Call [`Self::drain`]
  /// before shutting the runtime down so it can land.
  pub async fn stale_while_revalidate(
    &self,
    route: &Route,
    request: &Request,
  ) -> Result<Served, NetworkError> {
    if let Some(cached) = self.cache.lookup(&route.partition, request) {
      let this = self.clone();
      let route = route.clone();
      let request = request.clone();
      let refresh = async move {
        this.refresh(&route, &request).await;
      };
      match self.refreshes.lock() {
        Ok(mut set) => {
          // Reap finished refreshes so the set only holds live ones
          while set.try_join_next().is_some() {}
          set.spawn(refresh);
        }
        Err(e) => {
          warn!(error = %e, "refresh set poisoned, refreshing untracked");
          tokio::spawn(refresh);
        }
      }
      return Ok(Served::from_cache(cached));
    }

    let response = self.network.fetch(request).await?;
    if response.is_ok() {
      self
        .cache
        .store(&route.partition, route.max_entries, request, &response);
    }
    Ok(Served::from_network(response))
  }

  async fn refresh(&self, route: &Route, request: &Request) {
    match self.network.fetch(request).await {
      Ok(response) if response.is_ok() => {
        debug!(url = %request.url, "background refresh updated cache");
        self
          .cache
          .store(&route.partition, route.max_entries, request, &response);
      }
      Ok(response) => {
        debug!(url = %request.url, status = response.status, "background refresh not cached");
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "background refresh failed");
      }
    }
  }

  /// Network response (stored on success), or the cached entry when the
  /// network fails.
  pub async fn network_first(&self, route: &Route, request: &Request) -> Result<Served, NetworkError> {
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self
            .cache
            .store(&route.partition, route.max_entries, request, &response);
        }
        Ok(Served::from_network(response))
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "network failed, trying cache");
        self
          .cache
          .lookup(&route.partition, request)
          .map(Served::from_cache)
          .ok_or(e)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStore, ResponseSource};
  use crate::config::Config;
  use crate::http::Response;
  use crate::testing::{self, eventually, MockNetwork};
  use std::time::Duration;
  use url::Url;

  struct Fixture {
    config: Config,
    store: Arc<MemoryStore>,
    network: Arc<MockNetwork>,
    strategies: Strategies<MemoryStore, MockNetwork>,
    classifier: Arc<Classifier>,
  }

  impl Fixture {
    fn new() -> Self {
      let config = testing::config();
      let store = Arc::new(MemoryStore::new());
      let network = Arc::new(MockNetwork::new());
      let classifier = Arc::new(Classifier::new(&config));
      let strategies = Strategies::new(
        CacheLayer::new(Arc::clone(&store)),
        Arc::clone(&network),
        Arc::clone(&classifier),
      );
      Self {
        config,
        store,
        network,
        strategies,
        classifier,
      }
    }

    fn route(&self, request: &Request) -> Route {
      self.classifier.select(&self.config, request).unwrap()
    }

    async fn run(&self, url: &str) -> Result<Served, NetworkError> {
      let request = Request::get(Url::parse(url).unwrap());
      let route = self.route(&request);
      self.strategies.run(&route, &request).await
    }

    fn cached_body(&self, partition: &str, url: &str) -> Option<Vec<u8>> {
      self
        .store
        .get(partition, &crate::cache::CacheKey::for_url(&Url::parse(url).unwrap()))
        .unwrap()
        .map(|c| c.response.body)
    }
  }

  const CSS: &str = "https://app.example/styles/site.css";
  const WEATHER: &str = "https://api.open-meteo.com/v1/forecast?latitude=19.2";
  const ANALYTICS: &str = "https://app.example/api/analytics";
  const PHOTO: &str = "https://cdn.example/photos/beach.jpg";
  const PAGE: &str = "https://app.example/trips/42";

  #[tokio::test]
  async fn test_cache_first_fetches_once_then_serves_cache() {
    let f = Fixture::new();
    f.network.route(CSS, Response::new(200, "body{}"));

    let first = f.run(CSS).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);

    for _ in 0..4 {
      let again = f.run(CSS).await.unwrap();
      assert_eq!(again.source, ResponseSource::Cache);
      assert_eq!(again.response.body, first.response.body);
    }
    assert_eq!(f.network.calls_to(CSS), 1);
  }

  #[tokio::test]
  async fn test_cache_first_offline_without_entry_fails() {
    let f = Fixture::new();
    f.network.set_offline(true);
    assert!(f.run(CSS).await.is_err());
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_errors() {
    let f = Fixture::new();
    let served = f.run(CSS).await.unwrap();
    assert_eq!(served.response.status, 404);
    assert!(f.cached_body("travelai-static-v1", CSS).is_none());
  }

  #[tokio::test]
  async fn test_api_response_survives_outage() {
    let f = Fixture::new();
    f.network.route(WEATHER, Response::new(200, "{\"temp\":31}"));

    let online = f.run(WEATHER).await.unwrap();
    assert_eq!(online.source, ResponseSource::Network);

    f.network.set_offline(true);
    let offline = f.run(WEATHER).await.unwrap();
    assert_eq!(offline.source, ResponseSource::Cache);
    assert_eq!(offline.response, online.response);
  }

  #[tokio::test]
  async fn test_api_not_on_safe_list_is_not_cached() {
    let f = Fixture::new();
    f.network.route(ANALYTICS, Response::new(200, "{}"));
    f.run(ANALYTICS).await.unwrap();
    assert!(f.cached_body("travelai-api-v1", ANALYTICS).is_none());

    f.network.set_offline(true);
    assert!(f.run(ANALYTICS).await.is_err());
  }

  #[tokio::test]
  async fn test_api_error_status_is_returned_not_cached() {
    let f = Fixture::new();
    f.network.route(WEATHER, Response::new(502, "bad gateway"));
    let served = f.run(WEATHER).await.unwrap();
    assert_eq!(served.response.status, 502);
    assert!(f.cached_body("travelai-api-v1", WEATHER).is_none());
  }

  #[tokio::test]
  async fn test_swr_serves_cache_without_waiting_and_refreshes() {
    let f = Fixture::new();
    f.network.route(PHOTO, Response::new(200, "v1"));
    let cold = f.run(PHOTO).await.unwrap();
    assert_eq!(cold.source, ResponseSource::Network);

    // A slow network must not delay the cached answer
    f.network.route(PHOTO, Response::new(200, "v2"));
    f.network.set_delay(Some(Duration::from_millis(200)));

    let started = std::time::Instant::now();
    let warm = f.run(PHOTO).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(warm.source, ResponseSource::Cache);
    assert_eq!(warm.response.body, b"v1".to_vec());

    eventually(|| f.cached_body("travelai-dynamic-v1", PHOTO) == Some(b"v2".to_vec())).await;
    assert_eq!(f.network.calls_to(PHOTO), 2);
  }

  #[test]
  fn test_drained_refresh_lands_before_runtime_shutdown() {
    let f = Fixture::new();
    f.network.route(PHOTO, Response::new(200, "v1"));

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
      f.run(PHOTO).await.unwrap();
      f.network.route(PHOTO, Response::new(200, "v2"));
      f.network.set_delay(Some(Duration::from_millis(50)));

      let warm = f.run(PHOTO).await.unwrap();
      assert_eq!(warm.source, ResponseSource::Cache);
      assert_eq!(warm.response.body, b"v1".to_vec());

      f.strategies.drain().await;
    });
    drop(rt);

    assert_eq!(f.cached_body("travelai-dynamic-v1", PHOTO), Some(b"v2".to_vec()));
  }

  #[tokio::test]
  async fn test_drain_without_refreshes_returns() {
    let f = Fixture::new();
    f.strategies.drain().await;
  }

  #[tokio::test]
  async fn test_swr_failed_refresh_keeps_entry() {
    let f = Fixture::new();
    f.network.route(PHOTO, Response::new(200, "v1"));
    f.run(PHOTO).await.unwrap();

    f.network.set_offline(true);
    let served = f.run(PHOTO).await.unwrap();
    assert_eq!(served.response.body, b"v1".to_vec());

    eventually(|| f.network.calls_to(PHOTO) == 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(f.cached_body("travelai-dynamic-v1", PHOTO), Some(b"v1".to_vec()));
  }

  #[tokio::test]
  async fn test_swr_cold_and_offline_fails() {
    let f = Fixture::new();
    f.network.set_offline(true);
    assert!(f.run(PHOTO).await.is_err());
  }

  #[tokio::test]
  async fn test_network_first_prefers_network_and_falls_back_to_cache() {
    let f = Fixture::new();
    f.network.route(PAGE, Response::new(200, "first"));
    f.run(PAGE).await.unwrap();

    f.network.route(PAGE, Response::new(200, "second"));
    let fresh = f.run(PAGE).await.unwrap();
    assert_eq!(fresh.source, ResponseSource::Network);
    assert_eq!(fresh.response.body, b"second".to_vec());

    f.network.set_offline(true);
    let cached = f.run(PAGE).await.unwrap();
    assert_eq!(cached.source, ResponseSource::Cache);
    assert_eq!(cached.response.body, b"second".to_vec());
  }

  #[tokio::test]
  async fn test_dynamic_partition_is_capped() {
    let mut f = Fixture::new();
    f.config.cache.dynamic_max_entries = 2;
    for i in 0..4 {
      let url = format!("https://app.example/page/{}", i);
      f.network.route(&url, Response::new(200, "x"));
      f.run(&url).await.unwrap();
    }
    assert_eq!(f.store.keys("travelai-dynamic-v1").unwrap().len(), 2);
  }
}
