//! Shared test fixtures: a scripted in-process network and config helpers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::http::{Request, Response};
use crate::network::{Network, NetworkError};

pub const ORIGIN: &str = "https://app.example";

/// Network double answering from a route table keyed by URL.
///
/// Unknown URLs answer 404. While offline every fetch fails with
/// `NetworkError::Offline`. Every call is recorded, including failed ones.
#[derive(Default)]
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Response>>,
  offline: AtomicBool,
  delay: Mutex<Option<Duration>>,
  calls: Mutex<Vec<Request>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(&self, url: &str, response: Response) -> &Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn set_delay(&self, delay: Option<Duration>) {
    *self.delay.lock().unwrap() = delay;
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.url.as_str() == url)
      .count()
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    self.calls.lock().unwrap().push(request.clone());

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    if self.offline.load(Ordering::SeqCst) {
      return Err(NetworkError::Offline(request.url.to_string()));
    }

    let routes = self.routes.lock().unwrap();
    Ok(
      routes
        .get(request.url.as_str())
        .cloned()
        .unwrap_or_else(|| Response::new(404, "not found")),
    )
  }
}

/// Default config pointed at the test origin.
pub fn config() -> Config {
  let mut config = Config::default();
  config.shell.origin = ORIGIN.to_string();
  config
}

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Route every precache asset of the config to a 200 response.
pub fn route_precache(network: &MockNetwork, config: &Config) {
  for asset in &config.shell.precache {
    let url = config.resolve(asset).unwrap();
    network.route(
      url.as_str(),
      Response::new(200, format!("asset:{}", url)).with_header("content-type", "text/plain"),
    );
  }
}

/// Wait until a condition holds, polling briefly. Panics after one second.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
  for _ in 0..100 {
    if condition() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("condition not reached");
}
