//! Network access behind a trait so strategies can run against a real HTTP
//! client, a permanently offline stub, or a scripted mock in tests.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::http::{Headers, Request, Response};

/// Transport-level failures. A completed exchange with a non-2xx status is
/// a response, not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
  #[error("network unavailable: {0}")]
  Offline(String),

  #[error("request timed out: {0}")]
  Timeout(String),

  #[error("connection failed: {0}")]
  Connect(String),

  #[error("invalid request: {0}")]
  InvalidRequest(String),

  #[error("failed to read response body: {0}")]
  Body(String),
}

#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// HTTP network backed by reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(config: &NetworkConfig) -> Result<Self, NetworkError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| NetworkError::InvalidRequest(e.to_string()))?;

    Ok(Self { client })
  }
}

fn classify(err: reqwest::Error) -> NetworkError {
  if err.is_timeout() {
    NetworkError::Timeout(err.to_string())
  } else if err.is_builder() {
    NetworkError::InvalidRequest(err.to_string())
  } else if err.is_body() || err.is_decode() {
    NetworkError::Body(err.to_string())
  } else {
    NetworkError::Connect(err.to_string())
  }
}

/// Flatten a header map, joining repeated fields with `", "` the way
/// `Headers.get` does in the browser. Non-text values are skipped.
fn collect_headers(map: &reqwest::header::HeaderMap) -> Headers {
  let mut headers = Headers::new();
  for (name, value) in map {
    let Ok(value) = value.to_str() else {
      continue;
    };
    headers
      .entry(name.as_str().to_string())
      .and_modify(|joined: &mut String| {
        joined.push_str(", ");
        joined.push_str(value);
      })
      .or_insert_with(|| value.to_string());
  }
  headers
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| NetworkError::InvalidRequest(e.to_string()))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let resp = builder.send().await.map_err(classify)?;
    let status = resp.status().as_u16();
    let headers = collect_headers(resp.headers());
    let body = resp.bytes().await.map_err(classify)?.to_vec();

    debug!(url = %request.url, status, bytes = body.len(), "network fetch");
    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

/// Network that is never reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    Err(NetworkError::Offline(request.url.to_string()))
  }
}
