//! Request and response snapshots passed between the worker, the cache and the network.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// What the requesting page intends to do with the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  /// A top-level navigation
  Document,
  Image,
  Script,
  Style,
  Font,
  #[default]
  Other,
}

/// Header map with lowercased names. Repeated fields are joined with `", "`.
pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  pub fn new(method: &str, url: Url) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url,
      destination: Destination::Other,
      headers: Headers::new(),
      body: Vec::new(),
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }

  pub fn is_http(&self) -> bool {
    matches!(self.url.scheme(), "http" | "https")
  }

  pub fn is_navigation(&self) -> bool {
    self.destination == Destination::Document
  }
}

/// A response as captured from the network or restored from a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  /// Status in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  pub fn redirect(location: &str, status: u16) -> Self {
    Self::new(status, Vec::new()).with_header("location", location)
  }
}
