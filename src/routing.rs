//! Request classification and strategy selection.
//!
//! Classification is an ordered rule table evaluated top-down; the first
//! matching rule decides the class, and the class decides the strategy and
//! the partition it runs against.

use serde::Serialize;
use url::Url;

use crate::cache::Purpose;
use crate::config::Config;
use crate::http::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestClass {
  Static,
  Api,
  Image,
  Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
  CacheFirst,
  NetworkFirstWithCache,
  StaleWhileRevalidate,
  NetworkFirst,
}

impl RequestClass {
  pub fn strategy(&self) -> StrategyKind {
    match self {
      RequestClass::Static => StrategyKind::CacheFirst,
      RequestClass::Api => StrategyKind::NetworkFirstWithCache,
      RequestClass::Image => StrategyKind::StaleWhileRevalidate,
      RequestClass::Other => StrategyKind::NetworkFirst,
    }
  }

  pub fn purpose(&self) -> Purpose {
    match self {
      RequestClass::Static => Purpose::Static,
      RequestClass::Api => Purpose::Api,
      RequestClass::Image | RequestClass::Other => Purpose::Dynamic,
    }
  }
}

/// A single classification rule: a pure predicate over the URL.
pub struct Rule {
  pub name: &'static str,
  pub class: RequestClass,
  matches: fn(&Classifier, &Url) -> bool,
}

/// Classification rules in priority order.
pub const RULES: &[Rule] = &[
  Rule {
    name: "precache-manifest",
    class: RequestClass::Static,
    matches: |c, url| c.precache.iter().any(|file| url.as_str().contains(file.as_str())),
  },
  Rule {
    name: "static-suffix",
    class: RequestClass::Static,
    matches: |c, url| c.static_suffixes.iter().any(|s| url.path().ends_with(s.as_str())),
  },
  Rule {
    name: "font-host",
    class: RequestClass::Static,
    matches: |c, url| host_in(url, &c.font_hosts),
  },
  Rule {
    name: "api-host",
    class: RequestClass::Api,
    matches: |c, url| {
      let host = url.host_str().unwrap_or_default();
      c.api_hosts.iter().any(|h| host.contains(h.as_str()))
    },
  },
  Rule {
    name: "api-path",
    class: RequestClass::Api,
    matches: |c, url| !c.api_path_marker.is_empty() && url.path().contains(&c.api_path_marker),
  },
  Rule {
    name: "document-store",
    class: RequestClass::Api,
    matches: |c, url| url.host_str() == Some(c.document_store_host.as_str()),
  },
  Rule {
    name: "image-extension",
    class: RequestClass::Image,
    matches: |c, url| has_image_extension(url, &c.image_extensions),
  },
  Rule {
    name: "image-host",
    class: RequestClass::Image,
    matches: |c, url| host_in(url, &c.image_hosts),
  },
];

fn host_in(url: &Url, hosts: &[String]) -> bool {
  url
    .host_str()
    .map(|host| hosts.iter().any(|h| h == host))
    .unwrap_or(false)
}

fn has_image_extension(url: &Url, extensions: &[String]) -> bool {
  let path = url.path();
  match path.rsplit_once('.') {
    Some((_, ext)) if !ext.contains('/') => extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
    _ => false,
  }
}

/// The route chosen for an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
  pub class: RequestClass,
  pub strategy: StrategyKind,
  pub partition: String,
  pub max_entries: Option<usize>,
}

/// Immutable classifier built once from the configuration.
#[derive(Debug, Clone)]
pub struct Classifier {
  precache: Vec<String>,
  static_suffixes: Vec<String>,
  font_hosts: Vec<String>,
  api_hosts: Vec<String>,
  api_path_marker: String,
  document_store_host: String,
  image_extensions: Vec<String>,
  image_hosts: Vec<String>,
  safe_to_cache: Vec<String>,
}

impl Classifier {
  pub fn new(config: &Config) -> Self {
    let routing = &config.routing;
    Self {
      precache: config.shell.precache.clone(),
      static_suffixes: routing.static_suffixes.clone(),
      font_hosts: routing.font_hosts.clone(),
      api_hosts: routing.api_hosts.clone(),
      api_path_marker: routing.api_path_marker.clone(),
      document_store_host: routing.document_store_host.clone(),
      image_extensions: routing.image_extensions.clone(),
      image_hosts: routing.image_hosts.clone(),
      safe_to_cache: routing.safe_to_cache.clone(),
    }
  }

  /// First rule matching the URL, if any.
  pub fn matching_rule(&self, url: &Url) -> Option<&'static Rule> {
    RULES.iter().find(|rule| (rule.matches)(self, url))
  }

  pub fn classify(&self, url: &Url) -> RequestClass {
    self
      .matching_rule(url)
      .map(|rule| rule.class)
      .unwrap_or(RequestClass::Other)
  }

  /// Whether the URL would be classified as an image, ignoring higher-priority rules.
  pub fn is_image(&self, url: &Url) -> bool {
    has_image_extension(url, &self.image_extensions) || host_in(url, &self.image_hosts)
  }

  /// Whether a successful api response for this URL may be written to the cache.
  pub fn is_safe_to_cache(&self, url: &Url) -> bool {
    self
      .safe_to_cache
      .iter()
      .any(|fragment| url.as_str().contains(fragment.as_str()))
  }

  /// Pick the route for a request, or `None` if it must pass through untouched.
  pub fn select(&self, config: &Config, request: &Request) -> Option<Route> {
    if !request.is_get() || !request.is_http() {
      return None;
    }

    let class = self.classify(&request.url);
    let purpose = class.purpose();
    Some(Route {
      class,
      strategy: class.strategy(),
      partition: config.partition_name(purpose),
      max_entries: config.max_entries(purpose),
    })
  }
}
