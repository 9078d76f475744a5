//! The worker: maps each lifecycle, fetch, sync and push event to its handler
//! and reports what happened as a serializable outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStore, ResponseSource, Served};
use crate::clients::{Client, Clients};
use crate::config::Config;
use crate::fallback::FallbackProvider;
use crate::http::{Destination, Headers, Request};
use crate::lifecycle::{ActivateReport, InstallReport, Lifecycle, WorkerState};
use crate::network::Network;
use crate::push::{self, ClickResult, NotificationIntent};
use crate::routing::{Classifier, Route};
use crate::share;
use crate::strategy::Strategies;
use crate::sync::{self, PendingOp, PendingQueue, SyncOutcome};

fn default_method() -> String {
  "GET".to_string()
}

/// Events delivered to the worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
  Install,
  Activate,
  Fetch {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    destination: Destination,
    #[serde(default)]
    body: Option<String>,
  },
  Sync {
    #[serde(default)]
    tag: Option<String>,
  },
  Push {
    /// Structured payload
    #[serde(default)]
    payload: Option<Value>,
    /// Raw payload text, used when the payload is not valid JSON
    #[serde(default)]
    raw: Option<String>,
  },
  NotificationClick {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    data: Value,
  },
  /// Form-encoded share-target submission
  Share { body: String },
  /// A window opened that the worker may control
  ClientConnected { url: String },
  /// Queue a write for background sync
  Enqueue { kind: String, payload: Value },
  /// Install and activate a new cache version in place of the current one
  Upgrade { version: String },
}

/// Summary of a served fetch.
#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
  pub url: String,
  pub route: Option<Route>,
  pub source: ResponseSource,
  pub status: u16,
  pub headers: Headers,
  pub cached_at: Option<DateTime<Utc>>,
  pub bytes: usize,
  /// Body text when it is valid UTF-8
  pub body: Option<String>,
}

impl FetchReport {
  fn new(request: &Request, route: Option<Route>, served: Served) -> Self {
    let bytes = served.response.body.len();
    let body = String::from_utf8(served.response.body).ok();
    Self {
      url: request.url.to_string(),
      route,
      source: served.source,
      status: served.response.status,
      headers: served.response.headers,
      cached_at: served.cached_at,
      bytes,
      body,
    }
  }
}

/// Result of one fetch event.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Not intercepted; the request goes to the network untouched
  PassThrough,
  Respond {
    route: Option<Route>,
    served: Served,
  },
}

/// Result of one event, as reported to the driver.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
  Installed {
    install: InstallReport,
    activate: Option<ActivateReport>,
  },
  Activated {
    activate: ActivateReport,
  },
  Response {
    response: FetchReport,
  },
  PassThrough {
    url: String,
    method: String,
  },
  Synced {
    sync: SyncOutcome,
  },
  ShowNotification {
    notification: NotificationIntent,
  },
  PushIgnored,
  NotificationClicked {
    click: ClickResult,
  },
  ClientConnected {
    client: Client,
  },
  Enqueued {
    operation: PendingOp,
  },
  Upgraded {
    from: String,
    to: String,
    install: InstallReport,
    activate: ActivateReport,
  },
  Failed {
    event: String,
    error: String,
  },
}

impl EventOutcome {
  pub fn failed(event: &str, error: impl ToString) -> Self {
    EventOutcome::Failed {
      event: event.to_string(),
      error: error.to_string(),
    }
  }
}

pub struct Worker<S, Q, N>
where
  S: CacheStore + 'static,
  Q: PendingQueue,
  N: Network + 'static,
{
  config: Arc<Config>,
  store: Arc<S>,
  queue: Arc<Q>,
  network: Arc<N>,
  classifier: Arc<Classifier>,
  strategies: Strategies<S, N>,
  fallback: FallbackProvider<S>,
  lifecycle: Lifecycle,
  clients: Clients,
}

impl<S, Q, N> Worker<S, Q, N>
where
  S: CacheStore + 'static,
  Q: PendingQueue,
  N: Network + 'static,
{
  pub fn new(config: Arc<Config>, store: Arc<S>, queue: Arc<Q>, network: Arc<N>) -> Self {
    let classifier = Arc::new(Classifier::new(&config));
    let cache = CacheLayer::new(Arc::clone(&store));
    Self {
      strategies: Strategies::new(cache.clone(), Arc::clone(&network), Arc::clone(&classifier)),
      fallback: FallbackProvider::new(&config, cache),
      classifier,
      config,
      store,
      queue,
      network,
      lifecycle: Lifecycle::new(),
      clients: Clients::new(),
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  pub fn queue(&self) -> &Arc<Q> {
    &self.queue
  }

  pub fn clients(&self) -> &Clients {
    &self.clients
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle.state()
  }

  /// Wait for background cache refreshes started by earlier fetches.
  pub async fn drain(&self) {
    self.strategies.drain().await;
  }

  /// Handle one event to completion.
  pub async fn dispatch(&mut self, event: WorkerEvent) -> EventOutcome {
    match event {
      WorkerEvent::Install => self.on_install().await,
      WorkerEvent::Activate => self.on_activate(),
      WorkerEvent::Fetch {
        url,
        method,
        destination,
        body,
      } => {
        let url = match Url::parse(&url).or_else(|_| self.config.resolve(&url).map_err(|e| e.to_string())) {
          Ok(url) => url,
          Err(e) => return EventOutcome::failed("fetch", e),
        };
        let mut request = Request::new(&method, url).with_destination(destination);
        if let Some(body) = body {
          request = request.with_body(body);
        }
        self.on_fetch(request).await
      }
      WorkerEvent::Sync { tag } => {
        let tag = tag.unwrap_or_else(|| self.config.sync.tag.clone());
        EventOutcome::Synced {
          sync: self.on_sync(&tag).await,
        }
      }
      WorkerEvent::Push { payload, raw } => {
        let bytes = match (payload, raw) {
          (Some(payload), _) => Some(payload.to_string().into_bytes()),
          (None, Some(raw)) => Some(raw.into_bytes()),
          (None, None) => None,
        };
        match self.on_push(bytes.as_deref()) {
          Some(notification) => EventOutcome::ShowNotification { notification },
          None => EventOutcome::PushIgnored,
        }
      }
      WorkerEvent::NotificationClick { action, data } => EventOutcome::NotificationClicked {
        click: self.on_notification_click(action.as_deref(), &data),
      },
      WorkerEvent::Share { body } => match self.config.resolve(&self.config.share.path) {
        Ok(url) => self.on_fetch(Request::new("POST", url).with_body(body)).await,
        Err(e) => EventOutcome::failed("share", e),
      },
      WorkerEvent::ClientConnected { url } => match self.config.resolve(&url) {
        Ok(url) => EventOutcome::ClientConnected {
          client: self.clients.connect(url),
        },
        Err(e) => EventOutcome::failed("client_connected", e),
      },
      WorkerEvent::Enqueue { kind, payload } => match self.queue.enqueue(&kind, &payload) {
        Ok(operation) => EventOutcome::Enqueued { operation },
        Err(e) => EventOutcome::failed("enqueue", e),
      },
      WorkerEvent::Upgrade { version } => self.on_upgrade(version).await,
    }
  }

  async fn on_install(&mut self) -> EventOutcome {
    let install = match self
      .lifecycle
      .install(&self.config, self.store.as_ref(), self.network.as_ref())
      .await
    {
      Ok(report) => report,
      Err(e) => return EventOutcome::failed("install", e),
    };

    // skip_waiting: take over immediately instead of waiting for old clients to close
    let activate = match self
      .lifecycle
      .activate(&self.config, self.store.as_ref(), &mut self.clients)
    {
      Ok(report) => Some(report),
      Err(e) => {
        warn!(error = %e, "activation after install failed");
        None
      }
    };

    EventOutcome::Installed { install, activate }
  }

  fn on_activate(&mut self) -> EventOutcome {
    match self
      .lifecycle
      .activate(&self.config, self.store.as_ref(), &mut self.clients)
    {
      Ok(activate) => EventOutcome::Activated { activate },
      Err(e) => EventOutcome::failed("activate", e),
    }
  }

  /// Route a request through the matching strategy, falling back offline.
  pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
    if share::is_share_request(&self.config, request) {
      return FetchOutcome::Respond {
        route: None,
        served: Served::generated(share::handle(&self.config, request)),
      };
    }

    let Some(route) = self.classifier.select(&self.config, request) else {
      return FetchOutcome::PassThrough;
    };

    let served = match self.strategies.run(&route, request).await {
      Ok(served) => served,
      Err(e) => {
        info!(url = %request.url, error = %e, "serving offline fallback");
        self.fallback.respond(&self.classifier, request)
      }
    };

    FetchOutcome::Respond {
      route: Some(route),
      served,
    }
  }

  async fn on_fetch(&self, request: Request) -> EventOutcome {
    match self.handle_fetch(&request).await {
      FetchOutcome::PassThrough => EventOutcome::PassThrough {
        url: request.url.to_string(),
        method: request.method,
      },
      FetchOutcome::Respond { route, served } => EventOutcome::Response {
        response: FetchReport::new(&request, route, served),
      },
    }
  }

  pub async fn on_sync(&self, tag: &str) -> SyncOutcome {
    sync::replay(
      &self.config,
      self.queue.as_ref(),
      self.network.as_ref(),
      tag,
    )
    .await
  }

  pub fn on_push(&self, raw: Option<&[u8]>) -> Option<NotificationIntent> {
    push::decode(&self.config, raw)
  }

  pub fn on_notification_click(&mut self, action: Option<&str>, data: &Value) -> ClickResult {
    push::click(&self.config, &mut self.clients, action, data)
  }

  /// Install a new version next to the current one, then let it take over.
  ///
  /// A failed install leaves the current version in control.
  async fn on_upgrade(&mut self, version: String) -> EventOutcome {
    let from = self.config.cache.version.clone();
    let mut next = (*self.config).clone();
    next.cache.version = version.clone();
    let next = Arc::new(next);

    let mut lifecycle = Lifecycle::new();
    let install = match lifecycle
      .install(&next, self.store.as_ref(), self.network.as_ref())
      .await
    {
      Ok(report) => report,
      Err(e) => return EventOutcome::failed("upgrade", e),
    };
    let activate = match lifecycle.activate(&next, self.store.as_ref(), &mut self.clients) {
      Ok(report) => report,
      Err(e) => return EventOutcome::failed("upgrade", e),
    };

    self.lifecycle.supersede();
    info!(from = %from, to = %version, "worker upgraded");

    let cache = CacheLayer::new(Arc::clone(&self.store));
    self.fallback = FallbackProvider::new(&next, cache);
    self.config = next;
    self.lifecycle = lifecycle;

    EventOutcome::Upgraded {
      from,
      to: version,
      install,
      activate,
    }
  }
}
