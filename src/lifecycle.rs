//! Worker lifecycle: install (precache the app shell) and activate (purge
//! stale partitions, claim clients).

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{CacheKey, CacheStore, Purpose};
use crate::clients::Clients;
use crate::config::Config;
use crate::http::{Request, Response};
use crate::network::Network;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
  /// Created, no lifecycle event handled yet
  #[default]
  Parsed,
  Installing,
  /// Installed, waiting to take over
  Waiting,
  /// Controlling clients
  Active,
  /// Replaced by a newer version
  Superseded,
  /// Install failed
  Redundant,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
  pub partition: String,
  pub cached: Vec<String>,
  /// Always true: the worker asks to activate without waiting for old clients
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivateReport {
  pub deleted: Vec<String>,
  pub created: Vec<String>,
  pub claimed: usize,
}

#[derive(Debug, Default)]
pub struct Lifecycle {
  state: WorkerState,
}

impl Lifecycle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  fn set_state(&mut self, state: WorkerState) {
    if self.state != state {
      info!(from = ?self.state, to = ?state, "worker state change");
      self.state = state;
    }
  }

  /// Fetch every precache asset and write them to the static partition.
  ///
  /// All-or-nothing: if any asset cannot be fetched, nothing is written and
  /// the worker becomes redundant, leaving the previous version in control.
  pub async fn install<S, N>(
    &mut self,
    config: &Config,
    store: &S,
    network: &N,
  ) -> Result<InstallReport>
  where
    S: CacheStore,
    N: Network,
  {
    self.set_state(WorkerState::Installing);

    match Self::precache(config, store, network).await {
      Ok(report) => {
        self.set_state(WorkerState::Waiting);
        Ok(report)
      }
      Err(e) => {
        warn!(error = %e, "install failed");
        self.set_state(WorkerState::Redundant);
        Err(e)
      }
    }
  }

  async fn precache<S, N>(config: &Config, store: &S, network: &N) -> Result<InstallReport>
  where
    S: CacheStore,
    N: Network,
  {
    let partition = config.partition_name(Purpose::Static);
    let urls = config
      .shell
      .precache
      .iter()
      .map(|asset| config.resolve(asset))
      .collect::<Result<Vec<_>>>()?;

    info!(partition = %partition, assets = urls.len(), "precaching app shell");

    let fetches = urls.iter().map(|url| async move {
      let response = network
        .fetch(&Request::get(url.clone()))
        .await
        .map_err(|e| eyre!("Failed to precache {}: {}", url, e))?;
      if !response.is_ok() {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          url,
          response.status
        ));
      }
      Ok::<(CacheKey, Response), color_eyre::Report>((CacheKey::for_url(url), response))
    });
    let entries = try_join_all(fetches).await?;

    store.open(&partition)?;
    store.put_all(&partition, &entries)?;

    Ok(InstallReport {
      partition,
      cached: entries.iter().map(|(key, _)| key.url().to_string()).collect(),
      skip_waiting: true,
    })
  }

  /// Delete every owned partition outside the current version, make sure the
  /// current three exist, and claim all clients.
  pub fn activate<S: CacheStore>(
    &mut self,
    config: &Config,
    store: &S,
    clients: &mut Clients,
  ) -> Result<ActivateReport> {
    match self.state {
      WorkerState::Waiting | WorkerState::Active => {}
      WorkerState::Parsed => {
        // A previous run installed this version if its static partition exists
        let static_partition = config.partition_name(Purpose::Static);
        if !store.has_partition(&static_partition)? {
          return Err(eyre!(
            "Cannot activate {}: version is not installed",
            config.cache.version
          ));
        }
      }
      state => {
        return Err(eyre!("Cannot activate a worker in state {:?}", state));
      }
    }

    let current = config.current_partitions();
    let existing = store.partitions()?;

    let mut deleted = Vec::new();
    for name in &existing {
      if name.starts_with(&config.cache.prefix) && !current.contains(name) {
        info!(partition = %name, "deleting old cache");
        store.delete_partition(name)?;
        deleted.push(name.clone());
      }
    }

    let mut created = Vec::new();
    for name in &current {
      if !existing.contains(name) {
        store.open(name)?;
        created.push(name.clone());
      }
    }

    let claimed = clients.claim(&config.cache.version);
    self.set_state(WorkerState::Active);
    info!(
      deleted = deleted.len(),
      created = created.len(),
      claimed,
      "worker activated"
    );

    Ok(ActivateReport {
      deleted,
      created,
      claimed,
    })
  }

  /// Mark this version as replaced by a newer one.
  pub fn supersede(&mut self) {
    self.set_state(WorkerState::Superseded);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use crate::testing::{self, route_precache, MockNetwork};
  use url::Url;

  fn config_with(prefix: &str, version: &str) -> Config {
    let mut config = testing::config();
    config.cache.prefix = prefix.to_string();
    config.cache.version = version.to_string();
    config
  }

  #[tokio::test]
  async fn test_install_precaches_every_asset() {
    let config = testing::config();
    let store = MemoryStore::new();
    let network = MockNetwork::new();
    route_precache(&network, &config);

    let mut lifecycle = Lifecycle::new();
    let report = lifecycle.install(&config, &store, &network).await.unwrap();

    assert_eq!(lifecycle.state(), WorkerState::Waiting);
    assert!(report.skip_waiting);
    assert_eq!(report.cached.len(), config.shell.precache.len());
    assert_eq!(
      store.keys("travelai-static-v1").unwrap().len(),
      config.shell.precache.len()
    );
  }

  #[tokio::test]
  async fn test_install_fails_atomically() {
    let config = testing::config();
    let store = MemoryStore::new();
    let network = MockNetwork::new();
    route_precache(&network, &config);
    // One required asset is missing on the server
    network.route(
      testing::url("/manifest.json").as_str(),
      Response::new(404, "missing"),
    );

    let mut lifecycle = Lifecycle::new();
    assert!(lifecycle.install(&config, &store, &network).await.is_err());
    assert_eq!(lifecycle.state(), WorkerState::Redundant);
    assert!(store.keys("travelai-static-v1").unwrap().is_empty());

    let mut clients = Clients::new();
    assert!(lifecycle.activate(&config, &store, &mut clients).is_err());
  }

  #[tokio::test]
  async fn test_install_offline_fails() {
    let config = testing::config();
    let network = MockNetwork::new();
    network.set_offline(true);
    let mut lifecycle = Lifecycle::new();
    assert!(lifecycle
      .install(&config, &MemoryStore::new(), &network)
      .await
      .is_err());
  }

  #[test]
  fn test_activate_keeps_exactly_current_partitions() {
    let config = config_with("", "v2");
    let store = MemoryStore::new();
    for name in ["static-v1", "dynamic-v1", "api-v1", "static-v2"] {
      store.open(name).unwrap();
    }

    let mut lifecycle = Lifecycle::new();
    let mut clients = Clients::new();
    let report = lifecycle.activate(&config, &store, &mut clients).unwrap();

    assert_eq!(
      store.partitions().unwrap(),
      vec!["api-v2", "dynamic-v2", "static-v2"]
    );
    assert_eq!(report.deleted, vec!["api-v1", "dynamic-v1", "static-v1"]);
    assert_eq!(report.created, vec!["dynamic-v2", "api-v2"]);
    assert_eq!(lifecycle.state(), WorkerState::Active);
  }

  #[test]
  fn test_activate_leaves_foreign_partitions_alone() {
    let config = config_with("travelai-", "v2");
    let store = MemoryStore::new();
    for name in ["travelai-static-v1", "travelai-static-v2", "other-app-v1"] {
      store.open(name).unwrap();
    }

    let mut lifecycle = Lifecycle::new();
    lifecycle
      .activate(&config, &store, &mut Clients::new())
      .unwrap();

    let partitions = store.partitions().unwrap();
    assert!(partitions.contains(&"other-app-v1".to_string()));
    assert!(!partitions.contains(&"travelai-static-v1".to_string()));
  }

  #[test]
  fn test_activate_claims_clients() {
    let config = config_with("", "v3");
    let store = MemoryStore::new();
    store.open("static-v3").unwrap();
    let mut clients = Clients::new();
    clients.connect(Url::parse("https://app.example/").unwrap());

    let mut lifecycle = Lifecycle::new();
    let report = lifecycle.activate(&config, &store, &mut clients).unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(clients.all()[0].controller.as_deref(), Some("v3"));
  }

  #[test]
  fn test_activate_requires_install() {
    let config = config_with("", "v1");
    let mut lifecycle = Lifecycle::new();
    assert!(lifecycle
      .activate(&config, &MemoryStore::new(), &mut Clients::new())
      .is_err());
  }
}
