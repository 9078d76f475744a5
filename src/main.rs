use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use shellcache::cache::{CacheStore, MemoryStore, SqliteStore};
use shellcache::config::{data_dir, Config};
use shellcache::db::Database;
use shellcache::event::{Event, EventHandler};
use shellcache::http::Destination;
use shellcache::logging;
use shellcache::network::{HttpNetwork, Network, OfflineNetwork};
use shellcache::sync::{MemoryQueue, PendingQueue, SqliteQueue};
use shellcache::worker::{EventOutcome, Worker, WorkerEvent};

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline-first caching and request routing for app-shell web apps")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Keep the cache and queue in memory instead of the database
  #[arg(long, global = true)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the app shell and activate
  Install,
  /// Purge stale partitions and claim clients
  Activate,
  /// Route a request through the worker
  Fetch {
    url: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
    #[arg(short, long, value_parser = parse_destination, default_value = "other")]
    destination: Destination,
    /// Treat the network as unreachable
    #[arg(long)]
    offline: bool,
  },
  /// Replay queued operations
  Sync {
    #[arg(short, long)]
    tag: Option<String>,
    #[arg(long)]
    offline: bool,
  },
  /// Queue an operation for background sync
  Enqueue {
    kind: String,
    /// JSON payload
    payload: String,
  },
  /// Decode a push payload into a notification
  Push { payload: Option<String> },
  /// Resolve a notification click
  Click {
    #[arg(short, long)]
    action: Option<String>,
    /// Notification data as JSON
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Submit a form-encoded share-target body
  Share { body: String },
  /// List cache partitions and their entry counts
  Partitions,
  /// Read newline-delimited JSON events from stdin
  Run,
}

impl Command {
  fn offline(&self) -> bool {
    matches!(
      self,
      Command::Fetch { offline: true, .. } | Command::Sync { offline: true, .. }
    )
  }
}

fn parse_destination(s: &str) -> Result<Destination, String> {
  serde_json::from_value(Value::String(s.to_ascii_lowercase()))
    .map_err(|_| format!("unknown destination: {}", s))
}

fn parse_json(s: &str) -> Result<Value> {
  serde_json::from_str(s).map_err(|e| eyre!("Invalid JSON '{}': {}", s, e))
}

#[derive(Serialize)]
struct PartitionSummary {
  name: String,
  entries: usize,
}

fn print<T: Serialize>(value: &T) -> Result<()> {
  let line = serde_json::to_string(value).map_err(|e| eyre!("Failed to encode output: {}", e))?;
  println!("{}", line);
  Ok(())
}

fn to_event(command: Command) -> Result<WorkerEvent> {
  let event = match command {
    Command::Install => WorkerEvent::Install,
    Command::Activate => WorkerEvent::Activate,
    Command::Fetch {
      url,
      method,
      destination,
      ..
    } => WorkerEvent::Fetch {
      url,
      method,
      destination,
      body: None,
    },
    Command::Sync { tag, .. } => WorkerEvent::Sync { tag },
    Command::Enqueue { kind, payload } => WorkerEvent::Enqueue {
      kind,
      payload: parse_json(&payload)?,
    },
    // Raw text keeps malformed payloads observable as an ignored push
    Command::Push { payload } => WorkerEvent::Push {
      payload: None,
      raw: payload,
    },
    Command::Click { action, data } => WorkerEvent::NotificationClick {
      action,
      data: data.as_deref().map(parse_json).transpose()?.unwrap_or(Value::Null),
    },
    Command::Share { body } => WorkerEvent::Share { body },
    Command::Partitions | Command::Run => {
      return Err(eyre!("Command has no matching worker event"));
    }
  };
  Ok(event)
}

async fn execute<S, Q, N>(mut worker: Worker<S, Q, N>, command: Command) -> Result<()>
where
  S: CacheStore + 'static,
  Q: PendingQueue,
  N: Network + 'static,
{
  let result = match command {
    Command::Partitions => {
      let store = worker.store();
      let summaries = store
        .partitions()?
        .into_iter()
        .map(|name| -> Result<PartitionSummary> {
          let entries = store.keys(&name)?.len();
          Ok(PartitionSummary { name, entries })
        })
        .collect::<Result<Vec<_>>>()?;
      print(&summaries)
    }
    Command::Run => run_events(&mut worker).await,
    command => {
      let outcome = worker.dispatch(to_event(command)?).await;
      print(&outcome)?;
      match outcome {
        EventOutcome::Failed { event, error } => Err(eyre!("{} failed: {}", event, error)),
        _ => Ok(()),
      }
    }
  };

  // Let stale-while-revalidate refreshes land before the runtime shuts down
  worker.drain().await;
  result
}

async fn run_events<S, Q, N>(worker: &mut Worker<S, Q, N>) -> Result<()>
where
  S: CacheStore + 'static,
  Q: PendingQueue,
  N: Network + 'static,
{
  let mut events = EventHandler::stdin();
  while let Some(event) = events.next().await {
    let outcome = match event {
      Event::Worker(event) => worker.dispatch(event).await,
      Event::Invalid { line, error } => {
        EventOutcome::failed("parse", format!("{}: {}", error, line))
      }
    };
    print(&outcome)?;
  }
  Ok(())
}

async fn run_with_network<S, Q>(
  config: Arc<Config>,
  store: Arc<S>,
  queue: Arc<Q>,
  command: Command,
) -> Result<()>
where
  S: CacheStore + 'static,
  Q: PendingQueue,
{
  if command.offline() {
    let worker = Worker::new(config, store, queue, Arc::new(OfflineNetwork));
    execute(worker, command).await
  } else {
    let network = HttpNetwork::new(&config.network)
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;
    let worker = Worker::new(config, store, queue, Arc::new(network));
    execute(worker, command).await
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Arc::new(Config::load(args.config.as_deref())?);

  let _log_guard = logging::init(&data_dir()?);

  if args.ephemeral {
    run_with_network(
      config,
      Arc::new(MemoryStore::new()),
      Arc::new(MemoryQueue::new()),
      args.command,
    )
    .await
  } else {
    let db = Arc::new(Database::open(&config.database_path()?)?);
    let store = Arc::new(SqliteStore::new(Arc::clone(&db))?);
    let queue = Arc::new(SqliteQueue::new(db));
    run_with_network(config, store, queue, args.command).await
  }
}
