//! Background sync: a durable queue of writes that failed offline, replayed
//! as one batch when connectivity returns.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::http::Request;
use crate::network::Network;

/// A queued write awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingOp {
  pub id: i64,
  pub kind: String,
  pub payload: Value,
  pub created_at: DateTime<Utc>,
}

/// Durable storage for pending operations.
pub trait PendingQueue: Send + Sync {
  fn enqueue(&self, kind: &str, payload: &Value) -> Result<PendingOp>;

  /// All pending operations, oldest first.
  fn pending(&self) -> Result<Vec<PendingOp>>;

  /// Remove the given operations. Returns how many were removed.
  fn remove(&self, ids: &[i64]) -> Result<usize>;
}

pub struct SqliteQueue {
  db: Arc<Database>,
}

impl SqliteQueue {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl PendingQueue for SqliteQueue {
  fn enqueue(&self, kind: &str, payload: &Value) -> Result<PendingOp> {
    let conn = self.db.conn()?;
    let created_at = Utc::now();
    conn
      .execute(
        "INSERT INTO pending_ops (kind, payload, created_at) VALUES (?, ?, ?)",
        params![
          kind,
          payload.to_string(),
          created_at.format("%Y-%m-%d %H:%M:%S").to_string()
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue operation: {}", e))?;

    Ok(PendingOp {
      id: conn.last_insert_rowid(),
      kind: kind.to_string(),
      payload: payload.clone(),
      created_at,
    })
  }

  fn pending(&self) -> Result<Vec<PendingOp>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT id, kind, payload, created_at FROM pending_ops ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query pending operations: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read pending operation: {}", e))?;

    rows
      .into_iter()
      .map(|(id, kind, payload, created_at)| -> Result<PendingOp> {
        Ok(PendingOp {
          id,
          kind,
          payload: serde_json::from_str(&payload)
            .map_err(|e| eyre!("Corrupt payload for operation {}: {}", id, e))?,
          created_at: chrono::NaiveDateTime::parse_from_str(&created_at, "%Y-%m-%d %H:%M:%S")
            .map(|dt| dt.and_utc())
            .map_err(|e| eyre!("Failed to parse datetime '{}': {}", created_at, e))?,
        })
      })
      .collect()
  }

  fn remove(&self, ids: &[i64]) -> Result<usize> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut removed = 0;
    for id in ids {
      removed += tx
        .execute("DELETE FROM pending_ops WHERE id = ?", params![id])
        .map_err(|e| eyre!("Failed to remove operation {}: {}", id, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(removed)
  }
}

/// In-memory queue for `--ephemeral` runs and tests.
#[derive(Default)]
pub struct MemoryQueue {
  ops: Mutex<Vec<PendingOp>>,
  next_id: Mutex<i64>,
}

impl MemoryQueue {
  pub fn new() -> Self {
    Self::default()
  }
}

impl PendingQueue for MemoryQueue {
  fn enqueue(&self, kind: &str, payload: &Value) -> Result<PendingOp> {
    let mut next_id = self
      .next_id
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *next_id += 1;

    let op = PendingOp {
      id: *next_id,
      kind: kind.to_string(),
      payload: payload.clone(),
      created_at: Utc::now(),
    };
    self
      .ops
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .push(op.clone());
    Ok(op)
  }

  fn pending(&self) -> Result<Vec<PendingOp>> {
    Ok(
      self
        .ops
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?
        .clone(),
    )
  }

  fn remove(&self, ids: &[i64]) -> Result<usize> {
    let mut ops = self.ops.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = ops.len();
    ops.retain(|op| !ids.contains(&op.id));
    Ok(before - ops.len())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SyncOutcome {
  /// The event tag is not ours
  Ignored { tag: String },
  /// Nothing was queued
  Idle,
  Delivered { count: usize },
  /// Delivery failed; the queue is untouched and the platform will retry
  Deferred { pending: usize, reason: String },
}

/// Replay pending operations to the sync endpoint.
///
/// Only the operations loaded at the start are removed on success, so writes
/// queued while the batch is in flight survive to the next sync. Safe to call
/// repeatedly with the same batch.
pub async fn replay<Q, N>(config: &Config, queue: &Q, network: &N, tag: &str) -> SyncOutcome
where
  Q: PendingQueue + ?Sized,
  N: Network + ?Sized,
{
  if tag != config.sync.tag {
    return SyncOutcome::Ignored {
      tag: tag.to_string(),
    };
  }

  let batch = match queue.pending() {
    Ok(batch) => batch,
    Err(e) => {
      warn!(error = %e, "failed to load pending operations");
      return SyncOutcome::Deferred {
        pending: 0,
        reason: e.to_string(),
      };
    }
  };
  if batch.is_empty() {
    return SyncOutcome::Idle;
  }

  let pending = batch.len();
  let deferred = |reason: String| {
    warn!(pending, reason = %reason, "sync deferred");
    SyncOutcome::Deferred { pending, reason }
  };

  let endpoint = match config.resolve(&config.sync.endpoint) {
    Ok(url) => url,
    Err(e) => return deferred(e.to_string()),
  };

  info!(pending, endpoint = %endpoint, "syncing search history");
  let searches: Vec<&Value> = batch.iter().map(|op| &op.payload).collect();
  let body = serde_json::json!({ "searches": searches });
  let request = Request::new("POST", endpoint)
    .with_header("content-type", "application/json")
    .with_body(body.to_string());

  match network.fetch(&request).await {
    Ok(response) if response.is_ok() => {
      let ids: Vec<i64> = batch.iter().map(|op| op.id).collect();
      match queue.remove(&ids) {
        Ok(count) => {
          info!(count, "search history synced");
          SyncOutcome::Delivered { count }
        }
        Err(e) => deferred(e.to_string()),
      }
    }
    Ok(response) => deferred(format!("sync endpoint returned {}", response.status)),
    Err(e) => deferred(e.to_string()),
  }
}
