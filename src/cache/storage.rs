//! Cache storage backends: SQLite for durable use, memory for tests and ephemeral runs.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::key::CacheKey;
use super::traits::{CacheStore, CachedResponse};
use crate::db::Database;
use crate::http::{Headers, Response};

/// SQLite-based cache storage implementation.
pub struct SqliteStore {
  db: Arc<Database>,
  /// Monotonic access sequence driving LRU order
  clock: AtomicU64,
}

impl SqliteStore {
  pub fn new(db: Arc<Database>) -> Result<Self> {
    let last: Option<i64> = db
      .conn()?
      .query_row("SELECT MAX(accessed) FROM entries", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read access sequence: {}", e))?;

    Ok(Self {
      db,
      clock: AtomicU64::new(last.unwrap_or(0) as u64 + 1),
    })
  }

  fn tick(&self) -> i64 {
    self.clock.fetch_add(1, Ordering::Relaxed) as i64
  }
}

fn now_string() -> String {
  Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

impl CacheStore for SqliteStore {
  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn open(&self, partition: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;
    Ok(())
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE partition = ?", params![partition])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", partition, e))?;
    let deleted = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![partition])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", partition, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;

    let row: Option<(String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT url, status, headers, body, cached_at FROM entries
         WHERE partition = ? AND key_hash = ?",
        params![partition, key.hash()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to query entry: {}", e))?;

    let Some((url, status, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    conn
      .execute(
        "UPDATE entries SET accessed = ? WHERE partition = ? AND key_hash = ?",
        params![self.tick(), partition, key.hash()],
      )
      .map_err(|e| eyre!("Failed to touch entry: {}", e))?;

    let headers: Headers = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

    Ok(Some(CachedResponse {
      response: Response {
        status,
        headers,
        body,
      },
      url,
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()> {
    self.put_all(partition, &[(key.clone(), response.clone())])
  }

  fn put_all(&self, partition: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;

    let cached_at = now_string();
    for (key, response) in entries {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO entries (partition, key_hash, url, status, headers, body, cached_at, accessed)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          partition,
          key.hash(),
          key.url(),
          response.status,
          headers,
          response.body,
          cached_at,
          self.tick()
        ],
      )
      .map_err(|e| eyre!("Failed to store entry {}: {}", key.url(), e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool> {
    let deleted = self
      .db
      .conn()?
      .execute(
        "DELETE FROM entries WHERE partition = ? AND key_hash = ?",
        params![partition, key.hash()],
      )
      .map_err(|e| eyre!("Failed to delete entry: {}", e))?;
    Ok(deleted > 0)
  }

  fn keys(&self, partition: &str) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT url FROM entries WHERE partition = ? ORDER BY accessed")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let urls = stmt
      .query_map(params![partition], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list entries: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry url: {}", e))?;

    Ok(urls)
  }

  fn evict_to(&self, partition: &str, max_entries: usize) -> Result<usize> {
    let conn = self.db.conn()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE partition = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;

    let excess = count - max_entries as i64;
    if excess <= 0 {
      return Ok(0);
    }

    let evicted = conn
      .execute(
        "DELETE FROM entries WHERE partition = ?1 AND key_hash IN (
           SELECT key_hash FROM entries WHERE partition = ?1 ORDER BY accessed LIMIT ?2
         )",
        params![partition, excess],
      )
      .map_err(|e| eyre!("Failed to evict entries: {}", e))?;

    Ok(evicted)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[derive(Debug, Clone)]
struct MemoryEntry {
  url: String,
  response: Response,
  cached_at: DateTime<Utc>,
  accessed: u64,
}

/// In-memory storage, used for `--ephemeral` runs and tests.
#[derive(Default)]
pub struct MemoryStore {
  partitions: Mutex<BTreeMap<String, HashMap<String, MemoryEntry>>>,
  clock: AtomicU64,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(
    &self,
  ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, HashMap<String, MemoryEntry>>>> {
    self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn tick(&self) -> u64 {
    self.clock.fetch_add(1, Ordering::Relaxed)
  }
}

impl CacheStore for MemoryStore {
  fn partitions(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.keys().cloned().collect())
  }

  fn open(&self, partition: &str) -> Result<()> {
    self.lock()?.entry(partition.to_string()).or_default();
    Ok(())
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    Ok(self.lock()?.remove(partition).is_some())
  }

  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let tick = self.tick();
    let mut partitions = self.lock()?;
    let entry = partitions
      .get_mut(partition)
      .and_then(|p| p.get_mut(key.hash()));

    Ok(entry.map(|e| {
      e.accessed = tick;
      CachedResponse {
        response: e.response.clone(),
        url: e.url.clone(),
        cached_at: e.cached_at,
      }
    }))
  }

  fn put(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()> {
    self.put_all(partition, &[(key.clone(), response.clone())])
  }

  fn put_all(&self, partition: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    let mut partitions = self.lock()?;
    let target = partitions.entry(partition.to_string()).or_default();
    let cached_at = Utc::now();

    for (key, response) in entries {
      target.insert(
        key.hash().to_string(),
        MemoryEntry {
          url: key.url().to_string(),
          response: response.clone(),
          cached_at,
          accessed: self.tick(),
        },
      );
    }
    Ok(())
  }

  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool> {
    Ok(
      self
        .lock()?
        .get_mut(partition)
        .map(|p| p.remove(key.hash()).is_some())
        .unwrap_or(false),
    )
  }

  fn keys(&self, partition: &str) -> Result<Vec<String>> {
    let partitions = self.lock()?;
    let mut entries: Vec<&MemoryEntry> = partitions
      .get(partition)
      .map(|p| p.values().collect())
      .unwrap_or_default();
    entries.sort_by_key(|e| e.accessed);
    Ok(entries.into_iter().map(|e| e.url.clone()).collect())
  }

  fn evict_to(&self, partition: &str, max_entries: usize) -> Result<usize> {
    let mut partitions = self.lock()?;
    let Some(target) = partitions.get_mut(partition) else {
      return Ok(0);
    };
    if target.len() <= max_entries {
      return Ok(0);
    }

    let mut by_age: Vec<(u64, String)> = target
      .iter()
      .map(|(hash, e)| (e.accessed, hash.clone()))
      .collect();
    by_age.sort();

    let excess = target.len() - max_entries;
    for (_, hash) in by_age.into_iter().take(excess) {
      target.remove(&hash);
    }
    Ok(excess)
  }
}
