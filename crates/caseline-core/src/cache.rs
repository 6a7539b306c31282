//! Typed access to the two client-side
//! key-value caches.
//!
//! The durable cache survives restarts
//! and holds provisional aggregate values;
//! the session cache holds the warm-up
//! reads and is dropped when the session
//! ends or the signed-in identity
//! changes. Components receive a
//! [`CacheManager`] instead of reaching
//! for storage directly.

use std::collections::{
  BTreeMap,
  HashMap
};
use std::io::Write;
use std::path::{
  Path,
  PathBuf
};
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{
  debug,
  warn
};
use uuid::Uuid;

use crate::error::{
  SyncError,
  SyncResult
};

pub trait KvBackend: Send + Sync {
  fn get(&self, key: &str) -> Option<Value>;
  fn set(
    &self,
    key: &str,
    value: Value
  ) -> SyncResult<()>;
  fn remove(&self, key: &str);
  fn clear(&self);
  fn keys(&self) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct MemoryKv {
  map: Mutex<HashMap<String, Value>>
}

impl MemoryKv {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KvBackend for MemoryKv {
  fn get(&self, key: &str) -> Option<Value> {
    self.map.lock().get(key).cloned()
  }

  fn set(
    &self,
    key: &str,
    value: Value
  ) -> SyncResult<()> {
    self
      .map
      .lock()
      .insert(key.to_string(), value);
    Ok(())
  }

  fn remove(&self, key: &str) {
    self.map.lock().remove(key);
  }

  fn clear(&self) {
    self.map.lock().clear();
  }

  fn keys(&self) -> Vec<String> {
    self.map.lock().keys().cloned().collect()
  }
}

/// JSON object on disk, rewritten
/// atomically on every change.
#[derive(Debug)]
pub struct FileKv {
  path: PathBuf,
  map:  Mutex<BTreeMap<String, Value>>
}

impl FileKv {
  #[tracing::instrument(skip(path))]
  pub fn open(
    path: &Path
  ) -> anyhow::Result<Self> {
    let map = if path.exists() {
      let raw = std::fs::read_to_string(
        path
      )
      .with_context(|| {
        format!(
          "failed to read {}",
          path.display()
        )
      })?;
      if raw.trim().is_empty() {
        BTreeMap::new()
      } else {
        serde_json::from_str(&raw)
          .with_context(|| {
            format!(
              "failed to parse {}",
              path.display()
            )
          })?
      }
    } else {
      BTreeMap::new()
    };

    debug!(file = %path.display(), keys = map.len(), "opened durable cache");
    Ok(Self {
      path: path.to_path_buf(),
      map:  Mutex::new(map)
    })
  }

  fn persist(
    &self,
    map: &BTreeMap<String, Value>
  ) -> SyncResult<()> {
    let write = || -> anyhow::Result<()> {
      let dir = self
        .path
        .parent()
        .unwrap_or_else(|| Path::new("."));
      std::fs::create_dir_all(dir)?;
      let mut temp =
        NamedTempFile::new_in(dir)?;
      serde_json::to_writer(
        &mut temp, map
      )?;
      temp.flush()?;
      temp
        .persist(&self.path)
        .map_err(anyhow::Error::new)?;
      Ok(())
    };
    write().map_err(|err| {
      SyncError::Cache(format!(
        "failed to persist {}: {err:#}",
        self.path.display()
      ))
    })
  }
}

impl KvBackend for FileKv {
  fn get(&self, key: &str) -> Option<Value> {
    self.map.lock().get(key).cloned()
  }

  fn set(
    &self,
    key: &str,
    value: Value
  ) -> SyncResult<()> {
    let mut map = self.map.lock();
    map.insert(key.to_string(), value);
    self.persist(&map)
  }

  fn remove(&self, key: &str) {
    let mut map = self.map.lock();
    if map.remove(key).is_some()
      && let Err(err) = self.persist(&map)
    {
      warn!(key, error = %err, "failed to persist cache removal");
    }
  }

  fn clear(&self) {
    let mut map = self.map.lock();
    map.clear();
    if let Err(err) = self.persist(&map) {
      warn!(error = %err, "failed to persist cache clear");
    }
  }

  fn keys(&self) -> Vec<String> {
    self.map.lock().keys().cloned().collect()
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum Scope {
  Durable,
  Session
}

/// When a cached value stops being
/// trustworthy.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum Invalidation {
  /// Dropped with the session cache,
  /// which is cleared at sign-out and
  /// whenever the identity changes.
  IdentityChange,
  /// Keyed by day; writing a day's value
  /// drops the same aggregate's earlier
  /// days.
  DayRollover,
  /// Replaced by the next successful
  /// read of the same key.
  Overwrite
}

#[derive(
  Debug, Clone, PartialEq, Eq, Hash,
)]
pub enum CacheKey {
  Entities,
  OwnActivity { user_id: Uuid },
  Tasks,
  StatusFeed,
  Aggregate {
    name: String,
    date: Option<NaiveDate>
  },
  BootstrapMarker
}

impl CacheKey {
  pub fn storage_key(&self) -> String {
    match self {
      | CacheKey::Entities => {
        "caseline:entities".to_string()
      }
      | CacheKey::OwnActivity {
        user_id
      } => {
        format!(
          "caseline:activity:{user_id}"
        )
      }
      | CacheKey::Tasks => {
        "caseline:tasks".to_string()
      }
      | CacheKey::StatusFeed => {
        "caseline:status_feed"
          .to_string()
      }
      | CacheKey::Aggregate {
        name,
        date: Some(date)
      } => {
        format!(
          "caseline:aggregate:{name}:{date}"
        )
      }
      | CacheKey::Aggregate {
        name,
        date: None
      } => {
        format!(
          "caseline:aggregate:{name}"
        )
      }
      | CacheKey::BootstrapMarker => {
        "caseline:bootstrap".to_string()
      }
    }
  }

  pub fn scope(&self) -> Scope {
    match self {
      | CacheKey::Aggregate { .. } => {
        Scope::Durable
      }
      | _ => Scope::Session
    }
  }

  pub fn invalidation(
    &self
  ) -> Invalidation {
    match self {
      | CacheKey::Aggregate {
        date: Some(_),
        ..
      } => Invalidation::DayRollover,
      | CacheKey::Aggregate {
        date: None,
        ..
      } => Invalidation::Overwrite,
      | _ => Invalidation::IdentityChange
    }
  }
}

#[derive(Clone)]
pub struct CacheManager {
  durable: Arc<dyn KvBackend>,
  session: Arc<dyn KvBackend>
}

impl std::fmt::Debug for CacheManager {
  fn fmt(
    &self,
    f: &mut std::fmt::Formatter<'_>
  ) -> std::fmt::Result {
    f.debug_struct("CacheManager")
      .finish_non_exhaustive()
  }
}

impl CacheManager {
  pub fn new(
    durable: Arc<dyn KvBackend>,
    session: Arc<dyn KvBackend>
  ) -> Self {
    Self { durable, session }
  }

  pub fn in_memory() -> Self {
    Self::new(
      Arc::new(MemoryKv::new()),
      Arc::new(MemoryKv::new())
    )
  }

  fn backend(
    &self,
    key: &CacheKey
  ) -> &dyn KvBackend {
    match key.scope() {
      | Scope::Durable => {
        self.durable.as_ref()
      }
      | Scope::Session => {
        self.session.as_ref()
      }
    }
  }

  /// Undecodable entries are treated as
  /// misses and dropped.
  pub fn get<T>(
    &self,
    key: &CacheKey
  ) -> Option<T>
  where
    T: DeserializeOwned
  {
    let storage_key = key.storage_key();
    let backend = self.backend(key);
    let raw = backend.get(&storage_key)?;
    match serde_json::from_value::<T>(raw)
    {
      | Ok(value) => Some(value),
      | Err(err) => {
        warn!(key = %storage_key, error = %err, "dropping undecodable cache entry");
        backend.remove(&storage_key);
        None
      }
    }
  }

  pub fn put<T>(
    &self,
    key: &CacheKey,
    value: &T
  ) -> SyncResult<()>
  where
    T: Serialize + ?Sized
  {
    let raw = serde_json::to_value(value)?;
    let backend = self.backend(key);
    backend.set(&key.storage_key(), raw)?;
    if let CacheKey::Aggregate {
      name,
      date: Some(day)
    } = key
    {
      prune_earlier_days(backend, name, *day);
    }
    Ok(())
  }

  pub fn contains(
    &self,
    key: &CacheKey
  ) -> bool {
    self
      .backend(key)
      .get(&key.storage_key())
      .is_some()
  }

  pub fn invalidate(&self, key: &CacheKey) {
    self
      .backend(key)
      .remove(&key.storage_key());
  }

  /// Drops every session-scoped key.
  pub fn clear_session(&self) {
    debug!("clearing session cache");
    self.session.clear();
  }
}

fn prune_earlier_days(
  backend: &dyn KvBackend,
  name: &str,
  day: NaiveDate
) {
  let prefix =
    format!("caseline:aggregate:{name}:");
  for key in backend.keys() {
    let Some(suffix) = key.strip_prefix(&prefix)
    else {
      continue;
    };
    let stale = NaiveDate::parse_from_str(
      suffix, "%Y-%m-%d"
    )
    .is_ok_and(|d| d < day);
    if stale {
      debug!(key = %key, "pruning earlier day's aggregate");
      backend.remove(&key);
    }
  }
}
