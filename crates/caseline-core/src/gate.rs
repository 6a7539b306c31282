//! Deduplicated, rate-limited reads for
//! expensive aggregates.
//!
//! Each key is `Idle` (no slot),
//! `Pending` (one shared in-flight
//! fetch every caller waits on) or
//! `Resolved` (value served from memory
//! until the cooldown lapses or, for
//! daily keys, until the day changes).
//! Resolved values are written through
//! to the durable cache so a restart can
//! show a provisional number right away.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{
  debug,
  warn
};

use crate::cache::{
  CacheKey,
  CacheManager
};
use crate::datetime::Calendar;
use crate::error::{
  SyncError,
  SyncResult
};

#[derive(
  Debug, Clone, PartialEq, Eq, Hash,
)]
pub struct GateKey {
  name:  String,
  daily: bool
}

impl GateKey {
  pub fn fixed(name: &str) -> Self {
    Self {
      name:  name.to_string(),
      daily: false
    }
  }

  /// Scoped to the current calendar day.
  pub fn daily(name: &str) -> Self {
    Self {
      name:  name.to_string(),
      daily: true
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn is_daily(&self) -> bool {
    self.daily
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum SlotPhase {
  Idle,
  Pending,
  Resolved
}

type Shared =
  watch::Receiver<Option<SyncResult<Value>>>;

enum Slot {
  Pending {
    epoch: u64,
    scope: Option<NaiveDate>,
    rx:    Shared
  },
  Resolved {
    value: Value,
    at:    Instant,
    scope: Option<NaiveDate>
  }
}

enum Hit {
  Fresh(Value),
  Join(Shared),
  Miss
}

struct GateInner {
  cooldown:   Duration,
  calendar:   Calendar,
  cache:      CacheManager,
  slots:      Mutex<HashMap<GateKey, Slot>>,
  next_epoch: Mutex<u64>
}

#[derive(Clone)]
pub struct FetchGate {
  inner: Arc<GateInner>
}

impl FetchGate {
  pub fn new(
    cooldown: Duration,
    calendar: Calendar,
    cache: CacheManager
  ) -> Self {
    Self {
      inner: Arc::new(GateInner {
        cooldown,
        calendar,
        cache,
        slots: Mutex::new(HashMap::new()),
        next_epoch: Mutex::new(0)
      })
    }
  }

  fn scope_for(
    &self,
    key: &GateKey
  ) -> Option<NaiveDate> {
    key
      .daily
      .then(|| self.inner.calendar.today())
  }

  fn cache_key(
    key: &GateKey,
    scope: Option<NaiveDate>
  ) -> CacheKey {
    CacheKey::Aggregate {
      name: key.name.clone(),
      date: scope
    }
  }

  pub fn phase(
    &self,
    key: &GateKey
  ) -> SlotPhase {
    match self.inner.slots.lock().get(key) {
      | None => SlotPhase::Idle,
      | Some(Slot::Pending { .. }) => {
        SlotPhase::Pending
      }
      | Some(Slot::Resolved { .. }) => {
        SlotPhase::Resolved
      }
    }
  }

  /// Last value written through for the
  /// key's current scope, if any.
  pub fn provisional<T>(
    &self,
    key: &GateKey
  ) -> Option<T>
  where
    T: DeserializeOwned
  {
    let scope = self.scope_for(key);
    self
      .inner
      .cache
      .get(&Self::cache_key(key, scope))
  }

  /// Forgets the slot; the next read
  /// goes to the network.
  pub fn invalidate(&self, key: &GateKey) {
    self.inner.slots.lock().remove(key);
  }

  #[tracing::instrument(skip_all, fields(key = %key.name))]
  pub async fn get_or_fetch<T, F, Fut>(
    &self,
    key: &GateKey,
    fetch: F
  ) -> SyncResult<T>
  where
    T: Serialize
      + DeserializeOwned
      + Send
      + 'static,
    F: FnOnce(Option<NaiveDate>) -> Fut,
    Fut: Future<Output = SyncResult<T>>
      + Send
      + 'static
  {
    let scope = self.scope_for(key);
    let rx = {
      let mut slots = self.inner.slots.lock();
      let hit = match slots.get(key) {
        | Some(Slot::Resolved {
          value,
          at,
          scope: resolved
        }) if *resolved == scope
          && at.elapsed()
            < self.inner.cooldown =>
        {
          Hit::Fresh(value.clone())
        }
        | Some(Slot::Pending {
          rx,
          scope: pending,
          ..
        }) if *pending == scope => {
          Hit::Join(rx.clone())
        }
        | _ => Hit::Miss
      };
      match hit {
        | Hit::Fresh(value) => {
          debug!("serving within cooldown");
          return decode(value);
        }
        | Hit::Join(rx) => {
          debug!("joining in-flight fetch");
          rx
        }
        | Hit::Miss => self.start(
          &mut slots,
          key,
          scope,
          fetch(scope)
        )
      }
    };

    decode(wait(rx).await?)
  }

  /// Fetches now regardless of cooldown.
  /// Callers already waiting on an older
  /// fetch still get that result, but
  /// only this one lands in the slot.
  #[tracing::instrument(skip_all, fields(key = %key.name))]
  pub async fn refresh<T, F, Fut>(
    &self,
    key: &GateKey,
    fetch: F
  ) -> SyncResult<T>
  where
    T: Serialize
      + DeserializeOwned
      + Send
      + 'static,
    F: FnOnce(Option<NaiveDate>) -> Fut,
    Fut: Future<Output = SyncResult<T>>
      + Send
      + 'static
  {
    let scope = self.scope_for(key);
    let rx = {
      let mut slots = self.inner.slots.lock();
      self.start(
        &mut slots,
        key,
        scope,
        fetch(scope)
      )
    };
    decode(wait(rx).await?)
  }

  fn start<T, Fut>(
    &self,
    slots: &mut HashMap<GateKey, Slot>,
    key: &GateKey,
    scope: Option<NaiveDate>,
    fut: Fut
  ) -> Shared
  where
    T: Serialize + Send + 'static,
    Fut: Future<Output = SyncResult<T>>
      + Send
      + 'static
  {
    let epoch = {
      let mut next =
        self.inner.next_epoch.lock();
      *next += 1;
      *next
    };
    let (tx, rx) = watch::channel(None);
    slots.insert(key.clone(), Slot::Pending {
      epoch,
      scope,
      rx: rx.clone()
    });
    debug!(epoch, ?scope, "issuing fetch");

    let inner = self.inner.clone();
    let key = key.clone();
    tokio::spawn(async move {
      let result = fut.await.and_then(|v| {
        serde_json::to_value(v)
          .map_err(SyncError::from)
      });
      inner.settle(&key, epoch, scope, &result);
      let _ = tx.send(Some(result));
    });
    rx
  }
}

impl GateInner {
  fn settle(
    &self,
    key: &GateKey,
    epoch: u64,
    scope: Option<NaiveDate>,
    result: &SyncResult<Value>
  ) {
    let mut slots = self.slots.lock();
    let current = matches!(
      slots.get(key),
      Some(Slot::Pending { epoch: e, .. })
        if *e == epoch
    );
    if !current {
      debug!(key = %key.name, epoch, "fetch settled after being superseded");
      return;
    }

    match result {
      | Ok(value) => {
        slots.insert(
          key.clone(),
          Slot::Resolved {
            value: value.clone(),
            at: Instant::now(),
            scope
          }
        );
        let cache_key =
          FetchGate::cache_key(key, scope);
        if let Err(err) =
          self.cache.put(&cache_key, value)
        {
          warn!(key = %key.name, error = %err, "write-through failed");
        }
      }
      | Err(err) => {
        warn!(key = %key.name, error = %err, "fetch failed; slot back to idle");
        slots.remove(key);
      }
    }
  }
}

async fn wait(
  mut rx: Shared
) -> SyncResult<Value> {
  let settled = rx
    .wait_for(Option::is_some)
    .await
    .map_err(|_| {
      SyncError::network(
        "shared fetch was dropped before \
         settling"
      )
    })?
    .clone();
  settled.unwrap_or_else(|| {
    Err(SyncError::network(
      "shared fetch settled without a \
       value"
    ))
  })
}

fn decode<T>(value: Value) -> SyncResult<T>
where
  T: DeserializeOwned
{
  Ok(serde_json::from_value(value)?)
}
