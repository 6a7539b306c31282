//! Local state that runs ahead of the
//! store.
//!
//! A mutation shows its guess at once,
//! writes, then either confirms the
//! guess or takes it back. Per id the
//! displayed value is always the newest
//! outstanding guess, or the last value
//! the store confirmed when nothing is
//! outstanding.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{
  debug,
  warn
};
use uuid::Uuid;

use crate::error::{
  SyncError,
  SyncResult
};

/// Something to re-read once writes
/// settle.
#[async_trait]
pub trait Refresh: Send + Sync {
  fn schedule(&self);

  /// Runs a scheduled refresh now
  /// instead of after its delay. Does
  /// nothing when none is scheduled.
  async fn flush(&self);
}

#[derive(Default)]
struct Scheduled {
  generation: u64,
  token:      Option<CancellationToken>
}

/// Debounced background refresh: many
/// `schedule` calls inside one delay
/// window run the action once.
pub struct RefreshCoalescer<F> {
  delay:     Duration,
  action:    Arc<F>,
  scheduled: Arc<Mutex<Scheduled>>
}

impl<F, Fut> RefreshCoalescer<F>
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = ()> + Send + 'static
{
  pub fn new(
    delay: Duration,
    action: F
  ) -> Self {
    Self {
      delay,
      action: Arc::new(action),
      scheduled: Arc::new(Mutex::new(
        Scheduled::default()
      ))
    }
  }
}

#[async_trait]
impl<F, Fut> Refresh for RefreshCoalescer<F>
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = ()> + Send + 'static
{
  fn schedule(&self) {
    let token = CancellationToken::new();
    let generation = {
      let mut scheduled =
        self.scheduled.lock();
      scheduled.generation += 1;
      if let Some(previous) = scheduled
        .token
        .replace(token.clone())
      {
        previous.cancel();
      }
      scheduled.generation
    };

    let delay = self.delay;
    let action = self.action.clone();
    let scheduled = self.scheduled.clone();
    tokio::spawn(async move {
      tokio::select! {
        _ = token.cancelled() => {
          debug!("refresh folded into a later one");
        }
        _ = tokio::time::sleep(delay) => {
          // A flush may have claimed this
          // run already.
          let due = {
            let mut scheduled = scheduled.lock();
            scheduled.generation == generation
              && scheduled.token.take().is_some()
          };
          if due {
            action().await;
          }
        }
      }
    });
  }

  async fn flush(&self) {
    let claimed =
      self.scheduled.lock().token.take();
    if let Some(token) = claimed {
      token.cancel();
      debug!("running scheduled refresh now");
      (self.action)().await;
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Confirmation<V> {
  pub id:       Uuid,
  /// What the store now holds.
  pub value:    V,
  pub previous: Option<V>
}

#[derive(Debug, Clone)]
struct Entry<V> {
  confirmed: Option<V>,
  pending:   Vec<(u64, V)>
}

impl<V: Clone> Entry<V> {
  fn shown(&self) -> Option<V> {
    self
      .pending
      .last()
      .map(|(_, v)| v.clone())
      .or_else(|| self.confirmed.clone())
  }
}

struct Slots<V> {
  entries: HashMap<Uuid, Entry<V>>,
  seq:     u64
}

pub struct OptimisticState<V> {
  slots:   Mutex<Slots<V>>,
  view:    watch::Sender<HashMap<Uuid, V>>,
  refresh: Option<Arc<dyn Refresh>>
}

impl<V> OptimisticState<V>
where
  V: Clone + PartialEq + Send + Sync + 'static
{
  pub fn new() -> Self {
    let (view, _) = watch::channel(HashMap::new());
    Self {
      slots: Mutex::new(Slots {
        entries: HashMap::new(),
        seq:     0
      }),
      view,
      refresh: None
    }
  }

  /// Runs `refresh` after every
  /// confirmed write.
  pub fn with_refresh(
    mut self,
    refresh: Arc<dyn Refresh>
  ) -> Self {
    self.refresh = Some(refresh);
    self
  }

  /// Records a server value without
  /// disturbing outstanding guesses.
  pub fn seed(&self, id: Uuid, value: V) {
    let mut slots = self.slots.lock();
    slots
      .entries
      .entry(id)
      .and_modify(|e| {
        e.confirmed = Some(value.clone())
      })
      .or_insert_with(|| Entry {
        confirmed: Some(value),
        pending:   Vec::new()
      });
    self.publish(&slots);
  }

  /// Waits for any refresh scheduled by
  /// earlier confirmed writes.
  pub async fn flush_refresh(&self) {
    if let Some(refresh) = &self.refresh {
      refresh.flush().await;
    }
  }

  /// Last value the store confirmed,
  /// ignoring outstanding guesses.
  pub fn confirmed(
    &self,
    id: Uuid
  ) -> Option<V> {
    self
      .slots
      .lock()
      .entries
      .get(&id)
      .and_then(|e| e.confirmed.clone())
  }

  pub fn get(&self, id: Uuid) -> Option<V> {
    self
      .slots
      .lock()
      .entries
      .get(&id)
      .and_then(Entry::shown)
  }

  pub fn snapshot(&self) -> HashMap<Uuid, V> {
    self.view.borrow().clone()
  }

  pub fn subscribe(
    &self
  ) -> watch::Receiver<HashMap<Uuid, V>> {
    self.view.subscribe()
  }

  fn publish(&self, slots: &Slots<V>) {
    let shown: HashMap<Uuid, V> = slots
      .entries
      .iter()
      .filter_map(|(id, e)| {
        e.shown().map(|v| (*id, v))
      })
      .collect();
    self.view.send_if_modified(|current| {
      if *current == shown {
        return false;
      }
      *current = shown;
      true
    });
  }

  #[tracing::instrument(skip_all, fields(id = %id))]
  pub async fn mutate<W, Fut>(
    &self,
    id: Uuid,
    new_value: V,
    write: W
  ) -> SyncResult<Confirmation<V>>
  where
    W: FnOnce(V) -> Fut,
    Fut: Future<Output = SyncResult<V>>
  {
    if id.is_nil() {
      return Err(SyncError::validation(
        "mutation needs an entity id"
      ));
    }

    let (seq, previous) = {
      let mut slots = self.slots.lock();
      slots.seq += 1;
      let seq = slots.seq;
      let entry = slots
        .entries
        .entry(id)
        .or_insert_with(|| Entry {
          confirmed: None,
          pending:   Vec::new()
        });
      let previous = entry.shown();
      entry.pending.push((seq, new_value.clone()));
      self.publish(&slots);
      (seq, previous)
    };
    debug!(seq, "optimistic value applied");

    match write(new_value).await {
      | Ok(value) => {
        {
          let mut slots = self.slots.lock();
          if let Some(entry) =
            slots.entries.get_mut(&id)
          {
            entry.confirmed = Some(value.clone());
            entry.pending.retain(|(s, _)| *s > seq);
          }
          self.publish(&slots);
        }
        if let Some(refresh) = &self.refresh {
          refresh.schedule();
        }
        Ok(Confirmation {
          id,
          value,
          previous
        })
      }
      | Err(err) => {
        warn!(seq, error = %err, "write failed; rolling back");
        let mut slots = self.slots.lock();
        let emptied = match slots.entries.get_mut(&id)
        {
          | Some(entry) => {
            entry.pending.retain(|(s, _)| *s != seq);
            entry.confirmed.is_none()
              && entry.pending.is_empty()
          }
          | None => false
        };
        if emptied {
          slots.entries.remove(&id);
        }
        self.publish(&slots);
        Err(err)
      }
    }
  }
}

impl<V> Default for OptimisticState<V>
where
  V: Clone + PartialEq + Send + Sync + 'static
{
  fn default() -> Self {
    Self::new()
  }
}
