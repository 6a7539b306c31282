//! Session warm-up that holds the UI
//! back until the cache is verifiably
//! populated.
//!
//! `Idle -> Warming -> Ready`, or
//! `Skipped` for public routes. A read
//! that "succeeded" is not enough: once
//! every read has returned, each
//! required key is looked up again and
//! any gap keeps the gate in `Warming`.
//! There is no retry timer; the next
//! navigation runs a fresh attempt.

use std::sync::Arc;

use caseline_shared::Identity;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{
  debug,
  error,
  info,
  warn
};

use crate::cache::{
  CacheKey,
  CacheManager
};
use crate::error::SyncResult;
use crate::repo;
use crate::store::DataStore;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPhase {
  Idle,
  Warming,
  Ready,
  Skipped
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum Route {
  /// Sign-in and other unauthenticated
  /// pages.
  Public,
  Protected
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum Requirement {
  Required,
  BestEffort
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupRead {
  pub key:         CacheKey,
  pub requirement: Requirement
}

/// Reads issued for one identity. Every
/// role gets the entity list and its own
/// activity; privileged roles also get
/// the task list and, best effort, the
/// cross-user status feed.
pub fn warmup_plan(
  identity: &Identity
) -> Vec<WarmupRead> {
  let mut plan = vec![
    WarmupRead {
      key:         CacheKey::Entities,
      requirement: Requirement::Required
    },
    WarmupRead {
      key:         CacheKey::OwnActivity {
        user_id: identity.user_id
      },
      requirement: Requirement::Required
    },
  ];
  if identity.role.is_privileged() {
    plan.push(WarmupRead {
      key:         CacheKey::Tasks,
      requirement: Requirement::Required
    });
    plan.push(WarmupRead {
      key:         CacheKey::StatusFeed,
      requirement: Requirement::BestEffort
    });
  }
  plan
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
enum Attempt {
  None,
  InFlight,
  Stalled
}

#[derive(Clone)]
struct Warmer {
  store:             Arc<dyn DataStore>,
  cache:             CacheManager,
  status_feed_limit: usize
}

impl Warmer {
  async fn warm(
    &self,
    key: &CacheKey
  ) -> SyncResult<()> {
    let store = self.store.as_ref();
    match key {
      | CacheKey::Entities => {
        let rows =
          repo::fetch_entities(store).await?;
        self.cache.put(key, &rows)
      }
      | CacheKey::OwnActivity {
        user_id
      } => {
        let rows =
          repo::own_activity(store, *user_id)
            .await?;
        self.cache.put(key, &rows)
      }
      | CacheKey::Tasks => {
        let rows =
          repo::list_open_tasks(store).await?;
        self.cache.put(key, &rows)
      }
      | CacheKey::StatusFeed => {
        let rows = repo::status_feed(
          store,
          self.status_feed_limit
        )
        .await?;
        self.cache.put(key, &rows)
      }
      | CacheKey::Aggregate { .. }
      | CacheKey::BootstrapMarker => Ok(())
    }
  }
}

/// Resets an abandoned attempt so the
/// next navigation can try again.
struct AttemptGuard<'a> {
  attempt: &'a Mutex<Attempt>,
  settled: bool
}

impl AttemptGuard<'_> {
  fn settle(mut self, outcome: Attempt) {
    *self.attempt.lock() = outcome;
    self.settled = true;
  }
}

impl Drop for AttemptGuard<'_> {
  fn drop(&mut self) {
    if !self.settled {
      *self.attempt.lock() = Attempt::Stalled;
    }
  }
}

pub struct BootstrapGate {
  warmer:  Warmer,
  phase:   watch::Sender<BootstrapPhase>,
  attempt: Mutex<Attempt>
}

impl BootstrapGate {
  pub fn new(
    store: Arc<dyn DataStore>,
    cache: CacheManager,
    status_feed_limit: usize
  ) -> Self {
    let (phase, _) =
      watch::channel(BootstrapPhase::Idle);
    Self {
      warmer: Warmer {
        store,
        cache,
        status_feed_limit
      },
      phase,
      attempt: Mutex::new(Attempt::None)
    }
  }

  pub fn phase(&self) -> BootstrapPhase {
    *self.phase.borrow()
  }

  pub fn subscribe(
    &self
  ) -> watch::Receiver<BootstrapPhase> {
    self.phase.subscribe()
  }

  fn set_phase(&self, next: BootstrapPhase) {
    self.phase.send_if_modified(|phase| {
      if *phase == next {
        return false;
      }
      debug!(from = ?*phase, to = ?next, "bootstrap phase");
      *phase = next;
      true
    });
  }

  /// Resolves once the UI may render.
  pub async fn wait_ready(&self) {
    let mut rx = self.phase.subscribe();
    let _ = rx
      .wait_for(|p| {
        matches!(
          p,
          BootstrapPhase::Ready
            | BootstrapPhase::Skipped
        )
      })
      .await;
  }

  /// Called on every navigation.
  #[tracing::instrument(skip_all, fields(route = ?route))]
  pub async fn run(
    &self,
    route: Route,
    identity: Option<Identity>
  ) -> BootstrapPhase {
    if route == Route::Public {
      self.set_phase(BootstrapPhase::Skipped);
      return BootstrapPhase::Skipped;
    }
    let Some(identity) = identity else {
      self.set_phase(BootstrapPhase::Idle);
      return BootstrapPhase::Idle;
    };

    let cache = &self.warmer.cache;
    match cache
      .get::<Identity>(&CacheKey::BootstrapMarker)
    {
      | Some(marked)
        if marked.user_id == identity.user_id =>
      {
        debug!("session already warmed");
        self.set_phase(BootstrapPhase::Ready);
        return BootstrapPhase::Ready;
      }
      | Some(marked) => {
        info!(
          previous = %marked.user_id,
          current = %identity.user_id,
          "identity changed; dropping session cache"
        );
        cache.clear_session();
      }
      | None => {}
    }

    {
      let mut attempt = self.attempt.lock();
      if *attempt == Attempt::InFlight {
        debug!("warm-up already running");
        return BootstrapPhase::Warming;
      }
      *attempt = Attempt::InFlight;
    }
    let guard = AttemptGuard {
      attempt: &self.attempt,
      settled: false
    };
    self.set_phase(BootstrapPhase::Warming);

    let plan = warmup_plan(&identity);
    let mut reads = JoinSet::new();
    for read in plan.iter().cloned() {
      let warmer = self.warmer.clone();
      reads.spawn(async move {
        let result = warmer.warm(&read.key).await;
        (read, result)
      });
    }
    while let Some(joined) = reads.join_next().await {
      match joined {
        | Ok((read, Err(err))) => {
          warn!(
            key = %read.key.storage_key(),
            required = read.requirement == Requirement::Required,
            error = %err,
            "warm-up read failed"
          );
        }
        | Ok((read, Ok(()))) => {
          debug!(key = %read.key.storage_key(), "warmed");
        }
        | Err(err) => {
          warn!(error = %err, "warm-up task did not finish");
        }
      }
    }

    let missing: Vec<String> = plan
      .iter()
      .filter(|r| r.requirement == Requirement::Required)
      .filter(|r| !cache.contains(&r.key))
      .map(|r| r.key.storage_key())
      .collect();
    if !missing.is_empty() {
      error!(?missing, "required cache keys missing; staying in warm-up");
      guard.settle(Attempt::Stalled);
      return BootstrapPhase::Warming;
    }

    if let Err(err) =
      cache.put(&CacheKey::BootstrapMarker, &identity)
    {
      warn!(error = %err, "could not record bootstrap marker");
    }
    guard.settle(Attempt::None);
    info!(user = %identity.user_id, role = ?identity.role, "bootstrap ready");
    self.set_phase(BootstrapPhase::Ready);
    BootstrapPhase::Ready
  }
}
