//! Wires the components around one
//! store, one cache and one calendar.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::aggregates::Aggregates;
use crate::attendance::Attendance;
use crate::bootstrap::BootstrapGate;
use crate::cache::CacheManager;
use crate::config::Config;
use crate::datetime::Calendar;
use crate::gate::FetchGate;
use crate::optimistic::RefreshCoalescer;
use crate::query::{
  EntitySearch,
  QueryController
};
use crate::reconcile::ContactLog;
use crate::status_updates::StatusUpdates;
use crate::store::DataStore;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct EngineSettings {
  pub search_debounce:    Duration,
  pub aggregate_cooldown: Duration,
  pub refresh_delay:      Duration,
  pub status_feed_limit:  usize
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self::from(&Config::default())
  }
}

impl From<&Config> for EngineSettings {
  fn from(cfg: &Config) -> Self {
    Self {
      search_debounce:    cfg.search_debounce(),
      aggregate_cooldown: cfg
        .aggregate_cooldown(),
      refresh_delay:      cfg.refresh_delay(),
      status_feed_limit:  cfg
        .sync
        .status_feed_limit
    }
  }
}

pub struct Engine {
  pub store:      Arc<dyn DataStore>,
  pub cache:      CacheManager,
  pub calendar:   Calendar,
  pub settings:   EngineSettings,
  pub search:     QueryController<EntitySearch>,
  pub aggregates: Aggregates,
  pub contacts:   ContactLog,
  pub bootstrap:  BootstrapGate
}

impl Engine {
  pub fn new(
    store: Arc<dyn DataStore>,
    cache: CacheManager,
    calendar: Calendar,
    settings: EngineSettings
  ) -> Self {
    let gate = FetchGate::new(
      settings.aggregate_cooldown,
      calendar.clone(),
      cache.clone()
    );
    Self {
      search: QueryController::new(
        EntitySearch::new(store.clone()),
        settings.search_debounce
      ),
      aggregates: Aggregates::new(
        store.clone(),
        gate
      ),
      contacts: ContactLog::new(
        store.clone(),
        calendar.clone()
      ),
      bootstrap: BootstrapGate::new(
        store.clone(),
        cache.clone(),
        settings.status_feed_limit
      ),
      store,
      cache,
      calendar,
      settings
    }
  }

  /// Attendance toggles for `actor`,
  /// re-counting today's visits once a
  /// burst of toggles goes quiet.
  pub fn attendance(
    &self,
    actor: Uuid
  ) -> Attendance {
    let aggregates = self.aggregates.clone();
    let refresh = RefreshCoalescer::new(
      self.settings.refresh_delay,
      move || {
        let aggregates = aggregates.clone();
        async move {
          if let Err(err) = aggregates
            .refresh_attended_today()
            .await
          {
            warn!(error = %err, "attended-today refresh failed");
          }
        }
      }
    );
    Attendance::new(
      self.store.clone(),
      self.calendar.clone(),
      actor
    )
    .with_refresh(Arc::new(refresh))
  }

  pub fn status_updates(
    &self,
    actor: Uuid
  ) -> StatusUpdates {
    StatusUpdates::new(
      self.store.clone(),
      self.calendar.clone(),
      actor
    )
  }
}
