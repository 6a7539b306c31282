use std::sync::Arc;

use caseline_shared::{
  ActivityRecord,
  ActivityType
};
use chrono::NaiveDate;
use serde_json::json;
use tracing::{
  debug,
  warn
};
use uuid::Uuid;

use crate::datetime::Calendar;
use crate::error::SyncResult;
use crate::optimistic::{
  Confirmation,
  OptimisticState,
  Refresh
};
use crate::reconcile::net_history;
use crate::repo;
use crate::store::{
  DataStore,
  object_row
};

/// Optimistic `last_attendance` toggles
/// for the visit list.
pub struct Attendance {
  store:    Arc<dyn DataStore>,
  calendar: Calendar,
  actor:    Uuid,
  state:    OptimisticState<Option<NaiveDate>>
}

impl Attendance {
  pub fn new(
    store: Arc<dyn DataStore>,
    calendar: Calendar,
    actor: Uuid
  ) -> Self {
    Self {
      store,
      calendar,
      actor,
      state: OptimisticState::new()
    }
  }

  /// Re-reads the "attended today" count
  /// once a burst of toggles settles.
  pub fn with_refresh(
    mut self,
    refresh: Arc<dyn Refresh>
  ) -> Self {
    self.state = self.state.with_refresh(refresh);
    self
  }

  pub fn state(
    &self
  ) -> &OptimisticState<Option<NaiveDate>> {
    &self.state
  }

  /// Runs the pending count refresh now.
  /// Short-lived callers await this
  /// before exiting.
  pub async fn settle(&self) {
    self.state.flush_refresh().await;
  }

  async fn ensure_seeded(
    &self,
    id: Uuid
  ) -> SyncResult<()> {
    if self.state.get(id).is_none() {
      let entity =
        repo::fetch_entity(self.store.as_ref(), id)
          .await?;
      self.state.seed(id, entity.last_attendance);
    }
    Ok(())
  }

  #[tracing::instrument(skip(self), fields(entity = %id))]
  pub async fn mark_attended(
    &self,
    id: Uuid
  ) -> SyncResult<Confirmation<Option<NaiveDate>>> {
    self.ensure_seeded(id).await?;
    let today = self.calendar.today();
    self
      .state
      .mutate(id, Some(today), |value| {
        self.write(
          id,
          value,
          ActivityType::ContactMarked,
          "Marked as attended"
        )
      })
      .await
  }

  /// Takes today's visit back. The entity
  /// falls back to the newest visit from
  /// an earlier day that was never undone.
  #[tracing::instrument(skip(self), fields(entity = %id))]
  pub async fn unmark_attended(
    &self,
    id: Uuid
  ) -> SyncResult<Confirmation<Option<NaiveDate>>> {
    self.ensure_seeded(id).await?;
    let restore = self.prior_attendance(id).await?;
    self
      .state
      .mutate(id, restore, |value| {
        self.write(
          id,
          value,
          ActivityType::ContactRemoved,
          "Attendance removed"
        )
      })
      .await
  }

  async fn write(
    &self,
    id: Uuid,
    value: Option<NaiveDate>,
    kind: ActivityType,
    description: &str
  ) -> SyncResult<Option<NaiveDate>> {
    let store = self.store.as_ref();
    let entity = repo::update_entity(
      store,
      id,
      object_row(json!({ "last_attendance": value }))
    )
    .await?;

    let record = repo::new_activity(
      self.actor,
      kind,
      id,
      description,
      self.calendar.now(),
      None
    );
    if let Err(err) =
      repo::insert_activity(store, &record).await
    {
      warn!(entity = %id, error = %err, "attendance saved without log entry");
    }
    Ok(entity.last_attendance)
  }

  /// Newest net visit before today.
  pub async fn prior_attendance(
    &self,
    id: Uuid
  ) -> SyncResult<Option<NaiveDate>> {
    let today = self.calendar.today();
    let before = self.calendar.day_start(today);
    let records: Vec<ActivityRecord> =
      repo::entity_activity_before(
        self.store.as_ref(),
        id,
        before
      )
      .await?
      .into_iter()
      .filter(|r| {
        matches!(
          r.activity_type,
          ActivityType::ContactMarked
            | ActivityType::ContactRemoved
        )
      })
      .collect();

    let prior = net_history(records, self.calendar.timezone())
      .into_iter()
      .find(|r| r.activity_type == ActivityType::ContactMarked)
      .map(|r| self.calendar.local_date(r.created_at));
    debug!(entity = %id, ?prior, "prior attendance from log");
    Ok(prior)
  }
}
