use std::collections::HashMap;
use std::sync::Arc;

use caseline_shared::{
  ActivityRecord,
  ActivityType,
  StatusUpdateEntry
};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{
  debug,
  warn
};
use uuid::Uuid;

use crate::datetime::{
  Calendar,
  short_display_date
};
use crate::error::{
  SyncError,
  SyncResult
};
use crate::optimistic::{
  Confirmation,
  OptimisticState
};
use crate::repo;
use crate::store::{
  DataStore,
  object_row
};

pub struct StatusUpdates {
  store:    Arc<dyn DataStore>,
  calendar: Calendar,
  actor:    Uuid,
  state:    OptimisticState<Vec<StatusUpdateEntry>>,
  lanes:    Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>
}

impl StatusUpdates {
  pub fn new(
    store: Arc<dyn DataStore>,
    calendar: Calendar,
    actor: Uuid
  ) -> Self {
    Self {
      store,
      calendar,
      actor,
      state: OptimisticState::new(),
      lanes: Mutex::new(HashMap::new())
    }
  }

  pub fn state(
    &self
  ) -> &OptimisticState<Vec<StatusUpdateEntry>> {
    &self.state
  }

  fn lane(
    &self,
    entity_id: Uuid
  ) -> Arc<tokio::sync::Mutex<()>> {
    self
      .lanes
      .lock()
      .entry(entity_id)
      .or_default()
      .clone()
  }

  /// Appends one entry to the entity's
  /// embedded list. Entries keep their
  /// order; the new one always goes last.
  ///
  /// Appends to one entity run one at a
  /// time, each building on the list the
  /// store last confirmed, so a failed
  /// append is never carried into the
  /// next write.
  #[tracing::instrument(skip(self, text), fields(entity = %entity_id))]
  pub async fn append(
    &self,
    entity_id: Uuid,
    text: &str
  ) -> SyncResult<Confirmation<Vec<StatusUpdateEntry>>> {
    let text = text.trim();
    if text.is_empty() {
      return Err(SyncError::validation(
        "status update text is empty"
      ));
    }

    let lane = self.lane(entity_id);
    let _turn = lane.lock().await;
    debug!("append has the entity lane");

    let current = match self.state.confirmed(entity_id) {
      | Some(list) => list,
      | None => {
        let entity =
          repo::fetch_entity(self.store.as_ref(), entity_id)
            .await?;
        self.state.seed(entity_id, entity.status_updates.clone());
        entity.status_updates
      }
    };

    let now = self.calendar.now();
    let id = match current.last() {
      | Some(last) if last.id >= now.timestamp_millis() => {
        last.id + 1
      }
      | _ => now.timestamp_millis()
    };
    let entry = StatusUpdateEntry {
      id,
      text: text.to_string(),
      date: short_display_date(self.calendar.local_date(now))
    };
    let mut next = current;
    next.push(entry.clone());

    self
      .state
      .mutate(entity_id, next, |list| async move {
        let store = self.store.as_ref();
        let entity = repo::update_entity(
          store,
          entity_id,
          object_row(json!({ "status_updates": list }))
        )
        .await?;

        let record = repo::new_activity(
          self.actor,
          ActivityType::StatusUpdate,
          entity_id,
          entry.text.clone(),
          now,
          Some(json!({ "entry_id": entry.id }))
        );
        if let Err(err) =
          repo::insert_activity(store, &record).await
        {
          warn!(entity = %entity_id, error = %err, "status saved without feed entry");
        }
        Ok(entity.status_updates)
      })
      .await
  }

  /// Newest status-update records across
  /// every user.
  pub async fn feed(
    &self,
    limit: usize
  ) -> SyncResult<Vec<ActivityRecord>> {
    repo::status_feed(self.store.as_ref(), limit).await
  }
}
