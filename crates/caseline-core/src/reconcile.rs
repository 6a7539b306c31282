//! Keeps `last_phone_call` in step with
//! the activity log and folds
//! mark/unmark pairs out of the history
//! view.
//!
//! The log is the source of truth. The
//! entity's contact date is a cached
//! answer to "when was the newest
//! surviving phone-call record", so
//! undoing a call re-asks the log rather
//! than blanking the field.

use std::collections::HashMap;
use std::sync::Arc;

use caseline_shared::{
  ActivityRecord,
  ActivityType,
  TaskDto,
  TaskStatus
};
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::json;
use tracing::{
  info,
  warn
};
use uuid::Uuid;

use crate::datetime::Calendar;
use crate::error::{
  SyncError,
  SyncResult
};
use crate::repo;
use crate::store::{
  DataStore,
  object_row
};
use crate::task::{
  done_patch,
  reopen_patch
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactOutcome {
  pub task:            TaskDto,
  pub entity_id:       Option<Uuid>,
  /// Contact date the entity was left
  /// with.
  pub last_phone_call: Option<NaiveDate>,
  /// Record appended (complete) or
  /// removed (reopen).
  pub activity_id:     Option<Uuid>,
  /// A side effect after the task write
  /// failed; the entity or log may be
  /// out of step.
  pub partial:         bool
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhoneCallLogged {
  pub record:          ActivityRecord,
  pub last_phone_call: Option<NaiveDate>
}

#[derive(Clone)]
pub struct ContactLog {
  store:    Arc<dyn DataStore>,
  calendar: Calendar
}

impl ContactLog {
  pub fn new(
    store: Arc<dyn DataStore>,
    calendar: Calendar
  ) -> Self {
    Self { store, calendar }
  }

  /// Marks the task done, stamps the
  /// linked entity's contact date with
  /// today and appends a phone-call
  /// record. Only the task write can
  /// fail the call.
  #[tracing::instrument(skip(self), fields(task = %task_id))]
  pub async fn complete_contact_task(
    &self,
    task_id: Uuid,
    actor: Uuid
  ) -> SyncResult<ContactOutcome> {
    let store = self.store.as_ref();
    let task = repo::fetch_task(store, task_id).await?;
    if task.status == TaskStatus::Done {
      return Err(SyncError::validation(format!(
        "task {task_id} is already done"
      )));
    }

    let now = self.calendar.now();
    let task = repo::update_task(
      store,
      task_id,
      done_patch(now, actor)
    )
    .await?;

    let mut outcome = ContactOutcome {
      entity_id: task.entity_id,
      task,
      last_phone_call: None,
      activity_id: None,
      partial: false
    };
    let Some(entity_id) = outcome.entity_id else {
      return Ok(outcome);
    };

    let today = self.calendar.local_date(now);
    if let Err(err) = repo::update_entity(
      store,
      entity_id,
      object_row(json!({ "last_phone_call": today }))
    )
    .await
    {
      warn!(entity = %entity_id, error = %err, "task done but contact date not stamped");
      outcome.partial = true;
      return Ok(outcome);
    }
    outcome.last_phone_call = Some(today);

    let record = repo::new_activity(
      actor,
      ActivityType::PhoneCall,
      entity_id,
      format!("Phone call ({})", outcome.task.title),
      now,
      Some(json!({ "task_id": task_id }))
    );
    match repo::insert_activity(store, &record).await {
      | Ok(saved) => {
        outcome.activity_id = Some(saved.id);
        info!(entity = %entity_id, record = %saved.id, "contact recorded");
      }
      | Err(err) => {
        warn!(entity = %entity_id, error = %err, "contact date stamped but log entry missing");
        outcome.partial = true;
      }
    }
    Ok(outcome)
  }

  /// Undoes a completed contact task.
  ///
  /// The newest phone-call record for the
  /// entity is taken to be the one this
  /// task created; recency is the only
  /// check. A call logged by hand after
  /// the task was completed is removed in
  /// its place, and that case is logged.
  #[tracing::instrument(skip(self), fields(task = %task_id))]
  pub async fn reopen_contact_task(
    &self,
    task_id: Uuid
  ) -> SyncResult<ContactOutcome> {
    let store = self.store.as_ref();
    let task = repo::fetch_task(store, task_id).await?;
    if task.status != TaskStatus::Done {
      return Err(SyncError::validation(format!(
        "task {task_id} is not done"
      )));
    }

    let mut activity_id = None;
    let mut last_phone_call = None;
    let mut partial = false;

    if let Some(entity_id) = task.entity_id {
      match self.retract_latest_call(task_id, entity_id).await {
        | Ok((removed, restored)) => {
          activity_id = removed;
          last_phone_call = restored;
        }
        | Err(err) => {
          warn!(entity = %entity_id, error = %err, "contact rollback incomplete");
          partial = true;
        }
      }
    }

    let task =
      repo::update_task(store, task_id, reopen_patch()).await?;
    Ok(ContactOutcome {
      entity_id: task.entity_id,
      task,
      last_phone_call,
      activity_id,
      partial
    })
  }

  /// Delete, re-read, re-stamp. Returns
  /// the removed record id and the date
  /// the entity now shows.
  async fn retract_latest_call(
    &self,
    task_id: Uuid,
    entity_id: Uuid
  ) -> SyncResult<(Option<Uuid>, Option<NaiveDate>)> {
    let store = self.store.as_ref();
    let latest = repo::latest_activity(
      store,
      entity_id,
      ActivityType::PhoneCall
    )
    .await?;

    let removed = match latest {
      | Some(record) => {
        let created_by_task = record
          .metadata
          .as_ref()
          .and_then(|m| m.get("task_id"))
          .and_then(|v| v.as_str())
          == Some(task_id.to_string().as_str());
        if !created_by_task {
          warn!(
            entity = %entity_id,
            record = %record.id,
            "newest phone call was not logged by this task; removing it anyway"
          );
        }
        repo::delete_activity(store, record.id).await?;
        Some(record.id)
      }
      | None => {
        warn!(entity = %entity_id, "no phone-call record left to retract");
        None
      }
    };

    let survivor = repo::latest_activity(
      store,
      entity_id,
      ActivityType::PhoneCall
    )
    .await?;
    let restored = survivor
      .map(|r| self.calendar.local_date(r.created_at));

    repo::update_entity(
      store,
      entity_id,
      object_row(json!({ "last_phone_call": restored }))
    )
    .await?;
    info!(entity = %entity_id, ?restored, "contact date recomputed from log");
    Ok((removed, restored))
  }

  /// A call made outside any task.
  #[tracing::instrument(skip(self, note), fields(entity = %entity_id))]
  pub async fn log_phone_call(
    &self,
    entity_id: Uuid,
    actor: Uuid,
    note: Option<&str>
  ) -> SyncResult<PhoneCallLogged> {
    let store = self.store.as_ref();
    let entity = repo::fetch_entity(store, entity_id).await?;
    let now = self.calendar.now();
    let record = repo::new_activity(
      actor,
      ActivityType::PhoneCall,
      entity_id,
      note.unwrap_or("Phone call"),
      now,
      None
    );
    let record = repo::insert_activity(store, &record).await?;

    let today = self.calendar.local_date(now);
    let newest = entity
      .last_phone_call
      .map_or(today, |d| d.max(today));
    if entity.last_phone_call == Some(newest) {
      return Ok(PhoneCallLogged {
        record,
        last_phone_call: Some(newest)
      });
    }
    let entity = repo::update_entity(
      store,
      entity_id,
      object_row(json!({ "last_phone_call": newest }))
    )
    .await?;
    Ok(PhoneCallLogged {
      record,
      last_phone_call: entity.last_phone_call
    })
  }

  /// One user's activity with same-day
  /// mark/unmark pairs removed.
  #[tracing::instrument(skip(self), fields(actor = %actor))]
  pub async fn history(
    &self,
    actor: Uuid
  ) -> SyncResult<Vec<ActivityRecord>> {
    let records =
      repo::own_activity(self.store.as_ref(), actor).await?;
    Ok(net_history(records, self.calendar.timezone()))
  }
}

/// Drops matched contact-marked /
/// contact-removed pairs.
///
/// Records are grouped by entity and
/// local calendar day. Within a group
/// both stacks are sorted oldest first
/// and popped together until one runs
/// out, so leftovers are the oldest
/// records of the longer stack. Output
/// is newest first.
pub fn net_history(
  records: Vec<ActivityRecord>,
  tz: Tz
) -> Vec<ActivityRecord> {
  let mut groups: HashMap<
    (Uuid, NaiveDate),
    (Vec<usize>, Vec<usize>)
  > = HashMap::new();

  for (idx, record) in records.iter().enumerate() {
    let day = record.created_at.with_timezone(&tz).date_naive();
    let group = groups
      .entry((record.entity_id, day))
      .or_default();
    match record.activity_type {
      | ActivityType::ContactMarked => group.0.push(idx),
      | ActivityType::ContactRemoved => group.1.push(idx),
      | _ => {}
    }
  }

  let chronological = |a: &usize, b: &usize| {
    let (ra, rb) = (&records[*a], &records[*b]);
    ra.created_at
      .cmp(&rb.created_at)
      .then_with(|| ra.id.cmp(&rb.id))
  };

  let mut paired = vec![false; records.len()];
  for (mut marked, mut removed) in groups.into_values() {
    marked.sort_by(chronological);
    removed.sort_by(chronological);
    while let (Some(m), Some(r)) = (marked.pop(), removed.pop()) {
      paired[m] = true;
      paired[r] = true;
    }
  }

  let mut net: Vec<ActivityRecord> = records
    .into_iter()
    .zip(paired)
    .filter_map(|(record, paired)| (!paired).then_some(record))
    .collect();
  net.sort_by(|a, b| {
    b.created_at
      .cmp(&a.created_at)
      .then_with(|| b.id.cmp(&a.id))
  });
  net
}
