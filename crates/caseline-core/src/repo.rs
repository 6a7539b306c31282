//! Typed reads and writes over the
//! generic [`DataStore`].

use caseline_shared::{
  ActivityRecord,
  ActivityType,
  EntityDto,
  EntitySearchArgs,
  TaskDto,
  TaskStatus
};
use chrono::{
  DateTime,
  NaiveDate,
  Utc
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::error::{
  SyncError,
  SyncResult
};
use crate::store::{
  DataStore,
  Filter,
  Order,
  Row,
  Table
};
use crate::task::check_task;

pub fn to_row<T>(value: &T) -> SyncResult<Row>
where
  T: Serialize
{
  match serde_json::to_value(value)? {
    | serde_json::Value::Object(map) => {
      Ok(map)
    }
    | other => Err(SyncError::Decode(
      format!(
        "expected an object row, got \
         {other}"
      )
    ))
  }
}

pub fn from_row<T>(row: Row) -> SyncResult<T>
where
  T: DeserializeOwned
{
  Ok(serde_json::from_value(
    serde_json::Value::Object(row)
  )?)
}

pub fn from_rows<T>(
  rows: Vec<Row>
) -> SyncResult<Vec<T>>
where
  T: DeserializeOwned
{
  rows.into_iter().map(from_row).collect()
}

pub fn new_activity(
  actor_id: Uuid,
  activity_type: ActivityType,
  entity_id: Uuid,
  description: impl Into<String>,
  created_at: DateTime<Utc>,
  metadata: Option<serde_json::Value>
) -> ActivityRecord {
  ActivityRecord {
    id: Uuid::new_v4(),
    actor_id,
    activity_type,
    entity_id,
    description: description.into(),
    created_at,
    metadata
  }
}

pub async fn search_entities(
  store: &dyn DataStore,
  term: &str,
  args: &EntitySearchArgs
) -> SyncResult<Vec<EntityDto>> {
  let mut filter = Filter::new();
  if !term.is_empty() {
    filter =
      filter.contains("display_name", term);
  }
  if let Some(kind) = args.kind {
    filter = filter.eq("kind", kind);
  }
  if !args.include_archived {
    filter =
      filter.eq("is_archived", false);
  }

  let rows = store
    .select(
      Table::Entities,
      &filter,
      Some(
        &Order::asc("display_name")
          .then_asc("id")
      ),
      None
    )
    .await?;
  debug!(term, hits = rows.len(), "entity search");
  from_rows(rows)
}

pub async fn fetch_entities(
  store: &dyn DataStore
) -> SyncResult<Vec<EntityDto>> {
  let rows = store
    .select(
      Table::Entities,
      &Filter::new(),
      Some(
        &Order::asc("display_name")
          .then_asc("id")
      ),
      None
    )
    .await?;
  from_rows(rows)
}

pub async fn fetch_entity(
  store: &dyn DataStore,
  id: Uuid
) -> SyncResult<EntityDto> {
  let row = store
    .select(
      Table::Entities,
      &Filter::by_id(id),
      None,
      Some(1)
    )
    .await?
    .into_iter()
    .next()
    .ok_or_else(|| {
      SyncError::not_found(format!(
        "entity {id}"
      ))
    })?;
  from_row(row)
}

pub async fn update_entity(
  store: &dyn DataStore,
  id: Uuid,
  patch: Row
) -> SyncResult<EntityDto> {
  let row = store
    .update(
      Table::Entities,
      &Filter::by_id(id),
      patch
    )
    .await?;
  from_row(row)
}

pub async fn fetch_task(
  store: &dyn DataStore,
  id: Uuid
) -> SyncResult<TaskDto> {
  let row = store
    .select(
      Table::Tasks,
      &Filter::by_id(id),
      None,
      Some(1)
    )
    .await?
    .into_iter()
    .next()
    .ok_or_else(|| {
      SyncError::not_found(format!(
        "task {id}"
      ))
    })?;
  let task: TaskDto = from_row(row)?;
  check_task(&task)?;
  Ok(task)
}

pub async fn update_task(
  store: &dyn DataStore,
  id: Uuid,
  patch: Row
) -> SyncResult<TaskDto> {
  let row = store
    .update(
      Table::Tasks,
      &Filter::by_id(id),
      patch
    )
    .await?;
  let task: TaskDto = from_row(row)?;
  check_task(&task)?;
  Ok(task)
}

pub async fn list_open_tasks(
  store: &dyn DataStore
) -> SyncResult<Vec<TaskDto>> {
  let rows = store
    .select(
      Table::Tasks,
      &Filter::new()
        .eq("status", TaskStatus::Open),
      Some(
        &Order::asc("due")
          .then_asc("title")
          .then_asc("id")
      ),
      None
    )
    .await?;
  let tasks: Vec<TaskDto> =
    from_rows(rows)?;
  for task in &tasks {
    check_task(task)?;
  }
  Ok(tasks)
}

pub async fn insert_activity(
  store: &dyn DataStore,
  record: &ActivityRecord
) -> SyncResult<ActivityRecord> {
  let row = store
    .insert(
      Table::ActivityLog,
      to_row(record)?
    )
    .await?;
  from_row(row)
}

pub async fn delete_activity(
  store: &dyn DataStore,
  id: Uuid
) -> SyncResult<()> {
  store
    .delete(
      Table::ActivityLog,
      &Filter::by_id(id)
    )
    .await
}

/// Most recent record of one type for
/// one entity.
pub async fn latest_activity(
  store: &dyn DataStore,
  entity_id: Uuid,
  activity_type: ActivityType
) -> SyncResult<Option<ActivityRecord>> {
  let rows = store
    .select(
      Table::ActivityLog,
      &Filter::new()
        .eq("entity_id", entity_id)
        .eq("activity_type", activity_type),
      Some(&Order::newest_first()),
      Some(1)
    )
    .await?;
  rows
    .into_iter()
    .next()
    .map(from_row)
    .transpose()
}

pub async fn entity_activity_before(
  store: &dyn DataStore,
  entity_id: Uuid,
  before: DateTime<Utc>
) -> SyncResult<Vec<ActivityRecord>> {
  let rows = store
    .select(
      Table::ActivityLog,
      &Filter::new()
        .eq("entity_id", entity_id)
        .lt("created_at", before),
      Some(&Order::newest_first()),
      None
    )
    .await?;
  from_rows(rows)
}

pub async fn own_activity(
  store: &dyn DataStore,
  actor_id: Uuid
) -> SyncResult<Vec<ActivityRecord>> {
  let rows = store
    .select(
      Table::ActivityLog,
      &Filter::new()
        .eq("actor_id", actor_id),
      Some(&Order::newest_first()),
      None
    )
    .await?;
  from_rows(rows)
}

pub async fn status_feed(
  store: &dyn DataStore,
  limit: usize
) -> SyncResult<Vec<ActivityRecord>> {
  let rows = store
    .select(
      Table::ActivityLog,
      &Filter::new().eq(
        "activity_type",
        ActivityType::StatusUpdate
      ),
      Some(&Order::newest_first()),
      Some(limit)
    )
    .await?;
  from_rows(rows)
}

pub async fn count_attended_on(
  store: &dyn DataStore,
  day: NaiveDate
) -> SyncResult<u64> {
  store
    .count(
      Table::Entities,
      &Filter::new()
        .eq("last_attendance", day)
    )
    .await
}
