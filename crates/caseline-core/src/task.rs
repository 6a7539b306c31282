use caseline_shared::{
  TaskDto,
  TaskStatus
};
use chrono::{
  DateTime,
  Utc
};
use serde_json::{
  Value,
  json
};
use uuid::Uuid;

use crate::error::{
  SyncError,
  SyncResult
};
use crate::store::{
  Row,
  object_row
};

/// `done_at` and `done_by` are set
/// exactly when the task is done.
pub fn check_task(
  task: &TaskDto
) -> SyncResult<()> {
  let stamped = task.done_at.is_some()
    && task.done_by.is_some();
  let blank = task.done_at.is_none()
    && task.done_by.is_none();

  match task.status {
    | TaskStatus::Done if stamped => Ok(()),
    | TaskStatus::Open if blank => Ok(()),
    | status => Err(SyncError::validation(
      format!(
        "task {} is {status:?} but has \
         done_at={:?} done_by={:?}",
        task.id, task.done_at, task.done_by
      )
    ))
  }
}

pub fn done_patch(
  now: DateTime<Utc>,
  by: Uuid
) -> Row {
  object_row(json!({
    "status": TaskStatus::Done,
    "done_at": now,
    "done_by": by
  }))
}

pub fn reopen_patch() -> Row {
  object_row(json!({
    "status": TaskStatus::Open,
    "done_at": Value::Null,
    "done_by": Value::Null
  }))
}
