#![allow(dead_code)]

use std::sync::Arc;

use caseline_core::datetime::{Calendar, ManualClock};
use caseline_core::store::{Row, object_row};
use caseline_shared::{ActivityType, TaskStatus};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

pub fn ts(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, day, hour, minute, 0)
        .single()
        .expect("valid timestamp")
}

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, day).expect("valid date")
}

pub fn manual_calendar(now: DateTime<Utc>) -> (Arc<ManualClock>, Calendar) {
    let clock = Arc::new(ManualClock::new(now));
    let calendar = Calendar::new(clock.clone(), chrono_tz::UTC);
    (clock, calendar)
}

pub fn entity(id: Uuid, name: &str) -> Row {
    object_row(json!({
        "id": id,
        "kind": "participant",
        "display_name": name,
        "is_archived": false,
        "last_attendance": null,
        "last_phone_call": null,
        "status_updates": []
    }))
}

pub fn entity_with(id: Uuid, name: &str, patch: Value) -> Row {
    let mut row = entity(id, name);
    row.extend(object_row(patch));
    row
}

pub fn activity(
    id: Uuid,
    actor: Uuid,
    kind: ActivityType,
    entity_id: Uuid,
    created_at: DateTime<Utc>,
    metadata: Option<Value>,
) -> Row {
    object_row(json!({
        "id": id,
        "actor_id": actor,
        "activity_type": kind,
        "entity_id": entity_id,
        "description": "",
        "created_at": created_at,
        "metadata": metadata
    }))
}

pub fn open_task(id: Uuid, entity_id: Option<Uuid>) -> Row {
    object_row(json!({
        "id": id,
        "title": "Call participant",
        "status": TaskStatus::Open,
        "due": null,
        "entity_id": entity_id,
        "done_at": null,
        "done_by": null
    }))
}

pub fn done_task(id: Uuid, entity_id: Option<Uuid>, done_at: DateTime<Utc>, by: Uuid) -> Row {
    object_row(json!({
        "id": id,
        "title": "Call participant",
        "status": TaskStatus::Done,
        "due": null,
        "entity_id": entity_id,
        "done_at": done_at,
        "done_by": by
    }))
}
