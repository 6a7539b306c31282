mod common;

use std::sync::Arc;

use caseline_core::datetime::Calendar;
use caseline_core::error::SyncError;
use caseline_core::memory_store::{MemoryStore, StoreOp};
use caseline_core::reconcile::ContactLog;
use caseline_core::repo;
use caseline_core::store::Table;
use caseline_shared::{ActivityRecord, ActivityType, TaskStatus};
use serde_json::json;
use uuid::Uuid;

use common::{activity, date, done_task, entity, manual_calendar, open_task, ts};

fn contact_log(store: &Arc<MemoryStore>, calendar: Calendar) -> ContactLog {
    ContactLog::new(store.clone(), calendar)
}

fn phone_calls(store: &MemoryStore, entity_id: Uuid) -> Vec<ActivityRecord> {
    let rows: Vec<ActivityRecord> =
        repo::from_rows(store.snapshot(Table::ActivityLog)).expect("decode log");
    rows.into_iter()
        .filter(|r| r.entity_id == entity_id && r.activity_type == ActivityType::PhoneCall)
        .collect()
}

#[tokio::test]
async fn completing_a_task_stamps_today_and_logs_the_call() {
    let store = Arc::new(MemoryStore::new());
    let entity_id = Uuid::new_v4();
    let task_id = Uuid::new_v4();
    let actor = Uuid::new_v4();
    store.seed(Table::Entities, [entity(entity_id, "Ana")]);
    store.seed(Table::Tasks, [open_task(task_id, Some(entity_id))]);
    let (_clock, calendar) = manual_calendar(ts(5, 16, 0));

    let outcome = contact_log(&store, calendar)
        .complete_contact_task(task_id, actor)
        .await
        .expect("complete");

    assert!(!outcome.partial);
    assert_eq!(outcome.task.status, TaskStatus::Done);
    assert_eq!(outcome.task.done_by, Some(actor));
    assert_eq!(outcome.last_phone_call, Some(date(5)));

    let entity = repo::fetch_entity(store.as_ref(), entity_id).await.expect("entity");
    assert_eq!(entity.last_phone_call, Some(date(5)));

    let calls = phone_calls(&store, entity_id);
    assert_eq!(calls.len(), 1);
    assert_eq!(Some(calls[0].id), outcome.activity_id);
    assert_eq!(calls[0].actor_id, actor);
    assert_eq!(
        calls[0].metadata.as_ref().and_then(|m| m.get("task_id")),
        Some(&json!(task_id))
    );
}

#[tokio::test]
async fn reopening_restores_the_previous_call_date() {
    let store = Arc::new(MemoryStore::new());
    let entity_id = Uuid::new_v4();
    let task_id = Uuid::new_v4();
    let actor = Uuid::new_v4();
    store.seed(
        Table::Entities,
        [common::entity_with(entity_id, "Ana", json!({ "last_phone_call": date(3) }))],
    );
    store.seed(Table::Tasks, [done_task(task_id, Some(entity_id), ts(3, 12, 0), actor)]);
    let d3 = Uuid::new_v4();
    store.seed(
        Table::ActivityLog,
        [
            activity(Uuid::new_v4(), actor, ActivityType::PhoneCall, entity_id, ts(1, 12, 0), None),
            activity(Uuid::new_v4(), actor, ActivityType::PhoneCall, entity_id, ts(2, 12, 0), None),
            activity(
                d3,
                actor,
                ActivityType::PhoneCall,
                entity_id,
                ts(3, 12, 0),
                Some(json!({ "task_id": task_id })),
            ),
        ],
    );
    let (_clock, calendar) = manual_calendar(ts(3, 18, 0));

    let outcome = contact_log(&store, calendar)
        .reopen_contact_task(task_id)
        .await
        .expect("reopen");

    assert!(!outcome.partial);
    assert_eq!(outcome.activity_id, Some(d3));
    assert_eq!(outcome.last_phone_call, Some(date(2)));
    assert_eq!(outcome.task.status, TaskStatus::Open);
    assert_eq!(outcome.task.done_at, None);
    assert_eq!(outcome.task.done_by, None);

    let entity = repo::fetch_entity(store.as_ref(), entity_id).await.expect("entity");
    assert_eq!(entity.last_phone_call, Some(date(2)));
    let calls = phone_calls(&store, entity_id);
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|r| r.id != d3));
}

#[tokio::test]
async fn reopening_the_only_call_clears_the_date() {
    let store = Arc::new(MemoryStore::new());
    let entity_id = Uuid::new_v4();
    let task_id = Uuid::new_v4();
    let actor = Uuid::new_v4();
    store.seed(Table::Entities, [entity(entity_id, "Ana")]);
    store.seed(Table::Tasks, [open_task(task_id, Some(entity_id))]);
    let (_clock, calendar) = manual_calendar(ts(5, 9, 30));
    let log = contact_log(&store, calendar);

    log.complete_contact_task(task_id, actor).await.expect("complete");
    let outcome = log.reopen_contact_task(task_id).await.expect("reopen");

    assert_eq!(outcome.last_phone_call, None);
    let entity = repo::fetch_entity(store.as_ref(), entity_id).await.expect("entity");
    assert_eq!(entity.last_phone_call, None);
    assert!(phone_calls(&store, entity_id).is_empty());
}

#[tokio::test]
async fn missing_log_entry_is_reported_as_partial() {
    let store = Arc::new(MemoryStore::new());
    let entity_id = Uuid::new_v4();
    let task_id = Uuid::new_v4();
    store.seed(Table::Entities, [entity(entity_id, "Ana")]);
    store.seed(Table::Tasks, [open_task(task_id, Some(entity_id))]);
    store.fail_next(Table::ActivityLog, StoreOp::Insert, SyncError::network("timeout"));
    let (_clock, calendar) = manual_calendar(ts(5, 9, 30));

    let outcome = contact_log(&store, calendar)
        .complete_contact_task(task_id, Uuid::new_v4())
        .await
        .expect("task still completes");

    assert!(outcome.partial);
    assert_eq!(outcome.activity_id, None);
    assert_eq!(outcome.last_phone_call, Some(date(5)));
    assert_eq!(outcome.task.status, TaskStatus::Done);
    assert!(store.snapshot(Table::ActivityLog).is_empty());
}

#[tokio::test]
async fn failed_task_write_leaves_entity_untouched() {
    let store = Arc::new(MemoryStore::new());
    let entity_id = Uuid::new_v4();
    let task_id = Uuid::new_v4();
    store.seed(Table::Entities, [entity(entity_id, "Ana")]);
    store.seed(Table::Tasks, [open_task(task_id, Some(entity_id))]);
    store.fail_next(Table::Tasks, StoreOp::Update, SyncError::network("timeout"));
    let (_clock, calendar) = manual_calendar(ts(5, 9, 30));
    let entities_before = store.snapshot(Table::Entities);

    let err = contact_log(&store, calendar)
        .complete_contact_task(task_id, Uuid::new_v4())
        .await
        .expect_err("task write fails");

    assert!(err.is_transient());
    assert_eq!(store.snapshot(Table::Entities), entities_before);
    assert!(store.snapshot(Table::ActivityLog).is_empty());
    assert_eq!(store.calls(Table::Entities, StoreOp::Update), 0);
}

#[tokio::test]
async fn state_guards_reject_repeated_transitions() {
    let store = Arc::new(MemoryStore::new());
    let entity_id = Uuid::new_v4();
    let open = Uuid::new_v4();
    let done = Uuid::new_v4();
    store.seed(Table::Entities, [entity(entity_id, "Ana")]);
    store.seed(
        Table::Tasks,
        [
            open_task(open, Some(entity_id)),
            done_task(done, Some(entity_id), ts(4, 10, 0), Uuid::new_v4()),
        ],
    );
    let (_clock, calendar) = manual_calendar(ts(5, 9, 30));
    let log = contact_log(&store, calendar);

    assert!(matches!(
        log.reopen_contact_task(open).await,
        Err(SyncError::Validation(_))
    ));
    assert!(matches!(
        log.complete_contact_task(done, Uuid::new_v4()).await,
        Err(SyncError::Validation(_))
    ));
    assert!(matches!(
        log.complete_contact_task(Uuid::new_v4(), Uuid::new_v4()).await,
        Err(SyncError::NotFound { .. })
    ));
    assert_eq!(store.calls(Table::Tasks, StoreOp::Update), 0);
}

#[tokio::test]
async fn manual_call_never_moves_the_date_backwards() {
    let store = Arc::new(MemoryStore::new());
    let entity_id = Uuid::new_v4();
    let actor = Uuid::new_v4();
    store.seed(
        Table::Entities,
        [common::entity_with(entity_id, "Ana", json!({ "last_phone_call": date(2) }))],
    );
    let (clock, calendar) = manual_calendar(ts(4, 11, 0));
    let log = contact_log(&store, calendar);

    let logged = log
        .log_phone_call(entity_id, actor, Some("Checked in about Friday"))
        .await
        .expect("log call");
    assert_eq!(logged.last_phone_call, Some(date(4)));
    assert_eq!(logged.record.description, "Checked in about Friday");
    assert_eq!(logged.record.metadata, None);

    clock.set(ts(4, 15, 0));
    log.log_phone_call(entity_id, actor, None).await.expect("second call");
    assert_eq!(store.calls(Table::Entities, StoreOp::Update), 1);
    assert_eq!(phone_calls(&store, entity_id).len(), 2);
}

#[tokio::test]
async fn history_hides_same_day_mark_and_unmark_pairs() {
    let store = Arc::new(MemoryStore::new());
    let me = Uuid::new_v4();
    let someone_else = Uuid::new_v4();
    let entity_id = Uuid::new_v4();
    let kept = Uuid::new_v4();
    store.seed(
        Table::ActivityLog,
        [
            activity(Uuid::new_v4(), me, ActivityType::ContactMarked, entity_id, ts(3, 9, 0), None),
            activity(Uuid::new_v4(), me, ActivityType::ContactRemoved, entity_id, ts(3, 9, 2), None),
            activity(kept, me, ActivityType::ContactMarked, entity_id, ts(4, 9, 0), None),
            activity(
                Uuid::new_v4(),
                someone_else,
                ActivityType::ContactMarked,
                entity_id,
                ts(4, 10, 0),
                None,
            ),
        ],
    );
    let (_clock, calendar) = manual_calendar(ts(5, 9, 0));

    let history = contact_log(&store, calendar).history(me).await.expect("history");

    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, kept);
    assert_eq!(history[0].actor_id, me);
}
