mod common;

use std::sync::Arc;
use std::time::Duration;

use caseline_core::error::SyncError;
use caseline_core::memory_store::{MemoryStore, StoreOp};
use caseline_core::query::{EntitySearch, QueryController, SearchOutcome};
use caseline_core::store::Table;
use caseline_shared::{EntityDto, EntitySearchArgs};
use uuid::Uuid;

use common::{entity, entity_with};

const DEBOUNCE: Duration = Duration::from_millis(300);

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed(
        Table::Entities,
        [
            entity(Uuid::new_v4(), "Maria Lopez"),
            entity(Uuid::new_v4(), "Mario Ruiz"),
            entity(Uuid::new_v4(), "Ana Torres"),
            entity_with(Uuid::new_v4(), "Marta Archived", serde_json::json!({"is_archived": true})),
        ],
    );
    store
}

fn names(items: &[EntityDto]) -> Vec<&str> {
    items.iter().map(|e| e.display_name.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn slow_early_response_never_overwrites_later_term() {
    let store = seeded_store();
    let controller = QueryController::new(EntitySearch::new(store.clone()), DEBOUNCE);

    store.push_latency(Table::Entities, Duration::from_secs(2));
    store.push_latency(Table::Entities, Duration::from_millis(10));

    let first = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.search("mar", EntitySearchArgs::default()).await })
    };
    // Past the settle delay, so the first fetch is on the wire.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.calls(Table::Entities, StoreOp::Select), 1);

    let second = controller.search("ana", EntitySearchArgs::default()).await;
    let first = first.await.expect("join first search");

    assert_eq!(first, SearchOutcome::Superseded);
    match second {
        SearchOutcome::Applied(items) => assert_eq!(names(&items), vec!["Ana Torres"]),
        other => panic!("expected applied results, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_secs(5)).await;
    let view = controller.view();
    assert_eq!(view.term, "ana");
    assert_eq!(names(view.results.as_deref().expect("results")), vec!["Ana Torres"]);
}

#[tokio::test(start_paused = true)]
async fn keystrokes_inside_settle_delay_issue_one_fetch() {
    let store = seeded_store();
    let controller = QueryController::new(EntitySearch::new(store.clone()), DEBOUNCE);

    let mut handles = Vec::new();
    for term in ["m", "ma", "mar"] {
        let controller = controller.clone();
        handles.push(tokio::spawn(async move {
            controller.search(term, EntitySearchArgs::default()).await
        }));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.expect("join search"));
    }

    assert_eq!(store.calls(Table::Entities, StoreOp::Select), 1);
    assert_eq!(outcomes[0], SearchOutcome::Superseded);
    assert_eq!(outcomes[1], SearchOutcome::Superseded);
    match &outcomes[2] {
        SearchOutcome::Applied(items) => {
            assert_eq!(names(items), vec!["Maria Lopez", "Mario Ruiz"]);
        }
        other => panic!("expected applied results, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn empty_view_shows_loading_but_stale_results_stay_visible() {
    let store = seeded_store();
    let controller = QueryController::new(EntitySearch::new(store.clone()), DEBOUNCE);

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.search("ana", EntitySearchArgs::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    let view = controller.view();
    assert!(view.loading);
    assert!(view.results.is_none());
    pending.await.expect("join search");

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.search("mar", EntitySearchArgs::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    let view = controller.view();
    assert!(!view.loading);
    assert_eq!(view.term, "ana");
    assert_eq!(names(view.results.as_deref().expect("stale results")), vec!["Ana Torres"]);

    pending.await.expect("join search");
    assert_eq!(controller.view().term, "mar");
}

#[tokio::test(start_paused = true)]
async fn failed_read_only_shows_error_when_nothing_else_is_on_screen() {
    let store = seeded_store();
    let controller = QueryController::new(EntitySearch::new(store.clone()), DEBOUNCE);

    store.fail_next(Table::Entities, StoreOp::Select, SyncError::network("offline"));
    let outcome = controller.search("ana", EntitySearchArgs::default()).await;
    assert!(matches!(outcome, SearchOutcome::Failed(SyncError::Network(_))));
    let view = controller.view();
    assert!(!view.loading);
    assert!(matches!(view.error, Some(SyncError::Network(_))));

    let outcome = controller.search("ana", EntitySearchArgs::default()).await;
    assert!(matches!(outcome, SearchOutcome::Applied(_)));
    assert!(controller.view().error.is_none());

    store.fail_next(Table::Entities, StoreOp::Select, SyncError::network("offline"));
    let outcome = controller.search("mar", EntitySearchArgs::default()).await;
    assert!(matches!(outcome, SearchOutcome::Failed(_)));
    let view = controller.view();
    assert!(view.error.is_none());
    assert_eq!(view.term, "ana");
    assert_eq!(names(view.results.as_deref().expect("results")), vec!["Ana Torres"]);
}

#[tokio::test(start_paused = true)]
async fn archived_entities_need_opt_in() {
    let store = seeded_store();
    let controller = QueryController::new(EntitySearch::new(store.clone()), DEBOUNCE);

    let outcome = controller.search("  MART ", EntitySearchArgs::default()).await;
    assert_eq!(outcome, SearchOutcome::Applied(vec![]));

    let outcome = controller
        .search(
            "mart",
            EntitySearchArgs {
                include_archived: true,
                ..EntitySearchArgs::default()
            },
        )
        .await;
    match outcome {
        SearchOutcome::Applied(items) => assert_eq!(names(&items), vec!["Marta Archived"]),
        other => panic!("expected applied results, got {other:?}"),
    }
}
