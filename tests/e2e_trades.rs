//! E2E tests for the trade lifecycle through the collection service

mod common;

use common::{TestCollection, USERNAME, caught, trade};
use pokesync::data::{CollectionStore, TradeStatus, UpdateKind};
use pokesync::service::Snapshot;

#[tokio::test]
async fn test_accept_deletes_competing_proposals() {
    let mut collection = TestCollection::new();
    let adopted = collection.service.ingest_trades(vec![
        trade("t1", USERNAME, "misty", "a", "x"),
        trade("t2", USERNAME, "brock", "a", "y"),
        trade("t3", USERNAME, "brock", "b", "y"),
    ]);
    assert_eq!(adopted.len(), 3);

    let changed = collection.service.accept_trade("t1").unwrap();
    let ids: Vec<&str> = changed.iter().map(|row| row.trade_id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "t2"]);

    let trades = collection.service.trades();
    assert_eq!(trades["t1"].trade_status, TradeStatus::Pending);
    assert_eq!(trades["t2"].trade_status, TradeStatus::Deleted);
    assert!(trades["t2"].trade_deleted_date.is_some());
    assert_eq!(trades["t3"].trade_status, TradeStatus::Proposed);

    let store = collection.flush().await;
    let stored = store.load_trades().await.unwrap();
    assert_eq!(stored["t2"].trade_status, TradeStatus::Deleted);

    let pending = store.drain_pending_updates().await.unwrap();
    assert!(pending.iter().all(|update| update.kind == UpdateKind::Trade));
    assert!(pending.iter().any(|update| update.key == "t2"));
}

#[tokio::test]
async fn test_ingesting_pending_trade_invalidates_local_proposals() {
    let mut collection = TestCollection::new();
    collection
        .service
        .ingest_trades(vec![trade("local", USERNAME, "brock", "a", "y")]);

    let mut pushed = trade("remote", USERNAME, "misty", "a", "x");
    pushed.trade_status = TradeStatus::Pending;
    let changed = collection.service.ingest_trades(vec![pushed]);

    assert_eq!(changed.len(), 2);
    assert_eq!(
        collection.service.trades()["local"].trade_status,
        TradeStatus::Deleted
    );
}

#[tokio::test]
async fn test_two_step_completion_swaps_ownership() {
    let mut collection = TestCollection::new();
    let mut theirs = caught("z", "0006-default", 5);
    theirs.username = Some("misty".to_string());
    collection.service.apply_snapshot(Snapshot {
        instances: [("a".to_string(), caught("a", "0025-default", 5))]
            .into_iter()
            .collect(),
        related_instances: [("z".to_string(), theirs)].into_iter().collect(),
        ..Default::default()
    });

    let mut pending = trade("t1", USERNAME, "misty", "a", "z");
    pending.trade_status = TradeStatus::Pending;
    collection.service.ingest_trades(vec![pending]);

    // Only our side confirmed so far
    let changed = collection.service.complete_trade("t1").unwrap();
    assert_eq!(changed[0].trade_status, TradeStatus::Pending);
    assert!(changed[0].user_proposed_completion_confirmed);
    assert_eq!(collection.service.instances()["a"].username, None);

    // The partner's confirmation arrives from the server
    let mut confirmed = collection.service.trades()["t1"].clone();
    confirmed.user_accepting_completion_confirmed = true;
    confirmed.user_proposed_completion_confirmed = false;
    collection.service.ingest_trades(vec![confirmed]);

    let changed = collection.service.complete_trade("t1").unwrap();
    assert_eq!(changed[0].trade_status, TradeStatus::Completed);
    assert!(changed[0].trade_completed_date.is_some());
    assert!(!collection.service.instances().contains_key("a"));
    assert_eq!(
        collection.service.instances()["z"].username.as_deref(),
        Some(USERNAME)
    );

    let store = collection.flush().await;
    assert_eq!(
        store.load_trades().await.unwrap()["t1"].trade_status,
        TradeStatus::Completed
    );
    let stored = store.load_instances().await.unwrap();
    assert_eq!(stored["a"].username.as_deref(), Some("misty"));
    assert_eq!(stored["z"].username.as_deref(), Some(USERNAME));
}

#[tokio::test]
async fn test_completion_without_partner_instance_moves_nothing() {
    let mut collection = TestCollection::new();
    collection.service.apply_snapshot(Snapshot {
        instances: [("a".to_string(), caught("a", "0025-default", 5))]
            .into_iter()
            .collect(),
        ..Default::default()
    });
    let mut pending = trade("t1", USERNAME, "misty", "a", "gone");
    pending.trade_status = TradeStatus::Pending;
    pending.user_accepting_completion_confirmed = true;
    collection.service.ingest_trades(vec![pending]);

    let changed = collection.service.complete_trade("t1").unwrap();

    assert_eq!(changed[0].trade_status, TradeStatus::Completed);
    assert_eq!(collection.service.instances()["a"].username, None);
}

#[tokio::test]
async fn test_repropose_by_accepter_swaps_sides() {
    let mut collection = TestCollection::new();
    let mut denied = trade("t1", "misty", USERNAME, "x", "a");
    denied.trade_status = TradeStatus::Denied;
    collection.service.ingest_trades(vec![denied]);

    let changed = collection.service.repropose_trade("t1").unwrap();
    let row = &changed[0];
    assert_eq!(row.trade_status, TradeStatus::Proposed);
    assert_eq!(row.username_proposed, USERNAME);
    assert_eq!(row.username_accepting, "misty");
    assert_eq!(row.pokemon_instance_id_user_proposed, "a");
    assert_eq!(row.pokemon_instance_id_user_accepting, "x");
    assert!(row.trade_deleted_date.is_none());
}

#[tokio::test]
async fn test_foreign_and_missing_trades_are_noops() {
    let mut collection = TestCollection::new();
    collection
        .service
        .ingest_trades(vec![trade("t1", "gary", "misty", "x", "y")]);

    assert!(
        collection
            .service
            .toggle_trade_satisfaction("t1")
            .unwrap()
            .is_empty()
    );
    assert!(collection.service.complete_trade("t1").unwrap().is_empty());
    assert!(collection.service.accept_trade("nope").unwrap().is_empty());
    assert_eq!(collection.service.trades()["t1"].user_1_trade_satisfaction, None);
    assert!(collection.service.last_local_write().is_none());
}

#[tokio::test]
async fn test_satisfaction_toggles_for_own_side() {
    let mut collection = TestCollection::new();
    let mut completed = trade("t1", "misty", USERNAME, "x", "a");
    completed.trade_status = TradeStatus::Completed;
    collection.service.ingest_trades(vec![completed]);

    collection.service.toggle_trade_satisfaction("t1").unwrap();
    assert_eq!(
        collection.service.trades()["t1"].user_2_trade_satisfaction,
        Some(true)
    );

    collection.service.toggle_trade_satisfaction("t1").unwrap();
    let row = &collection.service.trades()["t1"];
    assert_eq!(row.user_2_trade_satisfaction, Some(false));
    assert_eq!(row.user_1_trade_satisfaction, None);
}
