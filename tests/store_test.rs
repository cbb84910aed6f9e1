use webhook_relay::{
    EventId, EventPatch, EventStatus, EventStore, InMemoryEventStore, NewEvent,
};

fn new_event(event_id: &str) -> NewEvent {
    NewEvent {
        event_id: EventId(event_id.to_string()),
        event_type: "order.created".to_string(),
        user_id: "u1".to_string(),
        order_id: "o1".to_string(),
        amount: 100,
        status: EventStatus::Queued,
        retry_count: 0,
        payload: serde_json::json!({}),
    }
}

#[tokio::test]
async fn test_list_is_newest_first_with_status_filter() {
    let store = InMemoryEventStore::new();
    let first = store.create(new_event("evt_a")).await.unwrap();
    let second = store.create(new_event("evt_b")).await.unwrap();
    let third = store.create(new_event("evt_c")).await.unwrap();

    store
        .update(
            &second.id,
            EventPatch {
                status: Some(EventStatus::Failed),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let all = store.list(10, 0, None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].id, third.id);
    assert_eq!(all[2].id, first.id);

    let failed = store.list(10, 0, Some(EventStatus::Failed)).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, second.id);

    let page = store.list(1, 1, None).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, second.id);
}

#[tokio::test]
async fn test_search_matches_event_id_substring_case_insensitively() {
    let store = InMemoryEventStore::new();
    store.create(new_event("evt_ORDER_42")).await.unwrap();
    store.create(new_event("evt_other")).await.unwrap();

    let hits = store.search("order_42").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].event_id.0, "evt_ORDER_42");

    assert!(store.search("missing").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_patches_fields_and_refreshes_updated_at() {
    let store = InMemoryEventStore::new();
    let record = store.create(new_event("evt_a")).await.unwrap();

    let updated = store
        .update(
            &record.id,
            EventPatch {
                status: Some(EventStatus::Sent),
                processed_at_secs: Some(1_700_000_000),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, EventStatus::Sent);
    assert_eq!(updated.processed_at_secs, Some(1_700_000_000));
    // Unpatched fields are untouched.
    assert_eq!(updated.retry_count, 0);
    assert_eq!(updated.event_id, record.event_id);

    let missing = store
        .update(
            &webhook_relay::RecordId("nope".to_string()),
            EventPatch::default(),
        )
        .await
        .unwrap();
    assert!(missing.is_none());
}
