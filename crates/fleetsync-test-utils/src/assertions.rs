//! Assertion helpers for catalog lifecycle states.

use fleetsync_catalog::{Database, InMemoryDatabase, RecordState, Synced};

/// Asserts that a record exists in `state`.
pub async fn assert_record_state<E: Synced>(
    db: &InMemoryDatabase,
    network_id: &str,
    id: &str,
    state: RecordState,
) -> E {
    let record: Option<E> = db.read(network_id, id).await.expect("catalog read");
    let record = record.unwrap_or_else(|| {
        panic!(
            "expected {} record {network_id}/{id} in state {state:?}, found nothing",
            E::TABLE.as_str()
        )
    });
    assert_eq!(
        record.sync_info().state(),
        state,
        "{} record {network_id}/{id}",
        E::TABLE.as_str()
    );
    record
}

/// Asserts that a record does not exist.
pub async fn assert_absent<E: Synced>(db: &InMemoryDatabase, network_id: &str, id: &str) {
    let record: Option<E> = db.read(network_id, id).await.expect("catalog read");
    assert!(
        record.is_none(),
        "expected {} record {network_id}/{id} to be absent",
        E::TABLE.as_str()
    );
}
