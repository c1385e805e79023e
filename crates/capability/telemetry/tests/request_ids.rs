use gw_telemetry::{metrics, new_request_ids, record_collection, record_flush};

#[test]
fn request_ids_non_empty() {
    let ids = new_request_ids();
    assert!(!ids.request_id.is_empty());
    assert!(!ids.trace_id.is_empty());
    assert_ne!(ids.request_id, ids.trace_id);
}

#[test]
fn counters_accumulate() {
    let before = metrics().snapshot();
    record_collection(true);
    record_collection(false);
    record_flush(true, 7);
    let after = metrics().snapshot();
    assert!(after.collections_ok >= before.collections_ok + 1);
    assert!(after.collections_failed >= before.collections_failed + 1);
    assert!(after.rows_flushed >= before.rows_flushed + 7);
}
