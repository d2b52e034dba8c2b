/// Reclamation by the background collector and lazy defragmentation.
mod helpers;
use helpers::{collector_cycle, connect, ref_count, start_server, wait_until};
use remote_heap::HeapError;

#[test]
fn test_reclaimed_bytes_read_back_zero() {
    let server = start_server(128);
    let conn = connect(&server);

    let id = conn.create(8, "u64").expect("create");
    conn.set(id, &[0xAB; 8]).expect("set");
    let offset = server
        .manager()
        .block(id)
        .expect("lock")
        .expect("entry")
        .offset;

    conn.decrease_ref_count(id).expect("decrease");
    assert!(wait_until(collector_cycle() * 10, || ref_count(&server, id).is_none()));

    let bytes = server
        .manager()
        .with_table(|t| t.memory()[offset..offset + 8].to_vec())
        .expect("lock");
    assert_eq!(bytes, vec![0; 8]);
    assert!(server.manager().metrics().reclaimed_blocks() >= 1);
}

#[test]
fn test_stale_entry_kept_until_defragmentation() {
    let server = start_server(128);
    let conn = connect(&server);

    let id = conn.create(16, "blob").expect("create");
    conn.decrease_ref_count(id).expect("decrease");
    assert!(wait_until(collector_cycle() * 10, || ref_count(&server, id).is_none()));

    let entry = server.manager().block(id).expect("lock").expect("stale entry");
    assert!(!entry.allocated);

    server.manager().defragment().expect("defragment");
    assert!(server.manager().block(id).expect("lock").is_none());
}

#[test]
fn test_allocation_failure_then_success_after_reclaim() {
    let server = start_server(64);
    let conn = connect(&server);

    let ids: Vec<_> = (0..4)
        .map(|i| {
            let id = conn.create(16, "[u8; 16]").expect("create");
            conn.set(id, &[i as u8 + 1; 16]).expect("set");
            id
        })
        .collect();
    assert_eq!(
        conn.create(16, "[u8; 16]"),
        Err(HeapError::Allocation { size: 16 })
    );

    conn.decrease_ref_count(ids[1]).expect("decrease");
    assert!(wait_until(collector_cycle() * 10, || ref_count(&server, ids[1]).is_none()));

    let fresh = conn.create(16, "[u8; 16]").expect("create after reclaim");
    assert!(fresh > ids[3]);

    for (i, id) in ids.iter().enumerate().filter(|(i, _)| *i != 1) {
        assert_eq!(conn.get(*id, 16).expect("survivor"), vec![i as u8 + 1; 16]);
    }
    assert_eq!(conn.get(fresh, 16).expect("fresh"), vec![0; 16]);
    server
        .manager()
        .with_table(|t| t.verify_layout())
        .expect("lock")
        .expect("layout");
}

#[test]
fn test_fragmented_arena_compacts_for_large_request() {
    let server = start_server(64);
    let conn = connect(&server);

    let ids: Vec<_> = (0..4)
        .map(|i| {
            let id = conn.create(16, "[u8; 16]").expect("create");
            conn.set(id, &[0x10 * (i as u8 + 1); 16]).expect("set");
            id
        })
        .collect();

    // Free two non-adjacent blocks: 32 bytes free, but never contiguous.
    conn.decrease_ref_count(ids[0]).expect("decrease");
    conn.decrease_ref_count(ids[2]).expect("decrease");
    assert!(wait_until(collector_cycle() * 10, || {
        ref_count(&server, ids[0]).is_none() && ref_count(&server, ids[2]).is_none()
    }));

    let defrags_before = server.manager().metrics().defragmentations();
    let big = conn.create(32, "[u8; 32]").expect("create after compaction");
    assert!(server.manager().metrics().defragmentations() > defrags_before);

    assert_eq!(conn.get(ids[1], 16).expect("survivor"), vec![0x20; 16]);
    assert_eq!(conn.get(ids[3], 16).expect("survivor"), vec![0x40; 16]);

    let layout = server
        .manager()
        .with_table(|t| {
            let mut spans: Vec<_> = t.blocks().iter().map(|b| (b.offset, b.size)).collect();
            spans.sort();
            spans
        })
        .expect("lock");
    assert_eq!(layout, vec![(0, 16), (16, 16), (32, 32)]);
    assert_eq!(
        server.manager().block(big).expect("lock").expect("entry").offset,
        32
    );
}

#[test]
fn test_collector_stops_with_server() {
    let server = start_server(64);
    let manager = server.manager().clone();
    assert!(manager.is_collector_running());

    server.shutdown();
    assert!(!manager.is_collector_running());
}
