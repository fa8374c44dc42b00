//! End-to-end scenarios S1-S6 from the spec's testable-properties section,
//! driven through `Database` + `Query` exactly as an external caller would.

use database::Database;
use lstore_lock::LockMode;

fn projection_all(n: usize) -> Vec<u8> {
    vec![1; n]
}

/// S1 — Insert + select.
#[test]
fn s1_insert_and_select() {
    let mut db = Database::new();
    db.create_table("t", 3, 0).unwrap();
    let mut q = db.query("t").unwrap();

    assert!(q.insert(&[100, 11, 12]));
    let rows = q.select(100, 0, &projection_all(3));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, 100);
    assert_eq!(rows[0].columns, vec![100, 11, 12]);
}

/// S2 — Update chain.
#[test]
fn s2_update_chain() {
    let mut db = Database::new();
    db.create_table("t", 3, 0).unwrap();
    let mut q = db.query("t").unwrap();
    q.insert(&[100, 11, 12]);

    assert!(q.update(100, &[None, Some(22), None]));
    let rows = q.select(100, 0, &projection_all(3));
    assert_eq!(rows[0].columns, vec![100, 22, 12]);

    let base = q.select_version(100, 0, &projection_all(3), -1);
    assert_eq!(base[0].columns, vec![100, 11, 12]);
}

/// S3 — Step-back through multiple updates.
#[test]
fn s3_step_back() {
    let mut db = Database::new();
    db.create_table("t", 3, 0).unwrap();
    let mut q = db.query("t").unwrap();
    q.insert(&[100, 11, 12]);
    q.update(100, &[None, Some(22), None]);
    q.update(100, &[None, Some(33), None]);
    q.update(100, &[None, Some(44), None]);

    assert_eq!(q.select_version(100, 0, &projection_all(3), 0)[0].columns, vec![100, 44, 12]);
    assert_eq!(q.select_version(100, 0, &projection_all(3), -1)[0].columns, vec![100, 11, 12]);
    assert_eq!(q.select_version(100, 0, &projection_all(3), -2)[0].columns, vec![100, 33, 12]);
}

/// S4 — Delete.
#[test]
fn s4_delete() {
    let mut db = Database::new();
    db.create_table("t", 3, 0).unwrap();
    let mut q = db.query("t").unwrap();
    q.insert(&[100, 11, 12]);

    assert!(q.delete(100));
    assert!(q.select(100, 0, &projection_all(3)).is_empty());
    assert!(!q.delete(100));
}

/// S5 — Range sum with dedup after a key-preserving update.
#[test]
fn s5_range_sum_with_dedup() {
    let mut db = Database::new();
    db.create_table("t", 2, 0).unwrap();
    let mut q = db.query("t").unwrap();
    for key in 1..=5 {
        q.insert(&[key, 10]);
    }
    assert_eq!(q.sum(1, 5, 1), Some(50));

    q.update(3, &[None, Some(99)]);
    assert_eq!(q.sum(1, 5, 1), Some(139));
}

/// S6 — Non-blocking 2PL refusal, then success after release.
#[test]
fn s6_lock_refusal_then_retry() {
    let mut db = Database::new();
    db.create_table("t", 2, 0).unwrap();
    db.query("t").unwrap().insert(&[7, 70]);

    assert!(db.lock_manager().acquire_lock(1, "t", 7, LockMode::Update));

    let mut tx2 = db.query_with_transaction("t", 2).unwrap();
    assert!(tx2.select(7, 0, &[1, 1]).is_empty());

    db.lock_manager().release_all(1);
    let mut tx2_retry = db.query_with_transaction("t", 2).unwrap();
    let rows = tx2_retry.select(7, 0, &[1, 1]);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns, vec![7, 70]);
}

/// Insert/select round trip, then rejecting a duplicate key.
#[test]
fn insert_duplicate_key_rejected() {
    let mut db = Database::new();
    db.create_table("t", 2, 0).unwrap();
    let mut q = db.query("t").unwrap();
    assert!(q.insert(&[1, 2]));
    assert!(!q.insert(&[1, 3]));
}

/// Merge triggers transparently once the per-table update threshold is hit,
/// and observable select results are unaffected by the consolidation.
#[test]
fn merge_triggers_without_changing_observable_results() {
    let config = common::Config::builder().page_capacity(8).range_base_pages(2).merge_threshold(3).build();
    let mut db = Database::with_config(config);
    db.create_table("t", 2, 0).unwrap();
    let mut q = db.query("t").unwrap();
    q.insert(&[1, 100]);

    // Three updates hit the threshold and trigger a merge mid-stream.
    q.update(1, &[None, Some(101)]);
    q.update(1, &[None, Some(102)]);
    q.update(1, &[None, Some(103)]);

    let rows = q.select(1, 0, &projection_all(2));
    assert_eq!(rows[0].columns, vec![1, 103]);
}

/// `increment` reads the current value and writes back `+1` on one column,
/// leaving the others untouched.
#[test]
fn increment_bumps_single_column() {
    let mut db = Database::new();
    db.create_table("t", 2, 0).unwrap();
    let mut q = db.query("t").unwrap();
    q.insert(&[1, 10]);

    assert!(q.increment(1, 1));
    assert_eq!(q.select(1, 0, &projection_all(2))[0].columns, vec![1, 11]);
}

/// A key-changing update relocates the key-column index entry and is still
/// reachable by the new key afterward.
#[test]
fn key_changing_update_is_findable_by_new_key() {
    let mut db = Database::new();
    db.create_table("t", 2, 0).unwrap();
    let mut q = db.query("t").unwrap();
    q.insert(&[1, 10]);

    assert!(q.update(1, &[Some(2), None]));
    assert!(q.select(1, 0, &projection_all(2)).is_empty());
    let rows = q.select(2, 0, &projection_all(2));
    assert_eq!(rows[0].columns, vec![2, 10]);
}
