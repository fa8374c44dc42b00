use super::*;
use common::Config;
use lstore_table::Table;

fn tiny_table() -> Table {
    let config = Config::builder().page_capacity(8).range_base_pages(2).merge_threshold(1_000).build();
    let mut table = Table::new("t", 3, 0, config);
    table.index.create_index(1);
    table.index.create_index(2);
    table
}

fn all_ones(n: usize) -> Vec<u8> {
    vec![1; n]
}

#[test]
fn insert_then_select_round_trips() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);

    assert!(q.insert(&[100, 11, 12]));
    let rows = q.select(100, 0, &all_ones(3));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, 100);
    assert_eq!(rows[0].columns, vec![100, 11, 12]);
}

#[test]
fn insert_rejects_duplicate_key() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);

    assert!(q.insert(&[1, 2, 3]));
    assert!(!q.insert(&[1, 9, 9]));
}

#[test]
fn insert_rejects_wrong_column_count() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    assert!(!q.insert(&[1, 2]));
}

#[test]
fn select_on_missing_key_is_empty() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    assert!(q.select(42, 0, &all_ones(3)).is_empty());
}

#[test]
fn select_respects_projection_mask() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    q.insert(&[1, 10, 20]);
    let rows = q.select(1, 0, &[1, 0, 1]);
    assert_eq!(rows[0].columns, vec![1, 20]);
}

#[test]
fn update_builds_complete_tail_image() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    q.insert(&[100, 11, 12]);

    assert!(q.update(100, &[None, Some(22), None]));
    assert_eq!(q.select(100, 0, &all_ones(3))[0].columns, vec![100, 22, 12]);
    assert_eq!(q.select_version(100, 0, &all_ones(3), -1)[0].columns, vec![100, 11, 12]);
}

#[test]
fn update_missing_key_fails() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    assert!(!q.update(1, &[None, Some(1), None]));
}

#[test]
fn select_version_steps_back_through_chain() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    q.insert(&[100, 11, 12]);
    q.update(100, &[None, Some(22), None]);
    q.update(100, &[None, Some(33), None]);
    q.update(100, &[None, Some(44), None]);

    assert_eq!(q.select_version(100, 0, &all_ones(3), 0)[0].columns, vec![100, 44, 12]);
    assert_eq!(q.select_version(100, 0, &all_ones(3), -1)[0].columns, vec![100, 11, 12]);
    assert_eq!(q.select_version(100, 0, &all_ones(3), -2)[0].columns, vec![100, 33, 12]);
    assert_eq!(q.select_version(100, 0, &all_ones(3), -3)[0].columns, vec![100, 22, 12]);
    // Clamped to the base once steps exceed the chain length.
    assert_eq!(q.select_version(100, 0, &all_ones(3), -4)[0].columns, vec![100, 11, 12]);
}

#[test]
fn select_version_positive_is_unsupported() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    q.insert(&[1, 2, 3]);
    assert!(q.select_version(1, 0, &all_ones(3), 1).is_empty());
}

#[test]
fn delete_tombstones_and_clears_index() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    q.insert(&[100, 11, 12]);

    assert!(q.delete(100));
    assert!(q.select(100, 0, &all_ones(3)).is_empty());
    assert!(!q.delete(100));
}

#[test]
fn key_changing_update_relocates_index_entry() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    q.insert(&[1, 10, 20]);

    assert!(q.update(1, &[Some(2), None, None]));
    assert!(q.select(1, 0, &all_ones(3)).is_empty());
    let rows = q.select(2, 0, &all_ones(3));
    assert_eq!(rows[0].columns, vec![2, 10, 20]);
}

#[test]
fn sum_over_range_matches_plain_inserts() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    for key in 1..=5 {
        q.insert(&[key, 10, 0]);
    }
    assert_eq!(q.sum(1, 5, 1), Some(50));
}

#[test]
fn sum_dedups_after_update_and_reflects_latest_value() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    for key in 1..=5 {
        q.insert(&[key, 10, 0]);
    }
    q.update(3, &[None, Some(99), None]);
    assert_eq!(q.sum(1, 5, 1), Some(139));
}

#[test]
fn sum_on_empty_range_is_false() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    assert_eq!(q.sum(1, 5, 1), None);
}

#[test]
fn sum_version_returns_zero_on_empty_range() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    assert_eq!(q.sum_version(1, 5, 1, -1), 0);
}

#[test]
fn sum_version_uses_base_value_at_minus_one() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    q.insert(&[1, 10, 0]);
    q.update(1, &[None, Some(99), None]);
    assert_eq!(q.sum_version(1, 1, 1, -1), 10);
    assert_eq!(q.sum_version(1, 1, 1, 0), 99);
}

#[test]
fn increment_bumps_one_column_and_preserves_others() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    q.insert(&[1, 10, 20]);

    assert!(q.increment(1, 1));
    assert_eq!(q.select(1, 0, &all_ones(3))[0].columns, vec![1, 11, 20]);
}

#[test]
fn increment_on_missing_key_fails() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let mut q = Query::new(&mut table, &pool);
    assert!(!q.increment(1, 1));
}

#[test]
fn transactional_select_is_refused_while_key_is_locked_then_succeeds_after_release() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    {
        let mut q = Query::new(&mut table, &pool);
        q.insert(&[7, 1, 1]);
    }

    let lock_manager = LockManager::new();
    assert!(lock_manager.acquire_lock(1, "t", 7, LockMode::Update));

    let mut tx2 = Query::with_transaction(&mut table, &pool, &lock_manager, 2);
    assert!(tx2.select(7, 0, &all_ones(3)).is_empty());

    lock_manager.release_all(1);
    let mut tx2_retry = Query::with_transaction(&mut table, &pool, &lock_manager, 2);
    assert_eq!(tx2_retry.select(7, 0, &all_ones(3))[0].columns, vec![7, 1, 1]);
}

#[test]
fn transactional_insert_is_refused_when_key_locked_by_another_tx() {
    let mut table = tiny_table();
    let pool = Mutex::new(buffer::InMemoryBufferPool::new());
    let lock_manager = LockManager::new();
    assert!(lock_manager.acquire_lock(1, "t", 5, LockMode::Insert));

    let mut tx2 = Query::with_transaction(&mut table, &pool, &lock_manager, 2);
    assert!(!tx2.insert(&[5, 0, 0]));
}
