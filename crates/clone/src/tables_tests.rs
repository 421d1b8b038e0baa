// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::table;
use pgferry_store::MemRunStore;

fn partitioned(oid: u32, rel: &str, parts: u32) -> SourceTable {
    let mut t = table(oid, "bench", rel, 128 * 1024 * 1024);
    t.parts = pgferry_core::plan_column_parts("id", 1, 1_000_000, parts);
    t
}

#[test]
fn plan_keeps_store_order_and_part_order() {
    let tables = vec![partitioned(20, "big", 3), table(10, "public", "small", 100)];
    let plan = build_copy_plan(&tables);
    let keys: Vec<String> = plan.iter().map(|j| j.unit().key).collect();
    assert_eq!(
        keys,
        vec!["table.20.1", "table.20.2", "table.20.3", "table.10"]
    );
}

#[test]
fn completion_fires_exactly_once_per_table() {
    let run_store = MemRunStore::new();
    let tables = vec![partitioned(20, "big", 2)];
    let tracker = CompletionTracker::new(&tables, &run_store);

    assert!(!tracker.part_done(Oid(20), 1));
    assert!(tracker.part_done(Oid(20), 2));
    // Duplicate reports never re-fire.
    assert!(!tracker.part_done(Oid(20), 2));
}

#[test]
fn resume_counts_done_parts() {
    let run_store = MemRunStore::new();
    let tables = vec![partitioned(20, "big", 2), table(10, "public", "small", 1)];

    // Part 1 of big and all of small finished before the crash.
    let done_part = WorkUnit::table_part(Oid(20), 1, 2, "bench.big");
    run_store.claim(&done_part).unwrap();
    run_store.mark_done(&done_part).unwrap();
    let done_small = WorkUnit::table_part(Oid(10), 1, 1, "public.small");
    run_store.claim(&done_small).unwrap();
    run_store.mark_done(&done_small).unwrap();

    let tracker = CompletionTracker::new(&tables, &run_store);
    assert_eq!(tracker.initially_complete(), vec![Oid(10)]);
    // A worker finding small's slice already done must not re-emit it.
    assert!(!tracker.part_done(Oid(10), 1));
    // Finishing big's remaining part completes it.
    assert!(tracker.part_done(Oid(20), 2));
}

#[tokio::test]
async fn followup_routes_to_index_queue_or_vacuum() {
    let index_queue: WorkQueue<IndexMsg> = WorkQueue::bounded(8);
    let vacuum_queue: WorkQueue<VacuumMsg> = WorkQueue::bounded(8);
    let with_indexes: Arc<dyn Fn(Oid) -> Vec<Oid> + Send + Sync> =
        Arc::new(|oid| if oid == Oid(20) { vec![Oid(101), Oid(102)] } else { vec![] });

    // A table with indexes feeds the index pool.
    enqueue_table_followup(
        &index_queue,
        &vacuum_queue,
        with_indexes.as_ref(),
        &partitioned(20, "big", 2),
        false,
    )
    .await;
    assert_eq!(
        index_queue.drain().await,
        vec![IndexMsg::Build(Oid(101)), IndexMsg::Build(Oid(102))]
    );
    assert!(vacuum_queue.drain().await.is_empty());

    // A table without indexes goes straight to vacuum.
    enqueue_table_followup(
        &index_queue,
        &vacuum_queue,
        with_indexes.as_ref(),
        &table(10, "public", "small", 1),
        false,
    )
    .await;
    assert_eq!(vacuum_queue.drain().await, vec![VacuumMsg::Analyze(Oid(10))]);

    // Unless vacuum is disabled.
    enqueue_table_followup(
        &index_queue,
        &vacuum_queue,
        with_indexes.as_ref(),
        &table(10, "public", "small", 1),
        true,
    )
    .await;
    assert!(vacuum_queue.drain().await.is_empty());
}
