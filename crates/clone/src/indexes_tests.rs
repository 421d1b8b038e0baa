// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{excl_index, pkey_index, plain_index, table, FakeExecutor};
use pgferry_store::catalog_store::SchemaSnapshot;
use pgferry_store::MemRunStore;

fn pool_with(
    tables: Vec<pgferry_core::SourceTable>,
    indexes: Vec<SourceIndex>,
    if_not_exists: bool,
) -> Arc<IndexPool> {
    let catalog = Arc::new(CatalogStore::new());
    catalog
        .populate(SchemaSnapshot {
            tables,
            indexes,
            ..SchemaSnapshot::default()
        })
        .unwrap();
    IndexPool::new(
        WorkQueue::bounded(16),
        WorkQueue::bounded(16),
        Arc::new(MemRunStore::new()),
        catalog,
        if_not_exists,
        false,
        false,
    )
}

async fn run_worker(pool: &Arc<IndexPool>, executor: FakeExecutor) {
    let supervisor = crate::supervisor::Supervisor::new();
    let stop = supervisor.stop_flag();
    pool.queue.send(IndexMsg::Stop).await;
    index_worker(Arc::clone(pool), 0, executor, stop)
        .await
        .unwrap();
}

#[test]
fn if_not_exists_variant_is_injected() {
    let index = plain_index(100, 10, "t_v_idx");
    assert_eq!(
        index_create_sql(&index, false),
        "CREATE INDEX t_v_idx ON public.t USING btree (v)"
    );
    assert_eq!(
        index_create_sql(&index, true),
        "CREATE INDEX IF NOT EXISTS t_v_idx ON public.t USING btree (v)"
    );

    let unique = pkey_index(101, 10, "t_pkey");
    assert_eq!(
        index_create_sql(&unique, true),
        "CREATE UNIQUE INDEX IF NOT EXISTS t_pkey ON public.t USING btree (id)"
    );
}

#[test]
fn constraint_sql_uses_the_built_index_for_pkey_and_unique() {
    let index = pkey_index(101, 10, "t_pkey");
    let constraint = index.constraint.clone().unwrap();
    assert_eq!(
        constraint_create_sql("public.t", &index, &constraint),
        "ALTER TABLE public.t ADD CONSTRAINT t_pkey PRIMARY KEY USING INDEX t_pkey"
    );

    let excl = excl_index(102, 10, "t_excl");
    let constraint = excl.constraint.clone().unwrap();
    assert_eq!(
        constraint_create_sql("public.t", &excl, &constraint),
        "ALTER TABLE public.t ADD CONSTRAINT t_excl EXCLUDE USING gist (room WITH =)"
    );
}

#[tokio::test]
async fn builds_index_then_promotes_constraint() {
    let pool = pool_with(
        vec![table(10, "public", "t", 100)],
        vec![pkey_index(101, 10, "t_pkey")],
        false,
    );
    let executor = FakeExecutor::default();

    pool.queue.send(IndexMsg::Build(Oid(101))).await;
    run_worker(&pool, executor.clone()).await;

    let statements = executor.statements();
    let create_pos = statements
        .iter()
        .position(|s| s.starts_with("CREATE UNIQUE INDEX t_pkey"))
        .unwrap();
    let alter_pos = statements
        .iter()
        .position(|s| s.starts_with("ALTER TABLE public.t ADD CONSTRAINT t_pkey"))
        .unwrap();
    // The constraint runs strictly after its index.
    assert!(create_pos < alter_pos);

    assert!(pool
        .run_store
        .is_done(&WorkUnit::index(Oid(101), "public.t_pkey")));
    assert!(pool
        .run_store
        .is_done(&WorkUnit::constraint(Oid(1101), "t_pkey")));
}

#[tokio::test]
async fn constraints_wait_for_every_index_of_the_table() {
    let pool = pool_with(
        vec![table(10, "public", "t", 100)],
        vec![pkey_index(101, 10, "t_pkey"), plain_index(102, 10, "t_v_idx")],
        false,
    );
    let executor = FakeExecutor::default();

    // Only one of the two indexes arrives before stop.
    pool.queue.send(IndexMsg::Build(Oid(101))).await;
    run_worker(&pool, executor.clone()).await;
    assert!(executor.statements_matching("ADD CONSTRAINT").is_empty());

    // The second index completes the table and unlocks the constraint.
    pool.constraint_guard.lock().clear();
    pool.queue.send(IndexMsg::Build(Oid(102))).await;
    run_worker(&pool, executor.clone()).await;
    assert_eq!(executor.statements_matching("ADD CONSTRAINT").len(), 1);
}

#[tokio::test]
async fn skip_create_defers_plain_constraint_indexes() {
    let pool = pool_with(
        vec![table(10, "public", "t", 100)],
        vec![excl_index(102, 10, "t_excl")],
        false,
    );
    let executor = FakeExecutor::default();

    pool.queue.send(IndexMsg::Build(Oid(102))).await;
    run_worker(&pool, executor.clone()).await;

    // No CREATE INDEX at all; the constraint carries the definition.
    assert!(executor.statements_matching("CREATE INDEX").is_empty());
    assert_eq!(
        executor.statements_matching("ADD CONSTRAINT t_excl EXCLUDE").len(),
        1
    );
    assert!(pool
        .run_store
        .is_done(&WorkUnit::index(Oid(102), "public.t_excl")));
}

#[tokio::test]
async fn preexisting_target_index_counts_as_done() {
    let pool = pool_with(
        vec![table(10, "public", "t", 100)],
        vec![plain_index(100, 10, "t_v_idx")],
        false,
    );
    let executor = FakeExecutor {
        already_exists: vec!["CREATE INDEX t_v_idx".to_string()],
        ..FakeExecutor::default()
    };

    pool.queue.send(IndexMsg::Build(Oid(100))).await;
    run_worker(&pool, executor.clone()).await;
    assert!(pool
        .run_store
        .is_done(&WorkUnit::index(Oid(100), "public.t_v_idx")));
}

#[tokio::test]
async fn preexisting_target_constraint_is_skipped_by_lookup() {
    let pool = pool_with(
        vec![table(10, "public", "t", 100)],
        vec![pkey_index(101, 10, "t_pkey")],
        false,
    );
    let executor = FakeExecutor::default();
    executor
        .scalars
        .lock()
        .insert("conname = 't_pkey'".to_string(), "1".to_string());

    pool.queue.send(IndexMsg::Build(Oid(101))).await;
    run_worker(&pool, executor.clone()).await;

    assert!(executor.statements_matching("ADD CONSTRAINT").is_empty());
    assert!(pool
        .run_store
        .is_done(&WorkUnit::constraint(Oid(1101), "t_pkey")));
}

#[tokio::test]
async fn failure_is_per_object_without_fail_fast() {
    let pool = pool_with(
        vec![table(10, "public", "t", 100), table(11, "public", "u", 100)],
        vec![plain_index(100, 10, "t_v_idx"), {
            let mut other = plain_index(103, 11, "u_v_idx");
            other.definition =
                "CREATE INDEX u_v_idx ON public.u USING btree (v)".to_string();
            other
        }],
        false,
    );
    let executor = FakeExecutor {
        fail_on: vec!["t_v_idx".to_string()],
        ..FakeExecutor::default()
    };

    let supervisor = crate::supervisor::Supervisor::new();
    let stop = supervisor.stop_flag();
    pool.queue.send(IndexMsg::Build(Oid(100))).await;
    pool.queue.send(IndexMsg::Build(Oid(103))).await;
    pool.queue.send(IndexMsg::Stop).await;

    let result = index_worker(Arc::clone(&pool), 0, executor.clone(), stop).await;
    // The failure is reported at the end, but the second index was built.
    assert!(matches!(
        result,
        Err(CloneError::UnitsFailed { failed: 1, .. })
    ));
    assert!(pool
        .run_store
        .is_done(&WorkUnit::index(Oid(103), "public.u_v_idx")));
    assert!(!pool
        .run_store
        .is_done(&WorkUnit::index(Oid(100), "public.t_v_idx")));
}

#[tokio::test]
async fn vacuum_is_enqueued_after_constraints() {
    let pool = pool_with(
        vec![table(10, "public", "t", 100)],
        vec![pkey_index(101, 10, "t_pkey")],
        false,
    );
    let executor = FakeExecutor::default();
    pool.queue.send(IndexMsg::Build(Oid(101))).await;
    run_worker(&pool, executor).await;

    let drained = pool.vacuum_queue.drain().await;
    assert_eq!(drained, vec![VacuumMsg::Analyze(Oid(10))]);
}
