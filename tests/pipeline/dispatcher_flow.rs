use std::time::Duration;

use crate::support::{
    helpers::{
        assert_is_chain, init_tracing, thread_pipeline, wait_for_applied, WORKER_MEMORY_BUDGET,
    },
    mock_indexer::{MockChain, BLOCK_MEMORY_FOOTPRINT},
};
use anyhow::{bail, Result};
use blockdispatch::{AssignmentStrategy, DispatcherConfig, DispatcherEvent, WorkItem};
use tokio::time::{sleep, timeout, Instant};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn thread_workers_apply_blocks_in_height_order() -> Result<()> {
    init_tracing();
    let config = DispatcherConfig::builder()
        .worker_count(3)
        .batch_size(10)
        .build()?;
    let pipeline = thread_pipeline(config, MockChain::with_fetch_delay(59, Duration::from_millis(2))).await?;
    let dispatcher = &pipeline.dispatcher;

    for start in (0..60).step_by(10) {
        dispatcher
            .enqueue_heights((start..start + 10).collect(), None)
            .await?;
    }

    wait_for_applied(&dispatcher.telemetry(), 60, Duration::from_secs(10)).await?;

    assert_eq!(pipeline.hooks.post_heights().await, (0..60).collect::<Vec<_>>());
    assert_eq!(pipeline.hooks.pre_heights().await, (0..60).collect::<Vec<_>>());
    assert_is_chain(&pipeline.hooks.applied_headers().await);
    assert_eq!(dispatcher.latest_buffered_height(), Some(59));
    assert!(pipeline.exit.codes().is_empty());

    let remaining: u64 = dispatcher.worker_memory_remaining().await?.iter().sum();
    assert_eq!(
        WORKER_MEMORY_BUDGET * 3 - remaining,
        60 * BLOCK_MEMORY_FOOTPRINT
    );

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn round_robin_uses_every_thread_worker() -> Result<()> {
    init_tracing();
    let config = DispatcherConfig::builder()
        .worker_count(2)
        .batch_size(4)
        .processing_concurrency(2)
        .assignment(AssignmentStrategy::RoundRobin)
        .build()?;
    let pipeline = thread_pipeline(config, MockChain::new(100)).await?;
    let dispatcher = &pipeline.dispatcher;

    let items = (0..8).map(WorkItem::from).collect();
    dispatcher.enqueue_blocks(items, Some(20)).await?;
    wait_for_applied(&dispatcher.telemetry(), 8, Duration::from_secs(10)).await?;

    let mut applied = pipeline.hooks.post_heights().await;
    applied.sort_unstable();
    assert_eq!(applied, (0..8).collect::<Vec<_>>());
    assert_eq!(dispatcher.latest_buffered_height(), Some(20));

    let used: Vec<u64> = dispatcher
        .worker_memory_remaining()
        .await?
        .into_iter()
        .map(|remaining| WORKER_MEMORY_BUDGET - remaining)
        .collect();
    assert_eq!(used, vec![4 * BLOCK_MEMORY_FOOTPRINT, 4 * BLOCK_MEMORY_FOOTPRINT]);

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocks_beyond_the_tip_are_retried_later() -> Result<()> {
    init_tracing();
    let config = DispatcherConfig::builder()
        .worker_count(2)
        .batch_size(10)
        .build()?;
    let chain = MockChain::new(4);
    let pipeline = thread_pipeline(config, chain.clone()).await?;
    let dispatcher = &pipeline.dispatcher;
    let telemetry = dispatcher.telemetry();

    dispatcher.enqueue_heights((0..10).collect(), None).await?;

    let deadline = Instant::now() + Duration::from_secs(10);
    while telemetry.unavailable_blocks() < 5 || telemetry.applied_blocks() < 5 {
        if Instant::now() >= deadline {
            bail!("blocks did not settle: {:?}", telemetry.snapshot());
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(pipeline.exit.codes().is_empty());
    assert!(dispatcher.fatal_error().is_none());

    chain.extend_to(9);
    dispatcher.enqueue_heights((5..10).collect(), None).await?;
    wait_for_applied(&telemetry, 10, Duration::from_secs(10)).await?;

    assert_eq!(pipeline.hooks.post_heights().await, (0..10).collect::<Vec<_>>());
    assert!(pipeline.exit.codes().is_empty());

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_disconnects_thread_workers() -> Result<()> {
    init_tracing();
    let config = DispatcherConfig::builder()
        .worker_count(2)
        .batch_size(5)
        .build()?;
    let pipeline = thread_pipeline(config, MockChain::new(50)).await?;
    let dispatcher = &pipeline.dispatcher;
    let mut events = dispatcher.telemetry().subscribe();

    dispatcher.enqueue_heights((0..5).collect(), None).await?;
    let event = timeout(Duration::from_secs(1), events.recv()).await??;
    assert!(matches!(event, DispatcherEvent::BlockQueueSize { .. }));
    wait_for_applied(&dispatcher.telemetry(), 5, Duration::from_secs(10)).await?;

    dispatcher.shutdown().await;
    assert!(dispatcher.is_shut_down());

    let err = dispatcher
        .worker_statuses()
        .await
        .expect_err("terminated workers should not answer");
    assert!(
        format!("{err:#}").contains("no longer reachable"),
        "unexpected error: {err:#}"
    );

    dispatcher.enqueue_heights((5..10).collect(), None).await?;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(dispatcher.telemetry().applied_blocks(), 5);
    assert_eq!(dispatcher.latest_buffered_height(), Some(9));

    dispatcher.shutdown().await;
    assert!(pipeline.exit.codes().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn discarded_blocks_are_evicted_from_the_worker() -> Result<()> {
    init_tracing();
    let config = DispatcherConfig::builder()
        .worker_count(1)
        .batch_size(10)
        .build()?;
    let chain = MockChain::with_fetch_delay(10, Duration::from_millis(100));
    let pipeline = thread_pipeline(config, chain).await?;
    let dispatcher = &pipeline.dispatcher;
    let telemetry = dispatcher.telemetry();

    dispatcher.enqueue_heights((1..=5).collect(), Some(100)).await?;
    dispatcher.set_latest_buffered_height(50);

    let deadline = Instant::now() + Duration::from_secs(10);
    while telemetry.discarded_blocks() < 5 {
        if Instant::now() >= deadline {
            bail!("blocks were not discarded: {:?}", telemetry.snapshot());
        }
        sleep(Duration::from_millis(10)).await;
    }

    let statuses = dispatcher.worker_statuses().await?;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].fetched_blocks, 0, "discarded blocks stayed cached");
    assert_eq!(statuses[0].backlog(), 0);
    assert!(pipeline.hooks.post_heights().await.is_empty());
    assert!(pipeline.exit.codes().is_empty());

    dispatcher.shutdown().await;
    Ok(())
}
