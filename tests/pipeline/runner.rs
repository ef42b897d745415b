use std::time::Duration;

use crate::support::{
    helpers::{init_tracing, thread_pipeline, wait_for_applied},
    mock_indexer::MockChain,
};
use anyhow::{Context, Result};
use blockdispatch::{DispatcherConfig, Runner, FATAL_EXIT_CODE};
use tokio::sync::oneshot;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_exits_on_indexing_failure() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(20);
    chain.corrupt(5);
    let config = DispatcherConfig::builder()
        .worker_count(2)
        .batch_size(10)
        .build()?;
    let pipeline = thread_pipeline(config, chain).await?;

    let runner = Runner::new(pipeline.dispatcher.clone());
    pipeline
        .dispatcher
        .enqueue_heights((0..10).collect(), None)
        .await?;

    let outcome = timeout(Duration::from_secs(5), runner.run_until_ctrl_c())
        .await
        .context("runner should stop after indexing failure")?;

    let err = outcome.expect_err("indexing failure should abort runner");
    let message = format!("{err:#}");
    assert!(
        message.contains("failed to process block 5"),
        "runner did not report the failing block, got {message}"
    );
    assert!(
        message.contains("index store rejected block 5"),
        "runner lost the root cause, got {message}"
    );
    assert_eq!(pipeline.exit.codes(), vec![FATAL_EXIT_CODE]);
    assert!(pipeline.dispatcher.is_shut_down());
    assert!(!pipeline.hooks.post_heights().await.contains(&5));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_shuts_down_on_external_signal() -> Result<()> {
    init_tracing();
    let config = DispatcherConfig::builder()
        .worker_count(2)
        .batch_size(4)
        .build()?;
    let pipeline = thread_pipeline(config, MockChain::new(20)).await?;
    let dispatcher = pipeline.dispatcher.clone();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let runner = Runner::new(dispatcher.clone());
    let token = runner.cancellation_token();
    let running = tokio::spawn(async move {
        runner
            .run_until(async {
                let _ = stop_rx.await;
            })
            .await
    });

    dispatcher.enqueue_heights((0..4).collect(), None).await?;
    wait_for_applied(&dispatcher.telemetry(), 4, Duration::from_secs(10)).await?;
    assert!(!token.is_cancelled());

    let _ = stop_tx.send(());
    timeout(Duration::from_secs(5), running)
        .await
        .context("runner should stop after signal")?
        .context("runner task panicked")??;

    assert!(token.is_cancelled());
    assert!(dispatcher.is_shut_down());
    assert!(dispatcher.fatal_error().is_none());
    assert!(pipeline.exit.codes().is_empty());
    Ok(())
}
