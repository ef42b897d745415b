use crate::processor::dispatcher::WorkerBlockDispatcher;
use crate::runtime::hooks::BlockHooks;
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Keeps an initialized dispatcher running until an OS signal or a fatal
/// error, then shuts it down.
pub struct Runner<H: BlockHooks> {
    dispatcher: Arc<WorkerBlockDispatcher<H>>,
}

impl<H: BlockHooks> Runner<H> {
    pub fn new(dispatcher: Arc<WorkerBlockDispatcher<H>>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<WorkerBlockDispatcher<H>> {
        &self.dispatcher
    }

    /// Cancelled when the dispatcher stops, for callers that integrate their own signal handling.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.dispatcher.cancellation_token()
    }

    /// Runs until Ctrl-C (SIGINT) is received or the dispatcher stops on its own.
    pub async fn run_until_ctrl_c(&self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = signal::ctrl_c().await {
                tracing::warn!(error = %err, "failed to listen for Ctrl-C; waiting for shutdown token");
                std::future::pending::<()>().await;
            }
            tracing::info!("Ctrl-C received; shutting down runner");
        })
        .await
    }

    /// Runs until `stop` resolves or the dispatcher's token is cancelled, then
    /// shuts the dispatcher down. Returns the fatal error if one stopped it.
    pub async fn run_until<F>(&self, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let token = self.dispatcher.cancellation_token();
        tracing::info!("runner started; waiting for shutdown signal");

        tokio::select! {
            _ = stop => {}
            _ = token.cancelled() => {
                tracing::info!("dispatcher cancellation token fired");
            }
        }

        self.dispatcher.shutdown().await;
        match self.dispatcher.fatal_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
