use crate::worker::{BlockHeader, ProcessBlockResponse};
use anyhow::Result;
use core::future::Future;
use core::pin::Pin;

pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Callbacks into the buffering pipeline that owns block bookkeeping.
///
/// Errors returned from either hook are treated like any other failure of the
/// block and stop the process.
pub trait BlockHooks: Send + Sync + 'static {
    /// Called with the fetched header right before the worker processes it.
    fn pre_process_block<'a>(&'a self, header: &'a BlockHeader) -> HookFuture<'a>;

    /// Called after the worker processed the block.
    fn post_process_block<'a>(
        &'a self,
        header: &'a BlockHeader,
        response: ProcessBlockResponse,
    ) -> HookFuture<'a>;
}
