//! Background tasks that live as long as the dispatcher's worker pool.

use super::health::HealthSampler;
use super::worker_pool::WorkerPool;
use crate::runtime::telemetry::{self, Telemetry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct LifecycleHandles {
    run_token: CancellationToken,
    health_handle: Option<JoinHandle<()>>,
    metrics_handle: Option<JoinHandle<()>>,
}

pub(crate) struct LifecycleSpawnParams<'a> {
    pub shutdown_root: &'a CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub pool: Arc<WorkerPool>,
    pub health_check_interval: Duration,
    pub metrics_interval: Duration,
}

impl LifecycleHandles {
    pub(crate) fn spawn(params: LifecycleSpawnParams<'_>) -> Self {
        let LifecycleSpawnParams {
            shutdown_root,
            telemetry,
            pool,
            health_check_interval,
            metrics_interval,
        } = params;

        let run_token = shutdown_root.child_token();
        let health_handle = HealthSampler::spawn(pool, health_check_interval, run_token.clone());
        let metrics_handle =
            telemetry::spawn_metrics_reporter(telemetry, run_token.clone(), metrics_interval);

        Self {
            run_token,
            health_handle: Some(health_handle),
            metrics_handle: Some(metrics_handle),
        }
    }

    pub(crate) async fn shutdown(mut self) {
        self.run_token.cancel();

        if let Some(handle) = self.health_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "health sampler task panicked");
            }
        }

        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }
    }
}
