use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::fmt;
use std::time::Duration;

const DEFAULT_PROCESSING_CONCURRENCY: usize = 1;
const DEFAULT_TASK_TIMEOUT_SECS: u64 = 900;
const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 15;

/// How the heights of one enqueued batch are spread over the worker pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AssignmentStrategy {
    /// The whole batch goes to the least-loaded worker.
    #[default]
    WholeBatch,
    /// Consecutive heights go to consecutive workers.
    RoundRobin,
}

impl fmt::Display for AssignmentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentStrategy::WholeBatch => f.write_str("whole-batch"),
            AssignmentStrategy::RoundRobin => f.write_str("round-robin"),
        }
    }
}

/// Runtime configuration for the worker block dispatcher.
///
/// All instances must be constructed via [`DispatcherConfig::builder`] or
/// [`DispatcherConfig::new`] so invariants are validated before any consumer
/// observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    worker_count: usize,
    batch_size: usize,
    processing_concurrency: usize,
    task_timeout: Duration,
    health_check_interval: Duration,
    metrics_interval: Duration,
    assignment: AssignmentStrategy,
}

pub struct DispatcherConfigParams {
    pub worker_count: usize,
    pub batch_size: usize,
    pub processing_concurrency: usize,
    pub task_timeout: Duration,
    pub health_check_interval: Duration,
    pub metrics_interval: Duration,
    pub assignment: AssignmentStrategy,
}

impl DispatcherConfig {
    pub fn builder() -> DispatcherConfigBuilder {
        DispatcherConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: DispatcherConfigParams) -> Result<Self> {
        let DispatcherConfigParams {
            worker_count,
            batch_size,
            processing_concurrency,
            task_timeout,
            health_check_interval,
            metrics_interval,
            assignment,
        } = params;

        let config = Self {
            worker_count,
            batch_size,
            processing_concurrency,
            task_timeout,
            health_check_interval,
            metrics_interval,
            assignment,
        };

        config.validate()?;
        Ok(config)
    }

    /// Number of workers spawned into the pool.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Number of heights the buffering pipeline enqueues per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Processing tasks the queue runs at once. Fetching is not bounded by it.
    pub fn processing_concurrency(&self) -> usize {
        self.processing_concurrency
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn assignment(&self) -> AssignmentStrategy {
        self.assignment
    }

    /// Tasks the queue admits before they start: two full batches per worker.
    pub fn queue_capacity(&self) -> usize {
        self.worker_count
            .saturating_mul(self.batch_size)
            .saturating_mul(2)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            bail!("worker_count must be greater than 0");
        }

        if self.batch_size == 0 {
            bail!("batch_size must be greater than 0");
        }

        if self.processing_concurrency == 0 {
            bail!("processing_concurrency must be greater than 0");
        }

        if self.task_timeout.is_zero() {
            bail!("task_timeout must be greater than 0");
        }

        if self.health_check_interval.is_zero() {
            bail!("health_check_interval must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct DispatcherConfigBuilder {
    worker_count: Option<usize>,
    batch_size: Option<usize>,
    processing_concurrency: Option<usize>,
    task_timeout: Option<Duration>,
    health_check_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
    assignment: Option<AssignmentStrategy>,
}

impl DispatcherConfigBuilder {
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn processing_concurrency(mut self, concurrency: usize) -> Self {
        self.processing_concurrency = Some(concurrency);
        self
    }

    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn assignment(mut self, strategy: AssignmentStrategy) -> Self {
        self.assignment = Some(strategy);
        self
    }

    pub fn build(self) -> Result<DispatcherConfig> {
        let params = DispatcherConfigParams {
            worker_count: self.worker_count.context("worker_count is required")?,
            batch_size: self.batch_size.context("batch_size is required")?,
            processing_concurrency: self
                .processing_concurrency
                .unwrap_or(DEFAULT_PROCESSING_CONCURRENCY),
            task_timeout: self
                .task_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS)),
            health_check_interval: self
                .health_check_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_HEALTH_CHECK_INTERVAL_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            assignment: self.assignment.unwrap_or_default(),
        };

        DispatcherConfig::new(params)
    }
}
