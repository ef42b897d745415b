use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

const EVENT_CHANNEL_CAPACITY: usize = 256;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Signals published to observers of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherEvent {
    /// Processing tasks waiting in the queue, sampled whenever the latest
    /// buffered height changes.
    BlockQueueSize { value: usize },
}

/// Block outcome counters plus the event channel observers subscribe to.
#[derive(Debug)]
pub struct Telemetry {
    applied_blocks: AtomicU64,
    discarded_blocks: AtomicU64,
    unavailable_blocks: AtomicU64,
    flushed_blocks: AtomicU64,
    queue_size: AtomicUsize,
    events: broadcast::Sender<DispatcherEvent>,
}

impl Default for Telemetry {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            applied_blocks: AtomicU64::new(0),
            discarded_blocks: AtomicU64::new(0),
            unavailable_blocks: AtomicU64::new(0),
            flushed_blocks: AtomicU64::new(0),
            queue_size: AtomicUsize::new(0),
            events,
        }
    }
}

impl Telemetry {
    pub fn subscribe(&self) -> broadcast::Receiver<DispatcherEvent> {
        self.events.subscribe()
    }

    /// Stores the queue size and publishes it. Having no subscriber is fine.
    pub fn record_queue_size(&self, value: usize) {
        self.queue_size.store(value, Ordering::Relaxed);
        let _ = self.events.send(DispatcherEvent::BlockQueueSize { value });
    }

    pub fn record_applied_block(&self) {
        self.applied_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded_block(&self) {
        self.discarded_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unavailable_block(&self) {
        self.unavailable_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flushed_block(&self) {
        self.flushed_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            applied_blocks: self.applied_blocks.load(Ordering::Relaxed),
            discarded_blocks: self.discarded_blocks.load(Ordering::Relaxed),
            unavailable_blocks: self.unavailable_blocks.load(Ordering::Relaxed),
            flushed_blocks: self.flushed_blocks.load(Ordering::Relaxed),
            queue_size: self.queue_size.load(Ordering::Relaxed),
        }
    }

    pub fn applied_blocks(&self) -> u64 {
        self.applied_blocks.load(Ordering::Relaxed)
    }

    pub fn discarded_blocks(&self) -> u64 {
        self.discarded_blocks.load(Ordering::Relaxed)
    }

    pub fn unavailable_blocks(&self) -> u64 {
        self.unavailable_blocks.load(Ordering::Relaxed)
    }

    pub fn flushed_blocks(&self) -> u64 {
        self.flushed_blocks.load(Ordering::Relaxed)
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub applied_blocks: u64,
    pub discarded_blocks: u64,
    pub unavailable_blocks: u64,
    pub flushed_blocks: u64,
    pub queue_size: usize,
}

/// Spawns a background task that periodically logs throughput and block outcome counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "blockdispatch::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let applied_delta = current_snapshot
                        .applied_blocks
                        .saturating_sub(last_snapshot.applied_blocks);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        applied_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "blockdispatch::metrics",
                        throughput = format!("{throughput:.2}"),
                        applied = current_snapshot.applied_blocks,
                        discarded = current_snapshot.discarded_blocks,
                        unavailable = current_snapshot.unavailable_blocks,
                        flushed = current_snapshot.flushed_blocks,
                        queue_size = current_snapshot.queue_size,
                        "dispatcher metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
