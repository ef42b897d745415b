use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was aborted before or while the task ran.
    Flushed,
    CapacityExceeded { capacity: usize, pending: usize },
    TimedOut { after: Duration },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Flushed => write!(f, "task flushed from aborted queue"),
            QueueError::CapacityExceeded { capacity, pending } => write!(
                f,
                "task queue is full ({pending} pending, capacity {capacity})"
            ),
            QueueError::TimedOut { after } => {
                write!(f, "task timed out after {}s", after.as_secs_f64())
            }
        }
    }
}

impl std::error::Error for QueueError {}

/// Returns true when any error in the chain is [`QueueError::Flushed`].
pub fn is_task_flushed(error: &anyhow::Error) -> bool {
    if let Some(queue_error) = error.downcast_ref::<QueueError>() {
        return *queue_error == QueueError::Flushed;
    }
    error
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<QueueError>(), Some(QueueError::Flushed)))
}

type Job = Box<dyn FnOnce(Option<OwnedSemaphorePermit>) -> BoxFuture<'static, ()> + Send>;

struct QueueShared {
    capacity: Option<usize>,
    task_timeout: Duration,
    waiting: AtomicUsize,
    running: AtomicUsize,
    aborted: CancellationToken,
}

/// Bounded FIFO task queue with a concurrency limit.
///
/// Tasks start in submission order; at most `concurrency` run at once. The
/// capacity bounds tasks that were admitted but have not started yet. Must be
/// created inside a tokio runtime.
pub struct TaskQueue {
    shared: Arc<QueueShared>,
    jobs: mpsc::UnboundedSender<Job>,
    concurrency: usize,
}

impl TaskQueue {
    pub fn new(capacity: Option<usize>, concurrency: usize, task_timeout: Duration) -> Self {
        let concurrency = concurrency.max(1);
        let shared = Arc::new(QueueShared {
            capacity,
            task_timeout,
            waiting: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            aborted: CancellationToken::new(),
        });
        let (jobs, job_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_scheduler(
            Arc::clone(&shared),
            Arc::new(Semaphore::new(concurrency)),
            job_rx,
        ));

        Self {
            shared,
            jobs,
            concurrency,
        }
    }

    /// Admits `task` and returns a handle resolving to its output.
    ///
    /// Admission is synchronous so submission order is start order.
    pub fn submit<T, Fut>(&self, task: Fut) -> Result<TaskHandle<T>, QueueError>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.reserve()?.submit(task)
    }

    /// Claims one pending slot without providing the task yet. The slot is
    /// returned to the queue if it is dropped unused.
    pub fn reserve(&self) -> Result<QueueSlot<'_>, QueueError> {
        if self.shared.aborted.is_cancelled() {
            return Err(QueueError::Flushed);
        }

        let capacity = self.shared.capacity;
        if let Err(pending) =
            self.shared
                .waiting
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |waiting| match capacity {
                    Some(limit) if waiting >= limit => None,
                    _ => Some(waiting + 1),
                })
        {
            return Err(QueueError::CapacityExceeded {
                capacity: capacity.unwrap_or(pending),
                pending,
            });
        }

        Ok(QueueSlot {
            queue: self,
            armed: true,
        })
    }

    /// Rejects every task that has not started yet and marks tasks still
    /// running as flushed. Irreversible.
    pub fn abort(&self) {
        if !self.shared.aborted.is_cancelled() {
            tracing::debug!(
                pending = self.pending(),
                running = self.running(),
                "aborting task queue"
            );
        }
        self.shared.aborted.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.aborted.is_cancelled()
    }

    /// Tasks admitted but not started.
    pub fn pending(&self) -> usize {
        self.shared.waiting.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.shared.capacity
    }

    pub fn free_space(&self) -> Option<usize> {
        self.shared
            .capacity
            .map(|capacity| capacity.saturating_sub(self.pending()))
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// Admission reserved by [`TaskQueue::reserve`].
pub struct QueueSlot<'a> {
    queue: &'a TaskQueue,
    armed: bool,
}

impl QueueSlot<'_> {
    /// Fills the slot with `task`. Fails only if the scheduler is gone.
    pub fn submit<T, Fut>(mut self, task: Fut) -> Result<TaskHandle<T>, QueueError>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (reply, outcome) = oneshot::channel();
        let shared = Arc::clone(&self.queue.shared);
        let job: Job = Box::new(move |permit| {
            Box::pin(async move {
                let Some(permit) = permit else {
                    let _ = reply.send(Err(QueueError::Flushed));
                    return;
                };

                let result = match tokio::time::timeout(shared.task_timeout, task).await {
                    Ok(_) if shared.aborted.is_cancelled() => Err(QueueError::Flushed),
                    Ok(value) => Ok(value),
                    Err(_) => Err(QueueError::TimedOut {
                        after: shared.task_timeout,
                    }),
                };
                drop(permit);
                shared.running.fetch_sub(1, Ordering::SeqCst);
                let _ = reply.send(result);
            })
        });

        // The scheduler releases the pending count once the job is sent.
        self.queue.jobs.send(job).map_err(|_| QueueError::Flushed)?;
        self.armed = false;
        Ok(TaskHandle { outcome })
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.shared.waiting.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Resolves to the task output, or the reason the task never completed.
pub struct TaskHandle<T> {
    outcome: oneshot::Receiver<Result<T, QueueError>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.outcome)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(QueueError::Flushed)))
    }
}

async fn run_scheduler(
    shared: Arc<QueueShared>,
    permits: Arc<Semaphore>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = jobs.recv().await {
        let permit = tokio::select! {
            biased;
            _ = shared.aborted.cancelled() => None,
            permit = Arc::clone(&permits).acquire_owned() => permit.ok(),
        };
        shared.waiting.fetch_sub(1, Ordering::SeqCst);

        match permit {
            Some(permit) => {
                shared.running.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(job(Some(permit)));
            }
            None => job(None).await,
        }
    }
}
