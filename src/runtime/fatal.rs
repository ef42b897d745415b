use crate::runtime::protocol::StageContext;
use anyhow::Error as AnyError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Status the process exits with after an unrecoverable block failure.
pub const FATAL_EXIT_CODE: i32 = 1;

/// Terminates the process. Abstracted so tests can observe the call.
pub trait ProcessExit: Send + Sync + 'static {
    fn exit(&self, code: i32);
}

/// Exits through [`std::process::exit`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StdProcessExit;

impl ProcessExit for StdProcessExit {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

#[derive(Clone)]
pub struct FatalErrorHandler {
    inner: Arc<FatalInner>,
}

struct FatalInner {
    triggered: AtomicBool,
    run_shutdown: CancellationToken,
    captured_error: Mutex<Option<CapturedFatalError>>,
    exit: Arc<dyn ProcessExit>,
}

#[derive(Clone)]
struct CapturedFatalError {
    inner: Arc<AnyError>,
}

impl fmt::Debug for CapturedFatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CapturedFatalError")
            .field(&self.inner)
            .finish()
    }
}

impl fmt::Display for CapturedFatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for CapturedFatalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl FatalErrorHandler {
    pub fn new(run_shutdown: CancellationToken, exit: Arc<dyn ProcessExit>) -> Self {
        Self {
            inner: Arc::new(FatalInner {
                triggered: AtomicBool::new(false),
                run_shutdown,
                captured_error: Mutex::new(None),
                exit,
            }),
        }
    }

    /// Records `error` as the reason the pipeline stops, cancels the run token
    /// and terminates the process. Only the first call has any effect.
    pub fn trigger(&self, error: AnyError) -> AnyError {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            tracing::debug!(error = %error, "fatal error already handled; ignoring");
            return error;
        }

        match StageContext::find(&error) {
            Some(context) => tracing::error!(
                height = context.height,
                stage = %context.stage,
                error = ?error,
                "unrecoverable block failure; terminating"
            ),
            None => tracing::error!(
                error = ?error,
                "unrecoverable dispatcher failure; terminating"
            ),
        }

        let captured = CapturedFatalError {
            inner: Arc::new(error),
        };
        {
            let mut slot = self.inner.captured_error.lock().unwrap();
            if slot.is_none() {
                *slot = Some(captured.clone());
            }
        }

        self.inner.run_shutdown.cancel();
        self.inner.exit.exit(FATAL_EXIT_CODE);

        captured.into()
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    pub fn error(&self) -> Option<AnyError> {
        self.inner
            .captured_error
            .lock()
            .unwrap()
            .as_ref()
            .map(|error| error.clone().into())
    }
}
