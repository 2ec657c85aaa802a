use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cooperative cancellation flag.
///
/// Clones observe the same flag, so a signal handler can hold one while
/// the run polls another between members.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runtime settings for one run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Directory member handles are resolved against. Defaults to the
    /// directory holding the store.
    pub data_dir: Option<PathBuf>,
    /// Checked before each member.
    pub cancel: CancelFlag,
}

impl RunContext {
    /// Context with default settings and a fresh cancel flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context sharing an existing cancel flag.
    pub fn with_cancel(cancel: CancelFlag) -> Self {
        Self {
            data_dir: None,
            cancel,
        }
    }
}
