//! Ctrl-C handling that is re-armed before every network wait.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// Routes a process-wide interrupt to whichever operation is currently waiting.
///
/// The signal handler calls [`Interrupt::trigger`]; the session loop calls [`Interrupt::arm`]
/// before each request and waits on the returned token.  An interrupt raised while nothing was
/// armed is discarded by the next `arm`, so it never leaks into a later prompt.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    current: Arc<Mutex<CancellationToken>>,
}

impl Interrupt {
    /// Create an interrupt with an unarmed token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh token for the next operation and return it.
    pub fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.lock() = token.clone();
        token
    }

    /// Cancel the token handed out by the most recent [`Interrupt::arm`].
    pub fn trigger(&self) {
        self.lock().cancel();
    }

    fn lock(&self) -> MutexGuard<'_, CancellationToken> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
