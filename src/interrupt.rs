//! Cooperative cancellation for an in-flight turn.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::{ChatError, Result};

/// Polled once per generated token. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(ChatError::Interrupted)` once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ChatError::Interrupted);
        }
        Ok(())
    }

    /// Clear the flag before a new turn starts.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Turn every Ctrl-C into a cancellation of the current turn.
///
/// Must be called from inside a tokio runtime. While a line is being read the
/// terminal is in raw mode, so Ctrl-C reaches the line editor instead.
pub fn spawn_ctrl_c_listener(token: CancellationToken) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received");
            token.cancel();
        }
    });
}
