//! Shutdown coordination
//!
//! An [`InterruptLatch`] is a single-shot cancellation token. The process
//! creates one at its outermost composition point and hands it to a
//! [`SignalWaiter`], whose first wait installs the Ctrl+C / SIGTERM handler
//! that trips the latch. The latch is never reset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Single-shot interrupt flag shared between a signal source and waiters
///
/// Clones share both the token and the record of whether a signal handler
/// has been installed for it, so any number of waiters on one latch install
/// a single handler.
#[derive(Debug, Clone, Default)]
pub struct InterruptLatch {
    token: CancellationToken,
    handler_installed: Arc<AtomicBool>,
}

impl InterruptLatch {
    /// Create an untripped latch
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the latch; later calls have no further effect
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether the latch has been tripped
    pub fn is_set(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token cancelled when the latch trips, for `select!`-style consumers
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Blocks until the interrupt latch trips
#[derive(Debug, Clone)]
pub struct SignalWaiter {
    latch: InterruptLatch,
    poll_interval: Duration,
}

impl SignalWaiter {
    /// Create a waiter polling `latch` every `poll_interval`
    pub fn new(latch: InterruptLatch, poll_interval: Duration) -> Self {
        Self {
            latch,
            poll_interval,
        }
    }

    /// The latch this waiter observes
    pub fn latch(&self) -> &InterruptLatch {
        &self.latch
    }

    /// Whether a signal handler has been installed for the latch
    pub fn is_installed(&self) -> bool {
        self.latch.handler_installed.load(Ordering::Acquire)
    }

    /// Install the signal handler on the first call for this latch only.
    ///
    /// Returns `true` when this call installed it. Must run inside a tokio
    /// runtime; outside one nothing is installed and `false` is returned.
    pub fn install_once(&self) -> bool {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("No async runtime; interrupt handler not installed");
                return false;
            }
        };

        if self.latch.handler_installed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let latch = self.latch.clone();
        handle.spawn(async move {
            let ctrl_c = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("Received Ctrl+C, initiating shutdown...");
                }
                _ = terminate => {
                    tracing::info!("Received SIGTERM, initiating shutdown...");
                }
            }

            latch.trigger();
        });

        tracing::debug!("Interrupt handler installed");
        true
    }

    /// Install the handler if needed, then poll the latch until it trips
    pub async fn wait(&self) {
        self.install_once();

        let mut ticker = tokio::time::interval(self.poll_interval);
        while !self.latch.is_set() {
            ticker.tick().await;
        }
    }
}
