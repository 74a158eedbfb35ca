use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::warn;

/// Cooperative stop request shared by every long-running loop.
///
/// Loops check [`ShutdownToken::is_requested`] between iterations; long sleeps
/// race against [`ShutdownToken::requested`]. Nothing in flight is aborted.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    pub fn request(&self) {
        self.inner.flag.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Resolves once a stop has been requested.
    pub async fn requested(&self) {
        loop {
            // Register before checking so a concurrent `request` is not missed.
            let notified = self.inner.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Install Ctrl+C (and SIGTERM on unix) handlers that request a stop.
    /// A second Ctrl+C exits immediately with code 130.
    pub fn install_signal_handlers(&self) {
        let token = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("Failed to install Ctrl+C handler");
                return;
            }
            warn!("Shutdown requested, finishing in-flight work (Ctrl+C again to force quit)");
            token.request();

            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Force quit!");
                std::process::exit(130);
            }
        });

        #[cfg(unix)]
        {
            let token = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut term) => {
                        if term.recv().await.is_some() {
                            warn!("SIGTERM received, finishing in-flight work");
                            token.request();
                        }
                    }
                    Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
                }
            });
        }
    }
}
