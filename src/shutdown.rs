use std::sync::Arc;

use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Carries `None` while requests may be dispatched and `Some(deadline)` once
/// the run is draining. Receivers created after the stop still see it.
pub type StopSender = watch::Sender<Option<Instant>>;
pub type StopReceiver = watch::Receiver<Option<Instant>>;

#[must_use]
pub fn stop_channel() -> (StopSender, StopReceiver) {
    watch::channel(None)
}

/// The drain deadline, if the stop has been broadcast.
#[must_use]
pub fn drain_deadline(stop_rx: &StopReceiver) -> Option<Instant> {
    *stop_rx.borrow()
}

/// Lets code outside the runner ask for an early, orderly stop.
#[derive(Debug, Clone, Default)]
pub struct StopTrigger {
    notify: Arc<Notify>,
}

impl StopTrigger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop. A request made before anyone waits is kept.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    pub async fn triggered(&self) {
        self.notify.notified().await;
    }
}

/// Turns Ctrl+C (and SIGTERM on unix) into a stop request.
pub fn setup_signal_stop_handler(trigger: StopTrigger) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut term_signal = match signal(SignalKind::terminate()) {
                Ok(signal) => Some(signal),
                Err(err) => {
                    warn!("Failed to register SIGTERM handler: {}", err);
                    None
                }
            };
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        warn!("Failed to listen for Ctrl+C: {}", err);
                        return;
                    }
                }
                () = async {
                    if let Some(signal) = term_signal.as_mut() {
                        signal.recv().await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                } => {}
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", err);
                return;
            }
        }

        info!("Stop requested; draining in-flight requests.");
        trigger.trigger();
    })
}
