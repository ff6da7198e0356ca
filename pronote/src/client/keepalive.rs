use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::api::Client;
use crate::error::PronoteError;

/// Delay before the next attempt after `failures` consecutive failed checks.
/// Doubles from twice the poll interval and never exceeds the idle threshold.
fn backoff(poll: Duration, idle: Duration, failures: u32) -> Duration {
    poll.saturating_mul(1u32 << failures.min(16)).min(idle.max(poll))
}

/// Background task sending a navigation call whenever the session has been
/// idle for the configured delay.
///
/// Calls go through [`Client::session_check`], so they take the session lock
/// like any foreground call. Failed checks back off; a client that is not
/// logged in ends the task.
pub struct KeepAlive {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl KeepAlive {
    pub fn spawn(client: Client) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let idle = client.config().keepalive_idle();
        let poll = client.config().keepalive_poll();

        let handle = tokio::spawn(async move {
            tracing::info!("💓 Keep-alive started (idle threshold {}s)", idle.as_secs());
            let mut failures = 0u32;
            let mut next_attempt = Instant::now();
            while !flag.load(Ordering::Relaxed) {
                tokio::time::sleep(poll).await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }
                if Instant::now() < next_attempt || client.idle_for().await < idle {
                    continue;
                }
                match client.session_check().await {
                    Ok(refreshed) => {
                        failures = 0;
                        tracing::debug!("Keep-alive navigation sent (refreshed={})", refreshed);
                    }
                    Err(PronoteError::NotLoggedIn) => {
                        tracing::warn!("Keep-alive has no logged-in session to hold");
                        break;
                    }
                    Err(e) => {
                        failures += 1;
                        let delay = backoff(poll, idle, failures);
                        next_attempt = Instant::now() + delay;
                        tracing::warn!(
                            "Keep-alive call failed ({}), next try in {}s: {}",
                            failures,
                            delay.as_secs(),
                            e
                        );
                    }
                }
            }
            tracing::info!("Keep-alive stopped");
        });

        Self { stop, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Raise the stop flag and wait for the task to notice it
    pub async fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Err(e) = self.handle.await {
            tracing::warn!("Keep-alive task ended abnormally: {}", e);
        }
    }
}
