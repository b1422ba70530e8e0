use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::events::{EventBus, SessionEvent};
use crate::monitor::CapabilityLevel;

/// Waiting message shown `elapsed_secs` into a session with no chunk yet.
pub fn waiting_message(level: CapabilityLevel, elapsed_secs: u64) -> String {
    let base = match elapsed_secs {
        0..=5 => "Thinking...",
        6..=15 => "Still working on a response...",
        16..=30 => "This is taking a little longer than usual...",
        31..=60 => "The model is still generating, hang tight...",
        _ => "Long response in progress, the model has not given up...",
    };
    match level {
        CapabilityLevel::Low if elapsed_secs > 15 => {
            format!("{} (slower hardware detected, responses take longer)", base)
        }
        _ => base.to_string(),
    }
}

/// Scheduled waiting messages for one session. Stopping is idempotent and
/// dropping the handle stops it.
pub struct ProgressTicker {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressTicker {
    pub fn spawn(
        bus: EventBus,
        request_id: String,
        level: CapabilityLevel,
        token: CancellationToken,
    ) -> Self {
        let offsets: Vec<u64> = level.progress_offsets_secs().to_vec();
        let task_token = token.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            for offset in offsets {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => return,
                    _ = sleep_until(start + Duration::from_secs(offset)) => {
                        bus.publish(SessionEvent::Progress {
                            request_id: request_id.clone(),
                            elapsed_secs: offset,
                            message: waiting_message(level, offset),
                        });
                    }
                }
            }
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
