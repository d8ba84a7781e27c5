//! Idle/size watchdog.
//!
//! A background task that tears the encoder down once the broadcast has had
//! no viewers for the idle timeout, and recycles the child when its output
//! byte count crosses the configured bound.

use crate::broadcast::ViewerRegistry;
use crate::supervisor::{Mode, Supervisor};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sweep interval.
const TICK: Duration = Duration::from_secs(5);

/// Last-activity clock, touched by viewer connections and layout applies.
pub struct Activity {
    last: Mutex<Instant>,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    pub fn touch(&self) {
        *self.last.lock() = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.last.lock().elapsed()
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the watchdog task.
pub fn start(
    supervisor: Arc<Supervisor>,
    viewers: Arc<ViewerRegistry>,
    activity: Arc<Activity>,
    idle_timeout: Duration,
    max_stream_size: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            if supervisor.mode().await != Mode::Live {
                continue;
            }

            if viewers.count() == 0 && activity.elapsed() >= idle_timeout {
                tracing::info!(
                    idle_secs = activity.elapsed().as_secs(),
                    "No viewers within the idle timeout, stopping encoder"
                );
                supervisor.stop().await;
                continue;
            }

            let bytes = supervisor.bytes_out();
            if bytes >= max_stream_size {
                tracing::info!(bytes, max_stream_size, "Output size bound hit, recycling");
                if let Err(e) = supervisor.recycle().await {
                    tracing::error!(error = %e, "Recycle failed");
                }
            }
        }
    })
}
