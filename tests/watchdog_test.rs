//! Idle safety: a live broadcast with zero viewers goes idle after the
//! timeout, with the last-good layout retained for cold starts.

use multiview::broadcast::ViewerRegistry;
use multiview::layout::{LayoutConfig, LayoutKind};
use multiview::supervisor::{Mode, Supervisor};
use multiview::watchdog::{self, Activity};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn test_layout() -> LayoutConfig {
    LayoutConfig {
        kind: LayoutKind::Pip,
        streams: BTreeMap::from([
            ("main".to_string(), "a".to_string()),
            ("inset".to_string(), "b".to_string()),
        ]),
        audio_source: "main".to_string(),
        volumes: BTreeMap::new(),
        custom_slots: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn live_with_no_viewers_goes_idle_after_timeout() {
    let viewers = Arc::new(ViewerRegistry::new());
    let (supervisor, exit_rx) = Supervisor::new(Arc::clone(&viewers));
    supervisor.spawn_monitor(exit_rx);

    let activity = Arc::new(Activity::new());
    watchdog::start(
        Arc::clone(&supervisor),
        Arc::clone(&viewers),
        Arc::clone(&activity),
        Duration::from_secs(1),
        u64::MAX,
    );

    supervisor
        .apply(
            test_layout(),
            vec!["/bin/sh".to_string(), "-c".to_string(), "sleep 60".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(supervisor.mode().await, Mode::Live);

    // The watchdog sweeps every 5 seconds; give it two sweeps.
    let mut went_idle = false;
    for _ in 0..60 {
        if supervisor.mode().await == Mode::Idle {
            went_idle = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    assert!(went_idle, "watchdog never tore the stream down");

    let snapshot = supervisor.snapshot().await;
    assert!(snapshot.current_layout.is_none());
    assert!(snapshot.last_good_layout.is_some());
}
