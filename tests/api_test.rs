//! API integration tests.
//!
//! Runs the full router on a random port and exercises it over HTTP. Tests
//! that need a running encoder child substitute a shell script for ffmpeg so
//! no real encoder is required.

mod common;

use common::TestHarness;
use multiview::config::Config;
use serde_json::json;

#[cfg(unix)]
fn stub_encoder(dir: &tempfile::TempDir) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.path().join("fake-ffmpeg");
    std::fs::write(
        &path,
        "#!/bin/sh\nwhile true; do printf 'tsdata'; sleep 0.2; done\n",
    )
    .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn pip_body() -> serde_json::Value {
    json!({
        "layout": "pip",
        "streams": {"main": "a", "inset": "b"},
        "audio_source": "main"
    })
}

// ---------------------------------------------------------------------------
// Health and index
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_200() {
    let (_harness, addr) = TestHarness::with_server().await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn index_describes_the_service() {
    let (_harness, addr) = TestHarness::with_server().await;

    let resp = reqwest::get(format!("http://{addr}/")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().contains("Multiview"));
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

#[tokio::test]
async fn channels_lists_the_catalog() {
    let (_harness, addr) = TestHarness::with_server().await;

    let resp = reqwest::get(format!("http://{addr}/api/channels")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 4);
    assert_eq!(body["channels"][0]["id"], "a");
    assert_eq!(body["channels"][0]["stream_url"], "http://upstream.test/a.ts");
}

#[tokio::test]
async fn refresh_without_source_keeps_catalog() {
    let (_harness, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/channels/refresh"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "source-unavailable");

    // The prior catalog is intact.
    let resp = reqwest::get(format!("http://{addr}/api/channels")).await.unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 4);
}

#[tokio::test]
async fn proxy_image_rejects_relative_urls() {
    let (_harness, addr) = TestHarness::with_server().await;

    let resp = reqwest::get(format!("http://{addr}/api/proxy-image?url=not-a-url"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "source-unavailable");
}

// ---------------------------------------------------------------------------
// Layout validation (no child involved)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn partial_grid_assignment_is_bad_layout() {
    let (_harness, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/layout/set"))
        .json(&json!({
            "layout": "grid_2x2",
            "streams": {"slot1": "a"},
            "audio_source": "slot1"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "bad-layout");
}

#[tokio::test]
async fn unknown_channel_is_bad_layout() {
    let (_harness, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/layout/set"))
        .json(&json!({
            "layout": "pip",
            "streams": {"main": "a", "inset": "does-not-exist"},
            "audio_source": "main"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "bad-layout");
}

#[tokio::test]
async fn off_aspect_custom_slot_is_bad_geometry() {
    let (_harness, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/layout/set"))
        .json(&json!({
            "layout": "custom",
            "streams": {"wide": "a"},
            "audio_source": "wide",
            "custom_slots": [
                {"id": "wide", "name": "wide", "x": 0, "y": 0, "width": 640, "height": 400, "border": false}
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "bad-geometry");
}

#[tokio::test]
async fn layout_endpoints_404_before_any_apply() {
    let (_harness, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    for (method, path) in [
        ("GET", "/api/layout/current"),
        ("GET", "/api/audio/volumes"),
    ] {
        let resp = match method {
            "GET" => client.get(format!("http://{addr}{path}")).send().await.unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(resp.status(), 404, "{path}");
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "not-found");
    }

    let resp = client
        .post(format!("http://{addr}/api/layout/swap-audio"))
        .json(&json!({"audio_source": "inset"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("http://{addr}/api/audio/volume"))
        .json(&json!({"slot_id": "inset", "volume": 0.5}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn stream_404_when_idle_with_no_layout() {
    let (_harness, addr) = TestHarness::with_server().await;

    let resp = reqwest::get(format!("http://{addr}/stream")).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "not-found");
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_reports_idle_and_encoder() {
    let (_harness, addr) = TestHarness::with_server().await;

    let resp = reqwest::get(format!("http://{addr}/control/status")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["mode"], "idle");
    assert_eq!(body["connected_clients"], 0);
    assert!(body.get("time_until_idle").is_none());
    assert_eq!(body["encoder"]["type"], "software");
    assert_eq!(body["encoder"]["name"], "cpu");
    assert_eq!(body["encoder"]["codec"], "libx264");
    assert_eq!(body["encoder"]["preference"], "auto");
    assert!(body["stream_url"].as_str().unwrap().ends_with("/stream"));
}

#[tokio::test]
async fn failed_spawn_reports_encoder_failed_and_stays_idle() {
    let mut config = Config::default();
    config.encoder.ffmpeg = "/nonexistent/ffmpeg-binary".to_string();
    let (_harness, addr) = TestHarness::with_server_config(config).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/layout/set"))
        .json(&pip_body())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "encoder-failed");

    let resp = reqwest::get(format!("http://{addr}/control/status")).await.unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["mode"], "idle");
}

// ---------------------------------------------------------------------------
// Full lifecycle with a stub encoder
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[tokio::test]
async fn apply_stream_stop_and_cold_start() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.encoder.ffmpeg = stub_encoder(&dir);
    config.stream.startup_deadline_secs = 10;
    let (_harness, addr) = TestHarness::with_server_config(config).await;
    let client = reqwest::Client::new();

    // Apply: idle -> live.
    let resp = client
        .post(format!("http://{addr}/api/layout/set"))
        .json(&pip_body())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let status: serde_json::Value = reqwest::get(format!("http://{addr}/control/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["mode"], "live");

    // A viewer gets MPEG-TS bytes.
    let mut resp = client.get(format!("http://{addr}/stream")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "video/mp2t"
    );
    let chunk = resp.chunk().await.unwrap().unwrap();
    assert!(!chunk.is_empty());
    drop(resp);

    // Stop: live -> idle, last-good layout retained.
    let resp = client.get(format!("http://{addr}/control/stop")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "idle");

    let current: serde_json::Value = client
        .get(format!("http://{addr}/api/layout/current"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["layout"], "pip");

    // A new viewer cold-starts the stream from the remembered layout.
    let mut resp = client.get(format!("http://{addr}/stream")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let chunk = resp.chunk().await.unwrap().unwrap();
    assert!(!chunk.is_empty());

    let status: serde_json::Value = reqwest::get(format!("http://{addr}/control/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["mode"], "live");
}

#[cfg(unix)]
#[tokio::test]
async fn bad_apply_leaves_running_child_undisturbed() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.encoder.ffmpeg = stub_encoder(&dir);
    let (_harness, addr) = TestHarness::with_server_config(config).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/layout/set"))
        .json(&pip_body())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Invalid apply while live: rejected, stream stays live.
    let resp = client
        .post(format!("http://{addr}/api/layout/set"))
        .json(&json!({
            "layout": "grid_2x2",
            "streams": {"slot1": "a"},
            "audio_source": "slot1"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let status: serde_json::Value = reqwest::get(format!("http://{addr}/control/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["mode"], "live");

    let current: serde_json::Value = client
        .get(format!("http://{addr}/api/layout/current"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["layout"], "pip");
}

#[cfg(unix)]
#[tokio::test]
async fn volume_change_recompiles_and_sticks() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.encoder.ffmpeg = stub_encoder(&dir);
    let (_harness, addr) = TestHarness::with_server_config(config).await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://{addr}/api/layout/set"))
        .json(&pip_body())
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("http://{addr}/api/audio/volume"))
        .json(&json!({"slot_id": "inset", "volume": 0.5}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["volume"], 0.5);

    let volumes: serde_json::Value = client
        .get(format!("http://{addr}/api/audio/volumes"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(volumes["layout"], "pip");
    assert_eq!(volumes["volumes"]["inset"], 0.5);
    assert_eq!(volumes["volumes"]["main"], 1.0);
    assert_eq!(volumes["streams"]["main"], "a");

    // Out-of-range volumes clamp on ingest.
    let resp = client
        .post(format!("http://{addr}/api/audio/volume"))
        .json(&json!({"slot_id": "inset", "volume": 3.5}))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["volume"], 1.0);
}

#[cfg(unix)]
#[tokio::test]
async fn swap_audio_rederives_volumes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.encoder.ffmpeg = stub_encoder(&dir);
    let (_harness, addr) = TestHarness::with_server_config(config).await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://{addr}/api/layout/set"))
        .json(&pip_body())
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("http://{addr}/api/layout/swap-audio"))
        .json(&json!({"audio_source": "inset"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let volumes: serde_json::Value = client
        .get(format!("http://{addr}/api/audio/volumes"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(volumes["volumes"]["inset"], 1.0);
    assert_eq!(volumes["volumes"]["main"], 0.0);

    // Swapping to an unassigned slot is rejected.
    let resp = client
        .post(format!("http://{addr}/api/layout/swap-audio"))
        .json(&json!({"audio_source": "narrator"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
