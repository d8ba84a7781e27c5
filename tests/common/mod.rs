//! Shared test harness for integration tests.
//!
//! Builds a full [`AppContext`] with a seeded channel catalog and the
//! software encoder profile (no probe), and can serve the router on a random
//! port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use multiview::broadcast::ViewerRegistry;
use multiview::catalog::{Catalog, Channel};
use multiview::config::Config;
use multiview::encoder;
use multiview::server::{build_router, AppContext};
use multiview::supervisor::Supervisor;
use multiview::watchdog::Activity;

pub struct TestHarness {
    pub ctx: AppContext,
}

impl TestHarness {
    /// Harness with default config and the seeded catalog.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Harness with a custom configuration.
    pub fn with_config(config: Config) -> Self {
        let viewers = Arc::new(ViewerRegistry::new());
        let (supervisor, exit_rx) = Supervisor::new(Arc::clone(&viewers));
        supervisor.spawn_monitor(exit_rx);

        let ctx = AppContext {
            config: Arc::new(config),
            catalog: Arc::new(Catalog::from_channels(seed_channels())),
            supervisor,
            viewers,
            activity: Arc::new(Activity::new()),
            profile: encoder::software(),
            http: reqwest::Client::new(),
        };

        Self { ctx }
    }

    /// Serve the router on a random port and return the bound address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::with_server_config(Config::default()).await
    }

    /// Serve the router with a custom config on a random port.
    pub async fn with_server_config(config: Config) -> (Self, SocketAddr) {
        let harness = Self::with_config(config);
        let app = build_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }
}

pub fn seed_channels() -> Vec<Channel> {
    ["a", "b", "c", "d"]
        .iter()
        .map(|id| Channel {
            id: id.to_string(),
            display_name: format!("Channel {}", id.to_uppercase()),
            logo_url: None,
            stream_url: format!("http://upstream.test/{id}.ts"),
            group: Some("Test".to_string()),
            channel_number: None,
        })
        .collect()
}
