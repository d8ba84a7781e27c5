//! Channel catalog built from an M3U playlist.
//!
//! The playlist is fetched from an HTTP URL or read from a local path,
//! parsed into [`Channel`] records, and swapped in atomically under the
//! catalog lock. Individual malformed entries are skipped; a transport
//! failure leaves the previous catalog intact.

use crate::config::CatalogConfig;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// One playlist entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Channel {
    /// `tvg-id` from the playlist, or a minted UUID when absent.
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    pub stream_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_number: Option<String>,
}

/// In-memory channel catalog with atomic replacement.
pub struct Catalog {
    channels: RwLock<Arc<Vec<Channel>>>,
    source: Option<String>,
    service_name: String,
    http: reqwest::Client,
}

impl Catalog {
    pub fn new(config: &CatalogConfig, http: reqwest::Client) -> Self {
        Self {
            channels: RwLock::new(Arc::new(Vec::new())),
            source: config.source.clone(),
            service_name: config.service_name.clone(),
            http,
        }
    }

    /// Build a catalog pre-seeded with channels and no source. Used by tests
    /// and by deployments that inject channels programmatically.
    pub fn from_channels(channels: Vec<Channel>) -> Self {
        Self {
            channels: RwLock::new(Arc::new(channels)),
            source: None,
            service_name: CatalogConfig::default().service_name,
            http: reqwest::Client::new(),
        }
    }

    /// Fetch and parse the configured source, then replace the catalog.
    ///
    /// The fetch happens outside the lock; the swap is a single write. On
    /// failure the previous catalog is left untouched.
    pub async fn load(&self) -> Result<usize> {
        let source = self
            .source
            .as_deref()
            .ok_or_else(|| Error::SourceUnavailable("no M3U source configured".into()))?;

        let text = if source.starts_with("http://") || source.starts_with("https://") {
            let response = self
                .http
                .get(source)
                .send()
                .await
                .map_err(|e| Error::SourceUnavailable(e.to_string()))?;
            if !response.status().is_success() {
                return Err(Error::SourceUnavailable(format!(
                    "playlist fetch returned {}",
                    response.status()
                )));
            }
            response
                .text()
                .await
                .map_err(|e| Error::SourceUnavailable(e.to_string()))?
        } else {
            tokio::fs::read_to_string(source)
                .await
                .map_err(|e| Error::SourceUnavailable(format!("{source}: {e}")))?
        };

        let channels = parse_m3u(&text, &self.service_name);
        let count = channels.len();
        *self.channels.write() = Arc::new(channels);
        tracing::info!(count, source, "Catalog loaded");
        Ok(count)
    }

    /// Snapshot of the current channel list.
    pub fn list(&self) -> Arc<Vec<Channel>> {
        Arc::clone(&self.channels.read())
    }

    /// Look up a channel by id.
    pub fn resolve(&self, id: &str) -> Result<Channel> {
        self.channels
            .read()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("channel", id))
    }
}

/// Parse M3U extended playlist text into channels.
///
/// Recognizes `#EXTINF:<duration> [key="value"...][,<display>]` followed by a
/// non-comment URL line. Entries named after the service itself are dropped
/// so the broadcast never feeds back into its own catalog.
pub fn parse_m3u(text: &str, service_name: &str) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut pending: Option<(HashMap<String, String>, Option<String>)> = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            pending = Some(parse_extinf(info));
        } else if line.is_empty() || line.starts_with('#') {
            continue;
        } else if let Some((attrs, display)) = pending.take() {
            let display_name = display
                .or_else(|| attrs.get("tvg-name").cloned())
                .unwrap_or_default();
            if display_name.is_empty() || display_name == service_name {
                continue;
            }
            channels.push(Channel {
                id: attrs
                    .get("tvg-id")
                    .filter(|v| !v.is_empty())
                    .cloned()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                display_name,
                logo_url: attrs.get("tvg-logo").cloned(),
                stream_url: line.to_string(),
                group: attrs.get("group-title").cloned(),
                channel_number: attrs.get("tvg-chno").cloned(),
            });
        }
    }

    channels
}

/// Split an EXTINF payload (everything after the colon) into quoted
/// attributes and the display name following the comma.
fn parse_extinf(info: &str) -> (HashMap<String, String>, Option<String>) {
    let mut attrs = HashMap::new();
    let mut rest = info;

    // Skip the duration token.
    let after_duration = rest
        .find(|c: char| c.is_whitespace() || c == ',')
        .map(|i| &rest[i..])
        .unwrap_or("");
    rest = after_duration;

    // Consume key="value" pairs.
    loop {
        let trimmed = rest.trim_start();
        let Some(eq) = trimmed.find('=') else { break };
        let key = trimmed[..eq].trim();
        if key.is_empty() || key.contains(',') || !trimmed[eq + 1..].starts_with('"') {
            break;
        }
        let value_start = eq + 2;
        let Some(end) = trimmed[value_start..].find('"') else { break };
        attrs.insert(
            key.to_string(),
            trimmed[value_start..value_start + end].to_string(),
        );
        rest = &trimmed[value_start + end + 1..];
    }

    let display = rest
        .find(',')
        .map(|i| rest[i + 1..].trim().to_string())
        .filter(|s| !s.is_empty());

    (attrs, display)
}
