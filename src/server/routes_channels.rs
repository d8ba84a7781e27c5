//! Channel catalog and image proxy routes.

use crate::catalog::Channel;
use crate::error::{Error, Result};
use crate::server::AppContext;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Snapshot of the channel catalog.
#[derive(Serialize, ToSchema)]
pub struct ChannelsResponse {
    pub channels: Vec<Channel>,
    pub count: usize,
}

fn catalog_snapshot(ctx: &AppContext) -> ChannelsResponse {
    let channels = ctx.catalog.list().as_ref().clone();
    let count = channels.len();
    ChannelsResponse { channels, count }
}

/// List the current channel catalog.
#[utoipa::path(
    get,
    path = "/api/channels",
    tag = "channels",
    responses(
        (status = 200, description = "Catalog snapshot", body = ChannelsResponse)
    )
)]
pub async fn list_channels(State(ctx): State<AppContext>) -> Json<ChannelsResponse> {
    Json(catalog_snapshot(&ctx))
}

/// Reload the catalog from the configured M3U source.
#[utoipa::path(
    post,
    path = "/api/channels/refresh",
    tag = "channels",
    responses(
        (status = 200, description = "Reloaded catalog", body = ChannelsResponse),
        (status = 502, description = "Source fetch failed, prior catalog retained")
    )
)]
pub async fn refresh_channels(
    State(ctx): State<AppContext>,
) -> Result<Json<ChannelsResponse>> {
    ctx.catalog.load().await?;
    Ok(Json(catalog_snapshot(&ctx)))
}

#[derive(Deserialize, IntoParams)]
pub struct ProxyImageQuery {
    /// Absolute image URL to fetch.
    pub url: String,
}

/// Pass-through image fetch, preserving the upstream MIME type.
#[utoipa::path(
    get,
    path = "/api/proxy-image",
    tag = "channels",
    params(ProxyImageQuery),
    responses(
        (status = 200, description = "Image bytes with the upstream content type"),
        (status = 502, description = "Upstream fetch failed")
    )
)]
pub async fn proxy_image(
    State(ctx): State<AppContext>,
    Query(query): Query<ProxyImageQuery>,
) -> Result<Response> {
    if !query.url.starts_with("http://") && !query.url.starts_with("https://") {
        return Err(Error::SourceUnavailable(
            "url must be an absolute http(s) URL".into(),
        ));
    }

    let upstream = ctx
        .http
        .get(&query.url)
        .send()
        .await
        .map_err(|e| Error::SourceUnavailable(e.to_string()))?;

    if !upstream.status().is_success() {
        return Err(Error::SourceUnavailable(format!(
            "image fetch returned {}",
            upstream.status()
        )));
    }

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| Error::SourceUnavailable(e.to_string()))?;

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}
