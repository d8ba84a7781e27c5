//! Operator control routes.

use crate::encoder::EncoderKind;
use crate::server::AppContext;
use crate::supervisor::Mode;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct EncoderInfo {
    #[serde(rename = "type")]
    pub kind: EncoderKind,
    pub name: String,
    pub codec: String,
    pub preference: String,
}

#[derive(Serialize, ToSchema)]
pub struct StatusResponse {
    pub mode: Mode,
    pub connected_clients: usize,
    /// Seconds of inactivity left before the watchdog would go idle.
    /// Absent while idle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_until_idle: Option<u64>,
    pub encoder: EncoderInfo,
    pub stream_url: String,
}

/// Runtime status of the broadcast.
#[utoipa::path(
    get,
    path = "/control/status",
    tag = "control",
    responses(
        (status = 200, description = "Runtime status", body = StatusResponse)
    )
)]
pub async fn status(State(ctx): State<AppContext>) -> Json<StatusResponse> {
    let snapshot = ctx.supervisor.snapshot().await;

    let time_until_idle = match snapshot.mode {
        Mode::Idle => None,
        _ => Some(
            ctx.config
                .stream
                .idle_timeout_secs
                .saturating_sub(ctx.activity.elapsed().as_secs()),
        ),
    };

    Json(StatusResponse {
        mode: snapshot.mode,
        connected_clients: ctx.viewers.count(),
        time_until_idle,
        encoder: EncoderInfo {
            kind: ctx.profile.kind,
            name: ctx.profile.name.to_string(),
            codec: ctx.profile.codec.to_string(),
            preference: ctx.config.encoder.preference.clone(),
        },
        stream_url: format!(
            "http://{}:{}/stream",
            ctx.config.server.host, ctx.config.server.port
        ),
    })
}

#[derive(Serialize, ToSchema)]
pub struct StopResponse {
    pub status: Mode,
}

/// Stop the encoder and go idle. The last-good layout survives for cold
/// starts.
#[utoipa::path(
    get,
    path = "/control/stop",
    tag = "control",
    responses(
        (status = 200, description = "Broadcast stopped", body = StopResponse)
    )
)]
pub async fn stop(State(ctx): State<AppContext>) -> Json<StopResponse> {
    ctx.supervisor.stop().await;
    Json(StopResponse { status: Mode::Idle })
}
