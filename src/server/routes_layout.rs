//! Layout and audio control routes.
//!
//! Every mutating route follows the same shape: validate and compile first
//! (no state touched on failure), then hand the layout plus command to the
//! supervisor for an optimistic replace.

use crate::error::{Error, Result};
use crate::layout::{LayoutConfig, LayoutKind};
use crate::server::AppContext;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct StatusOk {
    pub status: String,
}

impl StatusOk {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Apply a layout: resolve channels, compile the filter graph, and start or
/// optimistically replace the encoder child.
#[utoipa::path(
    post,
    path = "/api/layout/set",
    tag = "layout",
    request_body = LayoutConfig,
    responses(
        (status = 200, description = "Layout applied", body = StatusOk),
        (status = 400, description = "Invalid layout or geometry"),
        (status = 500, description = "Encoder failed to start, prior child untouched")
    )
)]
pub async fn set_layout(
    State(ctx): State<AppContext>,
    Json(mut layout): Json<LayoutConfig>,
) -> Result<Json<StatusOk>> {
    layout.clamp_volumes();
    let cmd = ctx.compile_layout(&layout)?;
    ctx.supervisor.apply(layout, cmd).await?;
    ctx.activity.touch();
    Ok(Json(StatusOk::ok()))
}

/// The last-applied layout configuration.
#[utoipa::path(
    get,
    path = "/api/layout/current",
    tag = "layout",
    responses(
        (status = 200, description = "Last-applied configuration", body = LayoutConfig),
        (status = 404, description = "No layout applied yet")
    )
)]
pub async fn current_layout(State(ctx): State<AppContext>) -> Result<Json<LayoutConfig>> {
    ctx.supervisor
        .snapshot()
        .await
        .last_good_layout
        .map(Json)
        .ok_or_else(|| Error::not_found("layout", "none applied yet"))
}

#[derive(Deserialize, ToSchema)]
pub struct SwapAudioRequest {
    pub audio_source: String,
}

/// Switch the audio to a different slot of the live layout.
#[utoipa::path(
    post,
    path = "/api/layout/swap-audio",
    tag = "layout",
    request_body = SwapAudioRequest,
    responses(
        (status = 200, description = "Audio swapped", body = StatusOk),
        (status = 400, description = "Slot is not assigned"),
        (status = 404, description = "No layout is live")
    )
)]
pub async fn swap_audio(
    State(ctx): State<AppContext>,
    Json(req): Json<SwapAudioRequest>,
) -> Result<Json<StatusOk>> {
    let snapshot = ctx.supervisor.snapshot().await;
    let mut layout = snapshot
        .current_layout
        .ok_or_else(|| Error::not_found("layout", "no layout is live"))?;

    layout.audio_source = req.audio_source;
    // Volumes re-derive from the new audio source, like a fresh layout-set.
    layout.volumes.clear();

    let cmd = ctx.compile_layout(&layout)?;
    ctx.supervisor
        .apply_if_epoch(layout, cmd, snapshot.epoch)
        .await?;
    ctx.activity.touch();
    Ok(Json(StatusOk::ok()))
}

#[derive(Deserialize, ToSchema)]
pub struct VolumeRequest {
    pub slot_id: String,
    pub volume: f64,
}

#[derive(Serialize, ToSchema)]
pub struct VolumeResponse {
    pub status: String,
    pub slot_id: String,
    pub volume: f64,
}

/// Set one slot's mix volume and recompile the live filter graph.
#[utoipa::path(
    post,
    path = "/api/audio/volume",
    tag = "audio",
    request_body = VolumeRequest,
    responses(
        (status = 200, description = "Volume applied", body = VolumeResponse),
        (status = 400, description = "Slot is not assigned"),
        (status = 404, description = "No layout is live"),
        (status = 409, description = "Layout changed while the update was prepared")
    )
)]
pub async fn set_volume(
    State(ctx): State<AppContext>,
    Json(req): Json<VolumeRequest>,
) -> Result<Json<VolumeResponse>> {
    let snapshot = ctx.supervisor.snapshot().await;
    let mut layout = snapshot
        .current_layout
        .ok_or_else(|| Error::not_found("layout", "no layout is live"))?;

    if !layout.streams.contains_key(&req.slot_id) {
        return Err(Error::bad_layout(format!(
            "slot {} is not assigned",
            req.slot_id
        )));
    }

    let volume = req.volume.clamp(0.0, 1.0);
    layout.volumes.insert(req.slot_id.clone(), volume);

    let cmd = ctx.compile_layout(&layout)?;
    ctx.supervisor
        .apply_if_epoch(layout, cmd, snapshot.epoch)
        .await?;
    ctx.activity.touch();

    Ok(Json(VolumeResponse {
        status: "ok".to_string(),
        slot_id: req.slot_id,
        volume,
    }))
}

#[derive(Serialize, ToSchema)]
pub struct VolumesResponse {
    /// Effective volume per slot, defaults included.
    pub volumes: BTreeMap<String, f64>,
    pub layout: LayoutKind,
    pub streams: BTreeMap<String, String>,
}

/// Effective per-slot volumes of the live layout.
#[utoipa::path(
    get,
    path = "/api/audio/volumes",
    tag = "audio",
    responses(
        (status = 200, description = "Per-slot volumes", body = VolumesResponse),
        (status = 404, description = "No layout is live")
    )
)]
pub async fn get_volumes(State(ctx): State<AppContext>) -> Result<Json<VolumesResponse>> {
    let snapshot = ctx.supervisor.snapshot().await;
    let layout = snapshot
        .current_layout
        .ok_or_else(|| Error::not_found("layout", "no layout is live"))?;

    let volumes = layout
        .ordered_slots()
        .iter()
        .map(|slot| (slot.clone(), layout.volume_for(slot)))
        .collect();

    Ok(Json(VolumesResponse {
        volumes,
        layout: layout.kind,
        streams: layout.streams,
    }))
}
