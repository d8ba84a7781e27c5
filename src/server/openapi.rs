//! OpenAPI documentation and Swagger UI integration.

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::AppContext;
use super::{routes_channels, routes_control, routes_layout, routes_stream};
use crate::catalog::Channel;
use crate::encoder::EncoderKind;
use crate::layout::{CustomSlot, LayoutConfig, LayoutKind};
use crate::supervisor::Mode;

/// OpenAPI documentation for the multiview API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Multiview API",
        version = "0.1.0",
        description = "Composes live IPTV streams into a single MPEG-TS multiview broadcast",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
    ),
    servers(
        (url = "/", description = "Default server")
    ),
    paths(
        routes_channels::list_channels,
        routes_channels::refresh_channels,
        routes_channels::proxy_image,
        routes_layout::set_layout,
        routes_layout::current_layout,
        routes_layout::swap_audio,
        routes_layout::set_volume,
        routes_layout::get_volumes,
        routes_control::status,
        routes_control::stop,
        routes_stream::stream,
    ),
    components(schemas(
        Channel,
        LayoutKind,
        LayoutConfig,
        CustomSlot,
        Mode,
        EncoderKind,
        routes_channels::ChannelsResponse,
        routes_layout::StatusOk,
        routes_layout::SwapAudioRequest,
        routes_layout::VolumeRequest,
        routes_layout::VolumeResponse,
        routes_layout::VolumesResponse,
        routes_control::EncoderInfo,
        routes_control::StatusResponse,
        routes_control::StopResponse,
    )),
    tags(
        (name = "channels", description = "M3U channel catalog"),
        (name = "layout", description = "Layout composition control"),
        (name = "audio", description = "Audio mix control"),
        (name = "control", description = "Operator control"),
        (name = "stream", description = "MPEG-TS output"),
    )
)]
pub struct ApiDoc;

/// Swagger UI at `/api/docs`, raw spec at `/api/openapi.json`.
pub fn openapi_routes() -> Router<AppContext> {
    Router::new().merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()))
}
