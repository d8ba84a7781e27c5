//! The viewer-facing MPEG-TS stream route.
//!
//! Attaching a viewer while idle triggers a cold start from the remembered
//! last-good layout. The response does not complete until the first chunk is
//! available or the startup deadline expires.

use crate::broadcast::ViewerRegistry;
use crate::error::{Error, Result};
use crate::server::AppContext;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Attach as a viewer and stream MPEG-TS until disconnect.
#[utoipa::path(
    get,
    path = "/stream",
    tag = "stream",
    responses(
        (status = 200, description = "MPEG-TS byte stream (video/mp2t, chunked)"),
        (status = 404, description = "Idle and no layout has been applied yet"),
        (status = 504, description = "Cold start produced no bytes before the deadline")
    )
)]
pub async fn stream(State(ctx): State<AppContext>) -> Result<Response> {
    ctx.activity.touch();

    if !ctx.supervisor.cold_start().await? {
        return Err(Error::not_found("layout", "no layout has been applied yet"));
    }

    let (viewer_id, mut rx) = ctx.viewers.attach();
    tracing::info!(viewer_id = %viewer_id, "Viewer connected");
    // Dropped on any exit path, including handler cancellation while the
    // first chunk is awaited.
    let guard = ViewerGuard {
        viewer_id,
        registry: Arc::clone(&ctx.viewers),
    };

    let deadline = Duration::from_secs(ctx.config.stream.startup_deadline_secs);
    let first = match tokio::time::timeout(deadline, rx.recv()).await {
        Ok(Some(chunk)) => chunk,
        Ok(None) => {
            return Err(Error::EncoderFailed(
                "stream ended before the first chunk".into(),
            ));
        }
        Err(_) => return Err(Error::StartupTimeout),
    };

    let body = Body::from_stream(ViewerStream {
        first: Some(first),
        rx,
        _guard: guard,
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp2t")
        .body(body)
        .unwrap())
}

/// Detaches the viewer from the registry when dropped.
struct ViewerGuard {
    viewer_id: Uuid,
    registry: Arc<ViewerRegistry>,
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        self.registry.detach(&self.viewer_id);
    }
}

/// Streams a viewer's queue as the response body. Dropping the body (client
/// disconnect or queue closed) releases the viewer via the guard.
struct ViewerStream {
    first: Option<Bytes>,
    rx: mpsc::Receiver<Bytes>,
    _guard: ViewerGuard,
}

impl Stream for ViewerStream {
    type Item = std::result::Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(chunk) = this.first.take() {
            return Poll::Ready(Some(Ok(chunk)));
        }
        this.rx.poll_recv(cx).map(|chunk| chunk.map(Ok))
    }
}
