//! Download handler: streams an object one part per frame

use crate::middleware::CallContext;
use crate::{AppState, ApiError};
use axum::{
    body::{Body, Bytes},
    extract::{Extension, State},
    http::header,
    response::{IntoResponse, Response},
};
use futures::stream::{self, StreamExt};
use partstream_core::{encode_frame, sink::SinkItem, ChannelSink, RetrievalRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

/// Content type of a framed part stream
pub const FRAME_CONTENT_TYPE: &str = "application/x-partstream";

/// POST /download.Download/Download
///
/// Errors raised before the first part become an error response; later
/// errors terminate the body stream.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<CallContext>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: RetrievalRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::invalid_argument(format!("malformed request: {}", e)))?;

    let cancel = ctx.cancel.clone();
    // Held until the response body is dropped, or until this future is
    // dropped while waiting for the first part
    let guard = cancel.clone().drop_guard();

    if let Some(timeout) = ctx.timeout {
        tokio::spawn(watch_deadline(cancel.clone(), timeout).instrument(ctx.span.clone()));
    }

    // Capacity 1: at most one part is buffered ahead of the peer
    let (mut sink, mut rx) = ChannelSink::new(1);
    let engine = state.engine.clone();
    let task_cancel = cancel.clone();
    tokio::spawn(
        async move {
            let result = engine.retrieve(&request, &mut sink, &task_cancel).await;
            sink.finish(result).await;
            // Releases the deadline watcher
            task_cancel.cancel();
        }
        .instrument(ctx.span.clone()),
    );

    let first = match rx.recv().await {
        Some(Err(e)) => return Err(e.into()),
        first => first,
    };

    let frames = stream::iter(first)
        .chain(receiver_stream(rx))
        .map(move |item| {
            let _held = &guard;
            item.map(encode_frame)
        });

    Ok((
        [(header::CONTENT_TYPE, FRAME_CONTENT_TYPE)],
        Body::from_stream(frames),
    )
        .into_response())
}

fn receiver_stream(rx: mpsc::Receiver<SinkItem>) -> impl futures::Stream<Item = SinkItem> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}

/// Cancel the call once `timeout` elapses, unless it finishes first
async fn watch_deadline(cancel: CancellationToken, timeout: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(timeout) => {
            debug!(?timeout, "deadline exceeded");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}
