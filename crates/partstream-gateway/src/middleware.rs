//! Logging interceptor chain.
//!
//! Three layers wrap every call, outermost first:
//!
//! 1. [`trace_middleware`] extracts the trace id, opens the `rpc` span and
//!    records a [`CallContext`] for the handler.
//! 2. [`payload_middleware`] logs request and response payloads for methods
//!    the [`PayloadDecider`]s allow.
//! 3. [`outcome_middleware`] logs the terminal status of the call once.
//!
//! Streaming bodies are wrapped rather than buffered, so the layers observe
//! each outbound frame and the end of the stream without changing them.

use crate::error::{ApiError, RPC_CODE_HEADER};
use crate::routes::DOWNLOAD_METHOD;
use crate::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::stream::{BoxStream, Stream, StreamExt};
use partstream_core::{Code, RetrievalError, TraceContext, TRACE_HEADERS};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, Span};

/// Header carrying the call deadline, in gRPC timeout syntax
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Decides whether a method's payloads may be logged
pub type PayloadDecider = Arc<dyn Fn(&str) -> bool + Send + Sync>;

type DataStream = BoxStream<'static, Result<Bytes, axum::Error>>;

/// Decider that logs every method except `ignored`
pub fn ignore_methods_decider(ignored: Vec<String>) -> PayloadDecider {
    Arc::new(move |method: &str| !ignored.iter().any(|m| m == method))
}

/// Decider for response payloads: `ignored` plus the download call, whose
/// responses are whole object parts
pub fn response_payload_decider(mut ignored: Vec<String>) -> PayloadDecider {
    ignored.push(DOWNLOAD_METHOD.to_string());
    ignore_methods_decider(ignored)
}

/// Per-call state recorded by the trace layer
#[derive(Clone, Debug)]
pub struct CallContext {
    /// Full method name (the request path)
    pub method: String,
    pub trace: TraceContext,
    /// The call's `rpc` span
    pub span: Span,
    /// Cancelled when the peer goes away or the deadline passes
    pub cancel: CancellationToken,
    /// Deadline requested by the caller
    pub timeout: Option<Duration>,
    started: Instant,
}

impl CallContext {
    fn new(request: &Request) -> Self {
        let method = request.uri().path().to_string();
        let trace = extract_trace_context(request.headers());
        // ERROR level: the span must survive the default `error` filter so
        // every line of the call carries the trace id
        let span = tracing::error_span!("rpc", trace.id = %trace, rpc.method = %method);
        let timeout = request
            .headers()
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout);

        Self {
            method,
            trace,
            span,
            cancel: CancellationToken::new(),
            timeout,
            started: Instant::now(),
        }
    }
}

/// Trace context of a request.
///
/// `Elastic-Apm-Traceparent` is consulted first, then `traceparent`; each
/// header must carry exactly one well-formed value to be used.
pub fn extract_trace_context(headers: &HeaderMap) -> TraceContext {
    TRACE_HEADERS
        .iter()
        .map(|name| {
            // A value that is not valid UTF-8 is malformed, never fatal
            TraceContext::from_header_values(
                headers
                    .get_all(*name)
                    .iter()
                    .map(|v| v.to_str().unwrap_or_default()),
            )
        })
        .find(|ctx| !ctx.is_empty())
        .unwrap_or_default()
}

/// Trace id of a request, or the empty string
pub fn extract_trace_id(headers: &HeaderMap) -> String {
    extract_trace_context(headers).trace_id
}

/// Parse a gRPC timeout value such as `500m` or `10S`
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    match unit {
        "H" => Some(Duration::from_secs(amount * 3600)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

/// Trace layer: opens the call span and runs the rest of the chain in it
pub async fn trace_middleware(mut request: Request, next: Next) -> Response {
    let ctx = CallContext::new(&request);
    let span = ctx.span.clone();
    request.extensions_mut().insert(ctx);

    let response = next.run(request).instrument(span.clone()).await;
    map_body(response, |inner| {
        InSpan { inner, span }.boxed()
    })
}

/// Payload layer: logs request and response payloads
pub async fn payload_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.uri().path().to_string();
    let log_request = (state.request_decider)(&method);
    let log_response = (state.payload_decider)(&method);

    let request = if log_request {
        let (parts, body) = request.into_parts();
        let bytes = match axum::body::to_bytes(body, state.config.max_message_size).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return ApiError::invalid_argument(format!("failed to read request: {}", e))
                    .into_response()
            }
        };
        tracing::info!(
            rpc.request.content = %String::from_utf8_lossy(&bytes),
            "request payload"
        );
        Request::from_parts(parts, Body::from(bytes))
    } else {
        request
    };

    let response = next.run(request).await;
    if !log_response {
        return response;
    }
    map_body(response, |inner| {
        inner
            .inspect(|item| {
                if let Ok(chunk) = item {
                    tracing::info!(
                        rpc.response.content = %BASE64.encode(chunk),
                        rpc.response.size = chunk.len(),
                        "response payload"
                    );
                }
            })
            .boxed()
    })
}

/// Outcome layer: logs the call's status code and duration once
pub async fn outcome_middleware(request: Request, next: Next) -> Response {
    let (method, started) = match request.extensions().get::<CallContext>() {
        Some(ctx) => (ctx.method.clone(), ctx.started),
        None => (request.uri().path().to_string(), Instant::now()),
    };
    let outcome = Outcome {
        method,
        started,
        span: Span::current(),
    };

    let response = next.run(request).await;

    let code = response
        .headers()
        .get(RPC_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(Code::parse);
    match code {
        Some(code) => {
            outcome.log(Some(code));
            response
        }
        None if !response.status().is_success() => {
            outcome.log(Some(code_for_status(response.status())));
            response
        }
        // The call succeeds or fails with the body
        None => map_body(response, |inner| {
            OutcomeStream {
                inner,
                outcome: Some(outcome),
            }
            .boxed()
        }),
    }
}

/// Replace a response body with a wrapped stream of its data frames
fn map_body<F>(response: Response, wrap: F) -> Response
where
    F: FnOnce(DataStream) -> DataStream,
{
    let (parts, body) = response.into_parts();
    let stream = wrap(body.into_data_stream().boxed());
    Response::from_parts(parts, Body::from_stream(stream))
}

/// Status code of a response that did not carry one explicitly
fn code_for_status(status: StatusCode) -> Code {
    match status.as_u16() {
        404 => Code::NotFound,
        499 => Code::Cancelled,
        503 => Code::Unavailable,
        400..=498 => Code::InvalidArgument,
        _ => Code::Internal,
    }
}

/// Status code of an error that ended a response body
fn code_for_body_error(err: &axum::Error) -> Code {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(retrieval) = e.downcast_ref::<RetrievalError>() {
            return retrieval.code();
        }
        source = e.source();
    }
    Code::Internal
}

fn outcome_level(code: Code) -> Level {
    match code {
        Code::Unavailable | Code::Internal => Level::ERROR,
        Code::InvalidArgument | Code::NotFound | Code::Cancelled => Level::WARN,
    }
}

struct Outcome {
    method: String,
    started: Instant,
    span: Span,
}

impl Outcome {
    /// `None` is a successful call
    fn log(self, code: Option<Code>) {
        let _enter = self.span.enter();
        let duration_ms = self.started.elapsed().as_millis() as u64;
        let (code, level) = match code {
            Some(code) => (code.as_str(), outcome_level(code)),
            None => ("OK", Level::INFO),
        };

        if level == Level::ERROR {
            tracing::error!(rpc.code = code, rpc.duration_ms = duration_ms, "finished call {}", self.method);
        } else if level == Level::WARN {
            tracing::warn!(rpc.code = code, rpc.duration_ms = duration_ms, "finished call {}", self.method);
        } else {
            tracing::info!(rpc.code = code, rpc.duration_ms = duration_ms, "finished call {}", self.method);
        }
    }
}

/// Body stream that logs the call outcome when it ends or is dropped
struct OutcomeStream {
    inner: DataStream,
    outcome: Option<Outcome>,
}

impl Stream for OutcomeStream {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = futures::ready!(self.inner.poll_next_unpin(cx));
        match &item {
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                let code = code_for_body_error(e);
                if let Some(outcome) = self.outcome.take() {
                    outcome.log(Some(code));
                }
            }
            None => {
                if let Some(outcome) = self.outcome.take() {
                    outcome.log(None);
                }
            }
        }
        Poll::Ready(item)
    }
}

impl Drop for OutcomeStream {
    fn drop(&mut self) {
        // Dropped before the end: the peer went away
        if let Some(outcome) = self.outcome.take() {
            outcome.log(Some(Code::Cancelled));
        }
    }
}

/// Body stream polled inside a span
struct InSpan {
    inner: DataStream,
    span: Span,
}

impl Stream for InSpan {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let _enter = this.span.enter();
        this.inner.poll_next_unpin(cx)
    }
}
