//! RPC route definitions

use crate::{handlers, middleware, AppState, ApiError};
use axum::{
    extract::DefaultBodyLimit,
    http::Uri,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use partstream_core::Code;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Full method name of the download call
pub const DOWNLOAD_METHOD: &str = "/download.Download/Download";

/// Full method name of the health check
pub const HEALTH_CHECK_METHOD: &str = "/grpc.health.v1.Health/Check";

/// Create the main router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(DOWNLOAD_METHOD, post(handlers::download))
        .route(
            HEALTH_CHECK_METHOD,
            get(handlers::health_check).post(handlers::health_check),
        )
        .fallback(unknown_method)
        // Interceptor chain, innermost first
        .layer(axum_middleware::from_fn(middleware::outcome_middleware))
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::payload_middleware,
        ))
        // Inside the call span so its lines carry the trace id
        .layer(TraceLayer::new_for_http())
        .layer(axum_middleware::from_fn(middleware::trace_middleware))
        .layer(DefaultBodyLimit::max(state.config.max_message_size))
        .with_state(state)
}

async fn unknown_method(uri: Uri) -> ApiError {
    ApiError::new(Code::NotFound, format!("unknown method {}", uri.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RPC_CODE_HEADER;
    use crate::handlers::FRAME_CONTENT_TYPE;
    use crate::middleware::GRPC_TIMEOUT_HEADER;
    use crate::{GatewayConfig, HealthReporter, ServingStatus};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use futures::StreamExt;
    use partstream_core::{
        ELASTIC_TRACEPARENT_HEADER, FRAME_HEADER_LEN, PART_SIZE, TRACEPARENT_HEADER,
    };
    use partstream_store::{
        ByteRange, ByteStream, MemoryObjectStore, ObjectMetadata, ObjectStore, StoreError,
    };
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;
    use tracing_subscriber::fmt::MakeWriter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::EnvFilter;

    const ELASTIC_TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const W3C_TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";

    fn router() -> (Router, HealthReporter, MemoryObjectStore) {
        let store = MemoryObjectStore::new();
        let (app, reporter) = router_with(Arc::new(store.clone()));
        (app, reporter, store)
    }

    fn router_with(store: Arc<dyn ObjectStore>) -> (Router, HealthReporter) {
        let (state, reporter) = AppState::with_store(GatewayConfig::default(), store);
        (create_router(Arc::new(state)), reporter)
    }

    fn download_body(bucket: &str, key: &str) -> Body {
        Body::from(serde_json::json!({"bucket": bucket, "key": key}).to_string())
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Memory store whose range fetches fail from `fail_from` on
    struct FlakyStore {
        inner: MemoryObjectStore,
        fail_from: u64,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn head_object(&self, bucket: &str, key: &str) -> partstream_store::Result<ObjectMetadata> {
            self.inner.head_object(bucket, key).await
        }

        async fn get_range(
            &self,
            bucket: &str,
            key: &str,
            range: ByteRange,
        ) -> partstream_store::Result<ByteStream> {
            if range.start >= self.fail_from {
                return Err(StoreError::Unavailable("connection reset by peer".into()));
            }
            self.inner.get_range(bucket, key, range).await
        }

        async fn list_buckets(&self) -> partstream_store::Result<()> {
            self.inner.list_buckets().await
        }
    }

    /// Memory store whose range fetches take `delay`
    struct SlowStore {
        inner: MemoryObjectStore,
        delay: Duration,
    }

    #[async_trait]
    impl ObjectStore for SlowStore {
        async fn head_object(&self, bucket: &str, key: &str) -> partstream_store::Result<ObjectMetadata> {
            self.inner.head_object(bucket, key).await
        }

        async fn get_range(
            &self,
            bucket: &str,
            key: &str,
            range: ByteRange,
        ) -> partstream_store::Result<ByteStream> {
            tokio::time::sleep(self.delay).await;
            self.inner.get_range(bucket, key, range).await
        }

        async fn list_buckets(&self) -> partstream_store::Result<()> {
            self.inner.list_buckets().await
        }
    }

    /// JSON log lines, written the way the binary writes them
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        /// Route this thread's logs here until the guard drops
        fn install(&self, filter: &str) -> tracing::subscriber::DefaultGuard {
            let subscriber = tracing_subscriber::registry()
                .with(EnvFilter::new(filter))
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_writer(self.clone()),
                );
            tracing::subscriber::set_default(subscriber)
        }

        fn lines(&self) -> Vec<String> {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf).lines().map(str::to_owned).collect()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_health_route() {
        let (app, reporter, _) = router();

        let request = Request::get(HEALTH_CHECK_METHOD).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        reporter.set_status(ServingStatus::Serving);
        let request = Request::post(HEALTH_CHECK_METHOD).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], br#"{"status":"SERVING"}"#);
    }

    #[tokio::test]
    async fn test_download_route_streams_frames() {
        let (app, _, store) = router();
        store.put_object("b", "k", vec![7u8; 10]);

        let request = Request::post(DOWNLOAD_METHOD)
            .body(download_body("b", "k"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], FRAME_CONTENT_TYPE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..4], &10u32.to_be_bytes());
        assert_eq!(&body[4..], &[7u8; 10]);
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_found() {
        let (app, _, _) = router();

        let request = Request::post("/download.Download/Upload")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[RPC_CODE_HEADER], "NotFound");
    }

    #[tokio::test]
    async fn test_failure_after_first_part_ends_body_with_error() {
        let inner = MemoryObjectStore::new();
        inner.put_object("b", "big.bin", patterned(2 * PART_SIZE as usize + 10));
        let (app, _) = router_with(Arc::new(FlakyStore {
            inner,
            fail_from: PART_SIZE,
        }));

        let request = Request::post(DOWNLOAD_METHOD)
            .body(download_body("b", "big.bin"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(first.len(), FRAME_HEADER_LEN + PART_SIZE as usize);
        assert!(body.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_dropping_body_stops_the_download() {
        let (app, _, store) = router();
        store.put_object("b", "big.bin", patterned(5 * PART_SIZE as usize));

        let request = Request::post(DOWNLOAD_METHOD)
            .body(download_body("b", "big.bin"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let mut body = response.into_body().into_data_stream();
        body.next().await.unwrap().unwrap();
        drop(body);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let fetched = store.stats().range_calls;
        // One part delivered, one queued, one waiting to be queued
        assert!(fetched <= 3, "fetched {} parts after the peer left", fetched);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.stats().range_calls, fetched);
    }

    #[tokio::test]
    async fn test_deadline_cancels_a_slow_download() {
        let inner = MemoryObjectStore::new();
        inner.put_object("b", "slow.bin", patterned(1024));
        let (app, _) = router_with(Arc::new(SlowStore {
            inner: inner.clone(),
            delay: Duration::from_secs(30),
        }));

        let request = Request::post(DOWNLOAD_METHOD)
            .header(GRPC_TIMEOUT_HEADER, "100m")
            .body(download_body("b", "slow.bin"))
            .unwrap();
        let response = tokio::time::timeout(Duration::from_secs(5), app.oneshot(request))
            .await
            .expect("deadline was not enforced")
            .unwrap();

        assert_eq!(response.status().as_u16(), 499);
        assert_eq!(response.headers()[RPC_CODE_HEADER], "Cancelled");
        // The only fetch was abandoned mid-flight
        assert_eq!(inner.stats().head_calls, 1);
        assert_eq!(inner.stats().range_calls, 0);
    }

    #[tokio::test]
    async fn test_trace_id_on_error_lines_at_default_level() {
        let logs = CapturedLogs::default();
        let _guard = logs.install("error");

        let inner = MemoryObjectStore::new();
        inner.put_object("b", "big.bin", patterned(PART_SIZE as usize + 10));
        let (app, _) = router_with(Arc::new(FlakyStore {
            inner: inner.clone(),
            fail_from: PART_SIZE,
        }));

        // Fails before the first part
        inner.set_available(false);
        let request = Request::post(DOWNLOAD_METHOD)
            .header(
                ELASTIC_TRACEPARENT_HEADER,
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            )
            .body(download_body("b", "big.bin"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        // Fails after the first part
        inner.set_available(true);
        let request = Request::post(DOWNLOAD_METHOD)
            .header(
                TRACEPARENT_HEADER,
                "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            )
            .body(download_body("b", "big.bin"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());

        let lines = logs.lines();
        assert!(!lines.is_empty());
        for line in &lines {
            assert!(
                line.contains(ELASTIC_TRACE_ID) || line.contains(W3C_TRACE_ID),
                "line without trace id: {}",
                line
            );
        }
        for trace_id in [ELASTIC_TRACE_ID, W3C_TRACE_ID] {
            assert!(
                lines
                    .iter()
                    .any(|l| l.contains("finished call") && l.contains(trace_id)),
                "no outcome line for {}",
                trace_id
            );
        }
    }

    #[tokio::test]
    async fn test_download_request_is_logged_but_not_its_parts() {
        let logs = CapturedLogs::default();
        let _guard = logs.install("info");
        let (app, reporter, store) = router();
        store.put_object("b", "k", vec![7u8; 10]);

        let request = Request::post(DOWNLOAD_METHOD)
            .body(download_body("b", "k"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        to_bytes(response.into_body(), usize::MAX).await.unwrap();

        let lines = logs.lines();
        assert!(lines
            .iter()
            .any(|l| l.contains("request payload") && l.contains(r#"\"key\":\"k\""#)));
        assert!(!lines.iter().any(|l| l.contains("response payload")));

        reporter.set_status(ServingStatus::Serving);
        let request = Request::get(HEALTH_CHECK_METHOD).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        to_bytes(response.into_body(), 1024).await.unwrap();
        assert!(logs.lines().iter().any(|l| l.contains("response payload")));
    }
}
