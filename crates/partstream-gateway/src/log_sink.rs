//! Shipping of structured logs to Elasticsearch.
//!
//! [`ElasticsearchLayer`] turns every event into a JSON document carrying the
//! fields of its enclosing spans (so `trace.id` lands on every line of a
//! call) and queues it; [`LogShipper`] posts queued documents to a daily
//! index. Logging is best-effort: a full queue drops the event and a failed
//! post is reported on stderr, never to the caller.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;
use url::Url;

/// Targets whose events are never shipped (the shipper's own HTTP stack)
const SKIPPED_TARGETS: &[&str] = &["hyper", "reqwest", "h2", "rustls", "tower"];

/// Log sink configuration
#[derive(Clone, Debug)]
pub struct LogSinkConfig {
    /// Elasticsearch base URL
    pub url: String,
    /// Index prefix; documents go to `{index}-{YYYY.MM.DD}`
    pub index: String,
    /// Value of the `host.name` field
    pub host_name: String,
    /// Documents queued before new events are dropped
    pub capacity: usize,
}

impl LogSinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            index: "log".to_string(),
            host_name: "partstream-gateway".to_string(),
            capacity: 1024,
        }
    }
}

/// Create the layer and the shipper that drains it.
///
/// The shipper must be spawned on a runtime; it returns once the layer is
/// dropped and the queue is empty.
pub fn log_sink(config: LogSinkConfig) -> anyhow::Result<(ElasticsearchLayer, LogShipper)> {
    let base = Url::parse(&config.url)?;
    if !matches!(base.scheme(), "http" | "https") {
        anyhow::bail!("unsupported log sink scheme: {}", base.scheme());
    }
    let (tx, rx) = mpsc::channel(config.capacity.max(1));

    let layer = ElasticsearchLayer {
        tx,
        host_name: config.host_name,
    };
    let shipper = LogShipper {
        rx,
        client: reqwest::Client::new(),
        base,
        index: config.index.to_lowercase(),
    };
    Ok((layer, shipper))
}

/// Tracing layer queueing events as JSON documents
pub struct ElasticsearchLayer {
    tx: mpsc::Sender<Value>,
    host_name: String,
}

/// Fields recorded on a span, kept in its extensions
#[derive(Default)]
struct SpanFields(Map<String, Value>);

struct JsonVisitor<'a>(&'a mut Map<String, Value>);

impl Visit for JsonVisitor<'_> {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), Value::from(format!("{:?}", value)));
    }
}

impl<S> Layer<S> for ElasticsearchLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut fields = SpanFields::default();
        attrs.record(&mut JsonVisitor(&mut fields.0));
        span.extensions_mut().insert(fields);
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            values.record(&mut JsonVisitor(&mut fields.0));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_skipped(metadata.target()) {
            return;
        }

        let mut doc = Map::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(fields) = span.extensions().get::<SpanFields>() {
                    doc.extend(fields.0.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }
        event.record(&mut JsonVisitor(&mut doc));

        doc.insert(
            "@timestamp".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        doc.insert("level".to_string(), Value::from(metadata.level().to_string()));
        doc.insert("target".to_string(), Value::from(metadata.target()));
        doc.insert("host.name".to_string(), Value::from(self.host_name.as_str()));

        // Full queue: drop the event
        let _ = self.tx.try_send(Value::Object(doc));
    }
}

fn is_skipped(target: &str) -> bool {
    SKIPPED_TARGETS.iter().any(|skipped| {
        target == *skipped
            || target
                .strip_prefix(skipped)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

/// Posts queued documents to Elasticsearch
pub struct LogShipper {
    rx: mpsc::Receiver<Value>,
    client: reqwest::Client,
    base: Url,
    index: String,
}

impl LogShipper {
    /// URL documents logged at `now` are posted to
    pub fn document_url(&self, now: DateTime<Utc>) -> String {
        format!(
            "{}/{}-{}/_doc",
            self.base.as_str().trim_end_matches('/'),
            self.index,
            now.format("%Y.%m.%d")
        )
    }

    /// Ship documents until the layer is gone
    pub async fn run(mut self) {
        let mut failing = false;
        while let Some(doc) = self.rx.recv().await {
            let url = self.document_url(Utc::now());
            let result = self
                .client
                .post(url)
                .json(&doc)
                .send()
                .await
                .and_then(|r| r.error_for_status());

            match result {
                Ok(_) => failing = false,
                Err(e) => {
                    if !failing {
                        eprintln!("failed to ship log document: {}", e);
                    }
                    failing = true;
                }
            }
        }
    }
}
