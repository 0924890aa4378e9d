//! Partstream Gateway - chunked download gateway for S3-compatible stores

use clap::Parser;
use partstream_gateway::log_sink::{log_sink, LogSinkConfig};
use partstream_gateway::{run_server, GatewayConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "partstream-gateway")]
#[command(about = "Streams S3 objects to RPC clients one 5 MiB part at a time")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "PARTSTREAM_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "TCP_PORT")]
    port: u16,

    /// S3 endpoint URL
    #[arg(long, default_value = "http://localhost:9000", env = "S3_ENDPOINT")]
    s3_endpoint: String,

    /// S3 access key
    #[arg(long, env = "S3_ACCESS_KEY")]
    s3_access_key: Option<String>,

    /// S3 secret key
    #[arg(long, env = "S3_SECRET_KEY", hide_env_values = true)]
    s3_secret_key: Option<String>,

    /// S3 session token
    #[arg(long, env = "S3_TOKEN", hide_env_values = true)]
    s3_token: Option<String>,

    /// S3 signing region
    #[arg(long, default_value = "us-east-1", env = "S3_REGION")]
    s3_region: String,

    /// Bucket the health probe checks; without one only the endpoint is probed
    #[arg(long, env = "S3_HEALTH_BUCKET")]
    health_bucket: Option<String>,

    /// Seconds between health probes
    #[arg(long, default_value = "3", env = "HEALTH_CHECK_INTERVAL")]
    health_check_interval: u64,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "error", env = "LOG_LEVEL")]
    log_level: String,

    /// Elasticsearch URL to ship logs to
    #[arg(long, env = "ELASTICSEARCH_URL")]
    elasticsearch_url: Option<String>,

    /// Prefix of the daily log index
    #[arg(long, default_value = "log", env = "LOG_INDEX")]
    log_index: String,

    /// Label attached to every shipped log line
    #[arg(long, default_value = "partstream-gateway", env = "HOST_NAME")]
    host_name: String,

    /// Methods whose payloads are never logged
    #[arg(long, env = "ELASTIC_APM_IGNORE_URLS", value_delimiter = ',')]
    ignore_methods: Vec<String>,

    /// Largest message accepted or sent, in bytes
    #[arg(long, default_value_t = 10 << 20, env = "MAX_MESSAGE_SIZE")]
    max_message_size: usize,

    /// Use in-memory storage (for testing, data will not persist)
    #[arg(long, env = "PARTSTREAM_MEMORY_STORE")]
    memory_store: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))?;

    let elasticsearch = match &args.elasticsearch_url {
        Some(url) => {
            let (layer, shipper) = log_sink(LogSinkConfig {
                index: args.log_index.clone(),
                host_name: args.host_name.clone(),
                ..LogSinkConfig::new(url)
            })?;
            tokio::spawn(shipper.run());
            Some(layer)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
        .with(elasticsearch)
        .init();

    tracing::info!("Starting Partstream Gateway on {}:{}", args.host, args.port);
    tracing::info!("S3 endpoint: {}", args.s3_endpoint);

    if args.memory_store {
        tracing::warn!("Using in-memory storage - data will NOT persist!");
    }

    let config = GatewayConfig {
        host: args.host,
        port: args.port,
        s3_endpoint: args.s3_endpoint,
        s3_region: args.s3_region,
        s3_access_key: args.s3_access_key,
        s3_secret_key: args.s3_secret_key,
        s3_session_token: args.s3_token,
        health_bucket: args.health_bucket,
        health_check_interval_secs: args.health_check_interval,
        log_level: args.log_level,
        elasticsearch_url: args.elasticsearch_url,
        log_index: args.log_index,
        host_name: args.host_name,
        max_message_size: args.max_message_size,
        use_memory_store: args.memory_store,
        ..Default::default()
    }
    .ignore_payloads_of(args.ignore_methods);

    run_server(config).await
}
