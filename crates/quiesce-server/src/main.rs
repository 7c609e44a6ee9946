use clap::Parser;
use quiesce_agent::{FileSessionStore, MemorySessionStore, SessionStore};
use quiesce_core::{drain_on_signal, LifecycleController, DEFAULT_DRAIN_DEADLINE};
use quiesce_server::http::{self, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "quiesce-server")]
struct Args {
    #[arg(long, env = "QUIESCE_HTTP_ADDR", default_value = "127.0.0.1:8080")]
    http_addr: String,

    /// Session storage directory. In-memory storage when omitted.
    #[arg(long, env = "QUIESCE_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Window active executions get to finish after a termination signal.
    #[arg(long, env = "QUIESCE_DRAIN_DEADLINE_SECS", default_value_t = DEFAULT_DRAIN_DEADLINE.as_secs())]
    drain_deadline_secs: u64,

    /// Simulated backend latency of the order tools, in milliseconds.
    #[arg(long, env = "QUIESCE_TOOL_LATENCY_MS", default_value_t = 500)]
    tool_latency_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let store: Arc<dyn SessionStore> = match &args.storage_dir {
        Some(dir) => Arc::new(FileSessionStore::new(dir.clone())),
        None => Arc::new(MemorySessionStore::new()),
    };
    let controller = LifecycleController::global();

    let app = http::router(AppState {
        controller: controller.clone(),
        store,
        tool_latency: Duration::from_millis(args.tool_latency_ms),
    });

    let listener = tokio::net::TcpListener::bind(&args.http_addr)
        .await
        .expect("failed to bind http listener");
    info!(addr = %args.http_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(drain_on_signal(
            controller,
            Duration::from_secs(args.drain_deadline_secs),
        ))
        .await
        .expect("http server crashed");
}
