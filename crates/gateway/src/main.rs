//! protocol-gateway CLI entry point.
//!
//! Composition root: loads configuration, builds every component
//! (spec.md §4 A-I), binds the listener, and drives the process to exit
//! with the code [`shutdown::DrainOutcome::exit_code`] reports.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use protocol_gateway::auth::{AuthMiddleware, CredentialResolver, StaticTokenResolver};
use protocol_gateway::audit::AuditLogger;
use protocol_gateway::config::GatewayConfig;
use protocol_gateway::dispatch::Dispatcher;
use protocol_gateway::http::{build_router, AppState};
use protocol_gateway::logging;
use protocol_gateway::queue::PerTargetQueueMap;
use protocol_gateway::shutdown;
use protocol_gateway::sse::SseHub;
use protocol_gateway::store::EventStore;
use protocol_gateway::target::{TargetKind, TargetRegistry};
use protocol_gateway::upstream::{A2aHttpConfig, A2aHttpInvoker, McpStdioConfig, McpStdioInvoker, UpstreamInvoker};

/// Authenticated HTTP front door that queues, dispatches, and audits
/// requests to MCP and A2A upstreams.
#[derive(Debug, Parser)]
#[command(name = "protocol-gateway", version, about)]
struct Cli {
    /// Path to a gateway configuration file. Omit to run with defaults.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// TCP port to listen on, overriding the configuration file.
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Host/address to bind the listener to, overriding the configuration
    /// file.
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Directory holding the event store file, overriding the
    /// configuration file.
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Path to a static bearer-token file (see
    /// `auth::StaticTokenResolver::load`). Omit to deny every request.
    #[arg(long, value_name = "PATH", env = "GATEWAY_TOKENS_FILE")]
    tokens_file: Option<PathBuf>,

    /// Emit structured JSON log lines instead of the human-readable
    /// format, overriding the configuration file.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match GatewayConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if cli.log_json {
        config.log_json = true;
    }

    if logging::init(config.log_json).is_err() {
        eprintln!("a global tracing subscriber was already installed");
    }

    let exit_code = run(config, cli.tokens_file).await;
    std::process::exit(exit_code);
}

async fn run(config: GatewayConfig, tokens_file: Option<PathBuf>) -> i32 {
    let limits = match config.limits() {
        Ok(limits) => limits,
        Err(err) => {
            tracing::error!(error = %err, "invalid resource limits in configuration");
            return 1;
        }
    };

    let store = match EventStore::open(config.store_path()) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(error = %err, "failed to open event store");
            return 1;
        }
    };

    let sse = SseHub::new();
    let audit = AuditLogger::new(store, sse.clone());

    let resolver: Arc<dyn CredentialResolver> = match tokens_file {
        Some(path) => match StaticTokenResolver::load(&path) {
            Ok(resolver) => Arc::new(resolver),
            Err(err) => {
                tracing::error!(error = %err, path = %path.display(), "failed to load tokens file");
                return 1;
            }
        },
        None => {
            tracing::warn!("no --tokens-file configured, every request will be denied");
            Arc::new(StaticTokenResolver::empty())
        }
    };
    let auth = Arc::new(AuthMiddleware::new(resolver, audit.clone()));

    let targets = TargetRegistry::new(
        config.targets.iter().map(|t| (t.id.clone(), t.kind)),
    );
    let invokers: Vec<(String, Arc<dyn UpstreamInvoker>)> = config
        .targets
        .iter()
        .map(|t| (t.id.clone(), build_invoker(t, limits.timeout_ms)))
        .collect();
    let queues = PerTargetQueueMap::new(limits, invokers);

    tracing::info!(targets = config.targets.len(), port = config.port, "starting protocol-gateway");

    let dispatcher = Arc::new(Dispatcher {
        targets,
        queues,
        audit,
        sse: sse.clone(),
    });
    let state = AppState {
        dispatcher: dispatcher.clone(),
        auth,
        limits,
    };
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "failed to bind listener");
            return 1;
        }
    };
    tracing::info!(%addr, "listening");

    let serve_result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown::wait_for_shutdown_signal())
        .await;
    if let Err(err) = serve_result {
        tracing::error!(error = %err, "server task ended with an error");
    }

    // A second signal from here on means the operator wants out now, drain
    // deadline or not.
    shutdown::spawn_second_signal_guard();

    tracing::info!("draining in-flight requests");
    let deadline = std::time::Duration::from_millis(config.drain_deadline_ms);
    let outcome = shutdown::drain(&dispatcher.queues, &sse, deadline).await;
    tracing::info!(?outcome, "drain complete");

    outcome.exit_code()
}

fn build_invoker(target: &protocol_gateway::config::TargetSpec, timeout_ms: u64) -> Arc<dyn UpstreamInvoker> {
    match target.kind {
        TargetKind::Mcp => Arc::new(McpStdioInvoker::new(McpStdioConfig {
            command: target.mcp_command.clone().unwrap_or_default(),
            args: target.mcp_args.clone(),
            startup_timeout: std::time::Duration::from_millis(timeout_ms),
        })),
        TargetKind::A2a => Arc::new(A2aHttpInvoker::new(A2aHttpConfig {
            url: target.a2a_url.clone().unwrap_or_default(),
            request_timeout: std::time::Duration::from_millis(timeout_ms),
        })),
    }
}
