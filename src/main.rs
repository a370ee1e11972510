mod collectors;
mod config;
mod context;
mod http;
mod metrics;
mod observation;
mod orchestrator;
mod parse;
mod runner;
mod state;

use axum::serve;
use clap::Parser;
use config::Config;
use context::ZoneContext;
use orchestrator::Orchestrator;
use runner::SystemRunner;
use state::{now_unix, State};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tracing::{error, info};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "smartos-exporter")]
#[command(version)]
struct Cli {
    /// YAML config file; built-in defaults apply without it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `listen` from the config file.
    #[arg(long)]
    listen: Option<String>,
    /// Skips `zonename` detection.
    #[arg(long, value_enum)]
    context: Option<ZoneContext>,
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match &cli.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "failed to load configuration");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
    }
    if let Err(err) = cfg.validate() {
        error!(error = %err, "failed to load configuration");
        std::process::exit(1);
    }

    let runner = Arc::new(SystemRunner);
    let context = match cli.context {
        Some(context) => context,
        None => match context::detect(runner.as_ref(), cfg.command_timeout).await {
            Ok(context) => context,
            Err(err) => {
                error!(error = %err, "failed to detect zone context");
                std::process::exit(1);
            }
        },
    };

    let sources = collectors::sources_for(context, &cfg);
    info!(
        listen = %cfg.listen,
        context = %context,
        collectors = sources.len(),
        "starting smartos-exporter"
    );

    let state = Arc::new(RwLock::new(State::new(context, now_unix())));
    let orchestrator = match Orchestrator::new(runner, sources, state, cfg.command_timeout) {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };

    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "invalid listen address");
            std::process::exit(1);
        }
    };
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "failed to bind HTTP server");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(orchestrator);
            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");
    let _ = shutdown_tx.send(true);
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    log_subscriber(filter, std::io::stderr).init();
}

// stdout stays reserved for --print-default-config
fn log_subscriber<W>(filter: EnvFilter, writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .finish()
}
