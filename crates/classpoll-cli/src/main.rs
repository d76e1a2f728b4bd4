//! classpoll CLI
//!
//! Main entry point for running a classroom live-polling server.

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use classpoll_session::{create_router, AppState, Config};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// classpoll - Classroom Live Polling Server
///
/// Hosts one classroom session: the teacher asks timed multiple-choice
/// questions, students answer from their browsers, and everyone sees the
/// results and a shared chat as they happen.
#[derive(Parser, Debug)]
#[command(name = "classpoll")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: classpoll.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Port for the HTTP and WebSocket server
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind to
    #[arg(long)]
    host: Option<String>,

    /// Allowed CORS origin of the browser frontend
    #[arg(long, value_name = "URL")]
    frontend_url: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("classpoll starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run_server(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

/// Loads the configuration and serves until Ctrl+C.
async fn run_server(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    // Re-validate after overrides
    config.validate()?;

    print_config(&config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid bind address '{}:{}'\n\nSuggestion: Use an IP address such as 0.0.0.0 for --host",
                config.host, config.port
            )
        })?;

    let router = create_router(AppState::new(config));

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("Server running on http://{addr}");
    println!("WebSocket endpoint: ws://{addr}/ws");
    println!("Press Ctrl+C to stop");
    tracing::info!(%addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves when the process receives Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Applies command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(ref host) = args.host {
        config.host.clone_from(host);
    }
    if let Some(ref frontend_url) = args.frontend_url {
        config.frontend_url = Some(frontend_url.clone());
    }
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Address: {}:{}", config.host, config.port);
    println!(
        "  Frontend origin: {}",
        config.frontend_url.as_deref().unwrap_or("any")
    );
    println!("  Default time limit: {}s", config.default_time_limit);
    println!("  Chat history: {} messages", config.max_chat_messages);
}
