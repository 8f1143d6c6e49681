//! Lingo Tutor server
//!
//! Main entry point serving the tutoring HTTP API.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tutor_engine::{
    create_router, AppState, ChatCompletionsGenerator, Config, GenerationClient,
    InMemorySessionStore, JsonSourceCatalog, TextGenerator, TutorEngine,
};

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3000;

/// Lingo Tutor - conversational language practice
///
/// Serves practice sessions over source texts and dialogs: AI replies,
/// per-turn error analysis and end-of-session reviews.
#[derive(Parser, Debug)]
#[command(name = "tutor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: tutor.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Path to the source catalog, overriding the config file
    #[arg(short, long, value_name = "FILE")]
    sources: Option<String>,

    /// Address to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port for the HTTP API server
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

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

    tracing::info!("Lingo Tutor starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run_server(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration and content, then serves until Ctrl+C.
async fn run_server(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(ref sources) = args.sources {
        config.sources_path.clone_from(sources);
    }

    config.validate()?;
    print_config(&config);

    let catalog = JsonSourceCatalog::load(&config.sources_path).map_err(|e| {
        anyhow::anyhow!("{e}\n\nSuggestion: Point --sources at a JSON array of texts and dialogs")
    })?;
    println!("  Sources: {}", catalog.len());

    let backend = ChatCompletionsGenerator::from_config(&config.generator)?;
    if !backend.is_ready() {
        println!(
            "  Warning: {} is not set, generation requests will be rejected upstream",
            config.generator.api_key_env
        );
    }
    let generator = GenerationClient::new(Arc::new(backend), config.generator.timeout());

    let engine = TutorEngine::new(
        Arc::new(InMemorySessionStore::new()),
        Arc::new(catalog),
        generator,
        &config,
    );
    let router = create_router(AppState::new(config, engine));

    let addr = SocketAddr::new(args.host, args.port);
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves when Ctrl+C is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

/// Loads configuration from an explicit path or the current directory.
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

/// Prints the effective configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Source catalog: {}", config.sources_path);
    println!("  Default language: {}", config.default_language.name());
    println!(
        "  Generator: {} ({})",
        config.generator.model, config.generator.endpoint
    );
    println!(
        "  Quotas per {}s: lifecycle {}, turn {}, overview {}",
        config.rate_limits.window_seconds,
        config.rate_limits.lifecycle,
        config.rate_limits.turn,
        config.rate_limits.overview
    );
}
