use clap::Parser;
use copilot_bridge::auth::{ConsolePrompt, CredentialManager, CredentialStore};
use copilot_bridge::config::config_search_paths;
use copilot_bridge::{build_router, AppState, BackendClient, BridgeConfig, ModelResolver, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "copilot-bridge",
    about = "OpenAI- and Anthropic-compatible chat API on top of GitHub Copilot",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose logging and per-request console summaries
    #[arg(short, long)]
    debug: bool,

    /// Log file path
    #[arg(long, default_value = "copilot-bridge.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,

    /// Delete the stored GitHub credential and exit
    #[arg(long)]
    logout: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "copilot_bridge=debug,tower_http=debug"
    } else {
        "copilot_bridge=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = BridgeConfig::find_and_load(cli.config.as_deref())?;
    config.apply_env_overrides();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.debug {
        config.debug = true;
    }

    let store = CredentialStore::new(config.credential_path()?);

    if cli.logout {
        store.remove()?;
        println!("Removed stored credential at {}", store.path().display());
        return Ok(());
    }

    let logger = SharedLogger::new(&cli.log_file)?;
    let http = reqwest::Client::builder().build()?;

    let credentials = Arc::new(CredentialManager::new(
        http.clone(),
        config.auth.clone(),
        &config.backend,
        store,
        Arc::new(ConsolePrompt),
    ));

    // Authorize before accepting traffic so the device-flow prompt is not
    // interleaved with request logs.
    let token = credentials.token().await?;
    info!(expires_at = ?token.expires_at(), "Authorized with GitHub Copilot");

    let models = ModelResolver::new(&config.models);
    let backend = BackendClient::new(http, &config.backend, credentials);

    info!("╔═══════════════════════════════════════════════════════╗");
    info!("║           copilot-bridge v{}                  ║", env!("CARGO_PKG_VERSION"));
    info!("╚═══════════════════════════════════════════════════════╝");
    info!("  Backend:   {}", backend.endpoint());
    info!("  Default:   {}", models.default_model());
    info!("  Big/Small: {} / {}", config.models.big, config.models.small);
    info!("  Models:    {} aliases", models.aliases().len());
    info!("  Timeout:   {:?}", config.request_timeout());
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting copilot-bridge backend={} addr={}",
            backend.endpoint(),
            config.bind_addr()
        ),
    );

    let bind_addr = config.bind_addr();
    let port = config.port;
    let state = Arc::new(AppState {
        config,
        models,
        backend,
        logger,
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("");
    info!("  OpenAI-style:    http://localhost:{}/v1/chat/completions", port);
    info!("  Anthropic-style: ANTHROPIC_BASE_URL=http://localhost:{}/anthropic", port);
    info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
