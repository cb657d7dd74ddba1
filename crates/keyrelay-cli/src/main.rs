use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use keyrelay_core::{
    AdapterRegistry, ChatMessage, ChatRequest, Dispatcher, Platform, ProviderRecord,
    ProviderRegistry, UnifiedSecretIssuer, build_http_client, mask_secret,
    validate_provider_list,
};
use keyrelay_gateway::{GatewayServer, GatewayState};
use keyrelay_store::{CredentialStore, MemoryStore, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{RelayConfig, StorageBackend};

#[derive(Parser)]
#[command(name = "keyrelay")]
#[command(version)]
#[command(about = "One key in front of many LLM providers")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy server
    Serve,

    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,

    /// Print the unified key callers use for /proxy
    UnifiedKey {
        /// Replace the key; the old one stops working immediately
        #[arg(long)]
        reset: bool,
    },

    /// Inspect or replace the stored provider list
    Providers {
        #[command(subcommand)]
        command: ProvidersCommand,
    },
}

#[derive(Subcommand)]
enum ProvidersCommand {
    /// List providers in failover order
    List,

    /// Replace the provider list with the JSON array in FILE
    Import {
        file: PathBuf,
    },

    /// Check every stored provider for configuration problems
    Check {
        /// Also send a short test prompt to each provider
        #[arg(long)]
        live: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config),
        Commands::Serve => cmd_serve(&cli.config).await,
        Commands::UnifiedKey { reset } => cmd_unified_key(&cli.config, reset).await,
        Commands::Providers { command } => match command {
            ProvidersCommand::List => cmd_providers_list(&cli.config).await,
            ProvidersCommand::Import { file } => cmd_providers_import(&cli.config, &file).await,
            ProvidersCommand::Check { live } => cmd_providers_check(&cli.config, live).await,
        },
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config::default_config_path();
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        restrict_permissions(&config_path)?;
        info!("Created default config at {}", config_path.display());
    }

    println!("keyrelay initialized at {}", config_dir.display());
    println!(
        "Set RELAY_ADMIN_PASSWORD, then run `keyrelay serve`. Config: {}",
        config_path.display()
    );
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path)?;
    println!("{}", cfg.to_display_toml()?);
    Ok(())
}

fn open_store(cfg: &RelayConfig) -> Result<Arc<dyn CredentialStore>> {
    match cfg.storage.backend {
        StorageBackend::Sqlite => {
            let path = cfg.storage.resolved_path();
            let store = SqliteStore::new(&path)
                .with_context(|| format!("Failed to open credential store {}", path.display()))?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory credential store; providers and the unified key are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn build_adapters(cfg: &RelayConfig) -> Result<AdapterRegistry> {
    let client = build_http_client(cfg.dispatch.to_dispatch_config().provider_timeout)?;
    Ok(AdapterRegistry::with_defaults(client))
}

async fn cmd_serve(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path)?;
    info!("Starting keyrelay...");

    let store = open_store(&cfg)?;
    let adapters = build_adapters(&cfg)?;
    let dispatch = cfg.dispatch.to_dispatch_config();
    let addr = cfg.server.socket_addr()?;

    if cfg.admin.password.is_empty() {
        warn!("No admin password configured; /auth, /keys and /manage will refuse every request");
    }

    let state = GatewayState::new(store, adapters, dispatch, cfg.admin.password.clone());

    match state.providers.list().await {
        Ok(records) if records.is_empty() => {
            warn!("No providers configured yet; /proxy answers 503 until some are added")
        }
        Ok(records) => info!("{} provider(s) configured", records.len()),
        Err(e) => warn!("Could not read provider list: {}", e),
    }
    let unified = state.issuer.get_or_create().await?;
    info!("Unified key ready ({})", mask_secret(&unified));
    info!(
        "Dispatch limits: {}s per provider, {}s margin",
        dispatch.provider_timeout.as_secs(),
        dispatch.deadline_margin.as_secs()
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    let server = GatewayServer::new(addr, state);
    let mut server_task =
        tokio::spawn(async move { server.run(async move { shutdown.cancelled().await }).await });

    let finished = tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
            server_task.await
        }
        finished = &mut server_task => finished,
    };

    match finished {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Gateway error: {}", e);
            return Err(e);
        }
        Err(e) => bail!("Gateway task failed: {}", e),
    }

    println!("keyrelay stopped.");
    Ok(())
}

async fn cmd_unified_key(config_path: &Option<PathBuf>, reset: bool) -> Result<()> {
    let cfg = RelayConfig::load(config_path)?;
    let issuer = UnifiedSecretIssuer::new(open_store(&cfg)?);
    let key = if reset {
        issuer.reset().await?
    } else {
        issuer.get_or_create().await?
    };
    println!("{}", key);
    Ok(())
}

async fn cmd_providers_list(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path)?;
    let registry = ProviderRegistry::new(open_store(&cfg)?);
    let records = registry.list().await?;

    if records.is_empty() {
        println!("No providers configured.");
        return Ok(());
    }
    for (idx, record) in records.iter().enumerate() {
        println!("{}", describe_record(idx, record));
    }
    Ok(())
}

fn describe_record(idx: usize, record: &ProviderRecord) -> String {
    format!(
        "{:>3}  {:<18} key={:<14} model={:<24} base={}",
        idx,
        record.platform,
        mask_secret(&record.secret_key),
        record.configured_model().unwrap_or("-"),
        record.configured_base_url().unwrap_or("(default)")
    )
}

async fn cmd_providers_import(config_path: &Option<PathBuf>, file: &Path) -> Result<()> {
    let cfg = RelayConfig::load(config_path)?;
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let records: Vec<ProviderRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("{} must hold a JSON array of provider records", file.display()))?;

    let registry = ProviderRegistry::new(open_store(&cfg)?);
    registry.replace(&records).await?;
    println!("Imported {} provider(s).", records.len());
    Ok(())
}

/// Problems that would make `record` fail before any network call
fn static_problems(record: &ProviderRecord) -> Vec<String> {
    let mut problems = Vec::new();
    if let Err(e) = validate_provider_list(std::slice::from_ref(record)) {
        problems.push(e.to_string());
    }
    if record.configured_model().is_none() {
        problems.push("no model set; requests must name one".to_string());
    }
    if record.resolve_platform().is_ok_and(|p| p == Platform::Llama) {
        problems.push("llama sends only the last user message".to_string());
    }
    problems
}

async fn cmd_providers_check(config_path: &Option<PathBuf>, live: bool) -> Result<()> {
    let cfg = RelayConfig::load(config_path)?;
    let store = open_store(&cfg)?;
    let registry = ProviderRegistry::new(store);
    let records = registry.list().await?;
    if records.is_empty() {
        println!("No providers configured.");
        return Ok(());
    }

    let dispatcher = Dispatcher::new(
        registry,
        build_adapters(&cfg)?,
        cfg.dispatch.to_dispatch_config(),
    );
    let probe = ChatRequest {
        messages: vec![ChatMessage::user("Reply with the single word: pong")],
        max_tokens: Some(8),
        ..Default::default()
    };

    let mut failed = 0;
    for (idx, record) in records.iter().enumerate() {
        println!("{}", describe_record(idx, record));
        for problem in static_problems(record) {
            println!("       ! {}", problem);
        }
        if live {
            match dispatcher
                .dispatch_over(std::slice::from_ref(record), &probe)
                .await
            {
                Ok(out) => println!("       ok ({})", out.response.model),
                Err(e) => {
                    failed += 1;
                    println!(
                        "       FAILED: {}",
                        e.last_provider_error().unwrap_or("unknown error")
                    );
                }
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} provider(s) failed the live check", failed, records.len());
    }
    Ok(())
}
