//! PrefSync CLI - inspect and change synchronized preferences.
//!
//! Every command opens the on-disk stores in the data directory, runs one
//! orchestrator operation and prints the result as JSON on stdout. Logs go
//! to stderr.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use prefsync_common::{
    AccountId, Contrast, DeviceIdentity, DeviceType, FontSize, PreferencePatch, TabId, ThemeMode,
};
use prefsync_storage::{
    HttpRemoteTier, KvBackend, KvTier, StorageTier, StructuredStore, TabCache,
};
use prefsync_sync::{
    Connectivity, CrossTabBridge, DeviceIdentityStore, OfflineQueue, SyncOrchestrator, TierSet,
};

use crate::config::{AppConfig, DataPaths};

#[derive(Parser)]
#[command(name = "prefsync")]
#[command(about = "PrefSync - Multi-tier preference synchronization")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding the local stores.
    #[arg(long, env = "PREFSYNC_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Account whose preferences are synchronized.
    #[arg(short, long, env = "PREFSYNC_ACCOUNT", default_value = "default", global = true)]
    account: String,

    /// JSON configuration file.
    #[arg(short, long, env = "PREFSYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Remote API root, overriding the config file.
    #[arg(long, env = "PREFSYNC_REMOTE_URL", global = true)]
    remote_url: Option<String>,

    /// Session bearer token for the remote API.
    #[arg(long, env = "PREFSYNC_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// User agent of the host, used to classify this device on first run.
    #[arg(long, env = "PREFSYNC_USER_AGENT", global = true)]
    user_agent: Option<String>,

    /// Treat the network as unavailable.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and print the resolved preferences.
    Load,

    /// Change one or more preferences.
    Save {
        /// light, dark or auto.
        #[arg(long, value_parser = parse_choice::<ThemeMode>)]
        mode: Option<ThemeMode>,

        /// small, medium, large or extra-large.
        #[arg(long, value_parser = parse_choice::<FontSize>)]
        font_size: Option<FontSize>,

        /// normal or high.
        #[arg(long, value_parser = parse_choice::<Contrast>)]
        contrast: Option<Contrast>,

        #[arg(long)]
        focus_visible: Option<bool>,

        #[arg(long)]
        reduced_motion: Option<bool>,
    },

    /// Remove the preferences from every tier.
    Clear,

    /// Show synchronization status.
    Status,

    /// Deliver queued writes to the remote.
    Drain,

    /// Show this device's identity.
    Device,

    /// Keep syncing in the background and print remote changes.
    Watch,
}

/// Parse a lowercase enum value the way it is serialized.
fn parse_choice<T: DeserializeOwned>(value: &str) -> std::result::Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unsupported value '{}'", value))
}

/// Classify this device; desktop when no user agent is given.
fn device_type(user_agent: Option<&str>) -> DeviceType {
    user_agent.map_or(DeviceType::Desktop, DeviceType::from_user_agent)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let session = Session::open(&cli).await?;

    match cli.command {
        Commands::Load => cmd_load(&session).await,

        Commands::Save {
            mode,
            font_size,
            contrast,
            focus_visible,
            reduced_motion,
        } => {
            let mut patch = PreferencePatch::default();
            if let Some(mode) = mode {
                patch = patch.with_mode(mode);
            }
            if let Some(font_size) = font_size {
                patch = patch.with_font_size(font_size);
            }
            if let Some(contrast) = contrast {
                patch = patch.with_contrast(contrast);
            }
            if let Some(focus_visible) = focus_visible {
                patch = patch.with_focus_visible(focus_visible);
            }
            if let Some(reduced_motion) = reduced_motion {
                patch = patch.with_reduced_motion(reduced_motion);
            }
            cmd_save(&session, &patch).await
        }

        Commands::Clear => cmd_clear(&session).await,

        Commands::Status => print_json(&session.orchestrator.status().await),

        Commands::Drain => cmd_drain(&session).await,

        Commands::Device => print_json(&session.identity),

        Commands::Watch => cmd_watch(&session).await,
    }
}

/// Stores and orchestrator for one CLI invocation.
struct Session {
    orchestrator: Arc<SyncOrchestrator>,
    identity: DeviceIdentity,
}

impl Session {
    async fn open(cli: &Cli) -> Result<Self> {
        let config = AppConfig::load(cli.config.as_deref())?
            .with_remote_overrides(cli.remote_url.clone(), cli.token.clone());
        let paths = DataPaths::resolve(cli.data_dir.clone())?;
        std::fs::create_dir_all(&paths.root).with_context(|| {
            format!("Failed to create data directory {}", paths.root.display())
        })?;

        let account = AccountId::new(cli.account.clone()).context("Invalid account")?;

        let backend = KvBackend::open(paths.local_store(), config.local_store_capacity)
            .await
            .context("Failed to open local store")?;
        let structured =
            StructuredStore::open(paths.offline_db()).context("Failed to open offline store")?;
        let store = backend.handle(TabId::new());

        let identity = DeviceIdentityStore::new(
            Arc::new(structured.clone()),
            Arc::new(store.clone()),
        )
        .load_or_create(device_type(cli.user_agent.as_deref()))
        .await;

        let remote: Option<Arc<dyn StorageTier>> = match &config.remote {
            Some(remote) => Some(Arc::new(
                HttpRemoteTier::new(remote, identity.clone())
                    .context("Failed to configure remote")?,
            )),
            None => {
                info!("No remote configured, preferences stay on this device");
                None
            }
        };

        let tiers = TierSet {
            tab: Arc::new(TabCache::new()),
            local: Arc::new(KvTier::new(store.clone(), &account)),
            offline: Arc::new(structured.tier(&account)),
            remote,
        };
        let queue = OfflineQueue::new(Arc::new(structured), &account)
            .with_warning_cap(config.sync.attempt_warning_cap);
        let bridge =
            CrossTabBridge::new(store, &account).with_debounce(config.sync.broadcast_debounce());

        let orchestrator = SyncOrchestrator::new(
            tiers,
            queue,
            Connectivity::new(!cli.offline),
            config.sync,
        )
        .with_bridge(bridge);

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            identity,
        })
    }
}

async fn cmd_load(session: &Session) -> Result<()> {
    let result = session.orchestrator.load().await;
    print_json(&result)
}

async fn cmd_save(session: &Session, patch: &PreferencePatch) -> Result<()> {
    if patch.is_empty() {
        anyhow::bail!("Nothing to save, pass at least one preference flag");
    }

    let outcomes = session.orchestrator.save(patch).await;
    session
        .orchestrator
        .flush_broadcasts()
        .await
        .context("Failed to notify other tabs")?;
    print_json(&serde_json::json!({
        "document": session.orchestrator.current().await,
        "outcomes": outcomes,
    }))
}

async fn cmd_clear(session: &Session) -> Result<()> {
    let outcomes = session.orchestrator.clear().await;
    print_json(&outcomes)
}

async fn cmd_drain(session: &Session) -> Result<()> {
    let report = session.orchestrator.drain_queue().await;
    print_json(&serde_json::json!({
        "drained": report.drained,
        "remaining": report.remaining,
        "retryAfterMs": report.retry_after.map(|d| d.as_millis() as u64),
    }))
}

async fn cmd_watch(session: &Session) -> Result<()> {
    let orchestrator = &session.orchestrator;
    print_json(&orchestrator.load().await)?;

    orchestrator.on_remote_change(|doc| match serde_json::to_string(doc) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!(error = %e, "Failed to print preferences"),
    });
    let bridge = orchestrator.spawn_bridge_listener();
    let drain_loop = orchestrator.spawn_drain_loop();

    info!("Watching for changes, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    drain_loop.shutdown().await;
    if let Some(bridge) = bridge {
        bridge.abort();
    }
    orchestrator
        .flush_broadcasts()
        .await
        .context("Failed to notify other tabs")?;
    Ok(())
}
