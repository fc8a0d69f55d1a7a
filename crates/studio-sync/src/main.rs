//! # studio-sync
//!
//! Studio configuration sync server binary. Loads settings, connects the
//! message bus and config cache, and serves privileged `WebSocket` sessions
//! until interrupted.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use studio_core::ConfigEntry;
use studio_core::logging::init_subscriber;
use studio_server::auth::TokenVerifier;
use studio_server::bus::{InMemoryBus, MessageBus, RedisBus};
use studio_server::config::ServerConfig;
use studio_server::metrics::install_recorder;
use studio_server::server::StudioSyncServer;
use studio_server::store::{ConfigReader, FallbackReader, InMemoryConfigStore, RedisConfigCache};
use studio_settings::{BusBackend, StudioSettings};

/// Studio configuration sync server.
#[derive(Parser, Debug)]
#[command(name = "studio-sync", about = "Studio configuration sync server")]
struct Cli {
    /// Path to a JSON settings file. Defaults plus environment when omitted.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Message bus backend: `redis` or `memory` (overrides settings).
    #[arg(long)]
    bus: Option<String>,

    /// JSON array of config entries to preload into the local store.
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Seconds to wait for background tasks on shutdown.
    #[arg(long, default_value = "10")]
    shutdown_timeout: u64,
}

fn load_settings(cli: &Cli) -> Result<StudioSettings> {
    let mut settings = match &cli.settings {
        Some(path) => studio_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => studio_settings::load_settings().context("Failed to load settings")?,
    };

    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(bus) = &cli.bus {
        settings.bus.backend = match bus.to_ascii_lowercase().as_str() {
            "redis" => BusBackend::Redis,
            "memory" => BusBackend::Memory,
            other => anyhow::bail!("unknown bus backend: {other}"),
        };
    }

    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn load_seed(path: &Path, store: &InMemoryConfigStore) -> Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let entries: Vec<ConfigEntry> =
        serde_json::from_str(&raw).context("Seed file is not a JSON array of config entries")?;
    let count = entries.len();
    for entry in entries {
        let id = entry.id.clone();
        let _ = store
            .upsert(entry)
            .with_context(|| format!("Invalid seed entry {id}"))?;
    }
    Ok(count)
}

/// Redis mode reads snapshots through the process-local store, which only
/// holds what `--seed` loads. Without it every resync would be empty.
fn require_seed(settings: &StudioSettings, cli: &Cli) -> Result<()> {
    if settings.bus.backend == BusBackend::Redis && cli.seed.is_none() {
        anyhow::bail!("--seed is required with the redis backend: it is the authoritative snapshot source");
    }
    Ok(())
}

async fn connect_backends(
    settings: &StudioSettings,
    store: Arc<InMemoryConfigStore>,
) -> Result<(Arc<dyn MessageBus>, Arc<dyn ConfigReader>)> {
    match settings.bus.backend {
        BusBackend::Memory => {
            let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
            let reader: Arc<dyn ConfigReader> = store;
            Ok((bus, reader))
        }
        BusBackend::Redis => {
            let bus = RedisBus::connect(&settings.bus.url)
                .await
                .context("Failed to connect message bus")?;
            let cache = RedisConfigCache::connect(&settings.bus.url, settings.store.cache_prefix.clone())
                .await
                .context("Failed to connect config cache")?;
            let bus: Arc<dyn MessageBus> = Arc::new(bus);
            let reader: Arc<dyn ConfigReader> = Arc::new(FallbackReader::new(Arc::new(cache), store));
            Ok((bus, reader))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    require_seed(&settings, &cli)?;

    init_subscriber(&settings.logging.level, settings.logging.format);
    let metrics = install_recorder();

    let store = Arc::new(InMemoryConfigStore::new());
    if let Some(seed) = &cli.seed {
        let count = load_seed(seed, &store)?;
        tracing::info!(count, path = %seed.display(), "seed entries loaded");
    }

    let (bus, reader) = connect_backends(&settings, store).await?;
    let server = StudioSyncServer::new(
        ServerConfig::from_settings(&settings),
        TokenVerifier::from_settings(&settings.auth),
        bus,
        reader,
        metrics,
    );

    let addr = server.listen().await.context("Failed to start server")?;
    tracing::info!(%addr, "studio-sync ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    server
        .stop(Some(Duration::from_secs(cli.shutdown_timeout)))
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("studio-sync").chain(args.iter().copied()))
    }

    fn settings_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn cli_overrides_settings_file() {
        let file = settings_file(r#"{"auth": {"jwtSecret": "s"}, "server": {"port": 4000}}"#);
        let path = file.path().to_str().unwrap();
        let settings = load_settings(&cli(&[
            "--settings", path, "--port", "5000", "--host", "127.0.0.1", "--bus", "MEMORY",
        ]))
        .unwrap();
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.bus.backend, BusBackend::Memory);
    }

    #[test]
    fn unknown_bus_backend_is_an_error() {
        let file = settings_file(r#"{"auth": {"jwtSecret": "s"}}"#);
        let path = file.path().to_str().unwrap();
        let err = load_settings(&cli(&["--settings", path, "--bus", "kafka"])).unwrap_err();
        assert!(err.to_string().contains("kafka"));
    }

    #[test]
    fn redis_backend_requires_seed() {
        let file = settings_file(r#"{"auth": {"jwtSecret": "s"}}"#);
        let path = file.path().to_str().unwrap();

        let redis = cli(&["--settings", path, "--bus", "redis"]);
        let err = require_seed(&load_settings(&redis).unwrap(), &redis).unwrap_err();
        assert!(err.to_string().contains("--seed"));

        let seeded = cli(&["--settings", path, "--bus", "redis", "--seed", "entries.json"]);
        assert!(require_seed(&load_settings(&seeded).unwrap(), &seeded).is_ok());

        let memory = cli(&["--settings", path, "--bus", "memory"]);
        assert!(require_seed(&load_settings(&memory).unwrap(), &memory).is_ok());
    }

    #[test]
    fn seed_entries_are_loaded() {
        let file = settings_file(
            r#"[
                {"id": "g1", "kind": "global", "name": "Branding",
                 "createdAt": "2026-01-01T00:00:00Z", "updatedAt": "2026-01-01T00:00:00Z"},
                {"id": "t1", "kind": "template", "variant": "url", "name": "Landing",
                 "createdAt": "2026-01-01T00:00:00Z", "updatedAt": "2026-01-01T00:00:00Z"}
            ]"#,
        );
        let store = InMemoryConfigStore::new();
        assert_eq!(load_seed(file.path(), &store).unwrap(), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn malformed_seed_is_an_error() {
        let file = settings_file(r#"{"not": "an array"}"#);
        let store = InMemoryConfigStore::new();
        assert!(load_seed(file.path(), &store).is_err());
        assert!(store.is_empty());
    }
}
