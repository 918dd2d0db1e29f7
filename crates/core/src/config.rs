use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    env_opt(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data source: a JSON file path or an `http(s)://` URL.
    pub source: String,
    pub server: ServerConfig,
    pub watch: WatchConfig,
    pub store: StoreConfig,
    pub middleware: MiddlewareConfig,
    /// Directory that receives `db-<millis>.json` snapshots.
    pub snapshots: PathBuf,
    /// Suppress operator console output.
    pub quiet: bool,
}

impl Config {
    /// Build config from `JSONWATCH_*` environment variables (call `load_dotenv()` first).
    ///
    /// The CLI layers its flags on top of this.
    pub fn from_env() -> Self {
        Self {
            source: env_or("JSONWATCH_SOURCE", ""),
            server: ServerConfig::from_env(),
            watch: WatchConfig::from_env(),
            store: StoreConfig::from_env(),
            middleware: MiddlewareConfig::from_env(),
            snapshots: PathBuf::from(env_or("JSONWATCH_SNAPSHOTS", ".")),
            quiet: env_flag("JSONWATCH_QUIET"),
        }
    }

    /// Fail when the snapshots directory is missing; snapshots are only
    /// ever written there, so this is checked once at startup.
    pub fn ensure_snapshots_dir(&self) -> Result<(), CoreError> {
        if self.snapshots.is_dir() {
            Ok(())
        } else {
            Err(CoreError::SnapshotsDirMissing(self.snapshots.clone()))
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  source:      {}", self.source);
        tracing::info!("  server:      host={}, port={}", self.server.host, self.server.port);
        tracing::info!(
            "  watch:       enabled={}, routes={}, poll={}ms",
            self.watch.enabled,
            self.watch.routes.as_deref().map(Path::display).map(|d| d.to_string()).unwrap_or_else(|| "(none)".to_string()),
            self.watch.routes_poll_ms
        );
        tracing::info!(
            "  store:       id={}, foreign_key_suffix={}, read_only={}",
            self.store.id_field, self.store.foreign_key_suffix, self.store.read_only
        );
        tracing::info!(
            "  middleware:  delay={}, cors={}, gzip={}, static={}",
            self.middleware.delay_ms.map(|d| format!("{d}ms")).unwrap_or_else(|| "(none)".to_string()),
            !self.middleware.no_cors,
            !self.middleware.no_gzip,
            self.middleware.static_dir.as_deref().map(Path::display).map(|d| d.to_string()).unwrap_or_else(|| "(none)".to_string())
        );
        tracing::info!("  snapshots:   {}", self.snapshots.display());
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: String::new(),
            server: ServerConfig::default(),
            watch: WatchConfig::default(),
            store: StoreConfig::default(),
            middleware: MiddlewareConfig::default(),
            snapshots: PathBuf::from("."),
            quiet: false,
        }
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("JSONWATCH_HOST", "localhost"),
            port: env_u16("JSONWATCH_PORT", 3000),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3000,
        }
    }
}

// ── Watch ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Reload when the source or routes file changes.
    pub enabled: bool,
    /// Route rules file (pattern -> target).
    pub routes: Option<PathBuf>,
    /// Modification-time polling interval for the routes file.
    pub routes_poll_ms: u64,
}

impl WatchConfig {
    fn from_env() -> Self {
        Self {
            enabled: env_flag("JSONWATCH_WATCH"),
            routes: env_opt("JSONWATCH_ROUTES").map(PathBuf::from),
            routes_poll_ms: env_u64("JSONWATCH_ROUTES_POLL_MS", 1000),
        }
    }

    pub fn routes_poll_interval(&self) -> Duration {
        Duration::from_millis(self.routes_poll_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            routes: None,
            routes_poll_ms: 1000,
        }
    }
}

// ── Store ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Identifier field of every record.
    pub id_field: String,
    /// Appended to the singular parent name to form the nested foreign key.
    pub foreign_key_suffix: String,
    /// Reject every non-GET request.
    pub read_only: bool,
}

impl StoreConfig {
    fn from_env() -> Self {
        Self {
            id_field: env_or("JSONWATCH_ID", "id"),
            foreign_key_suffix: env_or("JSONWATCH_FOREIGN_KEY_SUFFIX", "Id"),
            read_only: env_flag("JSONWATCH_READ_ONLY"),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            foreign_key_suffix: "Id".to_string(),
            read_only: false,
        }
    }
}

// ── Middleware ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    /// Artificial latency added to every request.
    pub delay_ms: Option<u64>,
    pub no_cors: bool,
    /// Directory served ahead of the resource routes.
    pub static_dir: Option<PathBuf>,
    /// Disable gzip response compression.
    pub no_gzip: bool,
}

impl MiddlewareConfig {
    fn from_env() -> Self {
        Self {
            delay_ms: env_opt("JSONWATCH_DELAY").and_then(|v| v.parse().ok()),
            no_cors: env_flag("JSONWATCH_NO_CORS"),
            static_dir: env_opt("JSONWATCH_STATIC").map(PathBuf::from),
            no_gzip: env_flag("JSONWATCH_NO_GZIP"),
        }
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.store.id_field, "id");
        assert_eq!(config.store.foreign_key_suffix, "Id");
        assert_eq!(config.watch.routes_poll_interval(), Duration::from_millis(1000));
        assert!(config.middleware.delay().is_none());
        assert!(config.middleware.static_dir.is_none());
        assert!(!config.middleware.no_gzip);
    }

    #[test]
    fn zero_delay_is_no_delay() {
        let mw = MiddlewareConfig {
            delay_ms: Some(0),
            ..MiddlewareConfig::default()
        };
        assert!(mw.delay().is_none());
    }

    #[test]
    fn missing_snapshots_dir_names_path() {
        let config = Config {
            snapshots: PathBuf::from("definitely/not/here"),
            ..Config::default()
        };
        let err = config.ensure_snapshots_dir().unwrap_err();
        assert!(err.to_string().contains("definitely/not/here"));
    }

    #[test]
    fn existing_snapshots_dir_passes() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config {
            snapshots: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(config.ensure_snapshots_dir().is_ok());
    }
}
