//! Command-line flags, layered over `JSONWATCH_*` environment config.

use std::path::PathBuf;

use clap::Parser;

use jsonwatch_core::Config;

#[derive(Parser, Debug)]
#[command(name = "jsonwatch", version, about = "Serve a JSON file as a REST API and reload it on change")]
pub struct Cli {
    /// JSON file path or http(s):// URL.
    #[arg(env = "JSONWATCH_SOURCE")]
    pub source: String,

    #[arg(short, long, env = "JSONWATCH_PORT")]
    pub port: Option<u16>,

    #[arg(short = 'H', long, env = "JSONWATCH_HOST")]
    pub host: Option<String>,

    /// Reload when the source or routes file changes.
    #[arg(short, long, env = "JSONWATCH_WATCH")]
    pub watch: bool,

    /// Route rules file (pattern -> target).
    #[arg(short, long, env = "JSONWATCH_ROUTES")]
    pub routes: Option<PathBuf>,

    /// Directory for `s` snapshots.
    #[arg(short = 'S', long, env = "JSONWATCH_SNAPSHOTS")]
    pub snapshots: Option<PathBuf>,

    /// Delay every response by this many milliseconds.
    #[arg(short, long, env = "JSONWATCH_DELAY")]
    pub delay: Option<u64>,

    /// Record identifier field.
    #[arg(short, long, env = "JSONWATCH_ID")]
    pub id: Option<String>,

    #[arg(long, visible_alias = "fks", env = "JSONWATCH_FOREIGN_KEY_SUFFIX")]
    pub foreign_key_suffix: Option<String>,

    /// Reject every non-GET request.
    #[arg(long, env = "JSONWATCH_READ_ONLY")]
    pub read_only: bool,

    #[arg(long, env = "JSONWATCH_NO_CORS")]
    pub no_cors: bool,

    /// Serve files from this directory before the resource routes.
    #[arg(short = 's', long = "static", env = "JSONWATCH_STATIC")]
    pub static_dir: Option<PathBuf>,

    #[arg(long, env = "JSONWATCH_NO_GZIP")]
    pub no_gzip: bool,

    #[arg(short, long, env = "JSONWATCH_QUIET")]
    pub quiet: bool,
}

impl Cli {
    /// Flags win over environment defaults.
    pub fn into_config(self, mut config: Config) -> Config {
        config.source = self.source;
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        config.watch.enabled |= self.watch;
        if self.routes.is_some() {
            config.watch.routes = self.routes;
        }
        if let Some(snapshots) = self.snapshots {
            config.snapshots = snapshots;
        }
        if self.delay.is_some() {
            config.middleware.delay_ms = self.delay;
        }
        if let Some(id) = self.id {
            config.store.id_field = id;
        }
        if let Some(suffix) = self.foreign_key_suffix {
            config.store.foreign_key_suffix = suffix;
        }
        config.store.read_only |= self.read_only;
        config.middleware.no_cors |= self.no_cors;
        if self.static_dir.is_some() {
            config.middleware.static_dir = self.static_dir;
        }
        config.middleware.no_gzip |= self.no_gzip;
        config.quiet |= self.quiet;
        config
    }
}
