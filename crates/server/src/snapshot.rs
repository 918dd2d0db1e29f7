//! Operator-triggered snapshots of the served state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use jsonwatch_core::StoreState;

use crate::supervisor::ReloadSupervisor;
use crate::ui::Ui;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to write snapshot {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Writes `db-<unix-millis>.json` files into one directory.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_name_at(millis: i64) -> String {
        format!("db-{millis}.json")
    }

    /// Pretty-print `state` into a new timestamped file.
    pub async fn write(&self, state: &StoreState) -> Result<PathBuf, SnapshotError> {
        let millis = chrono::Utc::now().timestamp_millis();
        let path = self.dir.join(Self::file_name_at(millis));
        let contents = serde_json::to_string_pretty(state)?;
        fs::write(&path, contents).await.map_err(|source| SnapshotError::Write {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), resources = state.len(), "snapshot written");
        Ok(path)
    }
}

pub fn is_snapshot_command(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("s")
}

/// Read operator commands until EOF or a read error.
pub async fn run_operator_commands<R>(reader: R, supervisor: Arc<ReloadSupervisor>, writer: SnapshotWriter, ui: Ui)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_snapshot_command(&line) => {
                let Some(current) = supervisor.current_handle().await else {
                    warn!("no server running, snapshot skipped");
                    continue;
                };
                let state = current.store.snapshot().await;
                match writer.write(&state).await {
                    Ok(path) => ui.line(format!("  Saved snapshot to {}\n", display_relative(&path))),
                    Err(e) => {
                        warn!(error = %e, "snapshot failed");
                        ui.error(e);
                    }
                }
            }
            Ok(Some(line)) => debug!(input = %line.trim(), "ignoring operator input"),
            Ok(None) => {
                debug!("stdin closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "failed to read stdin");
                ui.error("Error, can't read from stdin");
                ui.error("Creating a snapshot from the CLI won't be possible");
                break;
            }
        }
    }
}

fn display_relative(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}
