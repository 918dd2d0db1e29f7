//! Reload supervision: owns the one live server and replaces it on change.
//!
//! Every stop/start cycle runs under the lifecycle mutex, so a trigger that
//! arrives mid-cycle waits and is then compared against the fresh state.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jsonwatch_core::{Config, LoadError, RouteRules, SourceLocation};

use crate::app::{create_app, AppExtension, AppOptions};
use crate::store::Store;
use crate::ui::Ui;
use crate::watch::{Change, ChangeKind};

/// In-flight connections get this long to finish before they are dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(
        "Cannot bind to the port {port}. Please specify another port number either through \
         --port argument or through the JSONWATCH_PORT environment variable"
    )]
    PortInUse { port: u16 },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("server is already running")]
    AlreadyRunning,
}

/// Read-only view of the published server.
#[derive(Debug, Clone)]
pub struct CurrentServer {
    pub addr: SocketAddr,
    pub store: Store,
}

struct ServerHandle {
    current: CurrentServer,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<io::Result<()>>,
}

impl ServerHandle {
    /// Signal graceful shutdown and wait for the serve task to release the port.
    async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match tokio::time::timeout(CLOSE_TIMEOUT, &mut self.task).await {
            Ok(Ok(Ok(()))) => debug!(addr = %self.current.addr, "server stopped"),
            Ok(Ok(Err(e))) => warn!(addr = %self.current.addr, error = %e, "server exited with error"),
            Ok(Err(e)) => warn!(addr = %self.current.addr, error = %e, "server task failed"),
            Err(_) => {
                warn!(addr = %self.current.addr, "graceful shutdown timed out, dropping connections");
                self.task.abort();
                let _ = (&mut self.task).await;
            }
        }
    }
}

pub struct ReloadSupervisor {
    config: Config,
    source: SourceLocation,
    options: AppOptions,
    extensions: Vec<Arc<dyn AppExtension>>,
    ui: Ui,
    lifecycle: Mutex<Option<ServerHandle>>,
    state: watch::Sender<SupervisorState>,
    reloads: AtomicU64,
}

impl ReloadSupervisor {
    pub fn new(config: Config, source: SourceLocation, ui: Ui) -> Self {
        let options = AppOptions::from_config(&config);
        let (state, _) = watch::channel(SupervisorState::Stopped);
        Self {
            config,
            source,
            options,
            extensions: Vec::new(),
            ui,
            lifecycle: Mutex::new(None),
            state,
            reloads: AtomicU64::new(0),
        }
    }

    /// Extensions applied on every (re)start.
    pub fn with_extensions(mut self, extensions: Vec<Arc<dyn AppExtension>>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_options(mut self, options: AppOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Completed stop/start cycles.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }

    /// The published server; waits out any cycle in progress.
    pub async fn current_handle(&self) -> Option<CurrentServer> {
        self.lifecycle.lock().await.as_ref().map(|h| h.current.clone())
    }

    /// Initial start.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let mut slot = self.lifecycle.lock().await;
        if slot.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }
        self.start_locked(&mut slot, false).await
    }

    /// Unconditional stop-then-start.
    pub async fn reload(&self) -> Result<(), SupervisorError> {
        let mut slot = self.lifecycle.lock().await;
        self.reload_locked(&mut slot).await
    }

    /// Reload when `change` warrants it. Returns whether a cycle ran.
    pub async fn handle_change(&self, change: Change) -> Result<bool, SupervisorError> {
        let mut slot = self.lifecycle.lock().await;
        let Some(handle) = slot.as_ref() else {
            debug!(path = %change.path.display(), "no server running, ignoring change");
            return Ok(false);
        };

        if change.kind == ChangeKind::Source && !handle.current.store.differs_from(&change.value).await {
            debug!(path = %change.path.display(), "source unchanged, skipping reload");
            return Ok(false);
        }

        info!(path = %change.path.display(), kind = ?change.kind, "change detected, reloading");
        self.ui.line("");
        self.ui.status(format!("{} has changed, reloading...", change.path.display()));
        self.reload_locked(&mut slot).await?;
        Ok(true)
    }

    /// Consume watch changes until the channel closes or a cycle fails.
    pub async fn run(&self, mut changes: mpsc::Receiver<Change>) -> Result<(), SupervisorError> {
        while let Some(change) = changes.recv().await {
            self.handle_change(change).await?;
        }
        debug!("change stream closed");
        Ok(())
    }

    pub async fn shutdown(&self) {
        let mut slot = self.lifecycle.lock().await;
        if let Some(handle) = slot.take() {
            self.state.send_replace(SupervisorState::Stopping);
            handle.close().await;
        }
        self.state.send_replace(SupervisorState::Stopped);
    }

    async fn reload_locked(&self, slot: &mut Option<ServerHandle>) -> Result<(), SupervisorError> {
        if let Some(handle) = slot.take() {
            self.state.send_replace(SupervisorState::Stopping);
            handle.close().await;
        }
        self.start_locked(slot, true).await?;
        let cycles = self.reloads.fetch_add(1, Ordering::SeqCst) + 1;
        info!(reloads = cycles, "reload complete");
        Ok(())
    }

    async fn start_locked(&self, slot: &mut Option<ServerHandle>, is_restart: bool) -> Result<(), SupervisorError> {
        self.state.send_replace(SupervisorState::Starting);
        match self.launch(is_restart).await {
            Ok(handle) => {
                *slot = Some(handle);
                self.state.send_replace(SupervisorState::Running);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to start server");
                self.state.send_replace(SupervisorState::Failed);
                Err(e)
            }
        }
    }

    async fn launch(&self, is_restart: bool) -> Result<ServerHandle, SupervisorError> {
        if is_restart {
            self.ui.clear_screen();
        }
        self.ui.status(format!("Loading {}", self.source));
        let state = self.source.load().await?;

        let rules = match &self.config.watch.routes {
            Some(path) => {
                self.ui.status(format!("Loading {}", path.display()));
                Some(RouteRules::read(path).await?)
            }
            None => None,
        };

        for extension in &self.extensions {
            debug!(extension = extension.name(), "applying extension");
        }

        let mut store = Store::new(state, self.config.store.id_field.as_str());
        if let Some(path) = self.source.path() {
            store = store.persisted_to(path.to_path_buf());
        }
        let app = create_app(store.clone(), rules.as_ref(), &self.extensions, &self.options);

        let host = self.config.server.host.as_str();
        let port = self.config.server.port;
        let listener = bind(host, port).await?;
        let addr = listener.local_addr().map_err(|source| SupervisorError::Bind {
            addr: format!("{host}:{port}"),
            source,
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let snapshot = store.snapshot().await;
        self.ui.pretty_print(host, addr.port(), &snapshot, rules.as_ref());
        info!(
            addr = %addr,
            resources = snapshot.len(),
            rules = rules.as_ref().map_or(0, RouteRules::len),
            restart = is_restart,
            "server listening"
        );

        Ok(ServerHandle {
            current: CurrentServer { addr, store },
            shutdown: Some(shutdown_tx),
            task,
        })
    }
}

async fn bind(host: &str, port: u16) -> Result<TcpListener, SupervisorError> {
    TcpListener::bind((host, port)).await.map_err(|source| {
        if source.kind() == io::ErrorKind::AddrInUse {
            SupervisorError::PortInUse { port }
        } else {
            SupervisorError::Bind {
                addr: format!("{host}:{port}"),
                source,
            }
        }
    })
}
