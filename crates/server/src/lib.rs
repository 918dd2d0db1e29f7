pub mod app;
pub mod cli;
pub mod nested;
pub mod resource;
pub mod rewrite;
pub mod snapshot;
pub mod store;
pub mod supervisor;
pub mod ui;
pub mod watch;

pub use app::{create_app, AppExtension, AppOptions};
pub use store::Store;
pub use supervisor::{ReloadSupervisor, SupervisorError, SupervisorState};
