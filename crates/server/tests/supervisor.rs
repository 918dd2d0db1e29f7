//! Reload supervision against real listeners on 127.0.0.1.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

use jsonwatch_core::config::ServerConfig;
use jsonwatch_core::{detect, Config, SourceLocation};
use jsonwatch_server::ui::Ui;
use jsonwatch_server::watch::{Change, ChangeKind, FileWatchSource, WatchEvent};
use jsonwatch_server::{AppExtension, AppOptions, ReloadSupervisor, SupervisorError, SupervisorState};

const DB: &str = r#"{"posts": [{"id": 1, "title": "first"}], "comments": [{"id": 1, "postId": 1}]}"#;

struct Fixture {
    dir: TempDir,
    source: PathBuf,
}

impl Fixture {
    fn new(contents: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("db.json");
        fs::write(&source, contents).unwrap();
        Self { dir, source }
    }

    fn config(&self, port: u16) -> Config {
        Config {
            source: self.source.display().to_string(),
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port,
            },
            quiet: true,
            ..Config::default()
        }
    }

    fn supervisor(&self) -> ReloadSupervisor {
        supervisor_for(self.config(0))
    }

    fn source_change(&self) -> Change {
        Change {
            kind: ChangeKind::Source,
            path: self.source.clone(),
            value: detect::parse_candidate(&self.source).unwrap(),
        }
    }
}

fn supervisor_for(config: Config) -> ReloadSupervisor {
    let source = SourceLocation::parse(&config.source).unwrap();
    let options = AppOptions {
        request_log: false,
        ..AppOptions::from_config(&config)
    };
    ReloadSupervisor::new(config, source, Ui::silent()).with_options(options)
}

async fn fetch(supervisor: &ReloadSupervisor, path: &str) -> Value {
    let addr = supervisor.current_handle().await.unwrap().addr;
    reqwest::get(format!("http://{addr}{path}"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn served_state(supervisor: &ReloadSupervisor) -> Value {
    Value::Object(supervisor.current_handle().await.unwrap().store.snapshot().await)
}

async fn wait_for_reloads(supervisor: &ReloadSupervisor, expected: u64, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    while supervisor.reload_count() < expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {expected} reloads, saw {}",
            supervisor.reload_count()
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn write_via_rename(target: &Path, contents: &str) {
    let tmp = target.with_file_name("db.json.swp");
    fs::write(&tmp, contents).unwrap();
    fs::rename(&tmp, target).unwrap();
}

// =========================================================================
// Change detection
// =========================================================================

#[tokio::test]
async fn whitespace_rewrite_does_not_reload() {
    let fixture = Fixture::new(DB);
    let supervisor = fixture.supervisor();
    supervisor.start().await.unwrap();

    let reformatted = serde_json::to_string_pretty(&serde_json::from_str::<Value>(DB).unwrap()).unwrap();
    fs::write(&fixture.source, reformatted).unwrap();

    assert!(!supervisor.handle_change(fixture.source_change()).await.unwrap());
    assert_eq!(supervisor.reload_count(), 0);
    supervisor.shutdown().await;
}

#[tokio::test]
async fn structural_change_reloads_once() {
    let fixture = Fixture::new(DB);
    let supervisor = fixture.supervisor();
    supervisor.start().await.unwrap();
    assert_eq!(fetch(&supervisor, "/posts/1").await["title"], json!("first"));

    fs::write(&fixture.source, DB.replace("first", "edited")).unwrap();

    assert!(supervisor.handle_change(fixture.source_change()).await.unwrap());
    assert_eq!(supervisor.reload_count(), 1);
    assert_eq!(supervisor.state(), SupervisorState::Running);
    assert_eq!(served_state(&supervisor).await, detect::parse_candidate(&fixture.source).unwrap());
    assert_eq!(fetch(&supervisor, "/posts/1").await["title"], json!("edited"));
    supervisor.shutdown().await;
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn routes_change_always_reloads() {
    let fixture = Fixture::new(DB);
    let routes = fixture.dir.path().join("routes.json");
    fs::write(&routes, r#"{"/api/*": "/$1"}"#).unwrap();
    let mut config = fixture.config(0);
    config.watch.routes = Some(routes.clone());
    let supervisor = supervisor_for(config);
    supervisor.start().await.unwrap();
    assert_eq!(fetch(&supervisor, "/api/posts/1").await["id"], json!(1));

    fs::write(&routes, r#"{"/v2/*": "/$1"}"#).unwrap();
    let change = Change {
        kind: ChangeKind::Routes,
        path: routes.clone(),
        value: detect::parse_candidate(&routes).unwrap(),
    };

    assert!(supervisor.handle_change(change).await.unwrap());
    assert_eq!(fetch(&supervisor, "/v2/posts/1").await["id"], json!(1));
    supervisor.shutdown().await;
}

#[tokio::test]
async fn own_writes_do_not_reload() {
    let fixture = Fixture::new(DB);
    let supervisor = fixture.supervisor();
    supervisor.start().await.unwrap();
    let addr = supervisor.current_handle().await.unwrap().addr;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/posts/1/comments"))
        .json(&json!({"body": "persisted"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let on_disk = detect::parse_candidate(&fixture.source).unwrap();
    assert_eq!(on_disk["comments"][1]["postId"], json!(1));
    assert!(!supervisor.handle_change(fixture.source_change()).await.unwrap());
    assert_eq!(supervisor.reload_count(), 0);
    supervisor.shutdown().await;
}

// =========================================================================
// Watch pipeline
// =========================================================================

#[tokio::test]
async fn malformed_write_is_ignored_until_valid() {
    let fixture = Fixture::new(DB);
    let supervisor = Arc::new(fixture.supervisor());
    supervisor.start().await.unwrap();
    let before = served_state(&supervisor).await;

    let watch = FileWatchSource::new(
        &SourceLocation::File(fixture.source.clone()),
        None,
        Duration::from_secs(1),
    )
    .unwrap();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (changes_tx, changes_rx) = mpsc::channel(8);
    let _subscription = watch.spawn_with_events(events_rx, changes_tx);
    let runner = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run(changes_rx).await }
    });

    fs::write(&fixture.source, &DB[..DB.len() / 2]).unwrap();
    events_tx.send(WatchEvent::named(fixture.dir.path(), "db.json")).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(supervisor.reload_count(), 0);
    assert_eq!(served_state(&supervisor).await, before);
    assert_eq!(fetch(&supervisor, "/posts/1").await["title"], json!("first"));

    fs::write(&fixture.source, DB.replace("first", "final")).unwrap();
    events_tx.send(WatchEvent::named(fixture.dir.path(), "db.json")).unwrap();
    wait_for_reloads(&supervisor, 1, Duration::from_secs(5)).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(supervisor.reload_count(), 1);
    assert_eq!(fetch(&supervisor, "/posts/1").await["title"], json!("final"));

    runner.abort();
    supervisor.shutdown().await;
}

#[tokio::test]
async fn rename_over_source_reloads_once() {
    let fixture = Fixture::new(DB);
    let supervisor = Arc::new(fixture.supervisor());
    supervisor.start().await.unwrap();

    let watch = FileWatchSource::new(
        &SourceLocation::File(fixture.source.clone()),
        None,
        Duration::from_secs(1),
    )
    .unwrap();
    let (changes_tx, changes_rx) = mpsc::channel(8);
    let _subscription = watch.spawn(changes_tx).unwrap();
    let runner = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run(changes_rx).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let edited = DB.replace("first", "renamed");
    write_via_rename(&fixture.source, &edited);
    wait_for_reloads(&supervisor, 1, Duration::from_secs(10)).await;

    // Same content written in place: no second cycle.
    fs::write(&fixture.source, &edited).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(supervisor.reload_count(), 1);
    assert_eq!(fetch(&supervisor, "/posts/1").await["title"], json!("renamed"));

    runner.abort();
    supervisor.shutdown().await;
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn concurrent_changes_run_one_cycle() {
    let fixture = Fixture::new(DB);
    let supervisor = fixture.supervisor();
    supervisor.start().await.unwrap();

    fs::write(&fixture.source, DB.replace("first", "raced")).unwrap();
    let change = fixture.source_change();

    let (a, b) = tokio::join!(
        supervisor.handle_change(change.clone()),
        supervisor.handle_change(change)
    );

    let cycles = [a.unwrap(), b.unwrap()].iter().filter(|reloaded| **reloaded).count();
    assert_eq!(cycles, 1);
    assert_eq!(supervisor.reload_count(), 1);
    assert_eq!(supervisor.state(), SupervisorState::Running);
    supervisor.shutdown().await;
}

#[tokio::test]
async fn state_transitions_are_published() {
    let fixture = Fixture::new(DB);
    let supervisor = fixture.supervisor();
    let mut states = supervisor.subscribe_state();
    assert_eq!(*states.borrow(), SupervisorState::Stopped);

    supervisor.start().await.unwrap();
    assert_eq!(*states.borrow_and_update(), SupervisorState::Running);

    supervisor.reload().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Running);
    assert_eq!(supervisor.reload_count(), 1);

    assert!(matches!(supervisor.start().await, Err(SupervisorError::AlreadyRunning)));
    supervisor.shutdown().await;
    assert_eq!(*states.borrow_and_update(), SupervisorState::Stopped);
}

struct Health;

impl AppExtension for Health {
    fn name(&self) -> &str {
        "health"
    }

    fn apply(&self, app: Router) -> Router {
        app.route("/__health", get(|| async { Json(json!({"status": "ok"})) }))
    }
}

#[tokio::test]
async fn extensions_survive_reload() {
    let fixture = Fixture::new(DB);
    let extensions: Vec<Arc<dyn AppExtension>> = vec![Arc::new(Health)];
    let supervisor = fixture.supervisor().with_extensions(extensions);
    supervisor.start().await.unwrap();
    assert_eq!(fetch(&supervisor, "/__health").await["status"], json!("ok"));

    supervisor.reload().await.unwrap();

    assert_eq!(fetch(&supervisor, "/__health").await["status"], json!("ok"));
    supervisor.shutdown().await;
}

#[tokio::test]
async fn port_in_use_is_fatal_and_names_the_port() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let fixture = Fixture::new(DB);
    let supervisor = supervisor_for(fixture.config(port));

    let err = supervisor.start().await.unwrap_err();

    assert!(matches!(err, SupervisorError::PortInUse { port: p } if p == port));
    assert!(err.to_string().contains(&port.to_string()));
    assert_eq!(supervisor.state(), SupervisorState::Failed);
    assert!(supervisor.current_handle().await.is_none());
}

#[tokio::test]
async fn missing_source_fails_to_start() {
    let fixture = Fixture::new(DB);
    let mut config = fixture.config(0);
    config.source = fixture.dir.path().join("absent.json").display().to_string();
    let supervisor = supervisor_for(config);

    let err = supervisor.start().await.unwrap_err();

    assert!(matches!(err, SupervisorError::Load(_)));
    assert!(err.to_string().contains("absent.json"));
}
