//! Application assembly: resource router behind the request-rewriting stack.
//!
//! URI rewrites must happen before routing, so each stage mounts the next one
//! as its fallback and layers its middleware on the outer router. Request flow:
//!
//! trace -> cors -> gzip -> read-only guard -> static files -> route rules ->
//! extensions -> delay -> nested rewrite -> resource router

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use tower::ServiceExt;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use jsonwatch_core::{Config, RouteRules};

use crate::nested::{rewrite_nested, NestedRewriter};
use crate::resource::{self, ErrorResponse};
use crate::rewrite::{rewrite_by_rules, RuleRewriter};
use crate::store::Store;

/// Custom behavior mounted into every (re)built app.
///
/// Implementations may add routes or layers; their routes take precedence over
/// the resource router and see URIs after route rules have been applied.
pub trait AppExtension: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, app: Router) -> Router;
}

/// Per-app switches derived from [`Config`].
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub foreign_key_suffix: String,
    pub delay: Option<Duration>,
    pub read_only: bool,
    pub cors: bool,
    pub gzip: bool,
    pub static_dir: Option<PathBuf>,
    pub request_log: bool,
}

impl AppOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            foreign_key_suffix: config.store.foreign_key_suffix.clone(),
            delay: config.middleware.delay(),
            read_only: config.store.read_only,
            cors: !config.middleware.no_cors,
            gzip: !config.middleware.no_gzip,
            static_dir: config.middleware.static_dir.clone(),
            request_log: !config.quiet,
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Build a fresh app serving `store`.
pub fn create_app(
    store: Store,
    rules: Option<&RouteRules>,
    extensions: &[Arc<dyn AppExtension>],
    options: &AppOptions,
) -> Router {
    let mut resources = Router::new()
        .fallback_service(resource::router(store))
        .layer(middleware::map_request_with_state(
            NestedRewriter::new(options.foreign_key_suffix.as_str()),
            rewrite_nested,
        ));
    if let Some(delay) = options.delay {
        resources = resources.layer(middleware::from_fn_with_state(delay, delay_request));
    }

    let mut app = Router::new().fallback_service(resources);
    for extension in extensions {
        app = extension.apply(app);
    }

    if let Some(rules) = rules.filter(|r| !r.is_empty()) {
        app = Router::new()
            .fallback_service(app)
            .layer(middleware::map_request_with_state(
                RuleRewriter::new(rules),
                rewrite_by_rules,
            ));
    }

    if let Some(dir) = &options.static_dir {
        app = Router::new()
            .fallback_service(app)
            .layer(middleware::from_fn_with_state(ServeDir::new(dir), serve_static));
    }

    if options.read_only {
        app = app.layer(middleware::from_fn(reject_writes));
    }
    if options.gzip {
        app = app.layer(CompressionLayer::new());
    }
    if options.cors {
        app = app.layer(CorsLayer::permissive());
    }
    if options.request_log {
        app = app.layer(TraceLayer::new_for_http());
    }

    app
}

async fn delay_request(State(delay): State<Duration>, req: Request, next: Next) -> Response {
    tokio::time::sleep(delay).await;
    next.run(req).await
}

/// GET/HEAD requests naming an existing file are answered from `dir`;
/// everything else continues down the stack.
async fn serve_static(State(dir): State<ServeDir>, req: Request, next: Next) -> Response {
    if !matches!(*req.method(), Method::GET | Method::HEAD) {
        return next.run(req).await;
    }
    let (parts, body) = req.into_parts();
    let lookup = Request::from_parts(parts.clone(), Body::empty());
    match dir.oneshot(lookup).await {
        Ok(res) if res.status() != StatusCode::NOT_FOUND => res.map(Body::new),
        Ok(_) => next.run(Request::from_parts(parts, body)).await,
        Err(never) => match never {},
    }
}

async fn reject_writes(req: Request, next: Next) -> Response {
    if matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
        return next.run(req).await;
    }
    (
        StatusCode::FORBIDDEN,
        Json(ErrorResponse {
            error: "server is read-only".to_string(),
        }),
    )
        .into_response()
}
