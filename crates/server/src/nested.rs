//! Nested resource rewriting: `/:resource/:id/:nested` -> `/:nested`.
//!
//! `GET /posts/1/comments` becomes `GET /comments?postId=1` and
//! `POST /posts/1/comments` becomes `POST /comments` with `postId: 1` injected
//! into the body. The flat resource router does the rest.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;

use jsonwatch_core::inflect::singularize;

/// Largest request body the rewriter will buffer.
const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// The three segments of a nested route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NestedPath<'a> {
    pub resource: &'a str,
    pub id: &'a str,
    pub nested: &'a str,
}

impl<'a> NestedPath<'a> {
    /// Match exactly three non-empty segments (one trailing slash allowed).
    pub fn parse(path: &'a str) -> Option<Self> {
        let trimmed = path.strip_prefix('/')?;
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        let mut segments = trimmed.split('/');
        let (resource, id, nested) = (segments.next()?, segments.next()?, segments.next()?);
        if segments.next().is_some() || [resource, id, nested].iter().any(|s| s.is_empty()) {
            return None;
        }
        Some(Self { resource, id, nested })
    }
}

/// Stateless request rewriter; cloned into every request.
#[derive(Debug, Clone)]
pub struct NestedRewriter {
    foreign_key_suffix: Arc<str>,
}

impl NestedRewriter {
    pub fn new(foreign_key_suffix: impl Into<Arc<str>>) -> Self {
        Self {
            foreign_key_suffix: foreign_key_suffix.into(),
        }
    }

    /// `posts` + `Id` -> `postId`.
    pub fn foreign_key(&self, resource: &str) -> String {
        format!("{}{}", singularize(resource), self.foreign_key_suffix)
    }

    /// Path and query for a read: `/:nested?<query>&<fk>=<id>`.
    ///
    /// An existing parameter with the foreign-key name is replaced. An
    /// unparsable id becomes `NaN`, which no record matches.
    pub fn rewrite_get(&self, target: &NestedPath<'_>, query: Option<&str>) -> String {
        let key = self.foreign_key(target.resource);
        let id = parse_int(target.id).map_or_else(|| "NaN".to_string(), |n| n.to_string());

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (k, v) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            if k != key {
                serializer.append_pair(&k, &v);
            }
        }
        serializer.append_pair(&key, &id);

        format!("/{}?{}", target.nested, serializer.finish())
    }

    /// Path and body for a write: the foreign key is set on the record, or on
    /// every record of an array body. Scalars pass through untouched.
    ///
    /// The injected value overwrites an existing field of the same name. An
    /// unparsable id is injected as `null`.
    pub fn rewrite_post(&self, target: &NestedPath<'_>, body: Value) -> (String, Value) {
        let key = self.foreign_key(target.resource);
        let id = parse_int(target.id).map_or(Value::Null, Value::from);

        let body = match body {
            Value::Array(records) => Value::Array(
                records
                    .into_iter()
                    .map(|record| inject(record, &key, &id))
                    .collect(),
            ),
            record => inject(record, &key, &id),
        };

        (format!("/{}", target.nested), body)
    }
}

fn inject(record: Value, key: &str, id: &Value) -> Value {
    match record {
        Value::Object(mut fields) => {
            fields.insert(key.to_string(), id.clone());
            Value::Object(fields)
        }
        other => other,
    }
}

/// Leading-integer parse: optional whitespace and sign, then digits;
/// trailing garbage is ignored (`"12abc"` -> 12).
pub fn parse_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let magnitude: i64 = digits[..end].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Middleware: rewrite nested GET/POST requests before routing.
pub async fn rewrite_nested(State(rewriter): State<NestedRewriter>, req: Request) -> Result<Request, Response> {
    let path = req.uri().path().to_owned();
    let Some(target) = NestedPath::parse(&path) else {
        return Ok(req);
    };

    match *req.method() {
        Method::GET | Method::HEAD => {
            let rewritten = rewriter.rewrite_get(&target, req.uri().query());
            debug!(from = %req.uri(), to = %rewritten, "nested read rewrite");
            let (mut parts, body) = req.into_parts();
            parts.uri = parse_uri(&rewritten)?;
            Ok(Request::from_parts(parts, body))
        }
        Method::POST => {
            let (mut parts, body) = req.into_parts();
            let bytes = to_bytes(body, BODY_LIMIT)
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())?;

            let (rewritten, bytes) = match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => {
                    let (path, value) = rewriter.rewrite_post(&target, value);
                    let bytes = serde_json::to_vec(&value)
                        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response())?;
                    (path, bytes.into())
                }
                // Not JSON: only the path changes; the resource router rejects the body.
                Err(_) => (format!("/{}", target.nested), bytes),
            };

            debug!(from = %parts.uri, to = %rewritten, "nested write rewrite");
            let query = parts.uri.query().map(|q| format!("?{q}")).unwrap_or_default();
            parts.uri = parse_uri(&format!("{rewritten}{query}"))?;
            parts.headers.insert(header::CONTENT_LENGTH, bytes.len().into());
            Ok(Request::from_parts(parts, Body::from(bytes)))
        }
        _ => Ok(req),
    }
}

fn parse_uri(raw: &str) -> Result<Uri, Response> {
    raw.parse::<Uri>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())
}
