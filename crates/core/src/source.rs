//! Data source location and loading (local JSON file or remote endpoint).

use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::detect;
use crate::error::LoadError;
use crate::state::{into_state, StoreState};

/// Where Store State comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// A local JSON document; watchable and persisted on mutation.
    File(PathBuf),
    /// An `http(s)://` endpoint; neither watchable nor persisted.
    Remote(Url),
}

impl SourceLocation {
    /// Classify a raw CLI argument.
    pub fn parse(raw: &str) -> Result<Self, LoadError> {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            let url = Url::parse(raw).map_err(|_| LoadError::UnsupportedSource(raw.to_string()))?;
            return Ok(Self::Remote(url));
        }
        if raw.is_empty() || raw.ends_with(".js") {
            return Err(LoadError::UnsupportedSource(raw.to_string()));
        }
        Ok(Self::File(PathBuf::from(raw)))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Local file path, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::Remote(_) => None,
        }
    }

    /// Load a fresh Store State from the source.
    pub async fn load(&self) -> Result<StoreState, LoadError> {
        let value = match self {
            Self::File(path) => {
                let contents = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| LoadError::Io {
                        path: path.clone(),
                        source,
                    })?;
                detect::parse_str(path, &contents)?
            }
            Self::Remote(url) => fetch(url).await?,
        };
        let state = into_state(value, &self.to_string())?;
        debug!(source = %self, collections = state.len(), "loaded data source");
        Ok(state)
    }
}

async fn fetch(url: &Url) -> Result<Value, LoadError> {
    let http_err = |source| LoadError::Http {
        url: url.to_string(),
        source,
    };
    reqwest::get(url.clone())
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(http_err)?
        .json::<Value>()
        .await
        .map_err(http_err)
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{url}"),
        }
    }
}
