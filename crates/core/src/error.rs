use std::path::PathBuf;

use thiserror::Error;

/// Startup-level failures that end the process.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("snapshots directory {} doesn't exist", .0.display())]
    SnapshotsDirMissing(PathBuf),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Failure to load a data source or a route rules file.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{location} must contain a JSON object")]
    NotAnObject { location: String },

    #[error("{0} must map URL patterns to target strings")]
    InvalidRules(String),

    #[error("failed to fetch {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unsupported data source {0}: expected a .json file or an http(s) URL")]
    UnsupportedSource(String),
}

/// A candidate file could not be read or is not valid JSON.
///
/// Carries the offending path so operator messages always name the file.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("error reading {}: {message}", path.display())]
pub struct ParseError {
    pub path: PathBuf,
    pub message: String,
}
