//! Route Rule Set: ordered URL pattern -> rewrite target mapping.

use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;

use crate::detect;
use crate::error::LoadError;

/// Rules keep file order; the first matching pattern wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteRules {
    rules: IndexMap<String, String>,
}

impl RouteRules {
    /// Read and validate a rules file.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let value = detect::parse_candidate(path)?;
        Self::from_value(value, path)
    }

    /// [`RouteRules::load`] on the async runtime.
    pub async fn read(path: &Path) -> Result<Self, LoadError> {
        let value = detect::read_candidate(path).await?;
        Self::from_value(value, path)
    }

    /// Validate an already-parsed document attributed to `path`.
    pub fn from_value(value: Value, path: &Path) -> Result<Self, LoadError> {
        serde_json::from_value::<IndexMap<String, String>>(value)
            .map(|rules| Self { rules })
            .map_err(|_| LoadError::InvalidRules(path.display().to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rules.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<(String, String)> for RouteRules {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn load_preserves_file_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("routes.json");
        fs::write(
            &path,
            r#"{ "/api/*": "/$1", "/blog/:resource/:id": "/:resource/:id", "/a": "/b" }"#,
        )
        .unwrap();

        let rules = RouteRules::load(&path).unwrap();
        let patterns: Vec<_> = rules.iter().map(|(p, _)| p).collect();
        assert_eq!(patterns, vec!["/api/*", "/blog/:resource/:id", "/a"]);
        assert_eq!(rules.len(), 3);
    }

    #[tokio::test]
    async fn async_read_agrees_with_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("routes.json");
        fs::write(&path, r#"{ "/api/*": "/$1" }"#).unwrap();
        assert_eq!(RouteRules::read(&path).await.unwrap(), RouteRules::load(&path).unwrap());
    }

    #[test]
    fn non_string_target_is_invalid() {
        let path = Path::new("routes.json");
        let err = RouteRules::from_value(serde_json::json!({"/a": 1}), path).unwrap_err();
        assert!(matches!(err, LoadError::InvalidRules(_)));
        assert!(err.to_string().contains("routes.json"));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("routes.json");
        fs::write(&path, "{ \"/a\": ").unwrap();
        assert!(matches!(RouteRules::load(&path), Err(LoadError::Parse(_))));
    }
}
