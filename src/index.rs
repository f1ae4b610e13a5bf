//! The plugin index: which plugins (and which release of each) to check.
//!
//! The index is a JSON array of records:
//!
//! ```json
//! [
//!   {"name": "pytest-foo", "version": "1.0", "description": "Foo support"},
//!   {"name": "pytest-bar", "version": "0.3.1", "description": "Bar fixtures"}
//! ]
//! ```

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A plugin release to check.
///
/// Identity is `(name, version)`; the description is carried through to the
/// report unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Distribution name on the package index.
    pub name: String,

    /// Release version.
    pub version: String,

    /// One-line summary shown next to the result.
    #[serde(default)]
    pub description: String,
}

impl PluginSpec {
    /// Creates a spec with the given name, version and description.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }

    /// The `(name, version)` identity, used as the report sort key.
    pub fn key(&self) -> (String, String) {
        (self.name.clone(), self.version.clone())
    }
}

impl fmt::Display for PluginSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// Reads the plugin index from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a JSON array of
/// plugin records.
pub fn read_plugins_index(path: &Path) -> Result<Vec<PluginSpec>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plugin index: {}", path.display()))?;

    parse_plugins_index(&content)
        .with_context(|| format!("Failed to parse plugin index: {}", path.display()))
}

/// Parses the plugin index from a JSON string.
pub fn parse_plugins_index(content: &str) -> Result<Vec<PluginSpec>> {
    let plugins: Vec<PluginSpec> = serde_json::from_str(content)?;
    Ok(plugins)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index() {
        let plugins = parse_plugins_index(
            r#"[
                {"name": "pytest-foo", "version": "1.0", "description": "d1"},
                {"name": "pytest-bar", "version": "0.3.1", "description": "d2"}
            ]"#,
        )
        .unwrap();

        assert_eq!(plugins.len(), 2);
        assert_eq!(plugins[0], PluginSpec::new("pytest-foo", "1.0", "d1"));
        assert_eq!(plugins[1].to_string(), "pytest-bar-0.3.1");
    }

    #[test]
    fn test_parse_index_missing_description() {
        let plugins = parse_plugins_index(r#"[{"name": "pytest-foo", "version": "1.0"}]"#).unwrap();
        assert_eq!(plugins[0].description, "");
    }

    #[test]
    fn test_parse_index_rejects_object() {
        assert!(parse_plugins_index(r#"{"name": "pytest-foo"}"#).is_err());
    }

    #[test]
    fn test_read_index_missing_file() {
        let err = read_plugins_index(Path::new("/nonexistent/index.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read plugin index"));
    }

    #[test]
    fn test_read_index_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("index.json");
        std::fs::write(
            &path,
            r#"[{"name": "pytest-foo", "version": "1.0", "description": "d1"}]"#,
        )
        .unwrap();

        let plugins = read_plugins_index(&path).unwrap();
        assert_eq!(plugins, vec![PluginSpec::new("pytest-foo", "1.0", "d1")]);
    }
}
