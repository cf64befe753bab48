use crate::io::{read_data, Format, PersistError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub library: LibraryConfig,
    pub event_buffer_size: usize,
    pub storage: Option<StorageConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            library: LibraryConfig::default(),
            event_buffer_size: 1000,
            storage: None,
        }
    }
}

/// Which node groups the runtime library exposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Extra groups to include on top of (or instead of) the standard ones.
    pub groups: Vec<String>,
    pub extends_default: bool,
    pub version: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            extends_default: true,
            version: "0".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root: PathBuf,
    #[serde(default = "default_extension")]
    pub default_extension: String,
}

fn default_extension() -> String {
    Format::Yaml.extension().to_string()
}

impl RuntimeConfig {
    /// Reads a YAML or JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref();
        let config: RuntimeConfig = read_data(path)?;
        tracing::debug!(path = %path.display(), ?config, "loaded runtime config");
        Ok(config)
    }

    /// Loads `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, PersistError> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::parse_data;

    #[test]
    fn missing_fields_take_defaults() {
        let config: RuntimeConfig = parse_data("library:\n  version: '2'\n", Format::Yaml).unwrap();
        assert_eq!(config.library.version, "2");
        assert!(config.library.extends_default);
        assert_eq!(config.event_buffer_size, 1000);
        assert!(config.storage.is_none());
    }

    #[test]
    fn storage_section_parses_from_json() {
        let config: RuntimeConfig = parse_data(
            r#"{"library": {"groups": ["math"], "extends_default": false}, "storage": {"root": "/tmp/bp"}}"#,
            Format::Json,
        )
        .unwrap();
        assert_eq!(config.library.groups, vec!["math"]);
        assert!(!config.library.extends_default);
        let storage = config.storage.unwrap();
        assert_eq!(storage.root, PathBuf::from("/tmp/bp"));
        assert_eq!(storage.default_extension, ".yaml");
    }
}
