use crate::io::{dump_blueprint, dump_data, parse_blueprint, parse_data, Format, PersistError};
use async_trait::async_trait;
use loomcore::{Blueprint, NodeOptions};
use std::path::{Path, PathBuf};

/// Backend that blueprints are loaded from and saved to
#[async_trait]
pub trait StorageDriver: Send + Sync {
    async fn load_blueprint(&self, path: &str, options: NodeOptions)
        -> Result<Blueprint, PersistError>;

    async fn save_blueprint(&self, path: &str, blueprint: &Blueprint) -> Result<(), PersistError>;

    /// Every stored blueprint, as paths accepted by `load_blueprint`.
    async fn list_blueprints(&self) -> Result<Vec<String>, PersistError>;
}

/// Stores blueprints as YAML or JSON files under a root directory
#[derive(Debug, Clone)]
pub struct FilesystemDriver {
    root: PathBuf,
    default_format: Format,
    supported: Vec<Format>,
}

impl FilesystemDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_format: Format::Yaml,
            supported: vec![Format::Yaml, Format::Json],
        }
    }

    pub fn with_default_format(mut self, format: Format) -> Self {
        self.default_format = format;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `path`, appending the default extension when needed.
    fn resolve(&self, path: &str, must_exist: bool) -> PathBuf {
        let filename = self.root.join(path);
        let has_supported_ext = Format::from_path(&filename)
            .map(|format| self.supported.contains(&format))
            .unwrap_or(false);
        let exists = filename.is_file();
        if (must_exist && exists) || (!must_exist && has_supported_ext) {
            filename
        } else {
            self.root
                .join(format!("{}{}", path, self.default_format.extension()))
        }
    }

    fn walk(&self, dir: &Path, found: &mut Vec<String>) -> std::io::Result<()> {
        let mut entries = std::fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();
        for path in entries {
            if path.is_dir() {
                self.walk(&path, found)?;
                continue;
            }
            let Ok(format) = Format::from_path(&path) else {
                continue;
            };
            if !self.supported.contains(&format) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let relative = if format == self.default_format
                && path.extension().and_then(|e| e.to_str()) == Some(&format.extension()[1..])
            {
                relative.with_extension("")
            } else {
                relative.to_path_buf()
            };
            found.push(relative.to_string_lossy().replace('\\', "/"));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageDriver for FilesystemDriver {
    async fn load_blueprint(
        &self,
        path: &str,
        options: NodeOptions,
    ) -> Result<Blueprint, PersistError> {
        let filename = self.resolve(path, true);
        let format = Format::from_path(&filename)?;
        tracing::debug!(path = %filename.display(), "loading blueprint");
        let content = tokio::fs::read_to_string(&filename).await?;
        let record = parse_data(&content, format)?;
        parse_blueprint(&record, options)
    }

    async fn save_blueprint(&self, path: &str, blueprint: &Blueprint) -> Result<(), PersistError> {
        let filename = self.resolve(path, false);
        let format = Format::from_path(&filename)?;
        let content = dump_data(&dump_blueprint(blueprint), format)?;
        if let Some(parent) = filename.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&filename, content).await?;
        tracing::info!(path = %filename.display(), "saved blueprint");
        Ok(())
    }

    async fn list_blueprints(&self) -> Result<Vec<String>, PersistError> {
        let driver = self.clone();
        let listed = tokio::task::spawn_blocking(move || {
            let mut found = Vec::new();
            driver.walk(&driver.root, &mut found).map(|_| found)
        })
        .await
        .map_err(|e| PersistError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        Ok(listed)
    }
}

/// Storage facade over a driver
pub struct Storage {
    driver: Box<dyn StorageDriver>,
}

impl Storage {
    pub fn new(driver: impl StorageDriver + 'static) -> Self {
        Self {
            driver: Box::new(driver),
        }
    }

    pub async fn load_blueprint(
        &self,
        path: &str,
        options: NodeOptions,
    ) -> Result<Blueprint, PersistError> {
        self.driver.load_blueprint(path, options).await
    }

    pub async fn save_blueprint(&self, path: &str, blueprint: &Blueprint) -> Result<(), PersistError> {
        self.driver.save_blueprint(path, blueprint).await
    }

    pub async fn list_blueprints(&self) -> Result<Vec<String>, PersistError> {
        self.driver.list_blueprints().await
    }
}
