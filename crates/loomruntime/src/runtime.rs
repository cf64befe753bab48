use crate::config::{LibraryConfig, RuntimeConfig};
use crate::io::{self, PersistError};
use crate::storage::{FilesystemDriver, Storage};
use crate::validate::validate_blueprint;
use loomcore::{
    Blueprint, Dispatcher, Event, EventBus, Library, Middleware, NodeOptions, TracingMiddleware,
    Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Main runtime for loading and executing blueprints
pub struct LoomRuntime {
    library: Arc<Library>,
    event_bus: Arc<EventBus>,
    middleware: Arc<dyn Middleware>,
    storage: Option<Storage>,
}

impl LoomRuntime {
    /// Create a runtime over `library` with default settings
    pub fn new(library: Arc<Library>) -> Self {
        Self::with_config(library, &RuntimeConfig::default())
    }

    /// Create a runtime whose library, event buffer and storage follow `config`
    pub fn with_config(library: Arc<Library>, config: &RuntimeConfig) -> Self {
        let library = Arc::new(configure_library(&library, &config.library));
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let middleware = Dispatcher::new()
            .with(event_bus.clone())
            .with(Arc::new(TracingMiddleware));
        let storage = config.storage.as_ref().map(|storage| {
            let driver = FilesystemDriver::new(&storage.root);
            match io::Format::from_extension(&storage.default_extension) {
                Ok(format) => Storage::new(driver.with_default_format(format)),
                Err(e) => {
                    tracing::warn!(error = %e, "unsupported default extension, using yaml");
                    Storage::new(driver)
                }
            }
        });
        tracing::debug!(types = library.len(), version = %library.version(), "runtime configured");

        Self {
            library,
            event_bus,
            middleware: Arc::new(middleware),
            storage,
        }
    }

    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_bus.subscribe()
    }

    /// Options that attach this runtime's library and middleware to a blueprint.
    pub fn blueprint_options(&self) -> NodeOptions {
        NodeOptions::new()
            .with_library(self.library.clone())
            .with_middleware(self.middleware.clone())
    }

    pub fn new_blueprint(&self) -> loomcore::Result<Blueprint> {
        Blueprint::with_options(self.blueprint_options())
    }

    /// Loads through the configured storage, or straight from the filesystem.
    pub async fn load(&self, path: &str) -> Result<Blueprint, PersistError> {
        match &self.storage {
            Some(storage) => storage.load_blueprint(path, self.blueprint_options()).await,
            None => io::load_blueprint(path, self.blueprint_options()),
        }
    }

    pub async fn save(&self, path: &str, blueprint: &Blueprint) -> Result<(), PersistError> {
        match &self.storage {
            Some(storage) => storage.save_blueprint(path, blueprint).await,
            None => io::save_blueprint(path, blueprint),
        }
    }

    /// Stored blueprints; empty without storage.
    pub async fn list(&self) -> Result<Vec<String>, PersistError> {
        match &self.storage {
            Some(storage) => storage.list_blueprints().await,
            None => Ok(Vec::new()),
        }
    }

    /// Validates, then invokes the blueprint.
    pub async fn execute(
        &self,
        blueprint: &Blueprint,
        args: HashMap<String, Value>,
    ) -> loomcore::Result<Option<Value>> {
        validate_blueprint(blueprint)?;
        blueprint.invoke(args).await
    }

    pub async fn run(
        &self,
        path: &str,
        args: HashMap<String, Value>,
    ) -> Result<Option<Value>, PersistError> {
        let blueprint = self.load(path).await?;
        Ok(self.execute(&blueprint, args).await?)
    }
}

fn configure_library(base: &Library, config: &LibraryConfig) -> Library {
    let library = Library::with_version(config.version.clone());
    if config.extends_default {
        library.extend(base);
    } else {
        library.extend(&base.filtered(&config.groups));
    }
    library
}
