//! Content Library
//!
//! Everything a board is computed from, apart from the seed: the catalog
//! snapshot, the template registry and the engine tuning. Server and
//! clients hold equal libraries; a round is then fully described by
//! `(seed, template ref, filter)`.

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

use crate::catalog::{Catalog, CatalogError, CatalogPayload, FilterConfig};
use crate::core::rng::SeededRng;
use super::assign::{compute_board_with, EngineConfig};
use super::board::Board;
use super::template::{TemplateError, TemplateRegistry};

/// Salt separating template selection from the board's own PRNG stream.
const TEMPLATE_SALT: u32 = 0x9E37_79B9;

/// Library errors.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// A round referenced a template this library does not have.
    #[error("unknown template {0}")]
    UnknownTemplate(String),

    /// No template to choose from.
    #[error("template registry is empty")]
    NoTemplates,

    /// Catalog payload rejected.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Template payload rejected.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Source file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Catalog + templates + engine configuration.
#[derive(Clone, Debug)]
pub struct ContentLibrary {
    catalog: Catalog,
    templates: TemplateRegistry,
    engine: EngineConfig,
}

impl ContentLibrary {
    /// Create a library with default engine tuning.
    pub fn new(catalog: Catalog, templates: TemplateRegistry) -> Self {
        Self {
            catalog,
            templates,
            engine: EngineConfig::default(),
        }
    }

    /// Override engine tuning.
    pub fn with_engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Load from optional JSON files. A missing catalog path yields an empty
    /// catalog, a missing template path the built-in templates.
    pub fn load(catalog: Option<&Path>, templates: Option<&Path>) -> Result<Self, LibraryError> {
        let catalog = match catalog {
            Some(path) => Catalog::from_json(&read(path)?)?,
            None => Catalog::empty(),
        };
        let templates = match templates {
            Some(path) => TemplateRegistry::from_json(&read(path)?)?,
            None => TemplateRegistry::builtin(),
        };
        info!(
            "Content library loaded: {} items, {} associations, {} templates (version {})",
            catalog.items().count(),
            catalog.associations().len(),
            templates.len(),
            &catalog.version()[..12]
        );
        Ok(Self::new(catalog, templates))
    }

    /// The catalog snapshot.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The template registry.
    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Engine tuning.
    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    /// Catalog version clients compare against their own.
    pub fn version(&self) -> &str {
        self.catalog.version()
    }

    /// Template ref for a round seed.
    pub fn select_template(&self, seed: u32) -> Result<&str, LibraryError> {
        let mut rng = SeededRng::new(seed ^ TEMPLATE_SALT);
        self.templates
            .select(&mut rng)
            .map(|t| t.id.as_str())
            .ok_or(LibraryError::NoTemplates)
    }

    /// Compute the board of a round.
    pub fn compute_round(
        &self,
        seed: u32,
        template_ref: &str,
        filter: &FilterConfig,
    ) -> Result<Board, LibraryError> {
        let template = self
            .templates
            .get(template_ref)
            .ok_or_else(|| LibraryError::UnknownTemplate(template_ref.to_owned()))?;
        let filtered = self.catalog.filter(filter);
        Ok(compute_board_with(seed, template, &filtered, &self.engine))
    }
}

fn read(path: &Path) -> Result<String, LibraryError> {
    std::fs::read_to_string(path).map_err(|source| LibraryError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Shared, refreshable handle to the current library.
///
/// Rooms take an `Arc` snapshot when a round starts, so a refresh never
/// changes a board mid-round.
#[derive(Clone, Debug)]
pub struct ContentStore {
    tx: Arc<watch::Sender<Arc<ContentLibrary>>>,
}

impl ContentStore {
    /// Create a store around an initial library.
    pub fn new(library: ContentLibrary) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(library));
        Self { tx: Arc::new(tx) }
    }

    /// Current snapshot.
    pub fn current(&self) -> Arc<ContentLibrary> {
        self.tx.borrow().clone()
    }

    /// Be notified of refreshes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ContentLibrary>> {
        self.tx.subscribe()
    }

    /// Replace the whole library.
    pub fn replace(&self, library: ContentLibrary) {
        info!("Content library replaced (version {})", &library.version()[..12]);
        self.tx.send_replace(Arc::new(library));
    }

    /// Swap in a new catalog payload, keeping templates and tuning.
    ///
    /// Returns the new catalog version.
    pub fn refresh_catalog(&self, payload: CatalogPayload) -> Result<String, LibraryError> {
        let catalog = Catalog::from_payload(payload)?;
        let version = catalog.version().to_owned();
        let current = self.current();
        self.replace(ContentLibrary {
            catalog,
            templates: current.templates.clone(),
            engine: current.engine.clone(),
        });
        Ok(version)
    }

    /// Re-read the catalog from disk.
    pub async fn refresh_from_path(&self, path: &Path) -> Result<String, LibraryError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| LibraryError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let catalog = Catalog::from_json(&json)?;
        self.refresh_catalog(catalog.to_payload())
    }
}
