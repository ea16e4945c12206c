use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::overrides::{LayerEntry, LayerKind, OverrideLayer};
use crate::{
    DConfigError, Result,
    schema::{ConfigSchema, ResourceId, join_subpath},
};

/// Magic string of deployment override documents.
pub const OVERRIDE_MAGIC: &str = "dsg.config.override";
/// Magic string of the per-user cache document.
pub const CACHE_MAGIC: &str = "dsg.config.cache";

const LAYER_VERSION: &str = "1.0";

/// Storage collaborator providing and persisting override layers.
///
/// `persist` must either replace the stored layer completely or leave it
/// as it was.
pub trait LayerStorage: Send + Sync {
    /// Loads every layer of a resource, lowest precedence first.
    ///
    /// # Errors
    /// Returns an error if a layer that must be honoured cannot be read.
    fn load_layers(&self, schema: &ConfigSchema) -> Result<Vec<OverrideLayer>>;

    /// Atomically persists one writable layer.
    ///
    /// # Errors
    /// Returns `DConfigError::PersistenceError` if the layer could not be written.
    fn persist(&self, id: &ResourceId, layer: &OverrideLayer) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct LayerDocument {
    magic: String,
    version: String,
    #[serde(default)]
    contents: BTreeMap<String, LayerEntry>,
}

/// Filesystem layer storage.
///
/// Override layers are read from
/// `{root}/configs/overrides/{app_id}/{file}{subpath}/*.json` and the
/// writable layer lives in `{cache_dir}/{app_id}{subpath}/{file}.json`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    roots: Vec<PathBuf>,
    cache_dir: PathBuf,
}

impl FileStorage {
    /// Creates a storage over search roots (highest precedence first) and a cache directory.
    pub fn new(roots: Vec<PathBuf>, cache_dir: PathBuf) -> Self {
        Self { roots, cache_dir }
    }

    /// Path of the writable cache layer for `id`.
    pub fn cache_path(&self, id: &ResourceId) -> PathBuf {
        join_subpath(&self.cache_dir.join(id.app_id()), id.subpath())
            .join(format!("{}.json", id.file_name()))
    }

    /// Override directories for `id`, lowest precedence first.
    fn override_dirs(&self, id: &ResourceId) -> Vec<PathBuf> {
        let mut prefixes = id.subpath_chain();
        prefixes.reverse();

        self.roots
            .iter()
            .rev()
            .flat_map(|root| {
                let base = root
                    .join("configs")
                    .join("overrides")
                    .join(id.app_id())
                    .join(id.file_name());
                prefixes
                    .iter()
                    .map(|prefix| join_subpath(&base, prefix))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn load_override_dir(dir: &Path) -> Vec<OverrideLayer> {
        let Ok(read_dir) = fs::read_dir(dir) else {
            return Vec::new();
        };

        let mut files: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        files
            .into_iter()
            .filter_map(|path| match read_layer(&path, OVERRIDE_MAGIC) {
                Ok(entries) => Some(OverrideLayer::with_entries(
                    path.display().to_string(),
                    LayerKind::Override,
                    Some(path),
                    entries,
                )),
                Err(e) => {
                    warn!("Skipping override layer: {e}");
                    None
                }
            })
            .collect()
    }
}

impl LayerStorage for FileStorage {
    #[instrument(skip(self, schema), fields(resource = %schema.id()))]
    fn load_layers(&self, schema: &ConfigSchema) -> Result<Vec<OverrideLayer>> {
        let id = schema.id();
        let mut layers: Vec<OverrideLayer> = self
            .override_dirs(id)
            .iter()
            .flat_map(|dir| Self::load_override_dir(dir))
            .collect();

        let cache_path = self.cache_path(id);
        let cache_entries = if cache_path.exists() {
            read_layer(&cache_path, CACHE_MAGIC)?
        } else {
            BTreeMap::new()
        };

        debug!(
            "Loaded {} override layers and cache with {} entries",
            layers.len(),
            cache_entries.len()
        );

        layers.push(OverrideLayer::with_entries(
            "cache",
            LayerKind::Writable,
            Some(cache_path),
            cache_entries,
        ));

        Ok(layers)
    }

    #[instrument(skip(self, layer), fields(resource = %id, layer = layer.name()))]
    fn persist(&self, id: &ResourceId, layer: &OverrideLayer) -> Result<()> {
        let Some(path) = layer.path() else {
            return Ok(());
        };

        let document = LayerDocument {
            magic: CACHE_MAGIC.to_string(),
            version: LAYER_VERSION.to_string(),
            contents: layer.entries().clone(),
        };

        let text = serde_json::to_string_pretty(&document).map_err(|e| {
            DConfigError::PersistenceError {
                path: path.clone(),
                details: e.to_string(),
            }
        })?;

        write_atomically(path, text.as_bytes())
    }
}

fn read_layer(path: &Path, magic: &str) -> Result<BTreeMap<String, LayerEntry>> {
    let text = fs::read_to_string(path)?;
    let document: LayerDocument =
        serde_json::from_str(&text).map_err(|e| DConfigError::malformed(e, Some(path)))?;

    if document.magic != magic {
        return Err(DConfigError::malformed(
            format!("expected magic '{magic}', found '{}'", document.magic),
            Some(path),
        ));
    }

    Ok(document.contents)
}

/// Writes `bytes` to a sibling temp file, syncs it and renames it over `path`.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let persistence_error = |target: &Path, e: std::io::Error| DConfigError::PersistenceError {
        path: target.to_path_buf(),
        details: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| persistence_error(parent, e))?;
    }

    let temp_path = path.with_extension("json.tmp");

    let written = File::create(&temp_path).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(persistence_error(&temp_path, e));
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        persistence_error(path, e)
    })
}
