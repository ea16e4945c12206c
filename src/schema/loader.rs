use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::{debug, instrument};

use super::{ConfigSchema, ResourceId, document};
use crate::{DConfigError, Result};

/// Locates schema documents among ordered search roots.
///
/// Roots are ordered by precedence, highest first. Each root is expected to
/// contain a `configs/` directory laid out as `configs/{app_id}/{file}.json`.
#[derive(Debug, Clone)]
pub struct SchemaLoader {
    roots: Vec<PathBuf>,
}

impl SchemaLoader {
    /// Creates a loader over the given search roots.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Search roots, highest precedence first
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Loads the schema for an identity given as raw parts.
    ///
    /// # Errors
    /// * `DConfigError::InvalidIdentity` - If the parts do not form a valid identity
    /// * `DConfigError::NotFound` - If no root yields a readable schema file
    /// * `DConfigError::Malformed` - If the schema document is invalid
    pub fn load(&self, app_id: &str, file_name: &str, subpath: &str) -> Result<ConfigSchema> {
        let id = ResourceId::new(app_id, file_name, subpath)?;
        self.load_id(&id)
    }

    /// Loads the schema for an already validated identity.
    ///
    /// # Errors
    /// * `DConfigError::NotFound` - If no root yields a readable schema file
    /// * `DConfigError::Malformed` - If the schema document is invalid
    #[instrument(skip(self), fields(resource = %id))]
    pub fn load_id(&self, id: &ResourceId) -> Result<ConfigSchema> {
        for candidate in self.candidates(id) {
            let text = match fs::read_to_string(&candidate) {
                Ok(text) => text,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    return Err(DConfigError::malformed(e, Some(&candidate)));
                }
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable schema {}", candidate.display());
                    continue;
                }
            };

            debug!("Loading schema from {}", candidate.display());
            return document::parse_schema(id.clone(), &text, Some(&candidate));
        }

        Err(DConfigError::NotFound { resource: id.key() })
    }

    /// Candidate schema paths for `id` in lookup order.
    ///
    /// For every root, the application directory is searched from the
    /// deepest subpath prefix to the shallowest, then the generic directory
    /// shared by all applications.
    pub fn candidates(&self, id: &ResourceId) -> Vec<PathBuf> {
        let file = format!("{}.json", id.file_name());
        let chain = id.subpath_chain();

        self.roots
            .iter()
            .flat_map(|root| {
                let configs = root.join("configs");
                let app_dirs = chain
                    .iter()
                    .map(|prefix| join_subpath(&configs.join(id.app_id()), prefix));
                let generic_dirs = chain.iter().map(|prefix| join_subpath(&configs, prefix));

                app_dirs
                    .chain(generic_dirs)
                    .map(|dir| dir.join(&file))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Appends a `/`-separated subpath to `base`.
pub(crate) fn join_subpath(base: &Path, subpath: &str) -> PathBuf {
    subpath
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(base.to_path_buf(), |path, part| path.join(part))
}
