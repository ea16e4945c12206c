//! Configuration schemas.
//!
//! A schema is the parsed, immutable description of one configuration
//! resource: its declared keys, their defaults and their metadata. Schemas
//! are located among ordered search roots by [`SchemaLoader`].

mod document;
mod identity;
mod loader;
mod locale;


use std::{collections::HashMap, path::PathBuf};

use bitflags::bitflags;

pub use identity::ResourceId;
pub use loader::SchemaLoader;
pub use locale::LocaleText;

pub(crate) use loader::join_subpath;

use crate::{DConfigError, Result, value::Value};

bitflags! {
    /// Per-key behaviour flags declared in the schema.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KeyFlags: u32 {
        /// Deployment override layers may not change this key
        const NO_OVERRIDE = 1 << 0;
        /// The value is shared by all users
        const GLOBAL = 1 << 1;
        /// The key may be read by other users
        const USER_PUBLIC = 1 << 2;
    }
}

impl KeyFlags {
    /// Parses one flag token of the schema document.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "nooverride" | "no-override" => Some(Self::NO_OVERRIDE),
            "global" => Some(Self::GLOBAL),
            "user-public" => Some(Self::USER_PUBLIC),
            _ => None,
        }
    }
}

/// Whether a key is exposed to other applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Visible to any application
    Public,
    /// Visible to the owning application only
    #[default]
    Private,
}

impl Visibility {
    /// Token used in schema documents and on the bus.
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

/// Whether a key accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Permissions {
    /// Value can only be changed by deployment override layers
    ReadOnly,
    /// Value can be written through connections
    #[default]
    ReadWrite,
}

impl Permissions {
    /// Token used in schema documents and on the bus.
    pub fn as_str(self) -> &'static str {
        match self {
            Permissions::ReadOnly => "readonly",
            Permissions::ReadWrite => "readwrite",
        }
    }
}

/// Declaration of a single key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyDefinition {
    /// Key name
    pub key: String,
    /// Default value used when no layer overrides the key
    pub default: Value,
    /// Visibility of the key
    pub visibility: Visibility,
    /// Write permissions of the key
    pub permissions: Permissions,
    /// Behaviour flags
    pub flags: KeyFlags,
    /// Revision counter of the declaration, if given
    pub serial: Option<i64>,
    /// Localized human-readable names
    pub name: LocaleText,
    /// Localized descriptions
    pub description: LocaleText,
}

/// Immutable description of one configuration resource.
#[derive(Debug, Clone)]
pub struct ConfigSchema {
    id: ResourceId,
    version: String,
    source: Option<PathBuf>,
    keys: Vec<KeyDefinition>,
    index: HashMap<String, usize>,
}

impl ConfigSchema {
    pub(crate) fn new(
        id: ResourceId,
        version: String,
        source: Option<PathBuf>,
        keys: Vec<KeyDefinition>,
    ) -> Self {
        let index = keys
            .iter()
            .enumerate()
            .map(|(i, def)| (def.key.clone(), i))
            .collect();

        Self {
            id,
            version,
            source,
            keys,
            index,
        }
    }

    /// Parses a schema document for `id` from JSON text.
    ///
    /// # Errors
    /// Returns `DConfigError::Malformed` if the document violates the schema grammar.
    pub fn from_json_str(id: ResourceId, text: &str) -> Result<Self> {
        document::parse_schema(id, text, None)
    }

    /// Identity this schema was loaded for
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Document version
    pub fn version(&self) -> &str {
        &self.version
    }

    /// File the schema was read from, if any
    pub fn source(&self) -> Option<&PathBuf> {
        self.source.as_ref()
    }

    /// Declared keys in document order
    pub fn keys(&self) -> impl Iterator<Item = &KeyDefinition> {
        self.keys.iter()
    }

    /// Declared key names in document order
    pub fn key_names(&self) -> Vec<String> {
        self.keys.iter().map(|def| def.key.clone()).collect()
    }

    /// Number of declared keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the schema declares no keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Looks up a key declaration.
    pub fn key(&self, key: &str) -> Option<&KeyDefinition> {
        self.index.get(key).map(|&i| &self.keys[i])
    }

    /// Looks up a key declaration, failing for undeclared keys.
    ///
    /// # Errors
    /// Returns `DConfigError::UnknownKey` if `key` is not declared.
    pub fn require(&self, key: &str) -> Result<&KeyDefinition> {
        self.key(key).ok_or_else(|| DConfigError::UnknownKey {
            resource: self.id.key(),
            key: key.to_string(),
        })
    }
}
