use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::{
    schema::{KeyDefinition, KeyFlags},
    value::Value,
};

/// Whether a layer can be written through connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Deployment override shipped under a search root
    Override,
    /// Per-user cache receiving writes
    Writable,
}

/// One entry of an override layer.
///
/// Fields other than `value` are carried through untouched on write-back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerEntry {
    /// Overriding value
    pub value: Value,
    /// Extra fields of the on-disk entry
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl LayerEntry {
    /// Creates an entry holding just a value.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            extra: Map::new(),
        }
    }
}

/// A named key → value map applied over schema defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideLayer {
    name: String,
    kind: LayerKind,
    path: Option<PathBuf>,
    entries: BTreeMap<String, LayerEntry>,
}

impl OverrideLayer {
    /// Creates an empty layer; `path` is where it persists, `None` keeps it in memory.
    pub fn new(name: impl Into<String>, kind: LayerKind, path: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind,
            path,
            entries: BTreeMap::new(),
        }
    }

    /// Creates a layer from already parsed entries.
    pub fn with_entries(
        name: impl Into<String>,
        kind: LayerKind,
        path: Option<PathBuf>,
        entries: BTreeMap<String, LayerEntry>,
    ) -> Self {
        Self {
            entries,
            ..Self::new(name, kind, path)
        }
    }

    /// Layer name used in diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layer kind
    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    /// Backing file, if the layer is persisted
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// All entries, including keys the current schema does not declare
    pub fn entries(&self) -> &BTreeMap<String, LayerEntry> {
        &self.entries
    }

    /// Value this layer defines for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Sets `key`, keeping any extra fields of an existing entry.
    pub fn insert(&mut self, key: &str, value: Value) {
        match self.entries.get_mut(key) {
            Some(entry) => entry.value = value,
            None => {
                self.entries.insert(key.to_string(), LayerEntry::new(value));
            }
        }
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn applies_to(&self, definition: &KeyDefinition) -> bool {
        match self.kind {
            LayerKind::Override => !definition.flags.contains(KeyFlags::NO_OVERRIDE),
            LayerKind::Writable => true,
        }
    }
}

/// A layer copy prepared by a write, awaiting persistence.
#[derive(Debug, Clone)]
pub struct StagedLayer {
    pub(crate) index: usize,
    pub(crate) layer: OverrideLayer,
}

impl StagedLayer {
    /// The prepared layer contents
    pub fn layer(&self) -> &OverrideLayer {
        &self.layer
    }
}

/// Ordered override layers, lowest precedence first.
///
/// Writes are staged on a copy of the affected layer so the caller can
/// persist it before installing; the live layers are never touched until
/// [`OverrideStore::install`].
#[derive(Debug, Clone)]
pub struct OverrideStore {
    layers: Vec<OverrideLayer>,
}

impl OverrideStore {
    /// Creates a store, appending an in-memory writable layer if none is given.
    pub fn new(mut layers: Vec<OverrideLayer>) -> Self {
        if !layers.iter().any(|l| l.kind == LayerKind::Writable) {
            layers.push(OverrideLayer::new("memory", LayerKind::Writable, None));
        }

        Self { layers }
    }

    /// Layers, lowest precedence first
    pub fn layers(&self) -> &[OverrideLayer] {
        &self.layers
    }

    /// Effective value of a declared key.
    pub fn effective<'a>(&'a self, definition: &'a KeyDefinition) -> &'a Value {
        self.overriding_value(definition)
            .unwrap_or(&definition.default)
    }

    /// Whether no layer overrides the key.
    pub fn is_default(&self, definition: &KeyDefinition) -> bool {
        self.overriding_value(definition).is_none()
    }

    fn overriding_value<'a>(&'a self, definition: &KeyDefinition) -> Option<&'a Value> {
        self.layers
            .iter()
            .rev()
            .filter(|layer| layer.applies_to(definition))
            .find_map(|layer| layer.get(&definition.key))
    }

    /// Prepares a write of `value` into the highest writable layer.
    pub fn stage_set(&self, key: &str, value: Value) -> StagedLayer {
        let index = self.top_writable();
        let mut layer = self.layers[index].clone();
        layer.insert(key, value);

        StagedLayer { index, layer }
    }

    /// Prepares removal of `key` from every writable layer defining it.
    pub fn stage_reset(&self, key: &str) -> Vec<StagedLayer> {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, layer)| layer.kind == LayerKind::Writable && layer.get(key).is_some())
            .map(|(index, layer)| {
                let mut layer = layer.clone();
                layer.remove(key);
                StagedLayer { index, layer }
            })
            .collect()
    }

    /// Installs a staged layer in place of the one it was copied from.
    pub fn install(&mut self, staged: StagedLayer) {
        if let Some(slot) = self.layers.get_mut(staged.index) {
            *slot = staged.layer;
        }
    }

    fn top_writable(&self) -> usize {
        self.layers
            .iter()
            .rposition(|layer| layer.kind == LayerKind::Writable)
            .unwrap_or(self.layers.len() - 1)
    }
}
