//! Unit tests for override layering, resource writes and connections.

#![allow(clippy::unwrap_used)]

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::{
    DConfigError,
    resource::{
        ConfigConnection, ConfigResource, ConnectionEvent, FileStorage, LayerEntry, LayerKind,
        LayerStorage, OverrideLayer, OverrideStore,
    },
    schema::{ConfigSchema, KeyFlags, Permissions, ResourceId, Visibility},
    value::Value,
};

const EXAMPLE: &str = include_str!("../../../tests/fixtures/example.json");
const APP_ID: &str = "org.foo.appid";

struct Fixture {
    root: TempDir,
    cache: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
            cache: TempDir::new().unwrap(),
        }
    }

    fn storage(&self) -> Arc<dyn LayerStorage> {
        Arc::new(FileStorage::new(
            vec![self.root.path().to_path_buf()],
            self.cache.path().to_path_buf(),
        ))
    }

    fn write_override(&self, name: &str, contents: serde_json::Value) {
        let dir = self
            .root
            .path()
            .join("configs/overrides")
            .join(APP_ID)
            .join("example");
        write_json(
            &dir.join(name),
            &json!({ "magic": "dsg.config.override", "version": "1.0", "contents": contents }),
        );
    }

    fn cache_file(&self) -> PathBuf {
        self.cache.path().join(APP_ID).join("example.json")
    }

    fn resource(&self) -> Arc<ConfigResource> {
        ConfigResource::new(example_schema(), self.storage()).unwrap()
    }
}

fn write_json(path: &Path, value: &serde_json::Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn example_schema() -> ConfigSchema {
    let id = ResourceId::new(APP_ID, "example", "").unwrap();
    ConfigSchema::from_json_str(id, EXAMPLE).unwrap()
}

fn connect(resource: &Arc<ConfigResource>, watcher: u64) -> ConfigConnection {
    resource.create_connection(watcher, None).unwrap()
}

fn drain(rx: &mut broadcast::Receiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return events,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
}

fn changed(key: &str, value: impl Into<Value>) -> ConnectionEvent {
    ConnectionEvent::ValueChanged {
        key: key.to_string(),
        value: value.into(),
    }
}

mod override_store {
    use super::*;

    fn layer(name: &str, kind: LayerKind, entries: &[(&str, Value)]) -> OverrideLayer {
        let entries: BTreeMap<String, LayerEntry> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), LayerEntry::new(v.clone())))
            .collect();
        OverrideLayer::with_entries(name, kind, None, entries)
    }

    #[test]
    fn highest_layer_defining_key_wins() {
        let schema = example_schema();
        let volume = schema.require("volume").unwrap();

        let store = OverrideStore::new(vec![
            layer("vendor", LayerKind::Override, &[("volume", Value::from(60))]),
            layer("site", LayerKind::Override, &[("volume", Value::from(70))]),
            layer("cache", LayerKind::Writable, &[]),
        ]);

        assert_eq!(store.effective(volume), &Value::from(70));
        assert!(!store.is_default(volume));
    }

    #[test]
    fn falls_back_to_schema_default() {
        let schema = example_schema();
        let can_exit = schema.require("canExit").unwrap();
        let store = OverrideStore::new(Vec::new());

        assert_eq!(store.effective(can_exit), &Value::Bool(true));
        assert!(store.is_default(can_exit));
        assert_eq!(store.layers().len(), 1);
        assert_eq!(store.layers()[0].kind(), LayerKind::Writable);
    }

    #[test]
    fn no_override_keys_ignore_deployment_layers() {
        let schema = example_schema();
        let pinned = schema.require("pinned").unwrap();
        assert!(pinned.flags.contains(KeyFlags::NO_OVERRIDE));

        let mut store = OverrideStore::new(vec![layer(
            "vendor",
            LayerKind::Override,
            &[("pinned", Value::from("edge"))],
        )]);
        assert_eq!(store.effective(pinned), &Value::from("stable"));
        assert!(store.is_default(pinned));

        let staged = store.stage_set("pinned", Value::from("beta"));
        store.install(staged);
        assert_eq!(store.effective(pinned), &Value::from("beta"));
    }

    #[test]
    fn staging_leaves_live_layers_untouched() {
        let schema = example_schema();
        let can_exit = schema.require("canExit").unwrap();
        let mut store = OverrideStore::new(Vec::new());

        let staged = store.stage_set("canExit", Value::Bool(false));
        assert_eq!(staged.layer().get("canExit"), Some(&Value::Bool(false)));
        assert_eq!(store.effective(can_exit), &Value::Bool(true));

        store.install(staged);
        assert_eq!(store.effective(can_exit), &Value::Bool(false));

        let resets = store.stage_reset("canExit");
        assert_eq!(resets.len(), 1);
        for staged in resets {
            store.install(staged);
        }
        assert!(store.is_default(can_exit));
        assert!(store.stage_reset("canExit").is_empty());
    }
}

mod values {
    use super::*;

    #[test]
    fn reads_nested_defaults() {
        let fixture = Fixture::new();
        let conn = connect(&fixture.resource(), 1);

        let map = |pairs: &[(&str, Value)]| {
            Value::Map(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            )
        };

        assert_eq!(
            conn.value("array").unwrap(),
            Value::from(vec!["value1", "value2"])
        );
        assert_eq!(
            conn.value("map").unwrap(),
            map(&[("key1", "value1".into()), ("key2", "value2".into())])
        );
        assert_eq!(
            conn.value("map_array").unwrap(),
            map(&[
                ("key1", Value::from(vec!["value1"])),
                ("key2", Value::from(vec!["value2"])),
            ])
        );
        assert_eq!(
            conn.value("array_map").unwrap(),
            Value::List(vec![map(&[
                ("key1", "value1".into()),
                ("key2", "value2".into()),
            ])])
        );
    }

    #[test]
    fn undeclared_key_is_unknown() {
        let fixture = Fixture::new();
        let conn = connect(&fixture.resource(), 1);

        assert!(matches!(
            conn.value("nope"),
            Err(DConfigError::UnknownKey { key, .. }) if key == "nope"
        ));
        assert!(matches!(
            conn.set_value("nope", Value::Bool(true)),
            Err(DConfigError::UnknownKey { .. })
        ));
        assert!(matches!(conn.reset("nope"), Err(DConfigError::UnknownKey { .. })));
    }

    #[test]
    fn set_and_reset_notify_once_each() {
        let fixture = Fixture::new();
        let conn = connect(&fixture.resource(), 1);
        let mut rx = conn.subscribe();

        assert!(conn.value("canExit").unwrap().as_bool().unwrap());
        assert!(conn.is_default_value("canExit").unwrap());

        conn.set_value("canExit", Value::Bool(false)).unwrap();
        assert_eq!(conn.value("canExit").unwrap(), Value::Bool(false));
        assert!(!conn.is_default_value("canExit").unwrap());
        assert_eq!(drain(&mut rx), vec![changed("canExit", false)]);

        conn.reset("canExit").unwrap();
        assert_eq!(conn.value("canExit").unwrap(), Value::Bool(true));
        assert!(conn.is_default_value("canExit").unwrap());
        assert_eq!(drain(&mut rx), vec![changed("canExit", true)]);
    }

    #[test]
    fn writing_equal_value_does_not_notify() {
        let fixture = Fixture::new();
        let conn = connect(&fixture.resource(), 1);
        let mut rx = conn.subscribe();

        conn.set_value("canExit", Value::Bool(true)).unwrap();
        assert!(drain(&mut rx).is_empty());

        conn.reset("canExit").unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn read_only_key_rejects_writes() {
        let fixture = Fixture::new();
        let resource = fixture.resource();
        let conn = connect(&resource, 1);
        let mut rx = conn.subscribe();

        assert_eq!(conn.permissions("locked").unwrap(), Permissions::ReadOnly);
        assert!(matches!(
            conn.set_value("locked", Value::Bool(true)),
            Err(DConfigError::ReadOnly { key, .. }) if key == "locked"
        ));
        assert!(matches!(
            conn.reset("locked"),
            Err(DConfigError::ReadOnly { key, .. }) if key == "locked"
        ));
        assert_eq!(conn.value("locked").unwrap(), Value::Bool(false));
        assert!(drain(&mut rx).is_empty());
        assert!(!fixture.cache_file().exists());
    }

    #[test]
    fn failed_persist_keeps_previous_value() {
        let root = TempDir::new().unwrap();
        let blocker = root.path().join("cache");
        fs::write(&blocker, "not a directory").unwrap();

        let storage: Arc<dyn LayerStorage> =
            Arc::new(FileStorage::new(vec![root.path().to_path_buf()], blocker));
        let resource = ConfigResource::new(example_schema(), storage).unwrap();
        let conn = connect(&resource, 1);
        let mut rx = conn.subscribe();

        let result = conn.set_value("canExit", Value::Bool(false));

        assert!(matches!(result, Err(DConfigError::PersistenceError { .. })));
        assert_eq!(conn.value("canExit").unwrap(), Value::Bool(true));
        assert!(conn.is_default_value("canExit").unwrap());
        assert!(drain(&mut rx).is_empty());
    }

    /// Two writable layers; persisting the one named `failing` errors.
    struct SplitStorage {
        failing: &'static str,
        persisted: Mutex<Vec<OverrideLayer>>,
    }

    impl LayerStorage for SplitStorage {
        fn load_layers(&self, _schema: &ConfigSchema) -> crate::Result<Vec<OverrideLayer>> {
            let layer = |name: &str| {
                let mut layer = OverrideLayer::new(name, LayerKind::Writable, None);
                layer.insert("canExit", Value::Bool(false));
                layer
            };
            Ok(vec![layer("system"), layer("user")])
        }

        fn persist(&self, _id: &ResourceId, layer: &OverrideLayer) -> crate::Result<()> {
            if layer.name() == self.failing {
                return Err(DConfigError::PersistenceError {
                    path: PathBuf::from(layer.name()),
                    details: "disk full".to_string(),
                });
            }
            self.persisted.lock().unwrap().push(layer.clone());
            Ok(())
        }
    }

    #[test]
    fn partially_failed_reset_restores_written_layers() {
        let storage = Arc::new(SplitStorage {
            failing: "user",
            persisted: Mutex::new(Vec::new()),
        });
        let resource =
            ConfigResource::new(example_schema(), Arc::clone(&storage) as Arc<dyn LayerStorage>)
                .unwrap();
        let conn = connect(&resource, 1);
        let mut rx = conn.subscribe();

        let result = conn.reset("canExit");

        assert!(matches!(result, Err(DConfigError::PersistenceError { .. })));
        assert_eq!(conn.value("canExit").unwrap(), Value::Bool(false));
        assert!(drain(&mut rx).is_empty());

        let persisted = storage.persisted.lock().unwrap();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0].name(), "system");
        assert_eq!(persisted[0].get("canExit"), None);
        assert_eq!(persisted[1].name(), "system");
        assert_eq!(persisted[1].get("canExit"), Some(&Value::Bool(false)));
    }
}

mod metadata {
    use super::*;

    #[test]
    fn name_and_description_resolve_strictly() {
        let fixture = Fixture::new();
        let conn = connect(&fixture.resource(), 1);

        assert_eq!(conn.name("canExit", "").unwrap(), "I am name");
        assert_eq!(conn.name("canExit", "zh_CN").unwrap(), "我是名字");
        assert_eq!(conn.name("canExit", "ja_JP").unwrap(), "");

        assert_eq!(conn.description("canExit", "").unwrap(), "我是描述");
        assert_eq!(
            conn.description("canExit", "en_US").unwrap(),
            "I am description"
        );
        assert_eq!(conn.description("canExit", "zh_CN").unwrap(), "");
    }

    #[test]
    fn key_metadata_is_exposed() {
        let fixture = Fixture::new();
        let conn = connect(&fixture.resource(), 1);

        assert_eq!(conn.version().unwrap(), "1.0");
        assert_eq!(conn.key_list().unwrap().len(), 8);
        assert_eq!(conn.key_list().unwrap()[0], "canExit");

        assert_eq!(conn.visibility("volume").unwrap(), Visibility::Public);
        assert_eq!(conn.visibility("canExit").unwrap(), Visibility::Private);
        assert_eq!(
            conn.flags("volume").unwrap(),
            KeyFlags::GLOBAL | KeyFlags::USER_PUBLIC
        );
        assert_eq!(conn.permissions("canExit").unwrap(), Permissions::ReadWrite);
    }
}

mod connections {
    use super::*;

    #[test]
    fn writes_fan_out_to_every_connection() {
        let fixture = Fixture::new();
        let resource = fixture.resource();
        let writer = connect(&resource, 1);
        let reader = connect(&resource, 2);
        let mut writer_rx = writer.subscribe();
        let mut reader_rx = reader.subscribe();

        writer.set_value("volume", Value::from(80)).unwrap();

        assert_eq!(reader.value("volume").unwrap(), Value::from(80));
        assert_eq!(drain(&mut writer_rx), vec![changed("volume", 80)]);
        assert_eq!(drain(&mut reader_rx), vec![changed("volume", 80)]);
        assert_eq!(resource.connection_count(), 2);
    }

    #[test]
    fn released_connection_rejects_operations() {
        let fixture = Fixture::new();
        let resource = fixture.resource();
        let conn = connect(&resource, 7);
        let other = connect(&resource, 8);
        let mut rx = conn.subscribe();

        conn.release();
        conn.release();

        assert!(conn.is_released());
        assert_eq!(drain(&mut rx), vec![ConnectionEvent::Released]);
        assert_eq!(resource.connection_count(), 1);

        assert!(matches!(
            conn.value("canExit"),
            Err(DConfigError::Released { watcher: 7, .. })
        ));
        assert!(matches!(
            conn.set_value("canExit", Value::Bool(false)),
            Err(DConfigError::Released { .. })
        ));
        assert!(matches!(conn.key_list(), Err(DConfigError::Released { .. })));
        assert!(matches!(conn.name("canExit", ""), Err(DConfigError::Released { .. })));

        other.set_value("canExit", Value::Bool(false)).unwrap();
        assert!(drain(&mut rx).is_empty());
    }
}

mod layers {
    use super::*;

    #[test]
    fn deployment_overrides_apply_below_cache() {
        let fixture = Fixture::new();
        fixture.write_override("10-site.json", json!({ "volume": { "value": 80 } }));
        fixture.write_override(
            "20-pin.json",
            json!({ "pinned": { "value": "edge" }, "canExit": { "value": false } }),
        );

        let resource = fixture.resource();
        let conn = connect(&resource, 1);
        let mut rx = conn.subscribe();

        assert_eq!(conn.value("volume").unwrap(), Value::from(80));
        assert_eq!(conn.value("canExit").unwrap(), Value::Bool(false));
        assert_eq!(conn.value("pinned").unwrap(), Value::from("stable"));
        assert!(!conn.is_default_value("volume").unwrap());

        conn.set_value("volume", Value::from(30)).unwrap();
        conn.reset("volume").unwrap();

        assert_eq!(conn.value("volume").unwrap(), Value::from(80));
        assert_eq!(
            drain(&mut rx),
            vec![changed("volume", 30), changed("volume", 80)]
        );
    }

    #[test]
    fn malformed_override_is_skipped() {
        let fixture = Fixture::new();
        fixture.write_override("10-site.json", json!({ "volume": { "value": 80 } }));
        let bad = fixture
            .root
            .path()
            .join("configs/overrides")
            .join(APP_ID)
            .join("example/20-bad.json");
        fs::write(bad, "{ not json").unwrap();

        let resource = fixture.resource();

        assert_eq!(resource.value("volume").unwrap(), Value::from(80));
        let kinds: Vec<LayerKind> = resource.layers().unwrap().iter().map(|l| l.kind()).collect();
        assert_eq!(kinds, vec![LayerKind::Override, LayerKind::Writable]);
    }

    #[test]
    fn malformed_cache_fails_resource_creation() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.cache_file().parent().unwrap()).unwrap();
        fs::write(fixture.cache_file(), "[]").unwrap();

        let result = ConfigResource::new(example_schema(), fixture.storage());

        assert!(matches!(result, Err(DConfigError::Malformed { .. })));
    }

    #[test]
    fn writes_persist_to_cache_and_reload() {
        let fixture = Fixture::new();
        connect(&fixture.resource(), 1)
            .set_value("canExit", Value::Bool(false))
            .unwrap();

        let text = fs::read_to_string(fixture.cache_file()).unwrap();
        let document: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(document["magic"], "dsg.config.cache");
        assert_eq!(document["contents"]["canExit"]["value"], false);

        let reloaded = fixture.resource();
        assert_eq!(reloaded.value("canExit").unwrap(), Value::Bool(false));
    }

    #[test]
    fn write_back_preserves_unrelated_entries() {
        let fixture = Fixture::new();
        write_json(
            &fixture.cache_file(),
            &json!({
                "magic": "dsg.config.cache",
                "version": "1.0",
                "contents": {
                    "canExit": { "value": true, "serial": 0, "time": "2021-01-01" },
                    "retired": { "value": 3 }
                }
            }),
        );

        connect(&fixture.resource(), 1)
            .set_value("canExit", Value::Bool(false))
            .unwrap();

        let text = fs::read_to_string(fixture.cache_file()).unwrap();
        let document: serde_json::Value = serde_json::from_str(&text).unwrap();
        let contents = &document["contents"];
        assert_eq!(contents["canExit"]["value"], false);
        assert_eq!(contents["canExit"]["serial"], 0);
        assert_eq!(contents["canExit"]["time"], "2021-01-01");
        assert_eq!(contents["retired"]["value"], 3);
    }
}
