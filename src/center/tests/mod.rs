#![allow(clippy::unwrap_used)]

use std::{fs, sync::Arc, time::Duration};

use tempfile::TempDir;

use crate::{
    DConfigError,
    center::ConfigCenter,
    resource::FileStorage,
    schema::{ResourceId, SchemaLoader},
    value::Value,
};

const EXAMPLE: &str = include_str!("../../../tests/fixtures/example.json");
const APP_ID: &str = "org.foo.appid";
const SERVICE1: &str = ":1.10";
const SERVICE2: &str = ":1.11";

struct Fixture {
    root: TempDir,
    cache: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let schema_dir = root.path().join("configs").join(APP_ID);
        fs::create_dir_all(&schema_dir).unwrap();
        fs::write(schema_dir.join("example.json"), EXAMPLE).unwrap();

        Self {
            root,
            cache: TempDir::new().unwrap(),
        }
    }

    fn center(&self, delay_ms: u64) -> ConfigCenter {
        let roots = vec![self.root.path().to_path_buf()];
        ConfigCenter::with_parts(
            SchemaLoader::new(roots.clone()),
            Arc::new(FileStorage::new(roots, self.cache.path().to_path_buf())),
            delay_ms,
        )
    }
}

fn example_id(subpath: &str) -> ResourceId {
    ResourceId::new(APP_ID, "example", subpath).unwrap()
}

#[test]
fn same_identity_shares_one_resource() {
    let fixture = Fixture::new();
    let center = fixture.center(0);

    let first = center.open(SERVICE1, APP_ID, "example", "").unwrap();
    let second = center.open(SERVICE2, APP_ID, "example", "").unwrap();

    assert!(Arc::ptr_eq(first.resource(), second.resource()));
    assert_ne!(first.watcher_id(), second.watcher_id());
    assert_eq!(center.resource_count(), 1);
    assert_eq!(first.resource().connection_count(), 2);
    assert_eq!(center.refs().ref_count_on_resource("org.foo.appid/example"), 2);

    first.set_value("canExit", Value::Bool(false)).unwrap();
    assert_eq!(second.value("canExit").unwrap(), Value::Bool(false));
}

#[test]
fn subpaths_are_distinct_resources() {
    let fixture = Fixture::new();
    let center = fixture.center(0);

    let plain = center.open(SERVICE1, APP_ID, "example", "").unwrap();
    let nested = center.open(SERVICE1, APP_ID, "example", "/a/b").unwrap();

    assert!(!Arc::ptr_eq(plain.resource(), nested.resource()));
    assert_eq!(center.resource_count(), 2);
    assert_eq!(nested.resource().id(), &example_id("/a/b"));
    assert!(center.resource(&example_id("/a/b")).is_some());
}

#[test]
fn open_reports_lookup_failures() {
    let fixture = Fixture::new();
    let center = fixture.center(0);

    assert!(matches!(
        center.open(SERVICE1, APP_ID, "example_notexist", ""),
        Err(DConfigError::NotFound { .. })
    ));
    assert!(matches!(
        center.open(SERVICE1, APP_ID, "ex/ample", ""),
        Err(DConfigError::InvalidIdentity { .. })
    ));
    assert_eq!(center.resource_count(), 0);
    assert_eq!(center.refs().service_count(), 0);
}

#[test]
fn releasing_last_connection_evicts_resource() {
    let fixture = Fixture::new();
    let center = fixture.center(0);

    let first = center.open(SERVICE1, APP_ID, "example", "").unwrap();
    let second = center.open(SERVICE2, APP_ID, "example", "").unwrap();

    first.release();
    assert_eq!(center.resource_count(), 1);

    second.release();
    assert_eq!(center.resource_count(), 0);
    assert!(center.resource(&example_id("")).is_none());
    assert_eq!(center.refs().resource_count(), 0);
}

#[test]
fn release_service_releases_its_connections() {
    let fixture = Fixture::new();
    let center = fixture.center(0);

    let first = center.open(SERVICE1, APP_ID, "example", "").unwrap();
    let second = center.open(SERVICE1, APP_ID, "example", "/a").unwrap();
    let other = center.open(SERVICE2, APP_ID, "example", "").unwrap();
    let mut rx = first.subscribe();

    center.release_service(SERVICE1);

    assert!(first.is_released());
    assert!(second.is_released());
    assert!(!other.is_released());
    assert_eq!(rx.try_recv().unwrap(), crate::resource::ConnectionEvent::Released);
    assert!(center.connections(SERVICE1).is_empty());
    assert_eq!(center.connections(SERVICE2).len(), 1);
    assert_eq!(center.resource_count(), 1);
    assert_eq!(center.refs().resource_count_on_service(SERVICE1), 0);
}

#[test]
fn evicted_resource_is_freed_once_handles_are_dropped() {
    let fixture = Fixture::new();
    let center = fixture.center(0);

    let conn = center.open(SERVICE1, APP_ID, "example", "").unwrap();
    let resource = Arc::downgrade(conn.resource());
    conn.release();
    drop(conn);

    assert_eq!(center.resource_count(), 0);
    assert!(center.connections(SERVICE1).is_empty());
    assert!(resource.upgrade().is_none());
}

#[test]
fn released_connections_are_pruned_from_service() {
    let fixture = Fixture::new();
    let center = fixture.center(0);

    let first = center.open(SERVICE1, APP_ID, "example", "").unwrap();
    let _second = center.open(SERVICE1, APP_ID, "example", "").unwrap();
    first.release();

    assert_eq!(center.connections(SERVICE1).len(), 1);
    assert_eq!(center.refs().ref_count(SERVICE1, "org.foo.appid/example"), 1);
}

#[tokio::test(start_paused = true)]
async fn resource_survives_grace_window_and_is_reused() {
    let fixture = Fixture::new();
    let center = fixture.center(1000);

    let first = center.open(SERVICE1, APP_ID, "example", "").unwrap();
    let resource = Arc::clone(first.resource());
    first.release();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(center.resource_count(), 1);

    let again = center.open(SERVICE1, APP_ID, "example", "").unwrap();
    assert!(Arc::ptr_eq(&resource, again.resource()));

    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(center.resource_count(), 1);
    assert!(!again.is_released());
}

#[tokio::test(start_paused = true)]
async fn resource_is_evicted_after_grace_window() {
    let fixture = Fixture::new();
    let center = fixture.center(1000);
    let mut releases = center.refs().subscribe_releases();

    center
        .open(SERVICE1, APP_ID, "example", "")
        .unwrap()
        .release();
    assert_eq!(center.resource_count(), 1);
    assert!(center.refs().is_pending("org.foo.appid/example"));

    assert_eq!(releases.recv().await.unwrap(), "org.foo.appid/example");
    assert_eq!(center.resource_count(), 0);

    let fresh = center.open(SERVICE1, APP_ID, "example", "").unwrap();
    assert_eq!(center.resource_count(), 1);
    assert!(fresh.is_default_value("canExit").unwrap());
}

#[test]
fn delay_is_adjustable() {
    let fixture = Fixture::new();
    let center = fixture.center(1000);

    assert_eq!(center.delay_release_time(), 1000);
    center.set_delay_release_time(10);
    assert_eq!(center.delay_release_time(), 10);
    assert_eq!(center.refs().delay_release_time(), 10);
}
