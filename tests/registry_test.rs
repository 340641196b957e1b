mod common;

use common::{harness, harness_with, params, FakeRuntime};
use director::rpc::{NOTIFY_ALIVE, REQUEST_STATUS};
use director::state::{
    BuildOptions, ConfigStore, DashPosition, ManualState, MemoryConfigStore, ServiceConfig,
    ServiceParams,
};
use director::{Error, Settings};
use serde_json::{json, Map};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(30);

fn settings() -> Settings {
    Settings {
        service_timeout: TIMEOUT,
        ..Settings::default()
    }
}

#[tokio::test]
async fn test_run_assigns_port_and_persists_config() {
    let h = harness(settings(), &["api"]);
    h.runtime.expose("api", &["8080/tcp"]);
    let registry = h.director.registry();

    let params = ServiceParams {
        build_options: Some(BuildOptions {
            env: Some(vec!["X=1".to_string()]),
            ..BuildOptions::default()
        }),
        pos: None,
    };
    registry.get("api", Some(&params)).await;
    let snapshot = registry.run_service("api").await.unwrap();

    assert_eq!(snapshot.state.as_deref(), Some("running"));
    assert_eq!(snapshot.running, Some(true));
    assert!(snapshot.meta.managed);

    let container = h.runtime.container("api").unwrap();
    let port = container.ports()[0];
    assert!((8900..=8998).contains(&port));

    let saved = h.store.load("api").unwrap().unwrap();
    assert_eq!(saved.build_options.env, Some(vec!["X=1".to_string()]));
    assert!(h
        .runtime
        .last_spec("api")
        .unwrap()
        .env
        .contains(&"X=1".to_string()));
}

#[tokio::test]
async fn test_run_unknown_image_is_not_found() {
    let h = harness(settings(), &["api"]);
    let err = h.director.registry().run_service("ghost").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.http_status(), 404);
    assert!(!h.director.registry().is_exists("ghost").await);
}

#[tokio::test]
async fn test_failed_run_clears_starting() {
    let h = harness(settings(), &["api"]);
    h.runtime.fail_build("api");
    let registry = h.director.registry();

    assert!(registry.run_service("api").await.is_err());
    let entry = registry.get("api", None).await;
    assert_eq!(entry.lock().await.manual_state(), None);
    assert_eq!(registry.get_state("api").await.unwrap().state, None);
}

#[tokio::test]
async fn test_alive_registration_appears_in_aggregate() {
    let h = harness(settings(), &[]);
    h.rpc.reply(
        "worker",
        json!({
            "app_state": "running",
            "register": [{"method": "ping", "role": "admin"}]
        }),
    );

    h.director.notify_alive("worker", &Map::new()).await;

    let records = h.director.registrations().await;
    assert_eq!(records.len(), 1);
    assert_eq!(
        serde_json::to_value(&records[0]).unwrap(),
        json!({"service": "worker", "method": "ping", "role": "admin", "options": {}})
    );
    assert_eq!(h.rpc.calls_to("worker")[0].0, REQUEST_STATUS);
    assert_ne!(REQUEST_STATUS, NOTIFY_ALIVE);
}

#[tokio::test]
async fn test_aggregate_keeps_registry_order() {
    let h = harness(settings(), &[]);
    h.rpc.reply(
        "b",
        json!({"app_state": "running", "register": [{"method": "two"}, {"method": "one"}]}),
    );
    h.rpc
        .reply("a", json!({"app_state": "running", "register": [{"method": "three"}]}));

    h.director.notify_alive("b", &Map::new()).await;
    h.director.notify_alive("a", &Map::new()).await;

    let methods: Vec<_> = h
        .director
        .registrations()
        .await
        .into_iter()
        .map(|r| format!("{}.{}", r.service, r.registration.method))
        .collect();
    assert_eq!(methods, vec!["b.two", "b.one", "a.three"]);
}

#[tokio::test]
async fn test_silent_service_gains_no_status() {
    let h = harness(settings(), &[]);
    h.director.notify_alive("worker", &Map::new()).await;
    h.rpc.reply("mute", json!({}));
    h.director.notify_alive("mute", &Map::new()).await;

    assert!(h.director.list().await.is_empty());
    assert!(h.director.registrations().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_after_timeout() {
    let h = harness(settings(), &[]);
    h.rpc
        .reply("worker", json!({"app_state": "running", "register": [{"method": "ping"}]}));
    h.rpc.reply(
        "db",
        json!({"app_state": "running", "meta": {"persistent": true}}),
    );
    h.director.notify_alive("worker", &Map::new()).await;
    h.director.notify_alive("db", &Map::new()).await;
    // Flags are derived when dock status is set.
    h.runtime.add_running("db", &[8901]);
    let db = h.director.driver().get("db").await.unwrap().unwrap();
    h.director.registry().set_dock_status("db", db).await;

    let registry = h.director.registry();
    assert!(registry.sweep_expired().await.is_empty());

    tokio::time::advance(TIMEOUT - Duration::from_secs(1)).await;
    assert!(registry.sweep_expired().await.is_empty());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(registry.sweep_expired().await, vec!["worker"]);
    assert!(registry.get_state("worker").await.unwrap().state.is_none());
}

#[tokio::test]
async fn test_stop_unknown_service_is_not_found() {
    let h = harness(settings(), &["api"]);
    let err = h.director.stop("api").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(!h.director.registry().is_exists("api").await);
    assert!(h.runtime.calls().is_empty());

    assert!(h.director.restart("api").await.unwrap_err().is_not_found());
    assert!(h.director.start("api").await.unwrap_err().is_not_found());
    assert!(h.director.remove("api").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_stop_without_container_is_noop() {
    let h = harness(settings(), &["api"]);
    h.director.registry().get("api", None).await;

    let snapshot = h.director.stop("api").await.unwrap();
    assert_eq!(snapshot.state, None);
    let snapshot = h.director.stop("api").await.unwrap();
    assert_eq!(snapshot.state, None);
    assert!(h.runtime.calls().is_empty());
}

#[tokio::test]
async fn test_stop_then_start() {
    let h = harness(settings(), &["api"]);
    h.director.run("api", &Map::new()).await.unwrap();

    let stopped = h.director.stop("api").await.unwrap();
    assert_eq!(stopped.state.as_deref(), Some("exited"));
    assert_eq!(stopped.running, Some(false));

    let started = h.director.start("api").await.unwrap();
    assert_eq!(started.state.as_deref(), Some("running"));
    let entry = h.director.registry().get("api", None).await;
    assert_eq!(entry.lock().await.manual_state(), None);
}

#[tokio::test]
async fn test_restart_without_container_clears_starting() {
    let h = harness(settings(), &["api"]);
    h.director.registry().get("api", None).await;
    let snapshot = h.director.restart("api").await.unwrap();
    assert_eq!(snapshot.state, None);
}

#[tokio::test]
async fn test_remove_cleans_state_but_keeps_identity() {
    let h = harness(settings(), &["api"]);
    h.runtime.expose("api", &["80/tcp"]);
    let snapshot = h
        .director
        .run("api", &params(json!({"pos": "2x3", "env": ["X=1"]})))
        .await
        .unwrap();
    assert_eq!(snapshot.pos.as_deref(), Some("2x3"));

    let removed = h.director.remove("api").await.unwrap();
    assert_eq!(removed.state, None);
    assert!(!removed.meta.managed);
    assert_eq!(removed.pos.as_deref(), Some("2x3"));
    assert!(h.runtime.container("api").is_none());

    let entry = h.director.registry().get("api", None).await;
    let state = entry.lock().await;
    assert_eq!(state.manual_state(), None);
    assert_eq!(state.build_options().env, Some(vec!["X=1".to_string()]));
    assert_eq!(state.pos(), Some(DashPosition { col: 2, row: 3 }));
}

#[tokio::test]
async fn test_removing_shows_while_in_flight() {
    let h = harness(settings(), &["api"]);
    let entry = h.director.registry().get("api", None).await;
    entry
        .lock()
        .await
        .set_manual_state(Some(ManualState::Removing));
    let snapshot = h.director.registry().get_state("api").await.unwrap();
    assert_eq!(snapshot.state.as_deref(), Some("removing"));
}

#[tokio::test]
async fn test_persisted_config_is_applied_on_first_reference() {
    let store = MemoryConfigStore::with_configs([(
        "api".to_string(),
        ServiceConfig {
            pos: Some(DashPosition { col: 1, row: 1 }),
            build_options: BuildOptions {
                nocache: Some(true),
                ..BuildOptions::default()
            },
        },
    )]);
    let h = harness_with(settings(), &["api"], FakeRuntime::new(), store);

    let entry = h.director.registry().get("api", None).await;
    let state = entry.lock().await;
    assert_eq!(state.pos(), Some(DashPosition { col: 1, row: 1 }));
    assert_eq!(state.build_options().nocache, Some(true));
}

#[tokio::test]
async fn test_should_start_merges_startup_and_configs() {
    let store = MemoryConfigStore::with_configs([
        ("api".to_string(), ServiceConfig::default()),
        ("director".to_string(), ServiceConfig::default()),
        ("worker".to_string(), ServiceConfig::default()),
    ]);
    let settings = Settings {
        startup: vec!["worker".to_string(), "cache".to_string(), "".to_string()],
        ..settings()
    };
    let h = harness_with(settings, &[], FakeRuntime::new(), store);

    assert_eq!(
        h.director.registry().should_start().await,
        vec!["worker", "cache", "api"]
    );
    assert_eq!(
        h.director.registry().list_configured().unwrap(),
        vec!["api", "director", "worker"]
    );
}

#[tokio::test]
async fn test_rebuild_all_runs_each_and_survives_failures() {
    let settings = Settings {
        startup: vec!["api".to_string(), "broken".to_string(), "worker".to_string()],
        ..settings()
    };
    let h = harness(settings, &["api", "broken", "worker"]);
    h.runtime.fail_build("broken");

    let rebuilt = h.director.rebuild_all().await;
    assert_eq!(rebuilt, vec!["api", "worker"]);
    assert!(h.runtime.container("worker").is_some());
}

#[tokio::test]
async fn test_app_status_persists_config() {
    let h = harness(settings(), &[]);
    h.rpc.reply("worker", json!({"app_state": "running"}));
    h.director.notify_alive("worker", &Map::new()).await;
    assert_eq!(h.store.names().unwrap(), vec!["worker"]);
}
