use std::sync::Arc;

use serde_json::{json, Value};

use harvest::{handler_fn, AppConfig, Application, HarvestError, Priority, Task, TaskRequest};
use harvest_config::CacheBackendKind;
use harvest_testing_utils::{EventCollector, ScriptedProbe};

fn config(dir: &tempfile::TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.cache.backend = Some(CacheBackendKind::Sqlite);
    config.cache.sqlite.path = dir.path().join("cache.db").to_string_lossy().into_owned();
    config.credentials.min_rotation_interval_ms = 0;
    config
        .credentials
        .providers
        .insert("serp".to_string(), vec!["serp-key-a".to_string()]);
    config.proxy.enabled = true;
    config.proxy.pools.insert(
        "datacenter".to_string(),
        vec!["http://10.2.0.1:8080".to_string()],
    );
    config
}

async fn build(config: AppConfig) -> Application {
    Application::build_with_probe(config, Arc::new(ScriptedProbe::new(true)))
        .await
        .unwrap()
}

fn search_request(app: &Application, query: &str) -> TaskRequest {
    let credentials = app.credentials();
    let proxies = app.proxies();
    let cache = app.cache();

    let handler = handler_fn("search", move |task: Task| {
        let credentials = Arc::clone(&credentials);
        let proxies = Arc::clone(&proxies);
        let cache = Arc::clone(&cache);
        async move {
            if let Some(hit) = cache.get("search", &task.payload).await? {
                return Ok(json!({"cached": true, "result": hit}));
            }
            let key = credentials.get_credential("serp").await?;
            let proxy = proxies.get_proxy(task.id.as_str(), None).await?;
            let result = json!({"key_prefix": &key[..4], "proxy": proxy});
            cache.set("search", &task.payload, &result, None).await?;
            Ok(json!({"cached": false, "result": result}))
        }
    });

    TaskRequest::new("search")
        .priority(Priority::High)
        .payload(json!({"query": query}))
        .handler(handler)
}

#[tokio::test]
async fn tasks_draw_on_credentials_proxies_and_cache() {
    let dir = tempfile::tempdir().unwrap();
    let app = build(config(&dir)).await;
    let mut collector = EventCollector::new(app.events().subscribe());

    let first: Value = app
        .scheduler()
        .submit(search_request(&app, "tokio"))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first["cached"], json!(false));
    assert_eq!(first["result"]["proxy"], json!("http://10.2.0.1:8080"));
    assert_eq!(first["result"]["key_prefix"], json!("serp"));

    let second = app
        .scheduler()
        .submit(search_request(&app, "tokio"))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second["cached"], json!(true));
    assert_eq!(second["result"], first["result"]);

    let stats = app.cache().stats().await;
    assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
    assert_eq!(collector.count("TaskCompleted"), 2);

    app.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_scheduler_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let app = build(config(&dir)).await;

    app.shutdown().await;
    app.shutdown().await;
    assert!(app.is_shutdown());
    assert!(app.scheduler().is_stopped());

    let result = app.scheduler().submit(search_request(&app, "late")).await;
    assert!(matches!(result, Err(HarvestError::SchedulerStopped)));
}

#[tokio::test]
async fn unselected_cache_backend_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir);
    config.cache.backend = None;

    let result = Application::build_with_probe(config, Arc::new(ScriptedProbe::new(true))).await;
    assert!(matches!(result, Err(HarvestError::Configuration(_))));
}

#[tokio::test]
async fn invalid_intervals_are_rejected_before_any_loop_starts() {
    let dir = tempfile::tempdir().unwrap();

    let mut no_health_interval = config(&dir);
    no_health_interval.proxy.health_check_interval_seconds = 0;
    let result =
        Application::build_with_probe(no_health_interval, Arc::new(ScriptedProbe::new(true))).await;
    assert!(matches!(result, Err(HarvestError::Configuration(_))));

    let mut no_sweep_interval = config(&dir);
    no_sweep_interval.cache.sqlite.sweep_interval_seconds = 0;
    let result =
        Application::build_with_probe(no_sweep_interval, Arc::new(ScriptedProbe::new(true))).await;
    assert!(matches!(result, Err(HarvestError::Configuration(_))));
}
