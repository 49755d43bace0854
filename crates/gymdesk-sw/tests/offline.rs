//! End-to-end: a worker over SQLite storage and a real HTTP origin.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use gymdesk_cache::CacheStorage;
use gymdesk_core::{CacheNamespace, OfflineConfig};
use gymdesk_net::{Fetcher, HttpFetcher, LoaderConfig, NetError, Request, Response};
use gymdesk_sw::{EventReply, ExtendableEvent, OfflineWorker, PlatformEvent, WorkerState};
use http::StatusCode;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Real HTTP with a switch that cuts the connection.
struct Switchable {
    inner: HttpFetcher,
    offline: AtomicBool,
}

#[async_trait]
impl Fetcher for Switchable {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed("offline".to_string()));
        }
        self.inner.fetch(request).await
    }
}

fn switchable() -> Arc<Switchable> {
    Arc::new(Switchable {
        inner: HttpFetcher::new(LoaderConfig::default()).unwrap(),
        offline: AtomicBool::new(false),
    })
}

async fn origin() -> (MockServer, OfflineConfig) {
    let server = MockServer::start().await;
    let config = OfflineConfig {
        origin: Url::parse(&format!("{}/", server.uri())).unwrap(),
        ..Default::default()
    };

    let manifest = config
        .precache
        .shell
        .iter()
        .chain(&config.precache.static_assets);
    for route in manifest {
        Mock::given(method("GET"))
            .and(path(route.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("page {}", route)))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/api/members"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"[{"id":1}]"#),
        )
        .mount(&server)
        .await;

    (server, config)
}

fn keys(config: &OfflineConfig, paths: &[String]) -> BTreeSet<String> {
    paths
        .iter()
        .map(|p| Request::get(config.resolve(p).unwrap()).cache_key())
        .collect()
}

async fn fetch(worker: &OfflineWorker, request: Request) -> Response {
    let lifetime = ExtendableEvent::new();
    let reply = worker
        .dispatch(PlatformEvent::Fetch(request), &lifetime)
        .await
        .unwrap();
    lifetime.settled().await;
    match reply {
        EventReply::Fetch(Some(response)) => response,
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn test_install_activate_and_serve_offline() {
    let (_server, config) = origin().await;
    let storage = CacheStorage::open_in_memory().unwrap();
    let old = CacheNamespace::from("gymdesk-v0");
    storage.open(&old).await.unwrap();
    let fetcher = switchable();
    let (worker, _events) = OfflineWorker::new(config.clone(), storage.clone(), fetcher.clone());
    let lifetime = ExtendableEvent::new();

    worker.dispatch(PlatformEvent::Install, &lifetime).await.unwrap();

    let namespaces = worker.namespaces().clone();
    let shell: BTreeSet<String> = storage
        .keys(&namespaces.primary)
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(shell, keys(&config, &config.precache.shell));
    let assets: BTreeSet<String> = storage
        .keys(&namespaces.static_assets)
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(assets, keys(&config, &config.precache.static_assets));

    worker.dispatch(PlatformEvent::Activate, &lifetime).await.unwrap();
    assert_eq!(worker.state().await, WorkerState::Activated);
    let listed = storage.list_namespaces().await.unwrap();
    let current: BTreeSet<CacheNamespace> = namespaces.allow_list().into_iter().collect();
    assert_eq!(listed, current);
    assert!(!listed.contains(&old));

    // Online: API goes to the network and lands in the dynamic cache
    let api = Request::get(config.resolve("/api/members").unwrap());
    let response = fetch(&worker, api.clone()).await;
    assert_eq!(response.text().unwrap(), r#"[{"id":1}]"#);
    assert_eq!(storage.keys(&namespaces.dynamic).await.unwrap(), vec![api.cache_key()]);

    fetcher.offline.store(true, Ordering::SeqCst);

    let response = fetch(&worker, api).await;
    assert_eq!(response.text().unwrap(), r#"[{"id":1}]"#);

    let nav = Request::navigate(config.resolve("/members/42").unwrap());
    let response = fetch(&worker, nav).await;
    assert_eq!(response.text().unwrap(), "page /");

    let uncached = Request::get(config.resolve("/api/plans").unwrap());
    let result = worker
        .dispatch(PlatformEvent::Fetch(uncached), &ExtendableEvent::new())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_navigation_without_cache_is_offline_placeholder() {
    let (_server, config) = origin().await;
    let fetcher = switchable();
    fetcher.offline.store(true, Ordering::SeqCst);
    let (worker, _events) = OfflineWorker::new(config.clone(), CacheStorage::open_in_memory().unwrap(), fetcher);

    let response = fetch(&worker, Request::navigate(config.resolve("/home").unwrap())).await;

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.text().unwrap(), "Offline");
    assert_eq!(response.header_str("content-type"), Some("text/plain; charset=utf-8"));
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let (_server, config) = origin().await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("offline-cache.sqlite3");

    {
        let storage = CacheStorage::open_path(&db).unwrap();
        let (worker, _events) = OfflineWorker::new(config.clone(), storage, switchable());
        worker
            .dispatch(PlatformEvent::Install, &ExtendableEvent::new())
            .await
            .unwrap();
    }

    let fetcher = switchable();
    fetcher.offline.store(true, Ordering::SeqCst);
    let storage = CacheStorage::open_path(&db).unwrap();
    let (worker, _events) = OfflineWorker::new(config.clone(), storage, fetcher);

    let response = fetch(&worker, Request::navigate(config.resolve("/login").unwrap())).await;
    assert_eq!(response.text().unwrap(), "page /login");
}
