//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use gymdesk_cache::CacheStorage;
use gymdesk_core::OfflineConfig;
use gymdesk_net::{cache_key, Fetcher, NetError, Request, Response};
use hashbrown::HashMap;
use http::{header, HeaderValue, Method, StatusCode};
use tokio::sync::{mpsc, Semaphore};
use url::Url;

use crate::worker::OfflineWorker;
use crate::WorkerEvent;

/// 200 response with an HTML content type.
pub fn html(body: impl Into<Bytes>) -> Response {
    Response::new(StatusCode::OK, body).header(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html"),
    )
}

/// Holds fetches until opened.
pub struct Gate(Arc<Semaphore>);

impl Gate {
    pub fn open(&self) {
        // A closed semaphore fails every pending and future acquire at once
        self.0.close();
    }
}

/// In-memory network with scripted responses.
///
/// Unscripted URLs answer 404. While offline every fetch fails with
/// [`ScriptedFetcher::OFFLINE`].
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedFetcher {
    pub const OFFLINE: &'static str = "network unreachable";

    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &Url, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .insert(cache_key(&Method::GET, url), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches attempted, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make fetches wait until the returned gate is opened.
    pub fn gate(&self) -> Gate {
        let semaphore = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(semaphore.clone());
        Gate(semaphore)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed(Self::OFFLINE.to_string()));
        }

        let scripted = self
            .responses
            .lock()
            .unwrap()
            .get(&cache_key(&Method::GET, &request.url))
            .cloned();
        Ok(scripted.unwrap_or_else(|| Response::new(StatusCode::NOT_FOUND, "")))
    }
}

/// A worker over in-memory storage and a scripted network.
pub fn worker_with(
    config: OfflineConfig,
) -> (
    OfflineWorker,
    Arc<ScriptedFetcher>,
    mpsc::UnboundedReceiver<WorkerEvent>,
) {
    let fetcher = ScriptedFetcher::new();
    let storage = CacheStorage::open_in_memory().unwrap();
    let (worker, rx) = OfflineWorker::new(config, storage, fetcher.clone());
    (worker, fetcher, rx)
}
