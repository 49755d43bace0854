//! Caching strategies.
//!
//! Two interchangeable algorithms behind one capability, [`FetchStrategy`],
//! selected per resource class through a [`StrategyTable`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gymdesk_cache::{CacheHandle, CacheStorage, CachedEntry, MatchScope};
use gymdesk_core::{CacheNamespace, OfflineConfig, ResourceClass};
use gymdesk_net::{Fetcher, NetError, Request, Response};
use hashbrown::HashMap;
use http::{header, HeaderValue, StatusCode};
use tracing::{debug, info, warn};

use crate::extendable::ExtendableEvent;

/// What a strategy may use besides the request and its cache.
#[derive(Clone)]
pub struct StrategyContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub storage: CacheStorage,
    pub lifetime: ExtendableEvent,
}

impl fmt::Debug for StrategyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyContext")
            .field("storage", &self.storage)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

/// A caching algorithm.
///
/// The only error a strategy returns is the network failure it could not
/// recover from, passed through unchanged.
#[async_trait]
pub trait FetchStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        ctx: &StrategyContext,
        request: &Request,
        cache: &CacheHandle,
    ) -> Result<Response, NetError>;
}

/// Cache lookup where a storage failure counts as a miss.
async fn lookup(cache: &CacheHandle, request: &Request) -> Option<CachedEntry> {
    match cache.match_request(request).await {
        Ok(entry) => entry,
        Err(e) => {
            warn!(url = %request.url, namespace = %cache.namespace(), error = %e, "Cache lookup failed");
            None
        }
    }
}

/// Store a response; failing to store never fails the request.
async fn store(cache: &CacheHandle, request: &Request, response: &Response) {
    if let Err(e) = cache.put(request, response).await {
        warn!(url = %request.url, namespace = %cache.namespace(), error = %e, "Cache write failed");
    }
}

/// Placeholder served for navigations when both network and cache fail.
pub fn offline_response() -> Response {
    Response::new(StatusCode::SERVICE_UNAVAILABLE, "Offline").header(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    )
}

/// Date the response was produced, from its own `Date` header.
pub fn response_date(response: &Response) -> Option<DateTime<Utc>> {
    let raw = response.header_str(header::DATE.as_str())?;
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Whether a cached response is older than the freshness window.
///
/// A response without a usable `Date` header is treated as stale.
pub fn is_stale(response: &Response, window: Duration, now: DateTime<Utc>) -> bool {
    let Some(date) = response_date(response) else {
        return true;
    };
    match chrono::Duration::from_std(window) {
        Ok(window) => now.signed_duration_since(date) > window,
        Err(_) => false,
    }
}

// ==================== Network-First ====================

/// Network first; the cache is a fallback for transport failures only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkFirst;

#[async_trait]
impl FetchStrategy for NetworkFirst {
    fn name(&self) -> &'static str {
        "network-first"
    }

    async fn handle(
        &self,
        ctx: &StrategyContext,
        request: &Request,
        cache: &CacheHandle,
    ) -> Result<Response, NetError> {
        let error = match ctx.fetcher.fetch(request).await {
            Ok(response) => {
                // Non-2xx responses are returned as-is but never cached
                if response.ok() {
                    store(cache, request, &response).await;
                }
                debug!(url = %request.url, status = %response.status, "Served from network");
                return Ok(response);
            }
            Err(e) => e,
        };

        if let Some(entry) = lookup(cache, request).await {
            info!(url = %request.url, error = %error, "Network failed, served from cache");
            return Ok(entry.response);
        }

        if !request.is_navigation() {
            debug!(url = %request.url, error = %error, "Network failed, no cached copy");
            return Err(error);
        }

        let mut root = request.url.clone();
        root.set_path("/");
        root.set_query(None);
        root.set_fragment(None);
        match ctx
            .storage
            .match_request(&Request::get(root), MatchScope::All)
            .await
        {
            Ok(Some(entry)) => {
                info!(url = %request.url, "Network failed, served application shell");
                Ok(entry.response)
            }
            Ok(None) => {
                info!(url = %request.url, "Network failed, served offline placeholder");
                Ok(offline_response())
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Shell lookup failed, served offline placeholder");
                Ok(offline_response())
            }
        }
    }
}

// ==================== Cache-First ====================

/// Cache first; stale entries are refreshed in the background.
#[derive(Debug, Clone, Copy)]
pub struct CacheFirst {
    freshness_window: Duration,
}

impl CacheFirst {
    pub fn new(freshness_window: Duration) -> Self {
        Self { freshness_window }
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }
}

impl Default for CacheFirst {
    fn default() -> Self {
        Self::new(Duration::from_secs(60 * 60))
    }
}

/// Refetch and overwrite; failures are dropped without retry.
async fn revalidate(fetcher: Arc<dyn Fetcher>, cache: CacheHandle, request: Request) {
    match fetcher.fetch(&request).await {
        Ok(response) if response.ok() => {
            store(&cache, &request, &response).await;
            debug!(url = %request.url, "Stale entry refreshed");
        }
        Ok(response) => {
            debug!(url = %request.url, status = %response.status, "Revalidation not ok, keeping stale entry");
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Revalidation failed, keeping stale entry");
        }
    }
}

#[async_trait]
impl FetchStrategy for CacheFirst {
    fn name(&self) -> &'static str {
        "cache-first"
    }

    async fn handle(
        &self,
        ctx: &StrategyContext,
        request: &Request,
        cache: &CacheHandle,
    ) -> Result<Response, NetError> {
        let Some(entry) = lookup(cache, request).await else {
            let response = ctx.fetcher.fetch(request).await?;
            if response.ok() {
                store(cache, request, &response).await;
            }
            debug!(url = %request.url, status = %response.status, "Cache miss, served from network");
            return Ok(response);
        };

        if is_stale(&entry.response, self.freshness_window, Utc::now()) {
            debug!(url = %request.url, "Serving stale entry, revalidating");
            ctx.lifetime.wait_until(revalidate(
                Arc::clone(&ctx.fetcher),
                cache.clone(),
                request.clone(),
            ));
        }

        Ok(entry.response)
    }
}

// ==================== Strategy Table ====================

/// Strategy and cache namespace for one resource class.
#[derive(Debug, Clone)]
pub struct Route {
    pub strategy: Arc<dyn FetchStrategy>,
    pub namespace: CacheNamespace,
    pub max_entries: Option<usize>,
}

/// Lookup table from resource class to route.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    routes: HashMap<ResourceClass, Route>,
}

impl StrategyTable {
    /// Network-First for API and documents, Cache-First for images and static assets.
    pub fn from_config(config: &OfflineConfig) -> Self {
        let namespaces = config.namespaces();
        let network_first: Arc<dyn FetchStrategy> = Arc::new(NetworkFirst);
        let cache_first: Arc<dyn FetchStrategy> =
            Arc::new(CacheFirst::new(config.freshness_window()));

        let assignments = [
            (ResourceClass::Api, &network_first),
            (ResourceClass::Document, &network_first),
            (ResourceClass::Image, &cache_first),
            (ResourceClass::StaticAsset, &cache_first),
        ];

        let routes = assignments
            .into_iter()
            .map(|(class, strategy)| {
                let role = class.cache_role();
                let route = Route {
                    strategy: Arc::clone(strategy),
                    namespace: namespaces.get(role).clone(),
                    max_entries: config.max_entries(role),
                };
                (class, route)
            })
            .collect();

        Self { routes }
    }

    /// Replace the route for a class.
    pub fn with_route(mut self, class: ResourceClass, route: Route) -> Self {
        self.routes.insert(class, route);
        self
    }

    pub fn route(&self, class: ResourceClass) -> Option<&Route> {
        self.routes.get(&class)
    }
}
