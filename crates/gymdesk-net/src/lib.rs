//! # GymDesk Net
//!
//! Request/response model and network access for the GymDesk offline engine.
//!
//! The worker never talks to reqwest directly: every strategy goes through the
//! [`Fetcher`] capability so tests and embedders can substitute the network.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;
use url::Url;

pub mod fetcher;

pub use fetcher::{HttpFetcher, LoaderConfig};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Network access used by the caching strategies.
///
/// Only transport-level failure is an error; any HTTP status is a response.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Destination reported by the platform for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// No destination (fetch/XHR).
    #[default]
    Empty,
    Document,
    Image,
    Script,
    Style,
    Font,
    Audio,
    Manifest,
}

/// Request mode; navigations are top-level page loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    Navigate,
    #[default]
    SameOrigin,
    Cors,
    NoCors,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub destination: Destination,
    pub mode: RequestMode,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            destination: Destination::Empty,
            mode: RequestMode::SameOrigin,
        }
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            destination: Destination::Document,
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Parse a URL and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(e.to_string()))?;
        Ok(Self::get(url))
    }

    /// Set the platform-reported destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Canonical cache key: method plus URL without fragment.
    ///
    /// Request headers never take part in the key.
    pub fn cache_key(&self) -> String {
        cache_key(&self.method, &self.url)
    }
}

/// Canonical cache key for a method and URL.
pub fn cache_key(method: &Method, url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    format!("{} {}", method, url)
}

/// HTTP response.
///
/// The body is fully buffered, so cloning a response for the cache is cheap.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Option<Url>,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// Create a response with an empty header map.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Header value as a string, if present and valid.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}
