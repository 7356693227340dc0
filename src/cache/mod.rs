pub mod manager;
pub mod memory;
pub mod network;

pub use manager::{ CacheManager, FetchDecision, WorkerConfig, WorkerPhase };
pub use memory::MemoryCacheStorage;
pub use network::HttpNetwork;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ HeaderMap, HeaderName, HeaderValue, ACCEPT };
use reqwest::{ Method, StatusCode };
use thiserror::Error;
use url::Url;

/// An outbound request as seen by the cache manager.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Request identity used as the cache key.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("text/html"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn service_unavailable(body: &'static str) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, Bytes::from_static(body.as_bytes()))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request to {url} failed: {message}")] Request {
        url: String,
        message: String,
    },
    #[error("reading body of {url} failed: {message}")] Body {
        url: String,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("refusing to cache {method} {url} with status {status}")] NotCacheable {
        method: Method,
        url: String,
        status: StatusCode,
    },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to prime '{url}': {reason}")] Install {
        url: String,
        reason: String,
    },
    #[error("invalid manifest entry '{entry}': {source}")] Manifest {
        entry: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)] Store(#[from] CacheStoreError),
}

/// Only successful GET responses may be stored.
pub fn ensure_cacheable(
    request: &FetchRequest,
    response: &CachedResponse
) -> Result<(), CacheStoreError> {
    if request.method != Method::GET || !response.is_ok() {
        return Err(CacheStoreError::NotCacheable {
            method: request.method.clone(),
            url: request.url.to_string(),
            status: response.status,
        });
    }
    Ok(())
}

/// Named response caches, in the shape of the browser Cache Storage API.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Namespace names in creation order.
    async fn keys(&self) -> Vec<String>;

    /// Creates the namespace if it does not exist yet.
    async fn open(&self, namespace: &str) -> Result<(), CacheStoreError>;

    async fn delete(&self, namespace: &str) -> bool;

    async fn match_in(&self, namespace: &str, request: &FetchRequest) -> Option<CachedResponse>;

    /// First match across every namespace, oldest namespace first.
    async fn match_any(&self, request: &FetchRequest) -> Option<CachedResponse>;

    async fn put(
        &self,
        namespace: &str,
        request: &FetchRequest,
        response: CachedResponse
    ) -> Result<(), CacheStoreError>;
}

#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, NetworkError>;
}
