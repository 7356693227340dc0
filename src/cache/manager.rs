use log::{ debug, error, info, warn };
use reqwest::header::{ HeaderValue, CONTENT_TYPE };
use reqwest::Method;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use tokio::sync::{ oneshot, Mutex, RwLock };
use tokio::task::JoinSet;
use url::Url;

use super::{ CacheError, CacheStorage, CachedResponse, FetchRequest, Network };
use crate::models::worker::{ VersionReply, WorkerMessage };

pub const DEFAULT_VERSION: &str = "ai-chat-v1.0.0";
pub const DEFAULT_MODEL_NAMESPACE: &str = "models-cache";
pub const DEFAULT_MODEL_HOST: &str = "huggingface.co";
pub const DEFAULT_OFFLINE_DOCUMENT: &str = "./index.html";

pub const MODEL_OFFLINE_BODY: &str = "Model not available offline";
pub const OFFLINE_BODY: &str = "Offline - Content not available";

pub fn default_manifest() -> Vec<String> {
    [
        "./",
        "./index.html",
        "./style.css",
        "./script.js",
        "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css",
        "https://cdn.jsdelivr.net/npm/@xenova/transformers@2.17.2/dist/transformers.min.js",
    ]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name of the versioned namespace holding the app shell and pinned libraries.
    pub version: String,
    /// Namespace for model files. Like any non-current namespace, it is cleared on activation.
    pub model_namespace: String,
    pub model_host: String,
    /// Base URL relative manifest entries resolve against.
    pub scope: Url,
    pub manifest: Vec<String>,
    pub offline_document: String,
}

impl WorkerConfig {
    pub fn new(scope: Url) -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            model_namespace: DEFAULT_MODEL_NAMESPACE.to_string(),
            model_host: DEFAULT_MODEL_HOST.to_string(),
            scope,
            manifest: default_manifest(),
            offline_document: DEFAULT_OFFLINE_DOCUMENT.to_string(),
        }
    }

    pub fn resolve(&self, entry: &str) -> Result<Url, CacheError> {
        self.scope.join(entry).map_err(|source| CacheError::Manifest {
            entry: entry.to_string(),
            source,
        })
    }

    pub fn is_model_url(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => {
                let host = host.to_ascii_lowercase();
                host == self.model_host || host.ends_with(&format!(".{}", self.model_host))
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchDecision {
    /// Not intercepted; the host performs the request itself.
    PassThrough,
    Respond(CachedResponse),
}

/// Tiered offline cache driven by install/activate/fetch lifecycle hooks.
pub struct CacheManager {
    config: WorkerConfig,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    // Activation holds this exclusively; routing shares it.
    phase: RwLock<WorkerPhase>,
    skip_waiting: AtomicBool,
    clients_claimed: AtomicBool,
    pending_stores: Mutex<JoinSet<()>>,
}

impl CacheManager {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>
    ) -> Self {
        Self {
            config,
            storage,
            network,
            phase: RwLock::new(WorkerPhase::Parsed),
            skip_waiting: AtomicBool::new(false),
            clients_claimed: AtomicBool::new(false),
            pending_stores: Mutex::new(JoinSet::new()),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub async fn phase(&self) -> WorkerPhase {
        *self.phase.read().await
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    pub fn clients_claimed(&self) -> bool {
        self.clients_claimed.load(Ordering::SeqCst)
    }

    /// Install followed by activate. Install failures are logged and do not stop activation.
    pub async fn start(&self) -> Result<Vec<String>, CacheError> {
        if let Err(e) = self.on_install().await {
            warn!("Continuing to activation after install failure: {}", e);
        }
        self.on_activate().await
    }

    /// Primes the versioned namespace with the static manifest. Entries stored
    /// before a failure are kept.
    pub async fn on_install(&self) -> Result<(), CacheError> {
        info!("Cache manager installing (version {})", self.config.version);
        *self.phase.write().await = WorkerPhase::Installing;

        let result = self.prime_static_assets().await;
        if let Err(e) = &result {
            error!("Failed to cache static assets: {}", e);
        }

        self.skip_waiting.store(true, Ordering::SeqCst);
        *self.phase.write().await = WorkerPhase::Installed;
        result
    }

    async fn prime_static_assets(&self) -> Result<(), CacheError> {
        self.storage.open(&self.config.version).await?;
        info!("Caching {} static assets", self.config.manifest.len());

        for entry in &self.config.manifest {
            let url = self.config.resolve(entry)?;
            let request = FetchRequest::get(url);
            let response = self.network.fetch(&request).await.map_err(|e| CacheError::Install {
                url: request.url.to_string(),
                reason: e.to_string(),
            })?;
            if !response.is_ok() {
                return Err(CacheError::Install {
                    url: request.url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }
            self.storage.put(&self.config.version, &request, response).await?;
            debug!("Primed {}", request.url);
        }
        Ok(())
    }

    /// Deletes every namespace other than the current version, model files
    /// included, then claims all clients. Returns the deleted names.
    pub async fn on_activate(&self) -> Result<Vec<String>, CacheError> {
        info!("Cache manager activating (version {})", self.config.version);
        let mut phase = self.phase.write().await;
        *phase = WorkerPhase::Activating;

        let mut deleted = Vec::new();
        for name in self.storage.keys().await {
            if name == self.config.version {
                continue;
            }
            info!("Deleting old cache: {}", name);
            if self.storage.delete(&name).await {
                deleted.push(name);
            }
        }

        *phase = WorkerPhase::Activated;
        self.clients_claimed.store(true, Ordering::SeqCst);
        Ok(deleted)
    }

    pub async fn handle_message(
        &self,
        message: WorkerMessage,
        reply: Option<oneshot::Sender<VersionReply>>
    ) {
        debug!("Cache manager received message: {:?}", message);
        match message {
            WorkerMessage::SkipWaiting => {
                self.skip_waiting.store(true, Ordering::SeqCst);
                if self.phase().await == WorkerPhase::Installed {
                    if let Err(e) = self.on_activate().await {
                        error!("Forced activation failed: {}", e);
                    }
                }
            }
            WorkerMessage::GetVersion => {
                match reply {
                    Some(tx) => {
                        let version = VersionReply { version: self.config.version.clone() };
                        if tx.send(version).is_err() {
                            warn!("Version requester went away before the reply");
                        }
                    }
                    None => warn!("GET_VERSION received without a reply channel"),
                }
            }
        }
    }

    /// Per-request routing policy. Network failures are turned into synthesized
    /// responses; nothing here returns an error.
    pub async fn route_fetch(&self, request: &FetchRequest) -> FetchDecision {
        if request.method != Method::GET {
            return FetchDecision::PassThrough;
        }
        let phase = self.phase.read().await;
        if *phase != WorkerPhase::Activated {
            debug!("Not intercepting {} before activation ({:?})", request.url, *phase);
            return FetchDecision::PassThrough;
        }

        let response = if self.config.is_model_url(&request.url) {
            self.serve_model(request).await
        } else {
            self.serve_app(request).await
        };
        FetchDecision::Respond(response)
    }

    async fn serve_model(&self, request: &FetchRequest) -> CachedResponse {
        let namespace = &self.config.model_namespace;
        if let Some(hit) = self.storage.match_in(namespace, request).await {
            info!("Serving model from cache: {}", request.url);
            return hit;
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    match self.storage.put(namespace, request, response.clone()).await {
                        Ok(()) => info!("Cached model: {}", request.url),
                        Err(e) => warn!("Failed to cache model file {}: {}", request.url, e),
                    }
                }
                response
            }
            Err(e) => {
                warn!("Model fetch failed, answering offline: {}", e);
                CachedResponse::service_unavailable(MODEL_OFFLINE_BODY)
            }
        }
    }

    async fn serve_app(&self, request: &FetchRequest) -> CachedResponse {
        if let Some(hit) = self.storage.match_any(request).await {
            debug!("Cache hit: {}", request.url);
            return hit;
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    self.store_in_background(request.clone(), response.clone()).await;
                }
                response
            }
            Err(e) => {
                warn!("Fetch failed, answering offline: {}", e);
                if request.accepts_html() {
                    if let Some(document) = self.offline_document().await {
                        return document;
                    }
                }
                CachedResponse::service_unavailable(OFFLINE_BODY).with_header(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain")
                )
            }
        }
    }

    async fn offline_document(&self) -> Option<CachedResponse> {
        match self.config.resolve(&self.config.offline_document) {
            Ok(url) => self.storage.match_any(&FetchRequest::get(url)).await,
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    async fn store_in_background(&self, request: FetchRequest, response: CachedResponse) {
        let storage = Arc::clone(&self.storage);
        let namespace = self.config.version.clone();
        let mut pending = self.pending_stores.lock().await;
        while pending.try_join_next().is_some() {}
        pending.spawn(async move {
            if let Err(e) = storage.put(&namespace, &request, response).await {
                warn!("Failed to cache {}: {}", request.url, e);
            }
        });
    }

    /// Waits for background cache writes started by `route_fetch`.
    pub async fn settle(&self) {
        let mut pending = std::mem::take(&mut *self.pending_stores.lock().await);
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!("Background cache write did not finish: {}", e);
            }
        }
    }
}
