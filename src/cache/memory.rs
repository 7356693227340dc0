use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ ensure_cacheable, CacheStorage, CacheStoreError, CachedResponse, FetchRequest };

/// Process-local cache storage. Namespaces are kept in creation order so
/// `match_any` behaves like the browser's `caches.match`.
#[derive(Default)]
pub struct MemoryCacheStorage {
    namespaces: RwLock<Vec<(String, HashMap<String, CachedResponse>)>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read().await
            .iter()
            .find(|(name, _)| name == namespace)
            .map(|(_, entries)| entries.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn keys(&self) -> Vec<String> {
        self.namespaces
            .read().await
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    async fn open(&self, namespace: &str) -> Result<(), CacheStoreError> {
        let mut guard = self.namespaces.write().await;
        if !guard.iter().any(|(name, _)| name == namespace) {
            debug!("Creating cache namespace '{}'", namespace);
            guard.push((namespace.to_string(), HashMap::new()));
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str) -> bool {
        let mut guard = self.namespaces.write().await;
        let before = guard.len();
        guard.retain(|(name, _)| name != namespace);
        guard.len() != before
    }

    async fn match_in(&self, namespace: &str, request: &FetchRequest) -> Option<CachedResponse> {
        let key = request.cache_key();
        self.namespaces
            .read().await
            .iter()
            .find(|(name, _)| name == namespace)
            .and_then(|(_, entries)| entries.get(&key).cloned())
    }

    async fn match_any(&self, request: &FetchRequest) -> Option<CachedResponse> {
        let key = request.cache_key();
        self.namespaces
            .read().await
            .iter()
            .find_map(|(_, entries)| entries.get(&key).cloned())
    }

    async fn put(
        &self,
        namespace: &str,
        request: &FetchRequest,
        response: CachedResponse
    ) -> Result<(), CacheStoreError> {
        ensure_cacheable(request, &response)?;
        let mut guard = self.namespaces.write().await;
        let index = match guard.iter().position(|(name, _)| name == namespace) {
            Some(i) => i,
            None => {
                guard.push((namespace.to_string(), HashMap::new()));
                guard.len() - 1
            }
        };
        guard[index].1.insert(request.cache_key(), response);
        Ok(())
    }
}
