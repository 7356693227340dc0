pub mod api;
pub mod websocket;

use crate::agent::ChatAgent;
use crate::cache::CacheManager;
use std::error::Error;
use std::sync::Arc;

pub struct Server {
    ws_addr: String,
    http_addr: String,
    agent: Arc<ChatAgent>,
    cache: Arc<CacheManager>,
}

impl Server {
    pub fn new(
        ws_addr: String,
        http_addr: String,
        agent: Arc<ChatAgent>,
        cache: Arc<CacheManager>
    ) -> Self {
        Self {
            ws_addr,
            http_addr,
            agent,
            cache,
        }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.start_http_server().await?;
        self.start_ws_server().await?;
        Ok(())
    }

    async fn start_http_server(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(&self.http_addr, self.cache.clone()).await
    }

    async fn start_ws_server(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        websocket::start_ws_server(&self.ws_addr, self.agent.clone()).await
    }
}
