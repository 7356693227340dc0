pub mod agent;
pub mod cache;
pub mod cli;
pub mod config;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod server;

use agent::ChatAgent;
use cache::{ CacheManager, HttpNetwork, MemoryCacheStorage };
use cli::Args;
use llm::ollama::OllamaLoader;
use log::{ info, warn };
use pipeline::{ ProgressSink, ProgressUpdate };
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let descriptor = args.model_descriptor();
    let worker_config = args.worker_config();

    info!("--- Core Configuration ---");
    info!("WebSocket Address: {}", args.server_addr);
    info!("HTTP Address: {}", args.http_addr);
    info!("Model: {} ({})", descriptor.identifier, descriptor.task_kind);
    info!("Ollama URL: {}", args.ollama_url.as_deref().unwrap_or(llm::ollama::DEFAULT_BASE_URL));
    info!("Prompts Path: {}", args.prompts_path.as_deref().unwrap_or("built-in"));
    info!("Cache Version: {}", worker_config.version);
    info!("Model Cache: {} (host {})", worker_config.model_namespace, worker_config.model_host);
    info!("Cache Scope: {}", worker_config.scope);
    info!("-------------------------");

    let prompt_config = config::prompt::load_or_default(args.prompts_path.as_deref())?;
    let loader = Arc::new(OllamaLoader::new(args.ollama_url.clone()));
    let agent = Arc::new(ChatAgent::new(loader, prompt_config, args.generation_params()));

    let cache = Arc::new(
        CacheManager::new(
            worker_config,
            Arc::new(MemoryCacheStorage::new()),
            Arc::new(HttpNetwork::new())
        )
    );
    let server = Server::new(args.server_addr.clone(), args.http_addr.clone(), agent.clone(), cache.clone());

    let boot_cache = cache.clone();
    tokio::spawn(async move {
        match boot_cache.start().await {
            Ok(deleted) => info!("Cache manager active, {} stale namespaces removed", deleted.len()),
            Err(e) => warn!("Cache manager activation failed: {}", e),
        }
    });

    let boot_agent = agent.clone();
    tokio::spawn(async move {
        let sink: ProgressSink = Arc::new(|update: ProgressUpdate| {
            info!("[{:>3}%] {}", update.percent, update.message);
        });
        if let Err(e) = boot_agent.load_model(descriptor, sink).await {
            warn!("{}", e.notice().unwrap_or_else(|| e.to_string()));
        }
    });

    server.run().await?;
    cache.settle().await;

    Ok(())
}
