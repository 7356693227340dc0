use clap::Parser;
use url::Url;

use crate::cache::manager::{ default_manifest, WorkerConfig };
use crate::llm::{ GenerationParams, ModelDescriptor, TaskKind };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Model Args ---
    /// Model identifier loaded at startup (e.g., smollm:135m, qwen2.5:0.5b-instruct)
    #[arg(long, env = "CHAT_MODEL", default_value = "smollm:135m")]
    pub model: String,

    /// Prompting convention of the model (conversational, instruct, general). Detected from the model name if not set.
    #[arg(long, env = "CHAT_TASK")]
    pub task: Option<TaskKind>,

    /// Base URL of the Ollama server used for inference (e.g., http://localhost:11434)
    #[arg(long, env = "OLLAMA_URL")] // No default, let the loader handle it
    pub ollama_url: Option<String>,

    /// Optional JSON file overriding the prompt templates.
    #[arg(long, env = "PROMPTS_PATH")]
    pub prompts_path: Option<String>,

    // --- Generation Args ---
    /// Upper bound on newly generated tokens per reply.
    #[arg(long, env = "MAX_NEW_TOKENS", default_value = "100")]
    pub max_new_tokens: u32,

    /// Sampling temperature.
    #[arg(long, env = "TEMPERATURE", default_value = "0.7")]
    pub temperature: f32,

    /// Nucleus sampling threshold.
    #[arg(long, env = "TOP_P", default_value = "0.9")]
    pub top_p: f32,

    /// Penalty applied to repeated tokens.
    #[arg(long, env = "REPETITION_PENALTY", default_value = "1.1")]
    pub repetition_penalty: f32,

    // --- Cache Args ---
    /// Versioned cache namespace for the app shell. Changing it evicts the previous one on activation.
    #[arg(long, env = "CACHE_VERSION", default_value = "ai-chat-v1.0.0")]
    pub cache_version: String,

    /// Namespace for model files, kept across versions.
    #[arg(long, env = "MODEL_CACHE", default_value = "models-cache")]
    pub model_cache: String,

    /// Host whose requests are treated as model downloads (subdomains included).
    #[arg(long, env = "MODEL_HOST", default_value = "huggingface.co")]
    pub model_host: String,

    /// Origin serving the chat app (e.g., http://localhost:8080/). Relative static assets resolve against it.
    #[arg(long, env = "CACHE_SCOPE")]
    pub cache_scope: Url,

    /// Comma separated static assets primed on install. Defaults to the built-in manifest.
    #[arg(long, env = "STATIC_ASSETS", value_delimiter = ',')]
    pub static_assets: Vec<String>,

    // --- Server Args ---
    /// Host address and port for the chat WebSocket server.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Host address and port for the HTTP fetch/control API.
    #[arg(long, env = "HTTP_ADDR", default_value = "127.0.0.1:4001")]
    pub http_addr: String,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}

impl Args {
    pub fn model_descriptor(&self) -> ModelDescriptor {
        match self.task {
            Some(task) => ModelDescriptor::new(self.model.clone(), task),
            None => ModelDescriptor::detect(self.model.clone()),
        }
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            repetition_penalty: self.repetition_penalty,
            ..GenerationParams::default()
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            version: self.cache_version.clone(),
            model_namespace: self.model_cache.clone(),
            model_host: self.model_host.to_ascii_lowercase(),
            manifest: if self.static_assets.is_empty() {
                default_manifest()
            } else {
                self.static_assets.clone()
            },
            ..WorkerConfig::new(self.cache_scope.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_worker() {
        let args = Args::parse_from(["offline-chat", "--cache-scope", "http://localhost:8080/"]);
        let config = args.worker_config();
        assert_eq!(config.version, "ai-chat-v1.0.0");
        assert_eq!(config.model_namespace, "models-cache");
        assert_eq!(config.manifest.len(), 6);
        assert_eq!(args.generation_params(), GenerationParams::default());
        assert_eq!(args.model_descriptor().task_kind, TaskKind::General);
    }

    #[test]
    fn explicit_task_wins_over_detection() {
        let args = Args::parse_from([
            "offline-chat",
            "--cache-scope",
            "http://localhost:8080/",
            "--model",
            "microsoft/DialoGPT-small",
            "--task",
            "instruct",
        ]);
        assert_eq!(args.model_descriptor().task_kind, TaskKind::Instruct);
        let args = Args::parse_from([
            "offline-chat",
            "--cache-scope",
            "http://localhost:8080/",
            "--static-assets",
            "./,./app.js",
        ]);
        assert_eq!(args.worker_config().manifest, vec!["./", "./app.js"]);
    }

    #[test]
    fn manifest_resolves_against_app_origin() {
        let args = Args::parse_from(["offline-chat", "--cache-scope", "http://localhost:8080/chat/"]);
        let config = args.worker_config();
        assert_eq!(config.scope.as_str(), "http://localhost:8080/chat/");
        assert_eq!(config.resolve("./index.html").unwrap().as_str(), "http://localhost:8080/chat/index.html");
        assert_ne!(config.scope.port(), Some(4001));
    }

    #[test]
    fn scope_is_required() {
        if std::env::var_os("CACHE_SCOPE").is_none() {
            assert!(Args::try_parse_from(["offline-chat"]).is_err());
        }
    }
}
