use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, info, warn };
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use std::sync::Arc;

use super::{
    GenerationError,
    GenerationParams,
    InferenceCapability,
    LoadError,
    LoadProgress,
    ModelDescriptor,
    ModelLoader,
    ProgressCallback,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Loads models through an Ollama server: `/api/pull` for download progress,
/// `/api/generate` in raw mode for inference.
#[derive(Debug, Clone)]
pub struct OllamaLoader {
    http: HttpClient,
    base_url: String,
}

#[derive(Debug)]
pub struct OllamaModel {
    http: HttpClient,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct PullStatus {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    raw: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaLoader {
    pub fn new(base_url: Option<String>) -> Self {
        let url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into());
        Self {
            http: HttpClient::new(),
            base_url: url.trim_end_matches('/').to_string(),
        }
    }

    async fn pull(&self, model: &str, progress: &ProgressCallback) -> Result<(), LoadError> {
        let url = format!("{}/api/pull", self.base_url);
        let resp = self.http
            .post(&url)
            .json(&(PullRequest { model, stream: true }))
            .send().await
            .map_err(|e| LoadError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_pull_error(model, &format!("HTTP {}: {}", status, body)));
        }

        let mut stream = resp.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut finished = false;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LoadError::Network(e.to_string()))?;
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                finished |= handle_pull_line(model, &line, progress)?;
            }
        }
        if !buffer.is_empty() {
            finished |= handle_pull_line(model, &buffer, progress)?;
        }

        if !finished {
            return Err(LoadError::Initialization(format!("pull of '{}' ended without success", model)));
        }
        Ok(())
    }
}

fn handle_pull_line(
    model: &str,
    line: &[u8],
    progress: &ProgressCallback
) -> Result<bool, LoadError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(false);
    }
    let status: PullStatus = match serde_json::from_str(text) {
        Ok(s) => s,
        Err(e) => {
            warn!("Skipping unparseable pull status line: {} ({})", text, e);
            return Ok(false);
        }
    };
    if let Some(err) = status.error {
        return Err(classify_pull_error(model, &err));
    }
    if let (Some(total), Some(completed)) = (status.total, status.completed) {
        if total > 0 {
            progress(LoadProgress::Downloading { loaded: completed, total });
        }
    }
    match status.status.as_deref() {
        Some("success") => {
            progress(LoadProgress::Ready);
            Ok(true)
        }
        Some(other) => {
            debug!("Pull '{}': {}", model, other);
            Ok(false)
        }
        None => Ok(false),
    }
}

fn classify_pull_error(model: &str, message: &str) -> LoadError {
    let lower = message.to_lowercase();
    if lower.contains("does not exist") || lower.contains("not found") {
        LoadError::Unsupported(model.to_string())
    } else {
        LoadError::Initialization(message.to_string())
    }
}

#[async_trait]
impl ModelLoader for OllamaLoader {
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        progress: ProgressCallback
    ) -> Result<Arc<dyn InferenceCapability>, LoadError> {
        info!("Pulling model '{}' from {}", descriptor.identifier, self.base_url);
        self.pull(&descriptor.identifier, &progress).await?;
        Ok(
            Arc::new(OllamaModel {
                http: self.http.clone(),
                base_url: self.base_url.clone(),
                model: descriptor.identifier.clone(),
            })
        )
    }
}

#[async_trait]
impl InferenceCapability for OllamaModel {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams
    ) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let req = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            raw: true,
            // `pad_token_id` is not mapped: Ollama pads with the model's own token.
            options: GenerateOptions {
                num_predict: params.max_new_tokens,
                temperature: if params.do_sample { params.temperature } else { 0.0 },
                top_p: params.top_p,
                repeat_penalty: params.repetition_penalty,
            },
        };
        let resp = self.http
            .post(&url)
            .json(&req)
            .send().await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GenerationError::Request(e.to_string()))?;
        let data = resp
            .json::<GenerateResponse>().await
            .map_err(|e| GenerationError::Output(e.to_string()))?;
        Ok(data.response)
    }
}
