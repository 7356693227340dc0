pub mod ollama;

use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Prompting convention a model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Conversational,
    Instruct,
    General,
}

impl TaskKind {
    /// Picks a task kind from a model identifier. Only meant to be called once,
    /// when a `ModelDescriptor` is built without an explicit kind.
    pub fn detect(identifier: &str) -> Self {
        if identifier.contains("Instruct") || identifier.contains("chat") {
            TaskKind::Instruct
        } else if identifier.contains("DialoGPT") || identifier.contains("BlenderBot") {
            TaskKind::Conversational
        } else {
            TaskKind::General
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseTaskKindError {
    message: String,
}

impl fmt::Display for ParseTaskKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseTaskKindError {}

impl FromStr for TaskKind {
    type Err = ParseTaskKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conversational" => Ok(TaskKind::Conversational),
            "instruct" => Ok(TaskKind::Instruct),
            "general" => Ok(TaskKind::General),
            _ =>
                Err(ParseTaskKindError {
                    message: format!("Invalid task kind: '{}'", s),
                }),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Conversational => "conversational",
            TaskKind::Instruct => "instruct",
            TaskKind::General => "general",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub identifier: String,
    pub task_kind: TaskKind,
}

impl ModelDescriptor {
    pub fn new(identifier: impl Into<String>, task_kind: TaskKind) -> Self {
        Self { identifier: identifier.into(), task_kind }
    }

    pub fn detect(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        let task_kind = TaskKind::detect(&identifier);
        Self { identifier, task_kind }
    }

    /// Short name used in user-facing messages: the last path segment of the identifier.
    pub fn display_name(&self) -> &str {
        self.identifier.rsplit('/').next().unwrap_or(&self.identifier)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub do_sample: bool,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub pad_token_id: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 100,
            temperature: 0.7,
            do_sample: true,
            top_p: 0.9,
            repetition_penalty: 1.1,
            pad_token_id: 50256,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub params: GenerationParams,
}

/// Raw progress reported by a loader while it fetches and initializes a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadProgress {
    Downloading {
        loaded: u64,
        total: u64,
    },
    Ready,
}

pub type ProgressCallback = Arc<dyn Fn(LoadProgress) + Send + Sync>;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("network error while loading model: {0}")]
    Network(String),
    #[error("model '{0}' is not supported")]
    Unsupported(String),
    #[error("model initialization failed: {0}")]
    Initialization(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("inference request failed: {0}")]
    Request(String),
    #[error("malformed inference output: {0}")]
    Output(String),
}

#[async_trait]
pub trait InferenceCapability: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams
    ) -> Result<String, GenerationError>;
}

#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        progress: ProgressCallback
    ) -> Result<Arc<dyn InferenceCapability>, LoadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_task_kind_from_identifier() {
        assert_eq!(TaskKind::detect("microsoft/DialoGPT-small"), TaskKind::Conversational);
        assert_eq!(TaskKind::detect("HuggingFaceTB/SmolLM-135M-Instruct"), TaskKind::Instruct);
        assert_eq!(TaskKind::detect("Xenova/distilgpt2"), TaskKind::General);
    }

    #[test]
    fn instruct_markers_take_precedence() {
        assert_eq!(TaskKind::detect("facebook/BlenderBot-chat"), TaskKind::Instruct);
        assert_eq!(TaskKind::detect("someone/DialoGPT-Instruct"), TaskKind::Instruct);
    }

    #[test]
    fn parses_task_kind() {
        assert_eq!("Instruct".parse::<TaskKind>(), Ok(TaskKind::Instruct));
        assert!("chat".parse::<TaskKind>().is_err());
    }

    #[test]
    fn display_name_is_last_segment() {
        let d = ModelDescriptor::detect("Xenova/gpt2");
        assert_eq!(d.display_name(), "gpt2");
        assert_eq!(ModelDescriptor::detect("llama3").display_name(), "llama3");
    }
}
