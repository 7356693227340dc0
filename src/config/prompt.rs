use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::fs;
use std::sync::Arc;
use log::info;

use crate::llm::TaskKind;
use crate::models::chat::Conversation;

const MESSAGE_PLACEHOLDER: &str = "{message}";

#[derive(Debug)]
pub enum PromptError {
    MissingPlaceholder(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::MissingPlaceholder(key) =>
                write!(f, "Prompt template '{}' has no {} placeholder", key, MESSAGE_PLACEHOLDER),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

fn default_instruct_template() -> String {
    "Human: {message}\n\nAssistant:".to_string()
}

fn default_general_template() -> String {
    "This is a friendly conversation between a human and an AI assistant.\n\nHuman: {message}\n\nAI:".to_string()
}

fn default_context_turns() -> usize {
    4
}

/// Prompt templates per task kind. Every field may be overridden from a JSON file.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PromptConfig {
    #[serde(default = "default_instruct_template")]
    pub instruct_template: String,
    #[serde(default = "default_general_template")]
    pub general_template: String,
    /// How many prior turns a conversational model sees.
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            instruct_template: default_instruct_template(),
            general_template: default_general_template(),
            context_turns: default_context_turns(),
        }
    }
}

impl PromptConfig {
    fn validate(&self) -> Result<(), PromptError> {
        if !self.instruct_template.contains(MESSAGE_PLACEHOLDER) {
            return Err(PromptError::MissingPlaceholder("instruct_template".to_string()));
        }
        if !self.general_template.contains(MESSAGE_PLACEHOLDER) {
            return Err(PromptError::MissingPlaceholder("general_template".to_string()));
        }
        Ok(())
    }
}

pub fn load_prompts(path: &str) -> Result<Arc<PromptConfig>, PromptError> {
    let file_content = fs::read_to_string(path)?;
    let config: PromptConfig = serde_json::from_str(&file_content)?;
    config.validate()?;
    info!("Loaded prompt templates from: {}", path);
    Ok(Arc::new(config))
}

/// Uses the file at `path` when given, the built-in templates otherwise.
pub fn load_or_default(path: Option<&str>) -> Result<Arc<PromptConfig>, PromptError> {
    match path {
        Some(p) => load_prompts(p),
        None => Ok(Arc::new(PromptConfig::default())),
    }
}

/// Builds the prompt for `message`. `history` holds the turns before this message.
pub fn build_prompt(
    config: &PromptConfig,
    task_kind: TaskKind,
    history: &Conversation,
    message: &str
) -> String {
    match task_kind {
        TaskKind::Instruct => config.instruct_template.replace(MESSAGE_PLACEHOLDER, message),
        TaskKind::General => config.general_template.replace(MESSAGE_PLACEHOLDER, message),
        TaskKind::Conversational => {
            let mut prompt = String::new();
            for turn in history.recent(config.context_turns) {
                prompt.push_str(&turn.content);
                prompt.push('\n');
            }
            prompt.push_str(message);
            prompt
        }
    }
}
