use crate::config::prompt::{ self, PromptConfig };
use crate::llm::{
    GenerationParams,
    GenerationRequest,
    InferenceCapability,
    LoadError,
    ModelDescriptor,
    ModelLoader,
    ProgressCallback,
};
use crate::models::chat::{ Conversation, ConversationTurn, Role };
use crate::pipeline::progress::{ DOWNLOAD_BEGIN_PERCENT, READY_PERCENT, START_PERCENT };
use crate::pipeline::{ sanitize, ProgressReporter, ProgressSink };

use log::{ debug, error, info, warn };
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const APOLOGY_REPLY: &str =
    "Sorry, I encountered an error while processing your message. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    AwaitingModel,
    Ready,
    Generating,
    Error,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyInput,
    #[error("no model is loaded")]
    NotReady,
    #[error("another request is still in progress")]
    Busy,
    #[error("failed to load model '{model}': {source}")] ModelLoad {
        model: String,
        display_name: String,
        #[source]
        source: LoadError,
    },
}

impl ChatError {
    /// Chat message to show the user, for errors that warrant one.
    pub fn notice(&self) -> Option<String> {
        match self {
            ChatError::ModelLoad { display_name, .. } =>
                Some(
                    format!(
                        "Sorry, I couldn't load the {} model. Please try a different model or refresh the page.",
                        display_name
                    )
                ),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReplyKind {
    Generated,
    Apology,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub content: String,
    pub kind: ReplyKind,
}

struct ActiveModel {
    descriptor: ModelDescriptor,
    capability: Arc<dyn InferenceCapability>,
}

struct Session {
    state: SessionState,
    active: Option<ActiveModel>,
    conversation: Conversation,
}

impl Session {
    fn transition(&mut self, next: SessionState) {
        debug!("Session state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Single-user chat session: owns the active model, the conversation and the
/// state machine that serializes generations.
pub struct ChatAgent {
    loader: Arc<dyn ModelLoader>,
    prompt_config: Arc<PromptConfig>,
    params: GenerationParams,
    session: Mutex<Session>,
}

impl ChatAgent {
    pub fn new(
        loader: Arc<dyn ModelLoader>,
        prompt_config: Arc<PromptConfig>,
        params: GenerationParams
    ) -> Self {
        Self {
            loader,
            prompt_config,
            params,
            session: Mutex::new(Session {
                state: SessionState::Idle,
                active: None,
                conversation: Conversation::new(Uuid::new_v4().to_string()),
            }),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.session.lock().await.state
    }

    pub async fn is_loaded(&self) -> bool {
        self.session.lock().await.active.is_some()
    }

    pub async fn active_model(&self) -> Option<ModelDescriptor> {
        self.session
            .lock().await
            .active.as_ref()
            .map(|a| a.descriptor.clone())
    }

    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.session.lock().await.conversation.turns().to_vec()
    }

    /// Replaces the active model. The previous capability is dropped before the
    /// new one starts loading, so a failed load leaves nothing loaded.
    pub async fn load_model(
        &self,
        descriptor: ModelDescriptor,
        progress: ProgressSink
    ) -> Result<ModelDescriptor, ChatError> {
        {
            let mut session = self.session.lock().await;
            match session.state {
                SessionState::Generating | SessionState::AwaitingModel => {
                    warn!("Ignoring load of '{}': session is busy", descriptor.identifier);
                    return Err(ChatError::Busy);
                }
                _ => {}
            }
            session.active = None;
            session.transition(SessionState::AwaitingModel);
        }

        let name = descriptor.display_name().to_string();
        let reporter = Arc::new(ProgressReporter::new(progress));
        reporter.report(START_PERCENT, format!("Loading {}...", name));
        reporter.report(DOWNLOAD_BEGIN_PERCENT, "Downloading model files...");

        let event_reporter = Arc::clone(&reporter);
        let callback: ProgressCallback = Arc::new(move |event| event_reporter.on_load_event(event));

        match self.loader.load(&descriptor, callback).await {
            Ok(capability) => {
                reporter.report(READY_PERCENT, format!("{} ready", name));
                let mut session = self.session.lock().await;
                session.active = Some(ActiveModel {
                    descriptor: descriptor.clone(),
                    capability,
                });
                session.transition(SessionState::Ready);
                info!(
                    "Model loaded successfully: {} ({})",
                    descriptor.identifier,
                    descriptor.task_kind
                );
                Ok(descriptor)
            }
            Err(e) => {
                error!("Error loading model '{}': {}", descriptor.identifier, e);
                self.session.lock().await.transition(SessionState::Error);
                Err(ChatError::ModelLoad {
                    model: descriptor.identifier.clone(),
                    display_name: name,
                    source: e,
                })
            }
        }
    }

    /// Runs one user turn. Inference failures come back as an apology reply and
    /// leave the conversation untouched.
    pub async fn submit(&self, input: &str) -> Result<ChatReply, ChatError> {
        let message = input.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let (request, capability) = {
            let mut session = self.session.lock().await;
            match session.state {
                SessionState::Ready => {}
                SessionState::Generating => {
                    return Err(ChatError::Busy);
                }
                _ => {
                    return Err(ChatError::NotReady);
                }
            }
            let active = session.active.as_ref().ok_or(ChatError::NotReady)?;
            let request = GenerationRequest {
                prompt: prompt::build_prompt(
                    &self.prompt_config,
                    active.descriptor.task_kind,
                    &session.conversation,
                    message
                ),
                params: self.params.clone(),
            };
            let capability = Arc::clone(&active.capability);
            session.transition(SessionState::Generating);
            (request, capability)
        };

        let result = capability.generate(&request.prompt, &request.params).await;

        let mut session = self.session.lock().await;
        match result {
            Ok(raw) => {
                let reply = sanitize(&raw, &request.prompt);
                session.conversation.extend([
                    ConversationTurn::new(Role::User, message),
                    ConversationTurn::new(Role::Assistant, reply.clone()),
                ]);
                session.transition(SessionState::Ready);
                Ok(ChatReply {
                    content: reply,
                    kind: ReplyKind::Generated,
                })
            }
            Err(e) => {
                error!("Error generating response: {}", e);
                session.transition(SessionState::Error);
                session.transition(SessionState::Ready);
                Ok(ChatReply {
                    content: APOLOGY_REPLY.to_string(),
                    kind: ReplyKind::Apology,
                })
            }
        }
    }
}
