// Integration tests for the chat session state machine.

use std::collections::VecDeque;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };

use async_trait::async_trait;
use tokio::sync::Notify;

use offline_chat::agent::{ ChatAgent, ChatError, ReplyKind, SessionState, APOLOGY_REPLY };
use offline_chat::config::prompt::PromptConfig;
use offline_chat::llm::{
    GenerationError,
    GenerationParams,
    InferenceCapability,
    LoadError,
    LoadProgress,
    ModelDescriptor,
    ModelLoader,
    ProgressCallback,
    TaskKind,
};
use offline_chat::models::chat::Role;
use offline_chat::pipeline::{ ProgressSink, ProgressUpdate, FALLBACK_REPLY };

/// Capability that replays scripted outputs and records every prompt it sees.
#[derive(Default)]
struct ScriptedModel {
    outputs: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl ScriptedModel {
    fn with_outputs(outputs: Vec<Result<&str, &str>>) -> Self {
        Self {
            outputs: Mutex::new(
                outputs
                    .into_iter()
                    .map(|o| o.map(str::to_string).map_err(str::to_string))
                    .collect()
            ),
            ..Default::default()
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceCapability for ScriptedModel {
    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let next = self.outputs.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(GenerationError::Request(e)),
            None => Ok(String::new()),
        }
    }
}

struct FakeLoader {
    model: Arc<ScriptedModel>,
    fail: bool,
}

#[async_trait]
impl ModelLoader for FakeLoader {
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        progress: ProgressCallback
    ) -> Result<Arc<dyn InferenceCapability>, LoadError> {
        progress(LoadProgress::Downloading { loaded: 50, total: 100 });
        if self.fail {
            return Err(LoadError::Network(format!("{} unreachable", descriptor.identifier)));
        }
        progress(LoadProgress::Downloading { loaded: 100, total: 100 });
        progress(LoadProgress::Ready);
        Ok(self.model.clone())
    }
}

fn silent_sink() -> ProgressSink {
    Arc::new(|_: ProgressUpdate| {})
}

fn agent_with(model: Arc<ScriptedModel>, fail: bool) -> ChatAgent {
    ChatAgent::new(
        Arc::new(FakeLoader { model, fail }),
        Arc::new(PromptConfig::default()),
        GenerationParams::default()
    )
}

async fn loaded_agent(model: Arc<ScriptedModel>, task: TaskKind) -> ChatAgent {
    let agent = agent_with(model, false);
    agent.load_model(ModelDescriptor::new("test/model", task), silent_sink()).await.unwrap();
    agent
}

#[tokio::test]
async fn instruct_turn_end_to_end() {
    let model = Arc::new(
        ScriptedModel::with_outputs(
            vec![Ok("Human: Hello\n\nAssistant: Hi there! How can I help you today?\n\nHuman: ")]
        )
    );
    let agent = loaded_agent(model.clone(), TaskKind::Instruct).await;

    let reply = agent.submit("Hello").await.unwrap();
    assert_eq!(reply.content, "Hi there! How can I help you today?");
    assert_eq!(reply.kind, ReplyKind::Generated);
    assert_eq!(model.prompts(), vec!["Human: Hello\n\nAssistant:"]);

    let history = agent.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].content, "Hi there! How can I help you today?");
    assert_eq!(agent.state().await, SessionState::Ready);
}

#[tokio::test]
async fn conversational_prompt_includes_prior_turns() {
    let model = Arc::new(ScriptedModel::with_outputs(vec![Ok("Fine."), Ok("Sure.")]));
    let agent = loaded_agent(model.clone(), TaskKind::Conversational).await;

    agent.submit("How are you?").await.unwrap();
    agent.submit("  Tell me more  ").await.unwrap();

    assert_eq!(model.prompts(), vec!["How are you?", "How are you?\nFine.\nTell me more"]);
}

#[tokio::test]
async fn echo_only_output_uses_fallback() {
    let model = Arc::new(
        ScriptedModel::with_outputs(
            vec![Ok("This is a friendly conversation between a human and an AI assistant.\n\nHuman: Yo\n\nAI:")]
        )
    );
    let agent = loaded_agent(model, TaskKind::General).await;
    let reply = agent.submit("Yo").await.unwrap();
    assert_eq!(reply.content, FALLBACK_REPLY);
}

#[tokio::test]
async fn generation_failure_returns_apology_and_keeps_history() {
    let model = Arc::new(ScriptedModel::with_outputs(vec![Ok("First."), Err("out of memory")]));
    let agent = loaded_agent(model, TaskKind::Instruct).await;

    agent.submit("one").await.unwrap();
    let reply = agent.submit("two").await.unwrap();

    assert_eq!(reply.content, APOLOGY_REPLY);
    assert_eq!(reply.kind, ReplyKind::Apology);
    assert!(!reply.content.contains("out of memory"));
    assert_eq!(agent.history().await.len(), 2);
    assert_eq!(agent.state().await, SessionState::Ready);
}

#[tokio::test]
async fn second_submission_while_generating_is_rejected() {
    let gate = Arc::new(Notify::new());
    let model = Arc::new(ScriptedModel {
        gate: Some(gate.clone()),
        ..ScriptedModel::with_outputs(vec![Ok("Done.")])
    });
    let agent = Arc::new(loaded_agent(model.clone(), TaskKind::Instruct).await);

    let first = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.submit("first").await })
    };
    while model.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(agent.state().await, SessionState::Generating);

    let second = agent.submit("second").await;
    assert!(matches!(second, Err(ChatError::Busy)));
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert!(agent.history().await.is_empty());

    gate.notify_one();
    let reply = first.await.unwrap().unwrap();
    assert_eq!(reply.content, "Done.");
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(agent.history().await.len(), 2);
}

#[tokio::test]
async fn history_is_capped_across_turns() {
    let outputs = (0..6).map(|_| Ok("Ok.")).collect();
    let model = Arc::new(ScriptedModel::with_outputs(outputs));
    let agent = loaded_agent(model, TaskKind::Instruct).await;

    for i in 0..6 {
        agent.submit(&format!("message {}", i)).await.unwrap();
    }
    let history = agent.history().await;
    assert_eq!(history.len(), 8);
    assert_eq!(history[0].content, "message 2");
    assert_eq!(history[7].content, "Ok.");
}

#[tokio::test]
async fn input_is_rejected_without_model_or_text() {
    let agent = agent_with(Arc::new(ScriptedModel::default()), false);
    assert!(matches!(agent.submit("hi").await, Err(ChatError::NotReady)));
    assert_eq!(agent.state().await, SessionState::Idle);

    agent.load_model(ModelDescriptor::detect("Xenova/gpt2"), silent_sink()).await.unwrap();
    assert!(matches!(agent.submit("   ").await, Err(ChatError::EmptyInput)));
}

#[tokio::test]
async fn failed_load_names_model_and_leaves_nothing_loaded() {
    let agent = agent_with(Arc::new(ScriptedModel::default()), true);
    let err = agent
        .load_model(ModelDescriptor::detect("HuggingFaceTB/SmolLM-135M-Instruct"), silent_sink()).await
        .unwrap_err();

    assert_eq!(
        err.notice().as_deref(),
        Some(
            "Sorry, I couldn't load the SmolLM-135M-Instruct model. Please try a different model or refresh the page."
        )
    );
    assert_eq!(agent.state().await, SessionState::Error);
    assert!(!agent.is_loaded().await);
    assert!(matches!(agent.submit("hi").await, Err(ChatError::NotReady)));
}

#[tokio::test]
async fn switching_models_replaces_active_descriptor() {
    let model = Arc::new(ScriptedModel::default());
    let agent = loaded_agent(model, TaskKind::Instruct).await;

    let next = ModelDescriptor::detect("microsoft/DialoGPT-small");
    agent.load_model(next.clone(), silent_sink()).await.unwrap();
    assert_eq!(agent.active_model().await, Some(next));
    assert_eq!(agent.state().await, SessionState::Ready);
}

#[tokio::test]
async fn load_progress_follows_checkpoints() {
    let agent = agent_with(Arc::new(ScriptedModel::default()), false);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = seen.clone();
    let sink: ProgressSink = Arc::new(move |u: ProgressUpdate| sink_seen.lock().unwrap().push(u));

    agent.load_model(ModelDescriptor::detect("Xenova/gpt2"), sink).await.unwrap();

    let updates = seen.lock().unwrap();
    let percents: Vec<u8> = updates.iter().map(|u| u.percent).collect();
    assert_eq!(percents, vec![10, 30, 60, 90, 95, 100]);
    assert_eq!(updates[0].message, "Loading gpt2...");
    assert_eq!(updates[2].message, "Downloading: 50%");
    assert_eq!(updates[5].message, "gpt2 ready");
}
