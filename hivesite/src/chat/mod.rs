use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::{LlmProvider, LlmRequest, PromptMessage, PromptRole};
use crate::models::ChatMessage;
use crate::storage::Store;

pub mod knowledge;

pub use knowledge::{latest_updates_section, system_prompt, KNOWLEDGE_BASE};

/// Returned when the model answers with no text
pub const FALLBACK_REPLY: &str = "I'm sorry, I couldn't generate a response.";

pub const DEFAULT_RECENT_UPDATES: usize = 20;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: usize = 1024;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0:#}")]
    Upstream(anyhow::Error),
}

impl ChatError {
    /// True when the upstream failure looks like a rejected or missing credential
    pub fn is_credential_problem(&self) -> bool {
        let ChatError::Upstream(err) = self;
        let text = format!("{:#}", err).to_lowercase();
        text.contains("401") || text.contains("unauthorized") || text.contains("api key")
    }
}

/// Builds grounded prompts and forwards them to the configured provider.
pub struct ChatResponder {
    provider: Arc<dyn LlmProvider>,
    store: Arc<dyn Store>,
    recent_updates_limit: usize,
    temperature: f32,
    max_tokens: usize,
    timeout_seconds: Option<u64>,
}

impl ChatResponder {
    pub fn new(provider: Arc<dyn LlmProvider>, store: Arc<dyn Store>) -> Self {
        Self {
            provider,
            store,
            recent_updates_limit: DEFAULT_RECENT_UPDATES,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_seconds: None,
        }
    }

    pub fn with_recent_updates_limit(mut self, limit: usize) -> Self {
        self.recent_updates_limit = limit;
        self
    }

    pub fn with_generation(mut self, temperature: f32, max_tokens: usize, timeout_seconds: Option<u64>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Knowledge base plus the latest-updates appendix. A store failure only drops the appendix.
    pub async fn system_prompt(&self) -> String {
        let mut knowledge = KNOWLEDGE_BASE.to_string();

        match self.store.get_content_updates(self.recent_updates_limit, None).await {
            Ok(updates) => knowledge.push_str(&latest_updates_section(&updates)),
            Err(e) => warn!("chat: could not load recent updates, answering without them: {}", e),
        }

        system_prompt(&knowledge)
    }

    pub async fn respond(&self, message: &str, history: &[ChatMessage]) -> Result<String, ChatError> {
        let system = self.system_prompt().await;
        let messages = build_prompt(&system, history, message);
        debug!(model = self.provider.model(), prompt_messages = messages.len(), "chat: sending prompt");

        let response = self
            .provider
            .generate(LlmRequest {
                messages,
                max_tokens: Some(self.max_tokens),
                temperature: Some(self.temperature),
                timeout_seconds: self.timeout_seconds,
            })
            .await
            .map_err(ChatError::Upstream)?;

        Ok(response.content.unwrap_or_else(|| FALLBACK_REPLY.to_string()))
    }
}

/// System prompt first, then the history in order, then the new user message.
pub fn build_prompt(system: &str, history: &[ChatMessage], message: &str) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(PromptMessage::new(PromptRole::System, system));
    messages.extend(
        history
            .iter()
            .map(|m| PromptMessage::new(m.role.into(), m.content.clone())),
    );
    messages.push(PromptMessage::new(PromptRole::User, message));
    messages
}
