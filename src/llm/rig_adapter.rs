//! Adapter from rig-core's `CompletionModel` to [`LlmProvider`].

use async_trait::async_trait;
use rig::completion::message::{AssistantContent, Message};
use rig::completion::{CompletionError, CompletionModel};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role,
};

/// Anthropic rejects requests without `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct RigAdapter<M> {
    model: M,
    provider: &'static str,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, provider: &'static str, model_name: &str) -> Self {
        Self {
            model,
            provider,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let turns = split_messages(request.messages).ok_or_else(|| LlmError::RequestFailed {
            provider: self.provider.to_string(),
            reason: "completion request has no user message".to_string(),
        })?;

        let mut builder = self
            .model
            .completion_request(Message::user(turns.prompt))
            .messages(turns.history.into_iter().map(Message::user).collect())
            .max_tokens(u64::from(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)));
        if let Some(preamble) = turns.preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_error(self.provider, e))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();
        if content.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "no text content in completion".to_string(),
            });
        }

        debug!(
            model = %self.model_name,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Completion received"
        );

        Ok(CompletionResponse {
            content,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        })
    }
}

/// A request reshaped for rig: system text becomes the preamble, the last
/// user message is the prompt, earlier user messages are history.
#[derive(Debug, PartialEq, Eq)]
struct Turns {
    preamble: Option<String>,
    history: Vec<String>,
    prompt: String,
}

fn split_messages(messages: Vec<ChatMessage>) -> Option<Turns> {
    let mut system = Vec::new();
    let mut users = Vec::new();
    for message in messages {
        match message.role {
            Role::System => system.push(message.content),
            Role::User => users.push(message.content),
        }
    }

    let prompt = users.pop()?;
    Some(Turns {
        preamble: (!system.is_empty()).then(|| system.join("\n\n")),
        history: users,
        prompt,
    })
}

/// Rig surfaces provider failures as text; recover the categories we act on.
fn map_error(provider: &str, error: CompletionError) -> LlmError {
    let reason = error.to_string();
    if reason.contains("rate_limit_error") || reason.contains("429") {
        LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        }
    } else if reason.contains("authentication_error") || reason.contains("401") {
        LlmError::AuthFailed {
            provider: provider.to_string(),
        }
    } else {
        LlmError::RequestFailed {
            provider: provider.to_string(),
            reason,
        }
    }
}
