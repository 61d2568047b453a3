//! **Completion Client** — one structured reply per user utterance.
//!
//! The request carries the character's current system prompt, a bounded
//! window of prior transcript entries, and the new user line. The provider
//! must answer with exactly two logical fields: the spoken `reply` and an
//! optional `prompt_delta` the conversation appends to its persona state.
//! Anything else is a schema violation, not something to coerce.
//!
//! API key: `OPENAI_API_KEY` in `.env`. Default model: `gpt-4.1`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::character::Character;
use crate::conversation::{Message, Role};
use crate::error::{DialogueError, DialogueResult};

const COMPLETION_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4.1";

/// Prior transcript entries included per request; older context is dropped.
pub const HISTORY_WINDOW: usize = 6;

/// Fixed generation parameters. These are configuration, not per-call knobs.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Sampling temperature (default 0.8).
    pub temperature: f32,
    /// Hard cap on reply length in tokens (default 200, tuned for speech).
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            max_output_tokens: 200,
        }
    }
}

/// The structured completion every turn expects back.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompletionReply {
    /// The character's next spoken line.
    pub reply: String,
    /// Optional persona-state addition. Absent and JSON null both mean
    /// "no change".
    #[serde(default)]
    pub prompt_delta: Option<String>,
}

/// Backend that produces the character's next line. Implement for a remote
/// provider or a scripted double.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// One completion for one user utterance. `history` holds the prior
    /// transcript only; the new user line travels separately and must not
    /// appear in it.
    async fn complete(
        &self,
        character: &Character,
        system_prompt: &str,
        history: &[Message],
        user_text: &str,
    ) -> DialogueResult<CompletionReply>;
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_output_tokens: u32,
    response_schema: Value,
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Closed schema for the reply object, sent with every request.
fn reply_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "reply": {
                "type": "string",
                "description": "The character's next spoken line, two or three short sentences."
            },
            "prompt_delta": {
                "type": ["string", "null"],
                "description": "Optional addition to the character's persona state, e.g. a fact learned about the traveler."
            }
        },
        "required": ["reply"],
        "additionalProperties": false
    })
}

/// Assemble the provider message list: the system prompt, then the last
/// [`HISTORY_WINDOW`] prior entries in order, then the new user line.
fn build_messages(system_prompt: &str, history: &[Message], user_text: &str) -> Vec<ChatMessage> {
    let skip = history.len().saturating_sub(HISTORY_WINDOW);
    let mut messages = Vec::with_capacity(history.len() - skip + 2);
    messages.push(ChatMessage {
        role: "system".to_string(),
        content: system_prompt.to_string(),
    });
    for entry in &history[skip..] {
        messages.push(ChatMessage {
            role: role_label(entry.role).to_string(),
            content: entry.content.clone(),
        });
    }
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: user_text.to_string(),
    });
    messages
}

/// Decode a provider payload into a [`CompletionReply`]. Every mismatch is
/// a schema violation: unknown fields, missing or non-string `reply`, and
/// replies with nothing to say.
fn parse_reply(body: &[u8]) -> DialogueResult<CompletionReply> {
    let reply: CompletionReply = serde_json::from_slice(body)
        .map_err(|e| DialogueError::SchemaViolation(e.to_string()))?;
    if reply.reply.trim().is_empty() {
        return Err(DialogueError::SchemaViolation(
            "reply must be a non-empty string".to_string(),
        ));
    }
    Ok(reply)
}

/// Production completion backend: OpenAI-compatible structured completions.
#[derive(Debug, Clone)]
pub struct OpenAiCompletion {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Model id (default gpt-4.1).
    pub model: String,
    /// Fixed generation parameters.
    pub params: GenerationParams,
    client: reqwest::Client,
}

impl OpenAiCompletion {
    /// Build from environment: `OPENAI_API_KEY`, with optional
    /// `COMPLETION_API_URL` and `COMPLETION_MODEL` overrides.
    pub fn from_env() -> DialogueResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| DialogueError::Config("completion requires OPENAI_API_KEY".to_string()))?;
        if api_key.trim().is_empty() {
            return Err(DialogueError::Config("OPENAI_API_KEY is empty".to_string()));
        }
        let mut backend = Self::new(api_key)?;
        if let Ok(base) = std::env::var("COMPLETION_API_URL") {
            if !base.trim().is_empty() {
                backend.base_url = base.trim().to_string();
            }
        }
        if let Ok(model) = std::env::var("COMPLETION_MODEL") {
            if !model.trim().is_empty() {
                backend.model = model.trim().to_string();
            }
        }
        Ok(backend)
    }

    /// Create with an explicit API key.
    pub fn new(api_key: impl Into<String>) -> DialogueResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| DialogueError::Config(e.to_string()))?;
        Ok(Self {
            base_url: COMPLETION_API_BASE.to_string(),
            api_key: api_key.into().trim().to_string(),
            model: DEFAULT_MODEL.to_string(),
            params: GenerationParams::default(),
            client,
        })
    }

    /// Set the model id.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at a different endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompletion {
    async fn complete(
        &self,
        character: &Character,
        system_prompt: &str,
        history: &[Message],
        user_text: &str,
    ) -> DialogueResult<CompletionReply> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = CompletionRequest {
            model: self.model.clone(),
            messages: build_messages(system_prompt, history, user_text),
            temperature: self.params.temperature,
            max_output_tokens: self.params.max_output_tokens,
            response_schema: reply_schema(),
        };
        tracing::debug!(
            "Completion: asking {} for '{}' ({} wire messages)",
            self.model,
            character.id,
            body.messages.len()
        );
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let detail = res.text().await.unwrap_or_default();
            return Err(DialogueError::Provider { status, detail });
        }
        let payload = res.bytes().await?;
        parse_reply(&payload)
    }
}

/// Recorded arguments from one [`ScriptedCompletion`] call.
#[derive(Debug, Clone)]
pub struct RecordedCompletionCall {
    pub character_id: String,
    pub system_prompt: String,
    pub history_len: usize,
    pub user_text: String,
}

/// Scripted completion for demos and tests: replies from a queue, then a
/// fixed fallback line. Records every call for assertions.
pub struct ScriptedCompletion {
    queued: Mutex<VecDeque<CompletionReply>>,
    fallback: CompletionReply,
    calls: Arc<Mutex<Vec<RecordedCompletionCall>>>,
}

impl ScriptedCompletion {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: CompletionReply {
                reply: reply.into(),
                prompt_delta: None,
            },
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a reply to use before falling back to the fixed line.
    pub fn with_next(self, reply: CompletionReply) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(reply);
        }
        self
    }

    /// Shared handle to the call log; grab it before boxing the backend.
    pub fn call_log(&self) -> Arc<Mutex<Vec<RecordedCompletionCall>>> {
        Arc::clone(&self.calls)
    }
}

impl Default for ScriptedCompletion {
    fn default() -> Self {
        Self::new("Aye, that's the way of it around here, friend.")
    }
}

#[async_trait]
impl CompletionBackend for ScriptedCompletion {
    async fn complete(
        &self,
        character: &Character,
        system_prompt: &str,
        history: &[Message],
        user_text: &str,
    ) -> DialogueResult<CompletionReply> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCompletionCall {
                character_id: character.id.clone(),
                system_prompt: system_prompt.to_string(),
                history_len: history.len(),
                user_text: user_text.to_string(),
            });
        }
        let next = self.queued.lock().ok().and_then(|mut q| q.pop_front());
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}
