use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f64 = 0.2;

/// Body accepted by the streaming endpoint.
///
/// `messages` is kept as raw JSON and forwarded untouched; the relay does
/// not construct prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequest {
    pub messages: Option<Value>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
}

/// Request sent to the upstream provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamRequest {
    pub model: String,
    pub messages: Vec<Value>,
    pub temperature: f64,
}

/// Token counts reported on the final upstream message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl UsageRecord {
    /// `total_tokens` when reported, otherwise prompt plus completion.
    #[must_use]
    pub fn tokens(&self) -> u64 {
        self.total_tokens.unwrap_or_else(|| {
            self.prompt_tokens.unwrap_or(0) + self.completion_tokens.unwrap_or(0)
        })
    }
}

/// One decoded `chat.completion.chunk` record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<UsageRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// Text fragment of the first choice, if it carries a non-empty one.
    #[must_use]
    pub fn delta_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.as_ref())
            .and_then(|delta| delta.content.as_deref())
            .filter(|text| !text.is_empty())
    }

    /// Why the first choice stopped, if it has.
    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.finish_reason.as_deref())
    }
}
