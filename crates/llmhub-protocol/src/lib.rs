pub mod claude;
pub mod codex;
pub mod gemini;
pub mod openai;
pub mod sse;

use serde::{Deserialize, Serialize};

/// One of the four wire schema families the proxy speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireFormat {
    Claude,
    OpenAiChat,
    Codex,
    GeminiCli,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Claude => "claude",
            WireFormat::OpenAiChat => "openai",
            WireFormat::Codex => "response",
            WireFormat::GeminiCli => "gemini-cli",
        }
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed inbound generation request in whichever format the client spoke.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatRequest {
    Claude(claude::request::CreateMessageRequest),
    OpenAiChat(openai::request::CreateChatCompletionRequest),
    Codex(codex::request::CreateResponseRequest),
    GeminiCli(gemini::request::GenerateEnvelope),
}

impl ChatRequest {
    pub fn format(&self) -> WireFormat {
        match self {
            ChatRequest::Claude(_) => WireFormat::Claude,
            ChatRequest::OpenAiChat(_) => WireFormat::OpenAiChat,
            ChatRequest::Codex(_) => WireFormat::Codex,
            ChatRequest::GeminiCli(_) => WireFormat::GeminiCli,
        }
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            ChatRequest::Claude(req) => Some(req.model.as_str()),
            ChatRequest::OpenAiChat(req) => Some(req.model.as_str()),
            ChatRequest::Codex(req) => Some(req.model.as_str()),
            ChatRequest::GeminiCli(req) => req.model.as_deref(),
        }
    }

    pub fn set_model(&mut self, model: &str) {
        match self {
            ChatRequest::Claude(req) => req.model = model.to_string(),
            ChatRequest::OpenAiChat(req) => req.model = model.to_string(),
            ChatRequest::Codex(req) => req.model = model.to_string(),
            ChatRequest::GeminiCli(req) => req.model = Some(model.to_string()),
        }
    }

    pub fn stream(&self) -> bool {
        match self {
            ChatRequest::Claude(req) => req.stream.unwrap_or(false),
            ChatRequest::OpenAiChat(req) => req.stream.unwrap_or(false),
            ChatRequest::Codex(req) => req.stream.unwrap_or(false),
            // The CLI envelope itself carries no stream flag; the route decides.
            ChatRequest::GeminiCli(_) => true,
        }
    }

    pub fn to_bytes(&self) -> Result<bytes::Bytes, serde_json::Error> {
        let vec = match self {
            ChatRequest::Claude(req) => serde_json::to_vec(req)?,
            ChatRequest::OpenAiChat(req) => serde_json::to_vec(req)?,
            ChatRequest::Codex(req) => serde_json::to_vec(req)?,
            ChatRequest::GeminiCli(req) => serde_json::to_vec(req)?,
        };
        Ok(bytes::Bytes::from(vec))
    }
}

/// A parsed non-streaming generation response.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatResponse {
    Claude(claude::response::MessageResponse),
    OpenAiChat(openai::response::ChatCompletionResponse),
    Codex(codex::response::ResponseBody),
    GeminiCli(serde_json::Value),
}

impl ChatResponse {
    pub fn format(&self) -> WireFormat {
        match self {
            ChatResponse::Claude(_) => WireFormat::Claude,
            ChatResponse::OpenAiChat(_) => WireFormat::OpenAiChat,
            ChatResponse::Codex(_) => WireFormat::Codex,
            ChatResponse::GeminiCli(_) => WireFormat::GeminiCli,
        }
    }

    pub fn to_bytes(&self) -> Result<bytes::Bytes, serde_json::Error> {
        let vec = match self {
            ChatResponse::Claude(resp) => serde_json::to_vec(resp)?,
            ChatResponse::OpenAiChat(resp) => serde_json::to_vec(resp)?,
            ChatResponse::Codex(resp) => serde_json::to_vec(resp)?,
            ChatResponse::GeminiCli(resp) => serde_json::to_vec(resp)?,
        };
        Ok(bytes::Bytes::from(vec))
    }
}

/// One logical event on a streaming response, in a concrete format.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Claude(claude::stream::StreamEvent),
    OpenAiChat(openai::stream::ChatCompletionChunk),
    /// The OpenAI chat `data: [DONE]` terminator.
    OpenAiChatDone,
    Codex(codex::stream::ResponseStreamEvent),
    GeminiCli(serde_json::Value),
}

impl StreamEvent {
    pub fn format(&self) -> WireFormat {
        match self {
            StreamEvent::Claude(_) => WireFormat::Claude,
            StreamEvent::OpenAiChat(_) | StreamEvent::OpenAiChatDone => WireFormat::OpenAiChat,
            StreamEvent::Codex(_) => WireFormat::Codex,
            StreamEvent::GeminiCli(_) => WireFormat::GeminiCli,
        }
    }
}

/// Token usage in format-neutral terms, pulled from terminal stream events
/// or non-streaming response bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn merge(&mut self, other: TokenUsage) {
        if other.input_tokens > 0 {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens > 0 {
            self.output_tokens = other.output_tokens;
        }
    }
}
