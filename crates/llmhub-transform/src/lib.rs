pub mod claude2openai;
pub mod codex2openai;
pub mod geminicli;
pub mod official;
pub mod openai2claude;
pub mod openai2codex;
pub mod sanitize;
pub mod stream;
pub mod usage;

#[cfg(test)]
mod tests;

use llmhub_protocol::{ChatRequest, ChatResponse, WireFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateError {
    UnsupportedPair { from: WireFormat, to: WireFormat },
    /// An event or body arrived in a format the translator was not built for.
    FormatMismatch,
    MalformedEnvelope(&'static str),
}

impl std::fmt::Display for TranslateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslateError::UnsupportedPair { from, to } => {
                write!(f, "unsupported translation: {from} -> {to}")
            }
            TranslateError::FormatMismatch => write!(f, "event format does not match translator"),
            TranslateError::MalformedEnvelope(what) => write!(f, "malformed envelope: {what}"),
        }
    }
}

impl std::error::Error for TranslateError {}

/// Position of each format on the translation chain. Adjacent formats have
/// direct translators; everything else is reached by hopping through the
/// chain, so every pair the routing table can produce is covered.
pub(crate) fn chain_position(format: WireFormat) -> i8 {
    match format {
        WireFormat::GeminiCli => 0,
        WireFormat::Claude => 1,
        WireFormat::OpenAiChat => 2,
        WireFormat::Codex => 3,
    }
}

pub(crate) fn next_hop(from: WireFormat, to: WireFormat) -> WireFormat {
    let from_pos = chain_position(from);
    let to_pos = chain_position(to);
    let next = if to_pos > from_pos {
        from_pos + 1
    } else {
        from_pos - 1
    };
    match next {
        0 => WireFormat::GeminiCli,
        1 => WireFormat::Claude,
        2 => WireFormat::OpenAiChat,
        _ => WireFormat::Codex,
    }
}

/// Translate a request into the target format, hopping along the chain.
/// Identity when the formats already agree.
pub fn transform_request(
    request: ChatRequest,
    to: WireFormat,
) -> Result<ChatRequest, TranslateError> {
    let mut current = request;
    while current.format() != to {
        let hop = next_hop(current.format(), to);
        current = hop_request(current, hop)?;
    }
    Ok(current)
}

fn hop_request(request: ChatRequest, to: WireFormat) -> Result<ChatRequest, TranslateError> {
    match (request, to) {
        (ChatRequest::OpenAiChat(req), WireFormat::Codex) => Ok(ChatRequest::Codex(
            openai2codex::request::transform_request(req),
        )),
        (ChatRequest::Codex(req), WireFormat::OpenAiChat) => Ok(ChatRequest::OpenAiChat(
            codex2openai::request::transform_request(req),
        )),
        (ChatRequest::Claude(req), WireFormat::OpenAiChat) => Ok(ChatRequest::OpenAiChat(
            claude2openai::request::transform_request(req),
        )),
        (ChatRequest::OpenAiChat(req), WireFormat::Claude) => Ok(ChatRequest::Claude(
            openai2claude::request::transform_request(req),
        )),
        (ChatRequest::GeminiCli(envelope), WireFormat::Claude) => {
            geminicli::unwrap_request(envelope).map(ChatRequest::Claude)
        }
        (ChatRequest::Claude(req), WireFormat::GeminiCli) => Ok(ChatRequest::GeminiCli(
            geminicli::wrap_request(req).map_err(|_| TranslateError::MalformedEnvelope("request"))?,
        )),
        (request, to) => Err(TranslateError::UnsupportedPair {
            from: request.format(),
            to,
        }),
    }
}

/// Translate a complete (non-streaming) response into the target format.
/// `created_at` is a unix timestamp for synthesized envelope fields.
pub fn transform_response(
    response: ChatResponse,
    to: WireFormat,
    created_at: i64,
) -> Result<ChatResponse, TranslateError> {
    let mut current = response;
    while current.format() != to {
        let hop = next_hop(current.format(), to);
        current = hop_response(current, hop, created_at)?;
    }
    Ok(current)
}

fn hop_response(
    response: ChatResponse,
    to: WireFormat,
    created_at: i64,
) -> Result<ChatResponse, TranslateError> {
    match (response, to) {
        (ChatResponse::OpenAiChat(resp), WireFormat::Codex) => Ok(ChatResponse::Codex(
            openai2codex::response::transform_response(resp),
        )),
        (ChatResponse::Codex(resp), WireFormat::OpenAiChat) => Ok(ChatResponse::OpenAiChat(
            codex2openai::response::transform_response(resp),
        )),
        (ChatResponse::Claude(resp), WireFormat::OpenAiChat) => Ok(ChatResponse::OpenAiChat(
            claude2openai::response::transform_response(resp, created_at),
        )),
        (ChatResponse::OpenAiChat(resp), WireFormat::Claude) => Ok(ChatResponse::Claude(
            openai2claude::response::transform_response(resp),
        )),
        (ChatResponse::GeminiCli(envelope), WireFormat::Claude) => {
            geminicli::unwrap_response(envelope).map(ChatResponse::Claude)
        }
        (ChatResponse::Claude(resp), WireFormat::GeminiCli) => Ok(ChatResponse::GeminiCli(
            geminicli::wrap_response(resp)
                .map_err(|_| TranslateError::MalformedEnvelope("response"))?,
        )),
        (response, to) => Err(TranslateError::UnsupportedPair {
            from: response.format(),
            to,
        }),
    }
}
