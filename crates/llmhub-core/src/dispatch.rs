use std::sync::Arc;

use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{debug, warn};

use llmhub_protocol::{ChatResponse, StreamEvent, TokenUsage, WireFormat};
use llmhub_provider::{ConcurrencyPermit, RequestStats};
use llmhub_transform::stream::StreamTranslator;
use llmhub_transform::usage::{usage_from_event, usage_from_response};
use llmhub_transform::transform_response;

use crate::error::RelayError;
use crate::forward::ForwardOutcome;
use crate::headers::header_get;
use crate::session::ProxySession;
use crate::state::AppState;
use crate::upstream::{ByteStream, UpstreamBody};
use crate::wire::{StreamDecoder, encode_stream_event, stream_content_type};

/// What goes back to the HTTP layer: a complete JSON body or a byte stream
/// the router forwards as it arrives.
pub enum ClientResponse {
    Json {
        status: u16,
        content_type: String,
        body: Bytes,
    },
    Stream {
        status: u16,
        content_type: &'static str,
        body: tokio::sync::mpsc::Receiver<Bytes>,
    },
}

/// Everything the end-of-request accounting needs, detached from the
/// session so the streaming task can outlive it.
struct UsageTicket {
    user_id: i64,
    provider_id: i64,
    provider_name: String,
    model: String,
    provider_price: Option<f64>,
    started_at: std::time::Instant,
    attempts: u32,
    status: u16,
}

impl UsageTicket {
    fn new(session: &ProxySession, outcome: &ForwardOutcome) -> Self {
        Self {
            user_id: session.principal.user_id,
            provider_id: outcome.provider.id,
            provider_name: outcome.provider.name.clone(),
            model: session.model.clone(),
            provider_price: outcome.provider.cost_per_mtok,
            started_at: session.started_at,
            attempts: outcome.attempts,
            status: outcome.response.status,
        }
    }
}

async fn publish_usage(state: &Arc<AppState>, ticket: &UsageTicket, usage: TokenUsage) {
    let usd = state.cost_usd(ticket.provider_price, &ticket.model, usage.total());
    state.ledger.record(ticket.provider_id, usage, usd).await;
    state.stats.record(RequestStats {
        user_id: ticket.user_id,
        provider_id: ticket.provider_id,
        provider_name: ticket.provider_name.clone(),
        model: ticket.model.clone(),
        tokens_in: usage.input_tokens,
        tokens_out: usage.output_tokens,
        latency_ms: ticket.started_at.elapsed().as_millis() as u64,
        status: ticket.status,
        attempts: ticket.attempts,
    });
}

/// Turn a successful upstream exchange into the client's response, in the
/// client's format, publishing usage on every path.
pub async fn dispatch_response(
    state: Arc<AppState>,
    session: &ProxySession,
    outcome: ForwardOutcome,
) -> Result<ClientResponse, RelayError> {
    let client_format = session.original_format;
    let ticket = UsageTicket::new(session, &outcome);
    let ForwardOutcome {
        upstream_format,
        response,
        permit,
        ..
    } = outcome;
    let status = response.status;

    match response.body {
        UpstreamBody::Bytes(bytes) => {
            let result = complete_body(
                &state,
                &ticket,
                client_format,
                upstream_format,
                status,
                &response.headers,
                bytes,
            )
            .await;
            drop(permit);
            result
        }
        UpstreamBody::Stream(rx) => {
            if session.is_stream {
                streamed_body(state, ticket, client_format, upstream_format, status, rx, permit)
            } else {
                let result =
                    aggregated_body(&state, &ticket, client_format, upstream_format, status, rx)
                        .await;
                drop(permit);
                result
            }
        }
    }
}

/// Non-streaming upstream body: pass through when formats agree, otherwise
/// a typed parse + translate. A body we cannot parse degrades to
/// passthrough rather than failing the request.
async fn complete_body(
    state: &Arc<AppState>,
    ticket: &UsageTicket,
    client_format: WireFormat,
    upstream_format: WireFormat,
    status: u16,
    headers: &crate::headers::Headers,
    bytes: Bytes,
) -> Result<ClientResponse, RelayError> {
    let upstream_content_type = header_get(headers, "content-type")
        .unwrap_or("application/json")
        .to_string();

    if upstream_format == client_format {
        let usage = parse_response(upstream_format, &bytes)
            .as_ref()
            .and_then(usage_from_response)
            .unwrap_or_default();
        publish_usage(state, ticket, usage).await;
        return Ok(ClientResponse::Json {
            status,
            content_type: upstream_content_type,
            body: bytes,
        });
    }

    match parse_response(upstream_format, &bytes) {
        Some(parsed) => {
            let usage = usage_from_response(&parsed).unwrap_or_default();
            let translated = transform_response(parsed, client_format, unix_now())
                .map_err(|err| RelayError::TranslationUnsupported(err.to_string()))?;
            let body = translated
                .to_bytes()
                .map_err(|err| RelayError::TranslationUnsupported(err.to_string()))?;
            publish_usage(state, ticket, usage).await;
            Ok(ClientResponse::Json {
                status,
                content_type: "application/json".to_string(),
                body,
            })
        }
        None => {
            warn!(
                provider = %ticket.provider_name,
                "unparseable upstream body, forwarding verbatim"
            );
            publish_usage(state, ticket, TokenUsage::default()).await;
            Ok(ClientResponse::Json {
                status,
                content_type: upstream_content_type,
                body: bytes,
            })
        }
    }
}

/// Streaming to a streaming client. Same-format bytes pass through exactly
/// as received (usage is observed on the side); cross-format bytes go
/// through decode -> translate -> re-frame, flushed per event.
fn streamed_body(
    state: Arc<AppState>,
    ticket: UsageTicket,
    client_format: WireFormat,
    upstream_format: WireFormat,
    status: u16,
    mut rx: ByteStream,
    permit: ConcurrencyPermit,
) -> Result<ClientResponse, RelayError> {
    let passthrough = upstream_format == client_format;
    let mut translator = if passthrough {
        None
    } else {
        Some(
            StreamTranslator::new(upstream_format, client_format, unix_now())
                .map_err(|err| RelayError::TranslationUnsupported(err.to_string()))?,
        )
    };

    let (tx, out) = tokio::sync::mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        // Permit rides with the pump so the slot frees on every exit path,
        // including client disconnect.
        let _permit = permit;
        let mut decoder = StreamDecoder::new(upstream_format);
        let mut usage = TokenUsage::default();

        'pump: while let Some(chunk) = rx.recv().await {
            let events = decoder.push(&chunk);
            for event in &events {
                if let Some(observed) = usage_from_event(event) {
                    usage.merge(observed);
                }
            }
            match &mut translator {
                None => {
                    if tx.send(chunk).await.is_err() {
                        break 'pump;
                    }
                }
                Some(translator) => {
                    for event in events {
                        let outputs = match translator.push(event) {
                            Ok(outputs) => outputs,
                            Err(err) => {
                                debug!(error = %err, "stream event dropped");
                                continue;
                            }
                        };
                        for output in outputs {
                            let Some(frame) = encode_stream_event(&output) else {
                                continue;
                            };
                            if tx.send(frame).await.is_err() {
                                break 'pump;
                            }
                        }
                    }
                }
            }
        }

        for event in decoder.finish() {
            if let Some(observed) = usage_from_event(&event) {
                usage.merge(observed);
            }
        }
        publish_usage(&state, &ticket, usage).await;
    });

    Ok(ClientResponse::Stream {
        status,
        content_type: stream_content_type(client_format),
        body: out,
    })
}

/// Streaming upstream, non-streaming client: Response API upstreams always
/// stream, and the terminal event carries the complete body.
async fn aggregated_body(
    state: &Arc<AppState>,
    ticket: &UsageTicket,
    client_format: WireFormat,
    upstream_format: WireFormat,
    status: u16,
    mut rx: ByteStream,
) -> Result<ClientResponse, RelayError> {
    let mut decoder = StreamDecoder::new(upstream_format);
    let mut usage = TokenUsage::default();
    let mut terminal: Option<ChatResponse> = None;

    while let Some(chunk) = rx.recv().await {
        for event in decoder.push(&chunk) {
            note_terminal(event, &mut usage, &mut terminal);
        }
    }
    // An upstream may close right after the terminal block without a final
    // blank line; flush the parser so that frame is not lost.
    for event in decoder.finish() {
        note_terminal(event, &mut usage, &mut terminal);
    }

    let Some(parsed) = terminal else {
        return Err(RelayError::UpstreamNetwork(
            "stream ended without a terminal response".to_string(),
        ));
    };
    let translated = transform_response(parsed, client_format, unix_now())
        .map_err(|err| RelayError::TranslationUnsupported(err.to_string()))?;
    let body = translated
        .to_bytes()
        .map_err(|err| RelayError::TranslationUnsupported(err.to_string()))?;
    publish_usage(state, ticket, usage).await;
    Ok(ClientResponse::Json {
        status,
        content_type: "application/json".to_string(),
        body,
    })
}

/// Track the running usage and the latest terminal response carried by one
/// decoded event.
fn note_terminal(
    event: StreamEvent,
    usage: &mut TokenUsage,
    terminal: &mut Option<ChatResponse>,
) {
    if let Some(observed) = usage_from_event(&event) {
        usage.merge(observed);
    }
    if let StreamEvent::Codex(event) = event {
        use llmhub_protocol::codex::stream::ResponseStreamEvent;
        match event {
            ResponseStreamEvent::Completed { response }
            | ResponseStreamEvent::Failed { response }
            | ResponseStreamEvent::Incomplete { response } => {
                *terminal = Some(ChatResponse::Codex(response));
            }
            _ => {}
        }
    }
}

fn parse_response(format: WireFormat, bytes: &Bytes) -> Option<ChatResponse> {
    match format {
        WireFormat::Claude => serde_json::from_slice(bytes).ok().map(ChatResponse::Claude),
        WireFormat::OpenAiChat => serde_json::from_slice(bytes)
            .ok()
            .map(ChatResponse::OpenAiChat),
        WireFormat::Codex => serde_json::from_slice(bytes).ok().map(ChatResponse::Codex),
        WireFormat::GeminiCli => serde_json::from_slice(bytes)
            .ok()
            .map(ChatResponse::GeminiCli),
    }
}

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
