use std::sync::Arc;

use tracing::{info, warn};

use llmhub_protocol::{ChatRequest, WireFormat};
use llmhub_provider::{ConcurrencyPermit, Provider, Selection};
use llmhub_transform::sanitize::sanitize_response_request;
use llmhub_transform::transform_request;

use crate::error::{RelayError, UpstreamErrorDetail};
use crate::headers::{Headers, header_remove, header_set};
use crate::session::ProxySession;
use crate::state::AppState;
use crate::upstream::{UpstreamFailure, UpstreamRequest, UpstreamResponse};

/// Provider failures tolerated before the request is abandoned; the first
/// attempt is not a retry, so up to `MAX_RETRY_ATTEMPTS + 1` providers are
/// touched.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// User-Agent presented to Response API upstreams regardless of client.
const CODEX_OUTBOUND_USER_AGENT: &str = "codex_cli_rs/1.0.0 (Mac OS 14.0.0; arm64)";

/// A successful upstream exchange, ready for the dispatcher.
pub struct ForwardOutcome {
    pub provider: Provider,
    pub upstream_format: WireFormat,
    pub response: UpstreamResponse,
    pub attempts: u32,
    /// Holds the provider's concurrency slot until the response finishes.
    pub permit: ConcurrencyPermit,
}

/// Executes one logical client request against up to several providers:
/// pick, redirect model, translate, sanitize, send; on any failure record
/// it and move to the next eligible provider.
#[derive(Clone)]
pub struct Forwarder {
    state: Arc<AppState>,
}

impl Forwarder {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn forward(&self, session: &mut ProxySession) -> Result<ForwardOutcome, RelayError> {
        let mut attempt: u32 = 1;
        let mut last_failure: Option<UpstreamErrorDetail> = None;

        let Some(selection) = self
            .state
            .selector
            .pick(&session.model, session.session_id.as_deref(), &session.excluded)
            .await
        else {
            return Err(RelayError::NoProviderAvailable);
        };
        self.note_selection(session, &selection, attempt).await;

        loop {
            let provider = session
                .provider
                .clone()
                .expect("forward loop always has an assigned provider");
            let permit = self.state.concurrency.acquire(provider.id).await;

            match self.attempt(session, &provider, attempt).await {
                Ok((response, upstream_format)) => {
                    self.state.circuit.record_success(provider.id).await;
                    info!(
                        trace_id = %session.trace_id,
                        provider = %provider.name,
                        attempt,
                        status = response.status,
                        "upstream call succeeded"
                    );
                    return Ok(ForwardOutcome {
                        provider,
                        upstream_format,
                        response,
                        attempts: attempt,
                        permit,
                    });
                }
                Err(failure) => {
                    drop(permit);
                    self.state.circuit.record_failure(provider.id).await;
                    if let Some(session_id) = session.session_id.as_deref()
                        && self.state.sticky.get(session_id).await == Some(provider.id)
                    {
                        self.state.sticky.unassign(session_id).await;
                    }
                    session.excluded.insert(provider.id);

                    let detail = failure_detail(&provider, &failure);
                    warn!(
                        trace_id = %session.trace_id,
                        provider = %provider.name,
                        provider_id = provider.id,
                        attempt,
                        status = ?detail.status,
                        error = %detail.message,
                        "upstream call failed"
                    );
                    let circuit = self.state.circuit.state(provider.id).await;
                    session.mark_failed(provider.id, circuit, detail.message.clone());
                    last_failure = Some(detail);

                    if attempt > MAX_RETRY_ATTEMPTS {
                        break;
                    }
                    let Some(selection) = self
                        .state
                        .selector
                        .pick(
                            &session.model,
                            session.session_id.as_deref(),
                            &session.excluded,
                        )
                        .await
                    else {
                        break;
                    };
                    attempt += 1;
                    self.note_selection(session, &selection, attempt).await;
                }
            }
        }

        let last = last_failure.expect("loop only exits after at least one failure");
        // A lone attempt keeps the upstream's own shape; exhaustion across
        // providers aggregates.
        Err(if attempt > 1 {
            RelayError::AllProvidersFailed { last }
        } else if let Some(status) = last.status {
            RelayError::UpstreamHttp { status, detail: last }
        } else {
            RelayError::UpstreamNetwork(last.message)
        })
    }

    async fn note_selection(
        &self,
        session: &mut ProxySession,
        selection: &Selection,
        attempt: u32,
    ) {
        let circuit = self.state.circuit.state(selection.provider.id).await;
        session.provider = Some(selection.provider.clone());
        session.push_decision(&selection.provider, selection.reason, circuit, attempt, None);
    }

    /// One upstream exchange. `Err` means the attempt failed and the loop
    /// should rotate providers.
    async fn attempt(
        &self,
        session: &mut ProxySession,
        provider: &Provider,
        attempt: u32,
    ) -> Result<(UpstreamResponse, WireFormat), UpstreamFailure> {
        let mut redirected_model = false;
        if let Some(redirected) = provider.redirect_model(&session.model) {
            let redirected = redirected.to_string();
            info!(
                trace_id = %session.trace_id,
                from = %session.model,
                to = %redirected,
                "model redirected"
            );
            session.set_model(&redirected);
            redirected_model = true;
        }

        let from_format = session.original_format;
        let to_format = provider.provider_type.wire_format();

        let mut outbound = session.request.clone();
        let mut translated = false;
        if from_format != to_format {
            match transform_request(outbound.clone(), to_format) {
                Ok(request) => {
                    outbound = request;
                    translated = true;
                }
                // Degraded mode: keep the original body and let the
                // upstream judge it.
                Err(err) => {
                    warn!(
                        trace_id = %session.trace_id,
                        provider = %provider.name,
                        error = %err,
                        "request translation failed, forwarding original body"
                    );
                }
            }
        }

        let mut sanitized = false;
        if let ChatRequest::Codex(request) = &mut outbound {
            sanitized = sanitize_response_request(request, session.user_agent.as_deref());
        }

        let headers = self.build_headers(session, provider, to_format);
        let path = rewrite_path(&session.path, to_format);
        let url = compose_url(&provider.base_url, &path, session.query.as_deref());

        let body = if session.method.takes_body() {
            if translated || sanitized || redirected_model {
                match outbound.to_bytes() {
                    Ok(bytes) => Some(bytes),
                    Err(_) => Some(session.raw_body.clone()),
                }
            } else {
                Some(session.raw_body.clone())
            }
        } else {
            None
        };

        info!(
            trace_id = %session.trace_id,
            provider = %provider.name,
            attempt,
            model = %session.model,
            from = %from_format,
            to = %to_format,
            "dispatching upstream"
        );

        let request = UpstreamRequest {
            method: session.method,
            url,
            headers,
            body,
            // The wire stays SSE when either side expects it; Response API
            // upstreams always stream.
            is_stream: session.is_stream || to_format == WireFormat::Codex,
        };

        // The client resolves Ok only for 2xx; non-2xx envelopes and
        // transport problems both arrive as failures to rotate on.
        let response = self.state.client.send(request).await?;
        // The response speaks the provider's format regardless of what body
        // was ultimately sent.
        Ok((response, to_format))
    }

    /// Outbound headers: client headers minus hop-by-hop and auth material,
    /// with the provider credential and framing pinned on top.
    fn build_headers(
        &self,
        session: &ProxySession,
        provider: &Provider,
        upstream_format: WireFormat,
    ) -> Headers {
        let mut headers = session.headers.clone();
        header_remove(&mut headers, "content-length");
        header_remove(&mut headers, "host");

        if let Some(host) = host_of(&provider.base_url) {
            header_set(&mut headers, "Host", host);
        }
        header_set(
            &mut headers,
            "Authorization",
            format!("Bearer {}", provider.api_key),
        );
        header_set(&mut headers, "X-Api-Key", provider.api_key.clone());
        header_set(&mut headers, "Content-Type", "application/json");
        // The dispatcher re-frames bytes; compressed upstream bodies would
        // make that impossible.
        header_set(&mut headers, "Accept-Encoding", "identity");
        if upstream_format == WireFormat::Codex {
            header_set(&mut headers, "User-Agent", CODEX_OUTBOUND_USER_AGENT);
        }
        headers
    }
}

fn failure_detail(provider: &Provider, failure: &UpstreamFailure) -> UpstreamErrorDetail {
    match failure {
        UpstreamFailure::Transport { message, .. } => UpstreamErrorDetail {
            provider_id: provider.id,
            provider_name: provider.name.clone(),
            status: None,
            message: message.clone(),
            body_excerpt: String::new(),
        },
        UpstreamFailure::Http {
            status,
            headers,
            body,
        } => {
            let message = match crate::headers::header_get(headers, "retry-after") {
                Some(after) => format!("upstream returned {status} (retry-after {after})"),
                None => format!("upstream returned {status}"),
            };
            UpstreamErrorDetail {
                provider_id: provider.id,
                provider_name: provider.name.clone(),
                status: Some(*status),
                message,
                body_excerpt: UpstreamErrorDetail::excerpt_of(body),
            }
        }
    }
}

/// Response API upstreams serve exactly one path.
fn rewrite_path(path: &str, upstream_format: WireFormat) -> String {
    match upstream_format {
        WireFormat::Codex => "/v1/responses".to_string(),
        _ => path.to_string(),
    }
}

fn compose_url(base_url: &str, path: &str, query: Option<&str>) -> String {
    let base = base_url.trim_end_matches('/');
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    match query {
        Some(query) if !query.is_empty() => format!("{base}{path}?{query}"),
        _ => format!("{base}{path}"),
    }
}

fn host_of(base_url: &str) -> Option<String> {
    let rest = base_url.split_once("://").map(|(_, rest)| rest)?;
    let host = rest.split('/').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codex_path_is_rewritten_and_others_kept() {
        assert_eq!(
            rewrite_path("/v1/chat/completions", WireFormat::Codex),
            "/v1/responses"
        );
        assert_eq!(
            rewrite_path("/v1/chat/completions", WireFormat::OpenAiChat),
            "/v1/chat/completions"
        );
        assert_eq!(
            rewrite_path("/v1/messages", WireFormat::Claude),
            "/v1/messages"
        );
    }

    #[test]
    fn url_composition_handles_slashes_and_query() {
        assert_eq!(
            compose_url("https://api.example.com/", "/v1/messages", None),
            "https://api.example.com/v1/messages"
        );
        assert_eq!(
            compose_url("https://api.example.com", "v1/messages", Some("beta=true")),
            "https://api.example.com/v1/messages?beta=true"
        );
    }

    #[test]
    fn host_extraction() {
        assert_eq!(
            host_of("https://api.example.com/v1").as_deref(),
            Some("api.example.com")
        );
        assert_eq!(host_of("not a url"), None);
    }
}
