use std::collections::HashSet;
use std::time::Instant;

use bytes::Bytes;

use llmhub_protocol::{ChatRequest, WireFormat};
use llmhub_provider::{CircuitState, DecisionEntry, DecisionReason, Principal, Provider};

use crate::headers::Headers;
use crate::upstream::HttpMethod;

/// Per-request envelope. Owned by the handler that built it and carried
/// through every pipeline stage until the response finishes streaming.
#[derive(Debug)]
pub struct ProxySession {
    pub trace_id: String,
    pub original_format: WireFormat,
    /// Request model; model redirection rewrites it in place.
    pub model: String,
    pub request: ChatRequest,
    /// Body exactly as received; forwarded untouched when no stage dirtied
    /// the typed request.
    pub raw_body: Bytes,
    pub method: HttpMethod,
    pub path: String,
    pub query: Option<String>,
    pub headers: Headers,
    pub user_agent: Option<String>,
    pub principal: Principal,
    pub session_id: Option<String>,
    pub provider: Option<Provider>,
    /// Ordered diagnostics: every provider tried and why.
    pub decisions: Vec<DecisionEntry>,
    /// Providers this request must not touch again.
    pub excluded: HashSet<i64>,
    pub is_stream: bool,
    pub started_at: Instant,
}

impl ProxySession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trace_id: String,
        request: ChatRequest,
        raw_body: Bytes,
        method: HttpMethod,
        path: String,
        query: Option<String>,
        headers: Headers,
        user_agent: Option<String>,
        principal: Principal,
        session_id: Option<String>,
    ) -> Self {
        let original_format = request.format();
        let model = request.model().unwrap_or_default().to_string();
        let is_stream = request.stream();
        Self {
            trace_id,
            original_format,
            model,
            request,
            raw_body,
            method,
            path,
            query,
            headers,
            user_agent,
            principal,
            session_id,
            provider: None,
            decisions: Vec::new(),
            excluded: HashSet::new(),
            is_stream,
            started_at: Instant::now(),
        }
    }

    pub fn push_decision(
        &mut self,
        provider: &Provider,
        reason: DecisionReason,
        circuit: CircuitState,
        attempt: u32,
        error: Option<String>,
    ) {
        self.decisions.push(DecisionEntry {
            provider_id: provider.id,
            provider_name: provider.name.clone(),
            reason,
            circuit,
            attempt,
            error,
        });
    }

    /// Fold a failure into the provider's existing chain entry, so one
    /// entry tells the whole story of that provider's attempt.
    pub fn mark_failed(&mut self, provider_id: i64, circuit: CircuitState, error: String) {
        if let Some(entry) = self
            .decisions
            .iter_mut()
            .rev()
            .find(|entry| entry.provider_id == provider_id)
        {
            entry.reason = DecisionReason::Failed;
            entry.circuit = circuit;
            entry.error = Some(error);
        }
    }

    /// Rewrite the model on both the session and the typed body.
    pub fn set_model(&mut self, model: &str) {
        self.model = model.to_string();
        self.request.set_model(model);
    }
}
