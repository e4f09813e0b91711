use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::post;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use llmhub_core::classify::parse_request;
use llmhub_core::{
    AppState, ClientResponse, Forwarder, HttpMethod, ProxySession, RelayError, dispatch_response,
};
use llmhub_protocol::{ChatRequest, WireFormat};

const SSE_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const SSE_HEARTBEAT_FRAME: &[u8] = b": keep-alive\n\n";
const REQUEST_ID_HEADER: &str = "x-llmhub-request-id";

#[derive(Clone)]
pub struct ProxyState {
    pub app: Arc<AppState>,
}

/// Downstream API key, extracted and stripped before anything else runs.
#[derive(Clone)]
struct DownstreamKey(Option<String>);

pub fn proxy_router(app: Arc<AppState>) -> Router {
    let state = ProxyState { app };

    Router::new()
        .route("/v1/chat/completions", post(relay_handler))
        .route("/v1/responses", post(relay_handler))
        .route("/v1/messages", post(relay_handler))
        // Gemini CLI generateContent / streamGenerateContent verbs arrive as
        // path suffixes under the model name.
        .route("/v1/models/{*rest}", post(relay_handler))
        .route("/v1beta/models/{*rest}", post(relay_handler))
        .layer(middleware::from_fn(strip_auth))
        .with_state(state)
}

/// Pull the caller's key out of whichever header its client family uses,
/// then remove all auth material so it can never leak upstream or into
/// logs.
async fn strip_auth(
    mut req: axum::http::Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let key = extract_user_key(req.headers(), req.uri().query());
    strip_auth_headers(req.headers_mut());
    req.extensions_mut().insert(DownstreamKey(key));
    Ok(next.run(req).await)
}

async fn relay_handler(
    State(state): State<ProxyState>,
    axum::extract::Extension(key): axum::extract::Extension<DownstreamKey>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let trace_id = uuid::Uuid::new_v4().to_string();

    // Format detection first: every later refusal is rendered in the
    // caller's own format.
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(err) => {
            let format = detect_or_default(&body);
            return error_response(err, format, &trace_id);
        }
    };
    let format = request.format();

    let principal = match state.app.auth.authenticate(key.0.as_deref()).await {
        Ok(principal) => principal,
        Err(err) => {
            return error_response(
                RelayError::Unauthorized(err.to_string()),
                format,
                &trace_id,
            );
        }
    };

    if let Err(word) = state.app.words.check(&String::from_utf8_lossy(&body)) {
        return error_response(RelayError::Blocked(word), format, &trace_id);
    }

    let model = request.model().unwrap_or_default().to_string();
    if let Err(err) = state.app.check_rate_limits(&model).await {
        return error_response(err, format, &trace_id);
    }

    let session_id = extract_session_id(&headers, &request);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let stream_route = uri.path().contains(":streamGenerateContent");

    let mut session = ProxySession::new(
        trace_id.clone(),
        request,
        body,
        HttpMethod::parse(method.as_str()).unwrap_or(HttpMethod::Post),
        uri.path().to_string(),
        uri.query().map(|query| query.to_string()),
        headers_to_vec(&headers),
        user_agent,
        principal,
        session_id,
    );
    // The CLI envelope has no stream flag; the route verb decides.
    if format == WireFormat::GeminiCli {
        session.is_stream = stream_route;
    } else if stream_route {
        session.is_stream = true;
    }

    info!(
        trace_id = %trace_id,
        format = %format,
        model = %session.model,
        is_stream = session.is_stream,
        path = %session.path,
        "downstream request accepted"
    );

    let forwarder = Forwarder::new(state.app.clone());
    let outcome = match forwarder.forward(&mut session).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(
                trace_id = %trace_id,
                attempts = session.decisions.len(),
                error = %err,
                "request failed"
            );
            return error_response(err, format, &trace_id);
        }
    };

    match dispatch_response(state.app.clone(), &session, outcome).await {
        Ok(ClientResponse::Json {
            status,
            content_type,
            body,
        }) => {
            let mut resp = Response::new(Body::from(body));
            *resp.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            set_header(&mut resp, header::CONTENT_TYPE.as_str(), &content_type);
            set_header(&mut resp, REQUEST_ID_HEADER, &trace_id);
            resp
        }
        Ok(ClientResponse::Stream {
            status,
            content_type,
            body,
        }) => stream_response(status, content_type, body, &trace_id),
        Err(err) => error_response(err, format, &trace_id),
    }
}

/// Bridge the dispatcher's byte channel onto the HTTP response, inserting a
/// keep-alive comment whenever the upstream goes quiet.
fn stream_response(
    status: u16,
    content_type: &'static str,
    mut body: tokio::sync::mpsc::Receiver<Bytes>,
    trace_id: &str,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        loop {
            let next = tokio::time::timeout(SSE_HEARTBEAT_INTERVAL, body.recv()).await;
            match next {
                Ok(Some(chunk)) => {
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    if tx.send(Bytes::from_static(SSE_HEARTBEAT_FRAME)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let mut resp = Response::new(Body::from_stream(stream));
    *resp.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    set_header(&mut resp, header::CONTENT_TYPE.as_str(), content_type);
    set_header(&mut resp, header::CACHE_CONTROL.as_str(), "no-cache");
    set_header(&mut resp, REQUEST_ID_HEADER, trace_id);
    resp
}

fn error_response(err: RelayError, format: WireFormat, trace_id: &str) -> Response {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut resp = Response::new(Body::from(err.envelope(format)));
    *resp.status_mut() = status;
    set_header(&mut resp, header::CONTENT_TYPE.as_str(), "application/json");
    set_header(&mut resp, REQUEST_ID_HEADER, trace_id);
    resp
}

fn set_header(resp: &mut Response, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        axum::http::HeaderName::try_from(name.to_string()),
        HeaderValue::from_str(value),
    ) {
        resp.headers_mut().insert(name, value);
    }
}

fn detect_or_default(body: &Bytes) -> WireFormat {
    serde_json::from_slice::<serde_json::Value>(body)
        .map(|value| llmhub_core::detect_format(&value))
        .unwrap_or(WireFormat::Claude)
}

fn headers_to_vec(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn strip_auth_headers(headers: &mut HeaderMap) {
    headers.remove(header::AUTHORIZATION);
    headers.remove("x-api-key");
    headers.remove("x-goog-api-key");
}

fn extract_user_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    // 1) Authorization: Bearer <token>
    if let Some(value) = headers.get(header::AUTHORIZATION)
        && let Ok(value) = value.to_str()
    {
        let value = value.trim();
        let prefix = "Bearer ";
        if value.len() > prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let token = value[prefix.len()..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    // 2) x-api-key (claude clients)
    if let Some(value) = headers.get("x-api-key")
        && let Ok(value) = value.to_str()
    {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    // 3) x-goog-api-key (gemini clients)
    if let Some(value) = headers.get("x-goog-api-key")
        && let Ok(value) = value.to_str()
    {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    // 4) ?key=<token> (gemini CLI fallback)
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("key=")
                && !value.is_empty()
            {
                return Some(value.to_string());
            }
        }
    }

    None
}

/// The sticky-session key: an explicit header wins, then whatever the body
/// carries for its format.
fn extract_session_id(headers: &HeaderMap, request: &ChatRequest) -> Option<String> {
    for name in ["session-id", "x-session-id"] {
        if let Some(value) = headers.get(name)
            && let Ok(value) = value.to_str()
            && !value.trim().is_empty()
        {
            return Some(value.trim().to_string());
        }
    }
    match request {
        ChatRequest::OpenAiChat(req) => req.session_id.clone(),
        ChatRequest::Codex(req) => req.prompt_cache_key.clone(),
        ChatRequest::Claude(req) => req
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.user_id.clone()),
        ChatRequest::GeminiCli(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_key_wins_over_other_sources() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tk-1"));
        headers.insert("x-api-key", HeaderValue::from_static("tk-2"));
        assert_eq!(extract_user_key(&headers, None).as_deref(), Some("tk-1"));
    }

    #[test]
    fn gemini_query_key_is_recognized() {
        let headers = HeaderMap::new();
        assert_eq!(
            extract_user_key(&headers, Some("alt=sse&key=tk-9")).as_deref(),
            Some("tk-9")
        );
    }

    #[test]
    fn auth_material_is_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer x"));
        headers.insert("x-api-key", HeaderValue::from_static("y"));
        headers.insert("x-goog-api-key", HeaderValue::from_static("z"));
        strip_auth_headers(&mut headers);
        assert!(headers.get(header::AUTHORIZATION).is_none());
        assert!(headers.get("x-api-key").is_none());
        assert!(headers.get("x-goog-api-key").is_none());
    }
}
