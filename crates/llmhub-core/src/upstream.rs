use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use futures_util::StreamExt;
use wreq::{Client, Method, Proxy};

use crate::headers::Headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn parse(method: &str) -> Option<Self> {
        let method = method.to_ascii_uppercase();
        match method.as_str() {
            "GET" => Some(HttpMethod::Get),
            "HEAD" => Some(HttpMethod::Head),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }

    pub fn takes_body(&self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

pub type ByteStream = tokio::sync::mpsc::Receiver<Bytes>;

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

/// A 2xx upstream exchange; anything else surfaces as `UpstreamFailure`.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

/// Why an upstream exchange produced nothing usable. Shaped for the
/// breaker and the decision chain: HTTP errors keep their envelope, and
/// transport errors are labelled with the phase that died rather than
/// re-derived from error strings after the fact.
#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    /// The upstream answered outside 2xx; body fully read.
    Http {
        status: u16,
        headers: Headers,
        body: Bytes,
    },
    /// No usable HTTP response came back at all.
    Transport { timed_out: bool, message: String },
}

impl UpstreamFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamFailure::Http { status, .. } => Some(*status),
            UpstreamFailure::Transport { .. } => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            UpstreamFailure::Http { status, .. } => format!("upstream returned {status}"),
            UpstreamFailure::Transport { message, .. } => message.clone(),
        }
    }

    fn transport(phase: &'static str, err: &wreq::Error) -> Self {
        UpstreamFailure::Transport {
            timed_out: err.is_timeout(),
            message: format!("{phase}: {err}"),
        }
    }
}

/// Contract: resolves `Ok` only for 2xx responses, so every caller-visible
/// error is something the forwarder can rotate providers on.
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamFailure>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(86400),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl UpstreamClientConfig {
    fn client_for(&self, proxy: Option<&str>) -> Result<Client, wreq::Error> {
        let builder = Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .read_timeout(self.stream_idle_timeout);
        match proxy {
            Some(proxy) => builder.proxy(Proxy::all(proxy)?).build(),
            None => builder.build(),
        }
    }
}

/// The wreq client paired with the proxy value it was built for.
struct ClientSlot {
    proxy: Option<String>,
    client: Client,
}

/// wreq-backed client. A single slot caches the built client; whenever the
/// resolver reports a different outbound proxy the slot is rebuilt and
/// swapped, so proxy changes apply without restarts and the hot path never
/// takes a lock.
pub struct WreqUpstreamClient {
    config: UpstreamClientConfig,
    resolve_proxy: Arc<dyn Fn() -> Option<String> + Send + Sync>,
    slot: ArcSwap<ClientSlot>,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let proxy = config.proxy.clone();
        Self::with_proxy_resolver(config, move || proxy.clone())
    }

    pub fn with_proxy_resolver<F>(
        config: UpstreamClientConfig,
        resolve_proxy: F,
    ) -> Result<Self, wreq::Error>
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        let resolve_proxy: Arc<dyn Fn() -> Option<String> + Send + Sync> = Arc::new(resolve_proxy);
        let proxy = configured_proxy(resolve_proxy());
        let client = config.client_for(proxy.as_deref())?;
        Ok(Self {
            config,
            resolve_proxy,
            slot: ArcSwap::from_pointee(ClientSlot { proxy, client }),
        })
    }

    fn client(&self) -> Result<Client, UpstreamFailure> {
        let wanted = configured_proxy((self.resolve_proxy)());
        let slot = self.slot.load();
        if slot.proxy == wanted {
            return Ok(slot.client.clone());
        }
        let client = self
            .config
            .client_for(wanted.as_deref())
            .map_err(|err| UpstreamFailure::transport("proxy reconfiguration", &err))?;
        self.slot.store(Arc::new(ClientSlot {
            proxy: wanted,
            client: client.clone(),
        }));
        Ok(client)
    }

    async fn exchange(&self, req: UpstreamRequest) -> Result<UpstreamResponse, UpstreamFailure> {
        let client = self.client()?;
        let mut call = client.request(req.method.into(), &req.url);
        for (name, value) in &req.headers {
            call = call.header(name, value);
        }
        if let Some(body) = req.body {
            call = call.body(body);
        }

        let resp = call
            .send()
            .await
            .map_err(|err| UpstreamFailure::transport("request", &err))?;

        let status = resp.status().as_u16();
        let headers: Headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        if !(200..300).contains(&status) {
            // The error envelope matters more than a read hiccup here; the
            // failure is already established.
            let body = resp.bytes().await.unwrap_or_default();
            return Err(UpstreamFailure::Http {
                status,
                headers,
                body,
            });
        }

        let body = if req.is_stream {
            UpstreamBody::Stream(spawn_pump(resp, self.config.stream_idle_timeout))
        } else {
            let bytes = resp
                .bytes()
                .await
                .map_err(|err| UpstreamFailure::transport("read body", &err))?;
            UpstreamBody::Bytes(bytes)
        };

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamFailure>> + Send + 'a>> {
        Box::pin(self.exchange(req))
    }
}

fn configured_proxy(proxy: Option<String>) -> Option<String> {
    match proxy {
        Some(proxy) if !proxy.trim().is_empty() => Some(proxy.trim().to_string()),
        _ => None,
    }
}

/// Copies upstream chunks into a channel until EOF, a transfer error, an
/// idle gap longer than the configured timeout, or the receiver hanging up.
fn spawn_pump(resp: wreq::Response, idle: Duration) -> ByteStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut chunks = resp.bytes_stream();
        while let Ok(Some(Ok(chunk))) = tokio::time::timeout(idle, chunks.next()).await {
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });
    rx
}
