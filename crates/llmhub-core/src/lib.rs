pub mod classify;
pub mod dispatch;
pub mod error;
pub mod forward;
pub mod headers;
pub mod session;
pub mod state;
pub mod upstream;
pub mod wire;

pub use classify::detect_format;
pub use dispatch::{ClientResponse, dispatch_response};
pub use error::{RelayError, UpstreamErrorDetail};
pub use forward::{ForwardOutcome, Forwarder, MAX_RETRY_ATTEMPTS};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use session::ProxySession;
pub use state::AppState;
pub use upstream::{
    HttpMethod, UpstreamBody, UpstreamClient, UpstreamClientConfig, UpstreamFailure,
    UpstreamRequest, UpstreamResponse, WreqUpstreamClient,
};
