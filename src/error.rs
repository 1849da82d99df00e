//! The taxonomy of things that can go wrong while building or running an [`Engine`](crate::engine::Engine).
//!
//! Construction failures are fatal, per-request failures are routed to a
//! subscriber's [`on_transport_exception`](crate::subscriber::Subscriber::on_transport_exception) /
//! [`on_http_exception`](crate::subscriber::Subscriber::on_http_exception)
//! hooks, and [`CrawlError::Unknown`]/[`CrawlError::Queue`] abort the crawl.

use thiserror::Error;

/// Errors surfaced by the crawl engine and its collaborators.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// `Engine::create` was called with an empty `BaseUriCollection`.
    #[error("cannot create a job with no base URIs")]
    EmptyBaseUris,

    /// `Engine::resume` was called with a job id the queue doesn't recognize.
    #[error("job id {0:?} is not valid")]
    InvalidJobId(String),

    /// A string failed to parse or normalize as a URI.
    #[error("invalid URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// A `CrawlUri` was constructed with an inconsistent level/parent pair.
    #[error("invalid crawl URI: {0}")]
    InvalidCrawlUri(String),

    /// A network-level failure: DNS, connection reset, timeout on socket.
    #[error("transport error requesting {uri}: {source}")]
    Transport {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    /// A non-2xx or otherwise malformed HTTP response.
    #[error("http error requesting {uri}: status {status}")]
    Http {
        uri: String,
        status: u16,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The queue backend failed to read or write state.
    #[error("queue backend error: {0}")]
    Queue(String),

    /// A programming error that escaped into the engine. Fail fast.
    #[error("unexpected internal error: {0}")]
    Unknown(String),
}

impl CrawlError {
    /// True for failures that should be routed to `onTransportException`.
    pub fn is_transport(&self) -> bool {
        matches!(self, CrawlError::Transport { .. })
    }

    /// True for failures that should be routed to `onHttpException`.
    pub fn is_http(&self) -> bool {
        matches!(self, CrawlError::Http { .. })
    }

    pub(crate) fn transport(uri: impl Into<String>, source: reqwest::Error) -> Self {
        CrawlError::Transport {
            uri: uri.into(),
            source,
        }
    }

    pub(crate) fn http(uri: impl Into<String>, status: u16, source: Option<reqwest::Error>) -> Self {
        CrawlError::Http {
            uri: uri.into(),
            status,
            source,
        }
    }
}
