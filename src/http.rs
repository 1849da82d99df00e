//! The HTTP client seam: traits so the engine never depends on `reqwest`
//! directly, plus the default `reqwest`-backed implementation.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use crate::error::CrawlError;

/// One body chunk, with a lookahead-derived `is_last` flag (DESIGN.md,
/// "Chunk isLast semantics").
#[derive(Debug, Clone)]
pub struct Chunk {
    pub data: Bytes,
    pub is_last: bool,
}

/// A started response: headers are already available; the body is read
/// chunk by chunk through `next_chunk`.
#[async_trait]
pub trait HttpResponseHandle: Send + Sync {
    fn status(&self) -> u16;

    fn header(&self, name: &str) -> Option<String>;

    fn content_type(&self) -> Option<mime::Mime> {
        self.header("content-type").and_then(|v| v.parse().ok())
    }

    /// Fails with [`CrawlError::Http`] if the status is not 2xx. Does not
    /// consume the handle, so it can be called before deciding to read the
    /// body.
    fn error_for_status(&self) -> Result<(), CrawlError>;

    /// Pulls the next body chunk, or `None` once the body is exhausted.
    async fn next_chunk(&mut self) -> Result<Option<Chunk>, CrawlError>;

    /// Drops the handle without reading the remaining body. Implementations
    /// that hold a live connection should release it promptly.
    fn cancel(self: Box<Self>);
}

/// Issues GET requests and returns response handles.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, uri: &str) -> Result<Box<dyn HttpResponseHandle>, CrawlError>;
}

/// The default [`HttpClient`], backed by a shared `reqwest::Client`.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Builds a client carrying a fixed `User-Agent` and per-request timeout,
    /// mirroring the teacher's `Client::builder().user_agent(...).build()`
    /// (see `examples/aichat-bot-crawly/src/lib.rs`, `Crawler::from_config`).
    pub fn build(user_agent: &str, timeout: std::time::Duration) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| CrawlError::Unknown(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::new(client))
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::build(crate::config::DEFAULT_USER_AGENT, crate::config::DEFAULT_REQUEST_TIMEOUT)
            .unwrap_or_else(|_| Self::new(reqwest::Client::new()))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, uri: &str) -> Result<Box<dyn HttpResponseHandle>, CrawlError> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| CrawlError::transport(uri, e))?;
        Ok(Box::new(ReqwestResponseHandle::new(uri.to_string(), response)))
    }
}

/// Wraps a `reqwest::Response`, priming one chunk ahead so `next_chunk` can
/// tag the last real chunk with `is_last = true` instead of only learning
/// "no more data" on the following poll.
struct ReqwestResponseHandle {
    uri: String,
    status: reqwest::StatusCode,
    headers: reqwest::header::HeaderMap,
    stream: std::sync::Mutex<futures::stream::BoxStream<'static, reqwest::Result<Bytes>>>,
    primed: Option<Bytes>,
    primed_loaded: bool,
}

impl ReqwestResponseHandle {
    fn new(uri: String, response: reqwest::Response) -> Self {
        Self {
            uri,
            status: response.status(),
            headers: response.headers().clone(),
            stream: std::sync::Mutex::new(response.bytes_stream().boxed()),
            primed: None,
            primed_loaded: false,
        }
    }

    async fn prime(&mut self) -> Result<(), CrawlError> {
        if !self.primed_loaded {
            let next = self.stream.get_mut().unwrap().next().await;
            self.primed = match next {
                Some(chunk) => Some(chunk.map_err(|e| CrawlError::transport(&self.uri, e))?),
                None => None,
            };
            self.primed_loaded = true;
        }
        Ok(())
    }
}

#[async_trait]
impl HttpResponseHandle for ReqwestResponseHandle {
    fn status(&self) -> u16 {
        self.status.as_u16()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    }

    fn error_for_status(&self) -> Result<(), CrawlError> {
        if self.status.is_success() {
            Ok(())
        } else {
            Err(CrawlError::http(self.uri.clone(), self.status.as_u16(), None))
        }
    }

    async fn next_chunk(&mut self) -> Result<Option<Chunk>, CrawlError> {
        self.prime().await?;
        let current = match self.primed.take() {
            Some(data) => data,
            None => return Ok(None),
        };
        self.primed_loaded = false;
        self.prime().await?;
        Ok(Some(Chunk {
            data: current,
            is_last: self.primed.is_none(),
        }))
    }

    fn cancel(self: Box<Self>) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn reads_body_and_tags_last_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello world"))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::default();
        let mut handle = client.get(&format!("{}/ok", server.uri())).await.unwrap();
        assert_eq!(handle.status(), 200);
        assert!(handle.error_for_status().is_ok());

        let mut collected = Vec::new();
        let mut last_seen = false;
        while let Some(chunk) = handle.next_chunk().await.unwrap() {
            last_seen = chunk.is_last;
            collected.extend_from_slice(&chunk.data);
        }
        assert!(last_seen);
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn non_2xx_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::default();
        let handle = client.get(&format!("{}/missing", server.uri())).await.unwrap();
        let err = handle.error_for_status().unwrap_err();
        assert!(err.is_http());
    }
}
