//! The subscriber contract: decision hooks plus optional capability hooks,
//! dispatched by bit rather than by runtime type probing.

use async_trait::async_trait;
use bitflags::bitflags;

use crate::engine::EngineContext;
use crate::error::CrawlError;
use crate::http::{Chunk, HttpResponseHandle};
use crate::uri::CrawlUri;
use crate::verdict::Verdict;

bitflags! {
    /// Which optional hooks a subscriber wants dispatched to it. Checked
    /// once per subscriber registration rather than probed per call, so
    /// adding a capability never costs a downcast (SPEC_FULL.md §10, Design
    /// Notes on capability dispatch).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        const EXCEPTION        = 0b0001;
        const FINISHED_CRAWLING = 0b0010;
        const ENGINE_AWARE     = 0b0100;
    }
}

/// A participant in the per-URI decision passes and the crawl lifecycle.
///
/// All methods have default, inert implementations: a subscriber overrides
/// only the hooks it cares about, and advertises the optional ones through
/// [`Subscriber::capabilities`].
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Declares which of [`Subscriber::on_transport_exception`],
    /// [`Subscriber::on_http_exception`], [`Subscriber::on_finished_crawling`],
    /// and [`Subscriber::set_engine`] the engine should actually call.
    /// Default: none.
    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    /// Votes on whether `crawl_uri` should be requested at all.
    async fn should_request(&self, _crawl_uri: &CrawlUri) -> Verdict {
        Verdict::Abstain
    }

    /// Votes on whether a response's body is worth reading, given its
    /// headers.
    async fn needs_content(&self, _crawl_uri: &CrawlUri, _response: &dyn HttpResponseHandle) -> Verdict {
        Verdict::Abstain
    }

    /// Called once all body chunks have been delivered via
    /// [`Subscriber::on_chunk`], with the full accumulated body and access
    /// to the response's headers.
    async fn on_last_chunk(&self, _crawl_uri: &CrawlUri, _response: &dyn HttpResponseHandle, _body: &[u8]) {}

    /// Called for each body chunk, in order, when at least one subscriber's
    /// `needs_content` returned POSITIVE.
    async fn on_chunk(&self, _crawl_uri: &CrawlUri, _data: &[u8], _is_last: bool) {}

    /// Called when a request fails at the network level: connection reset,
    /// DNS failure, timeout on socket. Only dispatched if
    /// [`Capabilities::EXCEPTION`] is set.
    async fn on_transport_exception(&self, _crawl_uri: &CrawlUri, _error: &CrawlError) {}

    /// Called when a response surfaces a non-2xx status, with the body
    /// chunk that was in flight when the status was observed, if any. Only
    /// dispatched if [`Capabilities::EXCEPTION`] is set.
    async fn on_http_exception(&self, _crawl_uri: &CrawlUri, _error: &CrawlError, _chunk: Option<&Chunk>) {}

    /// Called once a job's queue has no unprocessed entries left. Only
    /// dispatched if [`Capabilities::FINISHED_CRAWLING`] is set.
    async fn on_finished_crawling(&self, _job_id: &str) {}

    /// Hands the subscriber a non-owning handle to the engine at
    /// registration time. Only dispatched if [`Capabilities::ENGINE_AWARE`]
    /// is set.
    async fn set_engine(&self, _engine: EngineContext) {}
}

/// Votes POSITIVE on every `should_request` and `needs_content` call: the
/// permissive baseline for a job with no other policy subscriber
/// (SPEC_FULL.md §11, "AcceptAllSubscriber").
pub struct AcceptAllSubscriber;

#[async_trait]
impl Subscriber for AcceptAllSubscriber {
    async fn should_request(&self, _crawl_uri: &CrawlUri) -> Verdict {
        Verdict::Positive
    }

    async fn needs_content(&self, _crawl_uri: &CrawlUri, _response: &dyn HttpResponseHandle) -> Verdict {
        Verdict::Positive
    }
}

/// A default-allow, tag-driven deny policy: votes NEGATIVE on
/// `should_request` for any `CrawlUri` already carrying one of its
/// configured deny tags, and POSITIVE otherwise. Because the engine
/// aggregates `shouldRequest` verdicts by "any POSITIVE ⇒ proceed", this
/// subscriber is meant to stand alone as a job's request policy rather than
/// alongside [`AcceptAllSubscriber`], whose unconditional POSITIVE would
/// override any tag-based denial (SPEC_FULL.md §11, "TagDenySubscriber").
pub struct TagDenySubscriber {
    deny_tags: Vec<String>,
}

impl TagDenySubscriber {
    pub fn new(deny_tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            deny_tags: deny_tags.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Subscriber for TagDenySubscriber {
    async fn should_request(&self, crawl_uri: &CrawlUri) -> Verdict {
        if self.deny_tags.iter().any(|tag| crawl_uri.has_tag(tag)) {
            Verdict::Negative
        } else {
            Verdict::Positive
        }
    }
}
