//! `crawlway` is a polite, extensible crawl engine. It consumes a set of
//! base URIs and, under configurable concurrency and depth limits, streams
//! HTTP responses through a chain of pluggable subscribers that decide
//! whether to request a URI, whether to read its body, and how to react to
//! what comes back — including discovering further URIs from links,
//! sitemaps, and `robots.txt`.
//!
//! The engine itself holds no crawling policy: a job with no subscribers
//! requests nothing. [`AcceptAllSubscriber`] is the permissive baseline;
//! [`LinkDiscoverySubscriber`] follows `<a href>` links in HTML responses;
//! [`RobotsSubscriber`] adds `robots.txt`/sitemap/meta-robots awareness;
//! [`TagDenySubscriber`] turns tags like `disallowed-robots-txt` into an
//! actual skip decision.

mod base_uri;
mod config;
mod engine;
mod error;
mod http;
mod links;
mod logging;
mod queue;
mod robots;
mod subscriber;
mod uri;
mod verdict;

pub use base_uri::BaseUriCollection;
pub use config::EngineConfig;
pub use engine::{Engine, EngineContext};
pub use error::CrawlError;
pub use http::{Chunk, HttpClient, HttpResponseHandle, ReqwestHttpClient};
pub use links::LinkDiscoverySubscriber;
pub use logging::{LogContext, LogLevel, Logger, TracingLogger};
pub use queue::{FileQueue, InMemoryQueue, Queue};
pub use robots::RobotsSubscriber;
pub use subscriber::{AcceptAllSubscriber, Capabilities, Subscriber, TagDenySubscriber};
pub use uri::CrawlUri;
pub use verdict::Verdict;
