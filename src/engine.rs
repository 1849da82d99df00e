//! The dispatcher: turns a durable queue into a bounded stream of concurrent
//! requests, multiplexes their responses chunk by chunk, and arbitrates
//! every decision through the registered subscribers.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::time::sleep;

use crate::base_uri::BaseUriCollection;
use crate::config::EngineConfig;
use crate::error::CrawlError;
use crate::http::{Chunk, HttpClient, HttpResponseHandle, ReqwestHttpClient};
use crate::logging::{LogContext, LogLevel, Logger, TracingLogger};
use crate::queue::{child_of, Queue};
use crate::subscriber::{Capabilities, Subscriber};
use crate::uri::CrawlUri;
use crate::verdict::{DecisionCache, Hook, Verdict};

/// A cheap, cloneable, non-owning handle to a running [`Engine`], handed to
/// engine-aware subscribers instead of a reference to the Engine itself
/// (DESIGN.md, "Cyclic references" / SPEC_FULL.md §9).
#[derive(Clone)]
pub struct EngineContext {
    queue: Arc<dyn Queue>,
    client: Arc<dyn HttpClient>,
    logger: Arc<dyn Logger>,
    job_id: String,
    config: EngineConfig,
}

impl EngineContext {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    pub fn http_client(&self) -> &Arc<dyn HttpClient> {
        &self.client
    }

    /// Returns the existing CrawlUri for `uri`, or inserts a new child of
    /// `found_on` and returns that. At-most-one CrawlUri per normalized URI
    /// per job (spec.md §4.1 `AddUriToQueue`).
    pub async fn add_uri_to_queue(
        &self,
        uri: &str,
        found_on: &CrawlUri,
        processed: bool,
    ) -> Result<CrawlUri, CrawlError> {
        let candidate = child_of(uri, found_on, processed)?;
        self.queue.get_or_insert(&self.job_id, candidate).await
    }

    pub async fn get_crawl_uri(&self, uri: &str) -> Option<CrawlUri> {
        self.queue.get(&self.job_id, uri).await
    }
}

/// An in-flight request or response-body read being driven by the
/// dispatcher's multiplexed event source. Unifies "issuing the GET" and
/// "reading the next chunk" into a single `FuturesUnordered` stream so
/// connection establishment is genuinely concurrent even though
/// `reqwest::Response::send()` only resolves once headers arrive
/// (DESIGN.md, "'Issuing a GET' concurrency").
enum PendingOutcome {
    Connected {
        crawl_uri: CrawlUri,
        result: Result<Box<dyn HttpResponseHandle>, CrawlError>,
    },
    Chunk {
        crawl_uri: CrawlUri,
        response: Box<dyn HttpResponseHandle>,
        result: Result<Option<Chunk>, CrawlError>,
        is_first: bool,
    },
}

/// Per-response bookkeeping the stream phase needs across chunk events.
struct RunningResponse {
    content_wanted: bool,
    body: Vec<u8>,
}

/// The core dispatcher. Owns the queue handle, the HTTP client, the
/// subscriber list, and the job being processed.
pub struct Engine {
    queue: Arc<dyn Queue>,
    client: Arc<dyn HttpClient>,
    client_is_default: bool,
    logger: Arc<dyn Logger>,
    config: EngineConfig,
    subscribers: Vec<Arc<dyn Subscriber>>,
    job_id: String,
    requests_sent: usize,
}

impl Engine {
    /// Creates a new job from `base_uris` and an engine to drive it.
    /// Fails with [`CrawlError::EmptyBaseUris`] when the collection is empty.
    pub async fn create(
        base_uris: BaseUriCollection,
        queue: Arc<dyn Queue>,
        client: Option<Arc<dyn HttpClient>>,
    ) -> Result<Self, CrawlError> {
        if base_uris.is_empty() {
            return Err(CrawlError::EmptyBaseUris);
        }
        let job_id = queue.create_job_id(base_uris).await?;
        Ok(Self::new(job_id, queue, client))
    }

    /// Resumes an existing job. Fails with [`CrawlError::InvalidJobId`] when
    /// the queue does not recognize `job_id`.
    pub async fn resume(
        job_id: impl Into<String>,
        queue: Arc<dyn Queue>,
        client: Option<Arc<dyn HttpClient>>,
    ) -> Result<Self, CrawlError> {
        let job_id = job_id.into();
        if !queue.is_job_id_valid(&job_id).await {
            return Err(CrawlError::InvalidJobId(job_id));
        }
        Ok(Self::new(job_id, queue, client))
    }

    fn new(job_id: String, queue: Arc<dyn Queue>, client: Option<Arc<dyn HttpClient>>) -> Self {
        let client_is_default = client.is_none();
        Self {
            queue,
            client: client.unwrap_or_else(|| Arc::new(ReqwestHttpClient::default())),
            client_is_default,
            logger: Arc::new(TracingLogger),
            config: EngineConfig::default(),
            subscribers: Vec::new(),
            job_id,
            requests_sent: 0,
        }
    }

    /// Applies `config`. When no explicit [`HttpClient`] was supplied at
    /// construction, the default `reqwest`-backed client is rebuilt so the
    /// configured user agent and timeout actually reach outgoing requests
    /// (spec.md §4.1, "issue a GET with the configured user agent").
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        if self.client_is_default {
            if let Ok(client) = ReqwestHttpClient::build(config.user_agent(), config.request_timeout()) {
                self.client = Arc::new(client);
            }
        }
        self.config = config;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn requests_sent(&self) -> usize {
        self.requests_sent
    }

    /// Registers a subscriber. Registration order is the observable hook
    /// dispatch order. If the subscriber declares [`Capabilities::ENGINE_AWARE`],
    /// it is immediately handed a non-owning [`EngineContext`].
    pub async fn add_subscriber(&mut self, subscriber: Arc<dyn Subscriber>) {
        if subscriber.capabilities().contains(Capabilities::ENGINE_AWARE) {
            subscriber.set_engine(self.context()).await;
        }
        self.subscribers.push(subscriber);
    }

    fn context(&self) -> EngineContext {
        EngineContext {
            queue: self.queue.clone(),
            client: self.client.clone(),
            logger: self.logger.clone(),
            job_id: self.job_id.clone(),
            config: self.config.clone(),
        }
    }

    fn log(&self, level: LogLevel, message: &str, source: &'static str) {
        self.logger.log(level, message, &LogContext::new(source));
    }

    /// Runs the main loop to completion: fills up to `concurrency`,
    /// multiplexes streamed responses, dispatches decision hooks, and
    /// finally calls `on_finished_crawling` on every capable subscriber
    /// exactly once.
    pub async fn crawl(&mut self) -> Result<(), CrawlError> {
        let mut decisions = DecisionCache::default();
        let mut running: HashSet<String> = HashSet::new();
        let mut bookkeeping: std::collections::HashMap<String, RunningResponse> = std::collections::HashMap::new();
        let mut events: FuturesUnordered<std::pin::Pin<Box<dyn std::future::Future<Output = PendingOutcome> + Send>>> =
            FuturesUnordered::new();

        loop {
            // Prepare phase: fill up to concurrency.
            while running.len() < self.config.max_concurrent_requests()
                && !self.max_requests_reached()
            {
                let Some(mut candidate) = self.queue.get_next(&self.job_id).await else {
                    break;
                };
                if candidate.processed() {
                    continue;
                }
                candidate.mark_processed();
                self.queue.add(&self.job_id, candidate.clone()).await?;

                if candidate.scheme() != "http" && candidate.scheme() != "https" {
                    self.log(
                        LogLevel::Debug,
                        &candidate.create_log_message("skipping non-http(s) scheme"),
                        "engine",
                    );
                    continue;
                }
                let max_level = self.config.max_level();
                if max_level != 0 && candidate.level() > max_level {
                    self.log(
                        LogLevel::Debug,
                        &candidate.create_log_message("depth limit reached"),
                        "engine",
                    );
                    continue;
                }

                let mut any_positive = false;
                for (index, subscriber) in self.subscribers.iter().enumerate() {
                    let verdict = subscriber.should_request(&candidate).await;
                    decisions.record(Hook::ShouldRequest, candidate.uri(), index, verdict);
                    if verdict.is_positive() {
                        any_positive = true;
                    }
                }
                if !any_positive {
                    self.log(
                        LogLevel::Debug,
                        &candidate.create_log_message("no subscriber voted to request"),
                        "engine",
                    );
                    continue;
                }

                if !self.config.crawl_delay().is_zero() {
                    sleep(self.config.crawl_delay()).await;
                }

                running.insert(candidate.uri().to_string());
                self.requests_sent += 1;
                let client = self.client.clone();
                let uri = candidate.uri().to_string();
                events.push(Box::pin(async move {
                    let result = client.get(&uri).await;
                    PendingOutcome::Connected { crawl_uri: candidate, result }
                }));
            }

            if running.is_empty() && events.is_empty() {
                break;
            }

            let Some(outcome) = events.next().await else {
                break;
            };

            match outcome {
                PendingOutcome::Connected { crawl_uri, result } => match result {
                    Ok(response) => {
                        events.push(Box::pin(next_chunk_future(crawl_uri, response, true)));
                    }
                    Err(error) => {
                        running.remove(crawl_uri.uri());
                        self.handle_transport_exception(&crawl_uri, &error).await?;
                    }
                },
                PendingOutcome::Chunk {
                    crawl_uri,
                    mut response,
                    result,
                    is_first,
                } => {
                    if is_first {
                        if let Err(error) = response.error_for_status() {
                            running.remove(crawl_uri.uri());
                            // A chunk may have already been read while headers were
                            // materializing (DESIGN.md, one-ahead chunk lookahead). If
                            // reading it itself failed with a transport error, that
                            // supersedes the HTTP error (spec.md §4.3: "if
                            // marking-finished itself throws a transport exception,
                            // recurse into this routine with the new exception").
                            match result {
                                Ok(chunk) => {
                                    self.handle_http_exception(&crawl_uri, &error, chunk.as_ref()).await?;
                                }
                                Err(transport_error) => {
                                    self.handle_transport_exception(&crawl_uri, &transport_error).await?;
                                }
                            }
                            continue;
                        }
                        let mut any_positive = false;
                        for (index, subscriber) in self.subscribers.iter().enumerate() {
                            let should_request_verdict = decisions.get(Hook::ShouldRequest, crawl_uri.uri(), index);
                            if should_request_verdict.is_negative() {
                                continue;
                            }
                            let verdict = subscriber.needs_content(&crawl_uri, response.as_ref()).await;
                            decisions.record(Hook::NeedsContent, crawl_uri.uri(), index, verdict);
                            if verdict.is_positive() {
                                any_positive = true;
                            }
                        }
                        bookkeeping.insert(
                            crawl_uri.uri().to_string(),
                            RunningResponse {
                                content_wanted: any_positive,
                                body: Vec::new(),
                            },
                        );
                        if !any_positive {
                            self.log(
                                LogLevel::Debug,
                                &crawl_uri.create_log_message("no subscriber needs content, cancelling"),
                                "engine",
                            );
                            running.remove(crawl_uri.uri());
                            bookkeeping.remove(crawl_uri.uri());
                            response.cancel();
                            continue;
                        }
                    }

                    match result {
                        Ok(Some(chunk)) => {
                            let wants_content = bookkeeping
                                .get(crawl_uri.uri())
                                .map(|r| r.content_wanted)
                                .unwrap_or(true);
                            if wants_content {
                                for (index, subscriber) in self.subscribers.iter().enumerate() {
                                    let needs_content_verdict =
                                        decisions.get(Hook::NeedsContent, crawl_uri.uri(), index);
                                    if needs_content_verdict.is_negative() {
                                        continue;
                                    }
                                    subscriber.on_chunk(&crawl_uri, &chunk.data, chunk.is_last).await;
                                }
                                if let Some(running_response) = bookkeeping.get_mut(crawl_uri.uri()) {
                                    running_response.body.extend_from_slice(&chunk.data);
                                }
                            }
                            if chunk.is_last {
                                let body = bookkeeping
                                    .remove(crawl_uri.uri())
                                    .map(|r| r.body)
                                    .unwrap_or_default();
                                for (index, subscriber) in self.subscribers.iter().enumerate() {
                                    let needs_content_verdict =
                                        decisions.get(Hook::NeedsContent, crawl_uri.uri(), index);
                                    if needs_content_verdict.is_negative() {
                                        continue;
                                    }
                                    subscriber.on_last_chunk(&crawl_uri, response.as_ref(), &body).await;
                                }
                                running.remove(crawl_uri.uri());
                                self.queue.add(&self.job_id, crawl_uri).await?;
                            } else {
                                events.push(Box::pin(next_chunk_future(crawl_uri, response, false)));
                            }
                        }
                        Ok(None) => {
                            let body = bookkeeping
                                .remove(crawl_uri.uri())
                                .map(|r| r.body)
                                .unwrap_or_default();
                            for (index, subscriber) in self.subscribers.iter().enumerate() {
                                let needs_content_verdict = decisions.get(Hook::NeedsContent, crawl_uri.uri(), index);
                                if needs_content_verdict.is_negative() {
                                    continue;
                                }
                                subscriber.on_last_chunk(&crawl_uri, response.as_ref(), &body).await;
                            }
                            running.remove(crawl_uri.uri());
                            self.queue.add(&self.job_id, crawl_uri).await?;
                        }
                        Err(error) => {
                            running.remove(crawl_uri.uri());
                            bookkeeping.remove(crawl_uri.uri());
                            self.handle_transport_exception(&crawl_uri, &error).await?;
                        }
                    }
                }
            }
        }

        self.log(
            LogLevel::Debug,
            &format!("crawl finished {{ requests_sent: {} }}", self.requests_sent),
            "engine",
        );
        for subscriber in &self.subscribers {
            if subscriber.capabilities().contains(Capabilities::FINISHED_CRAWLING) {
                subscriber.on_finished_crawling(&self.job_id).await;
            }
        }
        Ok(())
    }

    fn max_requests_reached(&self) -> bool {
        let max_requests = self.config.max_requests();
        max_requests != 0 && self.requests_sent >= max_requests
    }

    /// Routes a network-level failure per spec.md §4.3: logs it, then calls
    /// `onTransportException` on every `ExceptionSubscriber`-capable
    /// subscriber. The request is already finished by the time this runs.
    async fn handle_transport_exception(&self, crawl_uri: &CrawlUri, error: &CrawlError) -> Result<(), CrawlError> {
        self.log(
            LogLevel::Debug,
            &crawl_uri.create_log_message(&format!("transport exception: {error}")),
            "engine",
        );
        for subscriber in &self.subscribers {
            if subscriber.capabilities().contains(Capabilities::EXCEPTION) {
                subscriber.on_transport_exception(crawl_uri, error).await;
            }
        }
        Ok(())
    }

    /// Routes a non-2xx response per spec.md §4.3: logs it, then calls
    /// `onHttpException` on every `ExceptionSubscriber`-capable subscriber
    /// with whatever chunk was in flight when the status was observed.
    async fn handle_http_exception(
        &self,
        crawl_uri: &CrawlUri,
        error: &CrawlError,
        chunk: Option<&Chunk>,
    ) -> Result<(), CrawlError> {
        self.log(
            LogLevel::Debug,
            &crawl_uri.create_log_message(&format!("http exception: {error}")),
            "engine",
        );
        for subscriber in &self.subscribers {
            if subscriber.capabilities().contains(Capabilities::EXCEPTION) {
                subscriber.on_http_exception(crawl_uri, error, chunk).await;
            }
        }
        Ok(())
    }
}

async fn next_chunk_future(
    crawl_uri: CrawlUri,
    mut response: Box<dyn HttpResponseHandle>,
    is_first: bool,
) -> PendingOutcome {
    let result = response.next_chunk().await;
    PendingOutcome::Chunk {
        crawl_uri,
        response,
        result,
        is_first,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::LinkDiscoverySubscriber;
    use crate::queue::InMemoryQueue;
    use crate::subscriber::AcceptAllSubscriber;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn single_seed_no_links_is_processed_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>hi</body></html>"))
            .mount(&server)
            .await;

        let base_uris: BaseUriCollection = vec![server.uri() + "/"].into_iter().collect();
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::new());
        let mut engine = Engine::create(base_uris, queue.clone(), None).await.unwrap();
        engine.add_subscriber(Arc::new(AcceptAllSubscriber)).await;
        engine.crawl().await.unwrap();

        assert_eq!(engine.requests_sent(), 1);
        let entry = queue.get(engine.job_id(), &(server.uri() + "/")).await.unwrap();
        assert!(entry.processed());
    }

    struct CountingFinishSubscriber {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Subscriber for CountingFinishSubscriber {
        fn capabilities(&self) -> Capabilities {
            Capabilities::FINISHED_CRAWLING
        }

        async fn should_request(&self, _crawl_uri: &CrawlUri) -> Verdict {
            Verdict::Positive
        }

        async fn needs_content(&self, _crawl_uri: &CrawlUri, _response: &dyn HttpResponseHandle) -> Verdict {
            Verdict::Positive
        }

        async fn on_finished_crawling(&self, _job_id: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn finished_crawling_fires_exactly_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let base_uris: BaseUriCollection = vec![server.uri() + "/"].into_iter().collect();
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::new());
        let mut engine = Engine::create(base_uris, queue, None).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        engine
            .add_subscriber(Arc::new(CountingFinishSubscriber { calls: calls.clone() }))
            .await;
        engine.crawl().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn depth_limit_stops_further_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<a href=\"/x\">x</a>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<a href=\"/y\">y</a>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/y"))
            .respond_with(ResponseTemplate::new(200).set_body_string("unreachable"))
            .mount(&server)
            .await;

        let base_uris: BaseUriCollection = vec![server.uri() + "/"].into_iter().collect();
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::new());
        let config = EngineConfig::default().with_max_level(1);
        let mut engine = Engine::create(base_uris, queue.clone(), None).await.unwrap().with_config(config);
        engine.add_subscriber(Arc::new(AcceptAllSubscriber)).await;
        engine.add_subscriber(Arc::new(LinkDiscoverySubscriber::new())).await;
        engine.crawl().await.unwrap();

        // "/" (level 0) and "/x" (level 1) are requested; "/y" (level 2) is
        // enqueued by LinkDiscoverySubscriber but never requested. The
        // dispatch loop still marks it processed when it pops it off the
        // queue and rejects it for depth (spec.md §4.1 step 2 marks
        // processed before the scheme/depth/shouldRequest checks run).
        assert_eq!(engine.requests_sent(), 2);
        let y = queue.get(engine.job_id(), &(server.uri() + "/y")).await.unwrap();
        assert!(y.processed());
        assert_eq!(y.level(), 2);
    }
}
