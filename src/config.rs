//! Engine configuration: the knobs that govern concurrency, depth, and
//! politeness defaults, mirroring the teacher's named-constant style.

use std::time::Duration;

/// Default ceiling on link depth below a job's base URIs.
pub const DEFAULT_MAX_LEVEL: u32 = 10;

/// Default ceiling on concurrently in-flight requests.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 8;

/// Default ceiling on total requests sent per `Crawl()` call. 0 = unbounded.
pub const DEFAULT_MAX_REQUESTS: usize = 0;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay applied between requests to the same host when no
/// robots.txt `Crawl-delay` is present.
pub const DEFAULT_CRAWL_DELAY: Duration = Duration::from_millis(0);

/// Default User-Agent token, used both for outgoing requests and for
/// matching `User-agent:` blocks in robots.txt.
pub const DEFAULT_USER_AGENT: &str = "crawlway";

/// Immutable engine configuration. Built once via [`EngineConfig::default`]
/// and [`EngineConfig::with_*`] modifiers, then handed to
/// [`crate::engine::Engine::create`] (SPEC_FULL.md §10.3).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    max_level: u32,
    max_requests: usize,
    max_concurrent_requests: usize,
    request_timeout: Duration,
    crawl_delay: Duration,
    user_agent: String,
    respect_robots_txt: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_level: DEFAULT_MAX_LEVEL,
            max_requests: DEFAULT_MAX_REQUESTS,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            crawl_delay: DEFAULT_CRAWL_DELAY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            respect_robots_txt: true,
        }
    }
}

impl EngineConfig {
    pub fn with_max_level(mut self, max_level: u32) -> Self {
        self.max_level = max_level;
        self
    }

    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_max_concurrent_requests(mut self, max_concurrent_requests: usize) -> Self {
        self.max_concurrent_requests = max_concurrent_requests;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_crawl_delay(mut self, crawl_delay: Duration) -> Self {
        self.crawl_delay = crawl_delay;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_respect_robots_txt(mut self, respect_robots_txt: bool) -> Self {
        self.respect_robots_txt = respect_robots_txt;
        self
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn crawl_delay(&self) -> Duration {
        self.crawl_delay
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn respect_robots_txt(&self) -> bool {
        self.respect_robots_txt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_named_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.max_level(), DEFAULT_MAX_LEVEL);
        assert_eq!(config.max_concurrent_requests(), DEFAULT_MAX_CONCURRENT_REQUESTS);
        assert!(config.respect_robots_txt());
    }

    #[test]
    fn modifiers_compose() {
        let config = EngineConfig::default()
            .with_max_level(2)
            .with_user_agent("custom-bot")
            .with_respect_robots_txt(false);
        assert_eq!(config.max_level(), 2);
        assert_eq!(config.user_agent(), "custom-bot");
        assert!(!config.respect_robots_txt());
    }
}
