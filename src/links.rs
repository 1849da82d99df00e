//! Discovers outbound links in HTML responses and enqueues them as child
//! `CrawlUri`. Grounded on the teacher crate's `extract_links`/`crawl`
//! link-following behavior, reshaped into a bundled subscriber so link
//! discovery is opt-in policy rather than baked into the dispatch loop.

use async_trait::async_trait;
use scraper::{Html, Selector};
use tokio::sync::OnceCell;

use crate::engine::EngineContext;
use crate::http::HttpResponseHandle;
use crate::logging::{LogContext, LogLevel};
use crate::subscriber::{Capabilities, Subscriber};
use crate::uri::CrawlUri;
use crate::verdict::Verdict;

/// Votes POSITIVE on `needs_content` only for `text/html` responses, then
/// on `on_last_chunk` extracts every `<a href>` and enqueues it via
/// `EngineContext::add_uri_to_queue`.
pub struct LinkDiscoverySubscriber {
    engine: OnceCell<EngineContext>,
}

impl Default for LinkDiscoverySubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkDiscoverySubscriber {
    pub fn new() -> Self {
        Self { engine: OnceCell::new() }
    }

    fn extract_links(content: &str) -> Vec<String> {
        let document = Html::parse_document(content);
        let Ok(selector) = Selector::parse("a") else {
            return Vec::new();
        };
        document
            .select(&selector)
            .filter_map(|element| element.value().attr("href").map(ToString::to_string))
            .collect()
    }
}

#[async_trait]
impl Subscriber for LinkDiscoverySubscriber {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ENGINE_AWARE
    }

    async fn set_engine(&self, engine: EngineContext) {
        let _ = self.engine.set(engine);
    }

    async fn needs_content(&self, _crawl_uri: &CrawlUri, response: &dyn HttpResponseHandle) -> Verdict {
        let is_html = response
            .content_type()
            .map(|mime| mime.type_() == mime::TEXT && mime.subtype() == mime::HTML)
            .unwrap_or(false);
        if is_html {
            Verdict::Positive
        } else {
            Verdict::Abstain
        }
    }

    async fn on_last_chunk(&self, crawl_uri: &CrawlUri, _response: &dyn HttpResponseHandle, body: &[u8]) {
        let Some(engine) = self.engine.get() else {
            return;
        };
        let base = match reqwest::Url::parse(crawl_uri.uri()) {
            Ok(url) => url,
            Err(_) => return,
        };
        let text = String::from_utf8_lossy(body);
        let links = Self::extract_links(&text);
        engine.logger().log(
            LogLevel::Debug,
            &crawl_uri.create_log_message(&format!("found {} outbound links", links.len())),
            &LogContext::new("links"),
        );
        for href in links {
            if let Ok(resolved) = base.join(&href) {
                let _ = engine.add_uri_to_queue(resolved.as_str(), crawl_uri, false).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_href_attributes() {
        let html = r#"<html><body><a href="/x">x</a><a href="http://b/">b</a></body></html>"#;
        let links = LinkDiscoverySubscriber::extract_links(html);
        assert_eq!(links, vec!["/x", "http://b/"]);
    }
}
