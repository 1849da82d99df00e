//! The bundled `robots.txt` / sitemap / meta-robots policy subscriber.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use robotstxt::DefaultMatcher;
use scraper::{Html, Selector};
use tokio::sync::OnceCell;

use crate::engine::EngineContext;
use crate::http::HttpResponseHandle;
use crate::logging::{LogContext, LogLevel};
use crate::subscriber::{Capabilities, Subscriber};
use crate::uri::CrawlUri;
use crate::verdict::Verdict;

const DISALLOWED_TAG: &str = "disallowed-robots-txt";
const NOINDEX_TAG: &str = "noindex";
const NOFOLLOW_TAG: &str = "nofollow";

struct RobotsInfo {
    content: String,
    sitemaps: Vec<String>,
}

/// Tags URIs per `robots.txt`, discovers sitemap-listed URIs, and tags
/// `noindex`/`nofollow` from `X-Robots-Tag` and `<meta name="robots">`.
///
/// Engine-aware: fetches `robots.txt` and sitemaps through the handle
/// obtained via `set_engine`, using the job's own HTTP client rather than a
/// private one, so mocked transports in tests are honored too.
pub struct RobotsSubscriber {
    user_agent: String,
    cache: Mutex<HashMap<String, RobotsInfo>>,
    engine: OnceCell<EngineContext>,
}

impl RobotsSubscriber {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            cache: Mutex::new(HashMap::new()),
            engine: OnceCell::new(),
        }
    }

    fn origin(uri: &str) -> Option<String> {
        let url = reqwest::Url::parse(uri).ok()?;
        Some(format!("{}://{}", url.scheme(), url.host_str()?))
    }

    fn robots_txt_uri(uri: &str) -> Option<String> {
        Some(format!("{}/robots.txt", Self::origin(uri)?))
    }

    fn extract_sitemaps(content: &str) -> Vec<String> {
        content
            .lines()
            .filter_map(|line| {
                let (key, value) = line.split_once(':')?;
                if key.trim().eq_ignore_ascii_case("sitemap") {
                    Some(value.trim().to_string())
                } else {
                    None
                }
            })
            .collect()
    }

    fn extract_sitemap_locs(xml: &str) -> Vec<String> {
        let mut reader = Reader::from_str(xml);
        let mut buf = Vec::new();
        let mut locs = Vec::new();
        let mut in_loc = false;
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) if e.name().as_ref() == b"loc" => in_loc = true,
                Ok(Event::Text(e)) if in_loc => {
                    if let Ok(text) = e.unescape() {
                        locs.push(text.into_owned());
                    }
                    in_loc = false;
                }
                Ok(Event::Eof) => break,
                Err(_) => break,
                _ => {}
            }
            buf.clear();
        }
        locs
    }

    /// Fetches and caches `robots.txt` for `uri`'s origin. Treats any
    /// non-200 response or transport failure as "no robots.txt" (allow
    /// all), per spec.
    async fn ensure_robots_loaded(&self, engine: &EngineContext, uri: &str) -> Option<String> {
        let origin = Self::origin(uri)?;
        if self.cache.lock().unwrap().contains_key(&origin) {
            return Some(origin);
        }
        let robots_uri = Self::robots_txt_uri(uri)?;
        let mut response = engine.http_client().get(&robots_uri).await.ok()?;
        if response.status() != 200 {
            return None;
        }
        let mut body = Vec::new();
        while let Ok(Some(chunk)) = response.next_chunk().await {
            body.extend_from_slice(&chunk.data);
            if chunk.is_last {
                break;
            }
        }
        let content = String::from_utf8_lossy(&body).into_owned();
        let sitemaps = Self::extract_sitemaps(&content);
        self.cache.lock().unwrap().insert(origin.clone(), RobotsInfo { content, sitemaps });
        Some(origin)
    }

    async fn discover_sitemaps(&self, engine: &EngineContext, crawl_uri: &CrawlUri, origin: &str) {
        let sitemaps = {
            let cache = self.cache.lock().unwrap();
            cache.get(origin).map(|info| info.sitemaps.clone()).unwrap_or_default()
        };
        if sitemaps.is_empty() {
            return;
        }
        let robots_marker = match CrawlUri::new(
            Self::robots_txt_uri(crawl_uri.uri()).unwrap_or_default(),
            1,
            true,
            Some(crawl_uri.uri().to_string()),
        ) {
            Ok(marker) => marker,
            Err(_) => return,
        };
        for sitemap_uri in sitemaps {
            let Ok(mut response) = engine.http_client().get(&sitemap_uri).await else {
                continue;
            };
            if response.status() != 200 {
                continue;
            }
            let mut body = Vec::new();
            while let Ok(Some(chunk)) = response.next_chunk().await {
                body.extend_from_slice(&chunk.data);
                if chunk.is_last {
                    break;
                }
            }
            let xml = String::from_utf8_lossy(&body).into_owned();
            for loc in Self::extract_sitemap_locs(&xml) {
                let _ = engine.add_uri_to_queue(&loc, &robots_marker, false).await;
            }
        }
    }

    fn scan_robots_tag_value(crawl_uri: &CrawlUri, value: &str) {
        if value.contains("noindex") {
            crawl_uri.add_tag(NOINDEX_TAG);
        }
        if value.contains("nofollow") {
            crawl_uri.add_tag(NOFOLLOW_TAG);
        }
    }
}

#[async_trait]
impl Subscriber for RobotsSubscriber {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ENGINE_AWARE
    }

    async fn set_engine(&self, engine: EngineContext) {
        let _ = self.engine.set(engine);
    }

    async fn should_request(&self, crawl_uri: &CrawlUri) -> Verdict {
        let Some(engine) = self.engine.get() else {
            return Verdict::Abstain;
        };
        if !engine.config().respect_robots_txt() {
            return Verdict::Abstain;
        }
        let Some(origin) = self.ensure_robots_loaded(engine, crawl_uri.uri()).await else {
            return Verdict::Abstain;
        };

        let disallowed = {
            let cache = self.cache.lock().unwrap();
            cache
                .get(&origin)
                .map(|info| {
                    !DefaultMatcher::default().one_agent_allowed_by_robots(
                        &info.content,
                        &self.user_agent,
                        crawl_uri.uri(),
                    )
                })
                .unwrap_or(false)
        };
        if disallowed {
            crawl_uri.add_tag(DISALLOWED_TAG);
            engine.logger().log(
                LogLevel::Debug,
                &crawl_uri.create_log_message("disallowed by robots.txt"),
                &LogContext::new("robots"),
            );
        }

        if crawl_uri.level() == 0 {
            self.discover_sitemaps(engine, crawl_uri, &origin).await;
        }

        Verdict::Abstain
    }

    async fn needs_content(&self, crawl_uri: &CrawlUri, response: &dyn HttpResponseHandle) -> Verdict {
        if let Some(value) = response.header("x-robots-tag") {
            Self::scan_robots_tag_value(crawl_uri, &value);
            if let Some(engine) = self.engine.get() {
                engine.logger().log(
                    LogLevel::Debug,
                    &crawl_uri.create_log_message("tagged from X-Robots-Tag header"),
                    &LogContext::new("robots"),
                );
            }
        }
        Verdict::Abstain
    }

    async fn on_last_chunk(&self, crawl_uri: &CrawlUri, response: &dyn HttpResponseHandle, body: &[u8]) {
        let is_html = response
            .content_type()
            .map(|mime| mime.type_() == mime::TEXT && mime.subtype() == mime::HTML)
            .unwrap_or(false);
        if !is_html {
            return;
        }
        let text = String::from_utf8_lossy(body);
        let document = Html::parse_document(&text);
        let Ok(selector) = Selector::parse(r#"head meta[name="robots"]"#) else {
            return;
        };
        if let Some(meta) = document.select(&selector).next() {
            if let Some(content) = meta.value().attr("content") {
                Self::scan_robots_tag_value(crawl_uri, content);
                if let Some(engine) = self.engine.get() {
                    engine.logger().log(
                        LogLevel::Debug,
                        &crawl_uri.create_log_message("tagged from meta robots"),
                        &LogContext::new("robots"),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_sitemap_directives() {
        let content = "User-agent: *\nDisallow: /private/\nSitemap: http://a/sm.xml\n";
        assert_eq!(RobotsSubscriber::extract_sitemaps(content), vec!["http://a/sm.xml"]);
    }

    #[test]
    fn extracts_locs_from_sitemap_xml() {
        let xml = r#"<urlset><url><loc>http://a/p1</loc></url><url><loc>http://a/p2</loc></url></urlset>"#;
        let locs = RobotsSubscriber::extract_sitemap_locs(xml);
        assert_eq!(locs, vec!["http://a/p1", "http://a/p2"]);
    }

    #[test]
    fn scan_robots_tag_value_tags_both() {
        let crawl_uri = CrawlUri::new("http://a/", 0, false, None).unwrap();
        RobotsSubscriber::scan_robots_tag_value(&crawl_uri, "noindex, nofollow");
        assert!(crawl_uri.has_tag(NOINDEX_TAG));
        assert!(crawl_uri.has_tag(NOFOLLOW_TAG));
    }

    #[test]
    fn scan_robots_tag_value_is_case_sensitive() {
        let crawl_uri = CrawlUri::new("http://a/", 0, false, None).unwrap();
        RobotsSubscriber::scan_robots_tag_value(&crawl_uri, "NOINDEX");
        assert!(!crawl_uri.has_tag(NOINDEX_TAG));
    }
}
