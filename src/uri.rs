//! `CrawlUri`: a normalized URI plus its discovery metadata.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::CrawlError;

/// A normalized URI plus depth, ancestry, processed flag, and tags.
///
/// Identity is the normalized URI string: two `CrawlUri` with the same
/// `uri()` are the same entry at the Queue boundary. Tags live behind a
/// shared, lockable set so a subscriber that tags a `CrawlUri` during one
/// hook is visible to subsequent hooks on the same instance without a
/// queue round-trip (see DESIGN.md, "Tag mutation visibility").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlUri {
    uri: String,
    level: u32,
    parent: Option<String>,
    processed: bool,
    #[serde(with = "tags_serde")]
    tags: Arc<Mutex<BTreeSet<String>>>,
}

impl CrawlUri {
    /// Constructs a `CrawlUri` from an already-normalized URI string.
    ///
    /// `level == 0` iff `parent` is `None`; violating that is a programming
    /// error reported as [`CrawlError::InvalidCrawlUri`].
    pub fn new(
        uri: impl Into<String>,
        level: u32,
        processed: bool,
        parent: Option<String>,
    ) -> Result<Self, CrawlError> {
        let uri = uri.into();
        if (level == 0) != parent.is_none() {
            return Err(CrawlError::InvalidCrawlUri(format!(
                "level {level} requires parent.is_none() == {}, got {:?}",
                level == 0,
                parent
            )));
        }
        Ok(Self {
            uri,
            level,
            parent,
            processed,
            tags: Arc::new(Mutex::new(BTreeSet::new())),
        })
    }

    /// Creates a level-0 `CrawlUri` for a seed, normalizing `uri` first.
    pub fn seed(uri: &str) -> Result<Self, CrawlError> {
        let normalized = Self::normalize_uri(uri)?;
        Self::new(normalized, 0, false, None)
    }

    /// Normalizes a URI: lowercases scheme/host, drops the default port and
    /// the fragment, and resolves `.`/`..` path segments (the latter two are
    /// handled by `Url::parse` itself per the URL living standard).
    ///
    /// Idempotent: `normalize_uri(normalize_uri(u)) == normalize_uri(u)`.
    pub fn normalize_uri(uri: &str) -> Result<String, CrawlError> {
        let mut url = Url::parse(uri).map_err(|e| CrawlError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        url.set_fragment(None);
        if let Some(port) = url.port() {
            if default_port_for_scheme(url.scheme()) == Some(port) {
                let _ = url.set_port(None);
            }
        }
        Ok(url.to_string())
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn processed(&self) -> bool {
        self.processed
    }

    /// Returns the URI's scheme (lowercase, per normalization).
    pub fn scheme(&self) -> &str {
        self.uri.split(':').next().unwrap_or_default()
    }

    /// Transitions `processed` from false to true. A no-op if already
    /// processed, since the transition must happen at most once.
    pub fn mark_processed(&mut self) {
        self.processed = true;
    }

    /// Adds a tag. No-op if already present.
    pub fn add_tag(&self, tag: impl Into<String>) {
        self.tags.lock().unwrap().insert(tag.into());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.lock().unwrap().contains(tag)
    }

    pub fn tags(&self) -> BTreeSet<String> {
        self.tags.lock().unwrap().clone()
    }

    /// A human-readable message including the URI and level, for logging.
    pub fn create_log_message(&self, text: &str) -> String {
        format!("{text} {{ uri: {}, level: {} }}", self.uri, self.level)
    }
}

fn default_port_for_scheme(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

mod tags_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(tags: &Arc<Mutex<BTreeSet<String>>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let guard = tags.lock().unwrap();
        let snapshot: Vec<&String> = guard.iter().collect();
        snapshot.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<Mutex<BTreeSet<String>>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Vec::<String>::deserialize(deserializer)?;
        Ok(Arc::new(Mutex::new(values.into_iter().collect())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let once = CrawlUri::normalize_uri("HTTP://Example.COM:80/a/./b/../c#frag").unwrap();
        let twice = CrawlUri::normalize_uri(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, "http://example.com/a/c");
    }

    #[test]
    fn normalize_keeps_non_default_port() {
        let normalized = CrawlUri::normalize_uri("https://example.com:8443/x").unwrap();
        assert_eq!(normalized, "https://example.com:8443/x");
    }

    #[test]
    fn level_parent_invariant_is_enforced() {
        assert!(CrawlUri::new("http://a/", 0, false, Some("http://b/".into())).is_err());
        assert!(CrawlUri::new("http://a/", 1, false, None).is_err());
        assert!(CrawlUri::new("http://a/", 0, false, None).is_ok());
        assert!(CrawlUri::new("http://a/", 1, false, Some("http://b/".into())).is_ok());
    }

    #[test]
    fn tags_are_shared_across_clones() {
        let uri = CrawlUri::new("http://a/", 0, false, None).unwrap();
        let handle = uri.clone();
        uri.add_tag("noindex");
        assert!(handle.has_tag("noindex"));
    }

    #[test]
    fn serde_round_trips_tags() {
        let uri = CrawlUri::new("http://a/", 0, false, None).unwrap();
        uri.add_tag("nofollow");
        let json = serde_json::to_string(&uri).unwrap();
        let back: CrawlUri = serde_json::from_str(&json).unwrap();
        assert!(back.has_tag("nofollow"));
    }
}
