//! Subscriber verdicts and the per-pass decision cache.

use std::collections::HashMap;

/// A subscriber's answer to one of the three decision hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Positive,
    Negative,
    Abstain,
}

impl Verdict {
    pub fn is_positive(self) -> bool {
        matches!(self, Verdict::Positive)
    }

    pub fn is_negative(self) -> bool {
        matches!(self, Verdict::Negative)
    }

    /// Aggregates a set of verdicts by "any POSITIVE ⇒ proceed".
    pub fn any_positive(verdicts: impl IntoIterator<Item = Verdict>) -> bool {
        verdicts.into_iter().any(Verdict::is_positive)
    }
}

/// Which decision hook a cached verdict belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    ShouldRequest,
    NeedsContent,
}

/// Per-(hook, CrawlUri identity, subscriber index) memoized verdict for a
/// single crawl pass. Keyed by registration-list position rather than a
/// class-name string (DESIGN.md / SPEC_FULL.md §9 "Decision cache keying").
/// Lives only for the duration of one `Engine::crawl()` call — not persisted.
#[derive(Default)]
pub(crate) struct DecisionCache {
    verdicts: HashMap<(Hook, String, usize), Verdict>,
}

impl DecisionCache {
    pub(crate) fn record(&mut self, hook: Hook, uri: &str, subscriber_index: usize, verdict: Verdict) {
        self.verdicts
            .insert((hook, uri.to_string(), subscriber_index), verdict);
    }

    /// Default on lookup miss is ABSTAIN.
    pub(crate) fn get(&self, hook: Hook, uri: &str, subscriber_index: usize) -> Verdict {
        self.verdicts
            .get(&(hook, uri.to_string(), subscriber_index))
            .copied()
            .unwrap_or(Verdict::Abstain)
    }
}
