//! Deciding whether a URL needs the method chain at all.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use crate::urls::{canonical_domain, extract_domain};

/// Decides whether a resource is behind a paywall.
pub trait PaywallClassifier: Send + Sync {
    fn is_paywalled(&self, url: &str) -> bool;
}

/// Shared, mutable set of domains known to be paywalled.
///
/// Cloning yields another handle onto the same set.
#[derive(Debug, Clone, Default)]
pub struct WhitelistStore {
    domains: Arc<RwLock<BTreeSet<String>>>,
}

impl WhitelistStore {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = domains
            .into_iter()
            .map(|d| canonical_domain(d.as_ref()))
            .filter(|d| !d.is_empty())
            .collect();
        Self {
            domains: Arc::new(RwLock::new(set)),
        }
    }

    /// Whether `domain` or any parent domain is listed.
    pub fn contains(&self, domain: &str) -> bool {
        let set = self.domains.read().unwrap_or_else(|e| e.into_inner());
        let domain = canonical_domain(domain);
        let mut candidate = domain.as_str();
        loop {
            if set.contains(candidate) {
                return true;
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => return false,
            }
        }
    }

    /// Add `domain`. Returns `true` if it was not already listed.
    pub fn add(&self, domain: &str) -> bool {
        let domain = canonical_domain(domain);
        if domain.is_empty() {
            return false;
        }
        let added = self
            .domains
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(domain.clone());
        if added {
            tracing::info!("added {domain} to paywalled domains");
        }
        added
    }

    pub fn remove(&self, domain: &str) -> bool {
        self.domains
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&canonical_domain(domain))
    }

    pub fn list(&self) -> Vec<String> {
        self.domains
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.domains.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Classifies by looking the URL's domain up in a [`WhitelistStore`].
#[derive(Debug, Clone)]
pub struct DomainListClassifier {
    store: WhitelistStore,
}

impl DomainListClassifier {
    pub fn new(store: WhitelistStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &WhitelistStore {
        &self.store
    }
}

impl PaywallClassifier for DomainListClassifier {
    fn is_paywalled(&self, url: &str) -> bool {
        extract_domain(url).is_some_and(|d| self.store.contains(&d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subdomains_match_listed_parent() {
        let store = WhitelistStore::new(["www.Example.com"]);
        assert!(store.contains("example.com"));
        assert!(store.contains("epaper.example.com"));
        assert!(!store.contains("com"));
        assert!(!store.contains("notexample.com"));
    }

    #[test]
    fn test_clones_share_state() {
        let store = WhitelistStore::default();
        let handle = store.clone();
        assert!(handle.add("paper.example"));
        assert!(!handle.add("paper.example"));
        assert!(store.contains("paper.example"));
        assert!(store.remove("paper.example"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_classifier_uses_url_domain() {
        let classifier = DomainListClassifier::new(WhitelistStore::new(["news.example"]));
        assert!(classifier.is_paywalled("https://www.news.example/a"));
        assert!(!classifier.is_paywalled("https://blog.example/a"));
        assert!(!classifier.is_paywalled("not a url"));
    }
}
