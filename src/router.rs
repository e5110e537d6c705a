//! Longest-prefix REST router over a registry of dialect managers (C4).
//!
//! Startup registers a default dialect manager plus prefix-keyed children
//! (e.g. `/swift/`, `/auth/`). Lookup descends: at each node, find the
//! longest registered prefix the remaining URI starts with, strip it, and
//! recurse; a node with no matching child returns its own default manager.
//!
//! The source this was distilled from began its descent at
//! `resources_by_size.end()` with no prior decrement — defined on an empty
//! map, but past-the-end on a non-empty one. We don't replicate that: the
//! registry here keeps prefixes pre-sorted longest-first at registration
//! time and the lookup is a plain scan that stops at the first match, so
//! there's no past-the-end state to mishandle.

use std::collections::HashMap;
use std::sync::Arc;

use crate::dialect::DialectManager;

fn normalize_prefix(p: &str) -> String {
    if p.is_empty() || p.ends_with('/') {
        p.to_string()
    } else {
        format!("{p}/")
    }
}

#[derive(Default)]
struct Node {
    default: Option<Arc<dyn DialectManager>>,
    children: HashMap<String, Node>,
    /// Child prefixes, longest first. Maintained at registration time so
    /// lookup never needs to re-sort or walk off the end of a collection.
    prefixes_longest_first: Vec<String>,
}

impl Node {
    fn insert_child(&mut self, prefix: String) -> &mut Node {
        if !self.children.contains_key(&prefix) {
            self.children.insert(prefix.clone(), Node::default());
            self.prefixes_longest_first.push(prefix.clone());
            self.prefixes_longest_first
                .sort_by_key(|p| std::cmp::Reverse(p.len()));
        }
        self.children.get_mut(&prefix).unwrap()
    }

    /// Returns the resolved manager plus the URI remainder beneath it.
    fn lookup<'a>(&self, uri: &'a str) -> Option<(Arc<dyn DialectManager>, &'a str)> {
        for prefix in &self.prefixes_longest_first {
            if let Some(rest) = uri.strip_prefix(prefix.as_str()) {
                if let Some(child) = self.children.get(prefix) {
                    if let Some(found) = child.lookup(rest) {
                        return Some(found);
                    }
                    if let Some(default) = &child.default {
                        return Some((default.clone(), rest));
                    }
                }
            }
        }
        self.default.clone().map(|m| (m, uri))
    }
}

/// Registry of dialect managers, immutable after startup. Construction
/// happens once via [`RouterBuilder`].
pub struct DialectRouter {
    root: Node,
}

impl DialectRouter {
    /// Resolves a request path to its dialect manager and the remainder of
    /// the path beneath the matched prefix. Falls back to the root default
    /// manager (the S3-like dialect) if nothing more specific matches.
    pub fn resolve<'a>(&self, path: &'a str) -> Option<(Arc<dyn DialectManager>, &'a str)> {
        self.root.lookup(path)
    }
}

/// Builds an immutable [`DialectRouter`]. Registration order doesn't
/// matter — prefixes are kept sorted longest-first as they're added.
#[derive(Default)]
pub struct RouterBuilder {
    root: Node,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the manager that handles requests matching no other
    /// prefix (the root default — normally the S3-like dialect).
    pub fn default_manager(mut self, manager: Arc<dyn DialectManager>) -> Self {
        self.root.default = Some(manager);
        self
    }

    /// Registers `manager` under `prefix` (normalized to end with `/`).
    pub fn register(mut self, prefix: &str, manager: Arc<dyn DialectManager>) -> Self {
        let prefix = normalize_prefix(prefix);
        let node = self.root.insert_child(prefix);
        node.default = Some(manager);
        self
    }

    pub fn build(self) -> DialectRouter {
        DialectRouter { root: self.root }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::test_support::StubManager;

    #[test]
    fn longest_prefix_wins_over_shorter_one() {
        let router = RouterBuilder::new()
            .default_manager(StubManager::arc("default"))
            .register("/swift", StubManager::arc("swift"))
            .register("/swift/v2", StubManager::arc("swift-v2"))
            .build();

        let (m, rest) = router.resolve("/swift/v2/AUTH_x/container/obj").unwrap();
        assert_eq!(m.name(), "swift-v2");
        assert_eq!(rest, "/AUTH_x/container/obj");

        let (m, rest) = router.resolve("/swift/AUTH_x/container/obj").unwrap();
        assert_eq!(m.name(), "swift");
        assert_eq!(rest, "/AUTH_x/container/obj");
    }

    #[test]
    fn unmatched_prefix_falls_back_to_default() {
        let router = RouterBuilder::new()
            .default_manager(StubManager::arc("default"))
            .register("/swift", StubManager::arc("swift"))
            .build();

        let (m, rest) = router.resolve("/my-bucket/my-key").unwrap();
        assert_eq!(m.name(), "default");
        assert_eq!(rest, "/my-bucket/my-key");
    }
}
