//! Per-store path trie and minimal subscription derivation.
//!
//! Every read reported by a tracking proxy lands in the trie of its store.
//! [`PathFinder::minimal_paths`] then collapses each trie into the smallest
//! set of [`PathEntry`]s that still covers every observed read, and
//! [`PathFinder::build_proxy_subscriptions`] turns those entries into
//! selectors for the caller to subscribe with.
//!
//! Tries only grow. Nodes are never pruned.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use autotrack_core::{Selector, StoreHandle, store_key, store_name};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::proxy::{TrackPath, TrackedInvocation};
use crate::selector::{build_selector, describe_path_entry};

/// One node of a store's path trie.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrieNode {
    pub children: BTreeMap<String, TrieNode>,
    /// The value at this path was used as a whole.
    pub is_leaf: bool,
    /// Set when this path is a store action called on its parent.
    pub invocation: Option<TrackedInvocation>,
}

impl TrieNode {
    /// Number of children that are plain property reads.
    fn plain_children(&self) -> usize {
        self.children.values().filter(|c| c.invocation.is_none()).count()
    }

    fn node_count(&self) -> usize {
        1 + self.children.values().map(TrieNode::node_count).sum::<usize>()
    }
}

/// A minimized path; each entry becomes exactly one subscription.
#[derive(Clone)]
pub struct PathEntry {
    pub store: StoreHandle,
    pub path: Vec<String>,
    pub invocation: Option<TrackedInvocation>,
    pub is_leaf: bool,
}

impl fmt::Debug for PathEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathEntry")
            .field("store", &store_name(self.store.as_ref()))
            .field("path", &self.path)
            .field("invocation", &self.invocation)
            .field("is_leaf", &self.is_leaf)
            .finish()
    }
}

struct StoreTrie {
    store: StoreHandle,
    root: TrieNode,
}

/// Records tracked paths per store and derives minimal subscriptions.
///
/// Cloning shares the underlying tries.
#[derive(Clone, Default)]
pub struct PathFinder {
    /// Stores in first-tracked order.
    tries: Arc<Mutex<Vec<StoreTrie>>>,
}

pub fn create_path_finder() -> PathFinder {
    PathFinder::default()
}

impl PathFinder {
    /// Insert `path` into the trie of `store`.
    ///
    /// Idempotent. The leaf flag is sticky once set; an invocation replaces
    /// any earlier one at the same node.
    pub fn track_path(
        &self,
        store: &StoreHandle,
        path: &[String],
        is_leaf: bool,
        invocation: Option<TrackedInvocation>,
    ) {
        let key = store_key(store);
        let mut tries = self.tries.lock();

        let index = match tries.iter().position(|t| store_key(&t.store) == key) {
            Some(index) => index,
            None => {
                debug!(store = %store_name(store.as_ref()), "created path trie");
                tries.push(StoreTrie {
                    store: Arc::clone(store),
                    root: TrieNode::default(),
                });
                tries.len() - 1
            }
        };

        let mut node = &mut tries[index].root;
        for segment in path {
            node = node.children.entry(segment.clone()).or_default();
        }
        node.is_leaf |= is_leaf;
        if invocation.is_some() {
            node.invocation = invocation;
        }
    }

    /// A [`TrackPath`] feeding this finder, for handing to proxies.
    pub fn tracker(&self) -> TrackPath {
        let finder = self.clone();
        Arc::new(move |store, path, is_leaf, invocation| {
            finder.track_path(store, path, is_leaf, invocation);
        })
    }

    /// Number of stores with a trie.
    pub fn store_count(&self) -> usize {
        self.tries.lock().len()
    }

    /// Total trie nodes across all stores, roots included.
    pub fn node_count(&self) -> usize {
        self.tries.lock().iter().map(|t| t.root.node_count()).sum()
    }

    /// Copy of the trie recorded for `store`.
    pub fn trie(&self, store: &StoreHandle) -> Option<TrieNode> {
        let key = store_key(store);
        self.tries
            .lock()
            .iter()
            .find(|t| store_key(&t.store) == key)
            .map(|t| t.root.clone())
    }

    /// Collapse every trie into its minimal entries: stores in first-tracked
    /// order, children in key order.
    pub fn minimal_paths(&self) -> Vec<PathEntry> {
        let tries = self.tries.lock();
        let mut out = Vec::new();
        for trie in tries.iter() {
            let mut path = Vec::new();
            collect_minimal_paths(&trie.store, &trie.root, &mut path, true, &mut out);
        }
        out
    }

    /// Build one selector per minimal entry and hand each to
    /// `create_subscription`. Returns the number of subscriptions created.
    pub fn build_proxy_subscriptions<F>(&self, mut create_subscription: F, should_log: bool) -> usize
    where
        F: FnMut(&StoreHandle, Selector),
    {
        // Snapshot first: the callback may read stores that track into us.
        let entries = self.minimal_paths();

        if should_log {
            log_entries(&entries);
        }

        for entry in &entries {
            create_subscription(&entry.store, build_selector(entry));
        }
        entries.len()
    }
}

impl fmt::Debug for PathFinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathFinder")
            .field("stores", &self.store_count())
            .field("nodes", &self.node_count())
            .finish()
    }
}

/// Emit at a node when it was used whole, or when it is a non-root branch
/// point of plain reads. Everything not covered by an emitted entry is
/// visited: all children otherwise, only invocations at any depth when emitted.
fn collect_minimal_paths(
    store: &StoreHandle,
    node: &TrieNode,
    path: &mut Vec<String>,
    is_root: bool,
    out: &mut Vec<PathEntry>,
) {
    let emit_here = node.children.is_empty() || node.is_leaf || (!is_root && node.plain_children() > 1);

    if emit_here {
        out.push(PathEntry {
            store: Arc::clone(store),
            path: path.clone(),
            invocation: node.invocation.clone(),
            is_leaf: node.is_leaf,
        });
        collect_covered_invocations(store, node, path, out);
        return;
    }

    for (segment, child) in &node.children {
        path.push(segment.clone());
        collect_minimal_paths(store, child, path, false, out);
        path.pop();
    }
}

/// Below an emitted entry plain reads are covered by it; invocation results
/// are not, however deep they sit.
fn collect_covered_invocations(store: &StoreHandle, node: &TrieNode, path: &mut Vec<String>, out: &mut Vec<PathEntry>) {
    for (segment, child) in &node.children {
        path.push(segment.clone());
        if child.invocation.is_some() {
            collect_minimal_paths(store, child, path, false, out);
        } else {
            collect_covered_invocations(store, child, path, out);
        }
        path.pop();
    }
}

fn log_entries(entries: &[PathEntry]) {
    let count = entries.len();
    info!(count, "built {} proxy subscription{}", count, if count == 1 { "" } else { "s" });
    for entry in entries {
        info!(subscription = %describe_path_entry(entry), "proxy subscription");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotrack_core::Value;
    use autotrack_core::testing::TestStore;
    use proptest::prelude::*;

    fn p(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    fn store(name: &str) -> StoreHandle {
        TestStore::new(name, Value::object([("n", Value::from(0))]))
    }

    fn paths(finder: &PathFinder) -> Vec<Vec<String>> {
        finder.minimal_paths().into_iter().map(|e| e.path).collect()
    }

    #[test]
    fn track_path_is_idempotent() {
        let finder = create_path_finder();
        let s = store("s");
        finder.track_path(&s, &p(&["a", "b"]), true, None);
        finder.track_path(&s, &p(&["a", "b"]), true, None);
        assert_eq!(finder.node_count(), 3);
        assert_eq!(finder.store_count(), 1);
    }

    #[test]
    fn leaf_flag_is_sticky() {
        let finder = create_path_finder();
        let s = store("s");
        finder.track_path(&s, &p(&["a"]), true, None);
        finder.track_path(&s, &p(&["a"]), false, None);
        assert!(finder.trie(&s).unwrap().children["a"].is_leaf);
    }

    #[test]
    fn latest_invocation_wins() {
        let finder = create_path_finder();
        let s = store("s");
        finder.track_path(&s, &p(&["get"]), true, Some(TrackedInvocation::new("get", &[Value::from(1)])));
        finder.track_path(&s, &p(&["get"]), true, Some(TrackedInvocation::new("get", &[Value::from(2)])));
        let node = &finder.trie(&s).unwrap().children["get"];
        assert_eq!(node.invocation.as_ref().unwrap().args, Some(vec![Value::from(2)]));
    }

    #[test]
    fn siblings_collapse_to_parent() {
        let finder = create_path_finder();
        let s = store("s");
        finder.track_path(&s, &p(&["a"]), false, None);
        finder.track_path(&s, &p(&["a", "b"]), false, None);
        finder.track_path(&s, &p(&["a", "b", "c"]), true, None);
        finder.track_path(&s, &p(&["a", "b", "d"]), true, None);
        assert_eq!(paths(&finder), vec![p(&["a", "b"])]);
    }

    #[test]
    fn single_path_merges_down() {
        let finder = create_path_finder();
        let s = store("s");
        finder.track_path(&s, &p(&["a"]), false, None);
        finder.track_path(&s, &p(&["a", "b"]), false, None);
        finder.track_path(&s, &p(&["a", "b", "c"]), true, None);
        assert_eq!(paths(&finder), vec![p(&["a", "b", "c"])]);
    }

    #[test]
    fn root_branches_are_independent() {
        let finder = create_path_finder();
        let s = store("s");
        finder.track_path(&s, &p(&["x"]), true, None);
        finder.track_path(&s, &p(&["y"]), true, None);
        assert_eq!(paths(&finder), vec![p(&["x"]), p(&["y"])]);
    }

    #[test]
    fn leaf_ancestor_covers_descendants() {
        let finder = create_path_finder();
        let s = store("s");
        finder.track_path(&s, &p(&["list", "0"]), true, None);
        finder.track_path(&s, &p(&["list"]), true, None);
        assert_eq!(paths(&finder), vec![p(&["list"])]);
    }

    #[test]
    fn invocation_gets_its_own_entry() {
        let finder = create_path_finder();
        let s = store("s");
        finder.track_path(&s, &p(&["obj"]), false, None);
        finder.track_path(&s, &p(&["obj", "x"]), true, None);
        finder.track_path(
            &s,
            &p(&["obj", "method"]),
            true,
            Some(TrackedInvocation::new("method", &[Value::from(1), Value::from(2)])),
        );

        let entries = finder.minimal_paths();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, p(&["obj", "method"]));
        assert_eq!(entries[0].invocation.as_ref().unwrap().arg_count(), 2);
        assert_eq!(entries[1].path, p(&["obj", "x"]));
        assert!(entries[1].invocation.is_none());
    }

    #[test]
    fn invocation_survives_emitted_parent() {
        let finder = create_path_finder();
        let s = store("s");
        finder.track_path(&s, &p(&["obj"]), true, None);
        finder.track_path(&s, &p(&["obj", "method"]), true, Some(TrackedInvocation::new("method", &[])));
        assert_eq!(paths(&finder), vec![p(&["obj"]), p(&["obj", "method"])]);
    }

    #[test]
    fn nested_invocation_below_emitted_entry() {
        let finder = create_path_finder();
        let s = store("s");
        finder.track_path(&s, &p(&["accounts"]), true, None);
        finder.track_path(&s, &p(&["accounts", "prices"]), false, None);
        finder.track_path(&s, &p(&["accounts", "prices", "rate"]), true, None);
        finder.track_path(
            &s,
            &p(&["accounts", "prices", "convert"]),
            true,
            Some(TrackedInvocation::new("convert", &[Value::from(4)])),
        );

        let entries = finder.minimal_paths();
        assert_eq!(
            entries.iter().map(|e| e.path.clone()).collect::<Vec<_>>(),
            vec![p(&["accounts"]), p(&["accounts", "prices", "convert"])]
        );
        assert_eq!(entries[1].invocation.as_ref().map(TrackedInvocation::arg_count), Some(1));
    }

    #[test]
    fn empty_root_leaf_emits_empty_path() {
        let finder = create_path_finder();
        let s = store("s");
        finder.track_path(&s, &[], true, None);
        assert_eq!(paths(&finder), vec![Vec::<String>::new()]);
    }

    #[test]
    fn stores_keep_first_tracked_order() {
        let finder = create_path_finder();
        let (a, b) = (store("a"), store("b"));
        finder.track_path(&b, &p(&["n"]), true, None);
        finder.track_path(&a, &p(&["n"]), true, None);
        let entries = finder.minimal_paths();
        assert_eq!(store_key(&entries[0].store), store_key(&b));
        assert_eq!(store_key(&entries[1].store), store_key(&a));
    }

    #[test]
    fn build_reports_subscription_count() {
        let finder = create_path_finder();
        let s = store("s");
        finder.track_path(&s, &p(&["n"]), true, None);

        let mut selected = Vec::new();
        let count = finder.build_proxy_subscriptions(
            |store, selector| selected.push(selector(&store.get_state())),
            true,
        );
        assert_eq!(count, 1);
        assert_eq!(selected, vec![Value::from(0)]);
    }

    #[test]
    fn tracker_feeds_finder() {
        let finder = create_path_finder();
        let s = store("s");
        let track = finder.tracker();
        track(&s, &p(&["n"]), true, None);
        assert_eq!(paths(&finder), vec![p(&["n"])]);
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    fn summary(finder: &PathFinder) -> Vec<(Vec<String>, bool, bool)> {
        finder
            .minimal_paths()
            .into_iter()
            .map(|e| (e.path, e.invocation.is_some(), e.is_leaf))
            .collect()
    }

    fn replay(s: &StoreHandle, accesses: &[(Vec<String>, bool)]) -> PathFinder {
        let finder = create_path_finder();
        for (path, is_call) in accesses {
            for end in 1..path.len() {
                finder.track_path(s, &path[..end], false, None);
            }
            let invocation = is_call.then(|| TrackedInvocation::new(path[path.len() - 1].clone(), &[]));
            finder.track_path(s, path, true, invocation);
        }
        finder
    }

    proptest! {
        #[test]
        fn minimal_paths_ignore_insertion_order(
            (accesses, shuffled) in proptest::collection::vec(
                (proptest::collection::vec("[xyz]", 1..4), proptest::bool::weighted(0.25)),
                1..10,
            )
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
        ) {
            let s = store("s");
            prop_assert_eq!(summary(&replay(&s, &accesses)), summary(&replay(&s, &shuffled)));
        }
    }
}
