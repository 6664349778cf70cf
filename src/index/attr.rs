//! Attribute index trees
//!
//! Per namespace, per attribute name, a `BTreeMap<value, BTreeSet<Locator>>`.
//! The ordered value map gives deterministic query results and lets prefix
//! patterns use a range scan instead of a full walk.
//!
//! Queries stop producing once the caller's threshold is reached. The
//! threshold is a performance valve bounding the work per query, not a
//! "best N" selection.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::storage::Locator;

use super::pattern::ValuePattern;

/// value -> locators carrying that value, for one (namespace, attribute)
type ValueTree = BTreeMap<String, BTreeSet<Locator>>;

/// In-memory secondary index over all namespaces.
#[derive(Debug, Default)]
pub struct AttributeIndex {
    /// namespace -> attribute name -> value tree
    namespaces: HashMap<String, HashMap<String, ValueTree>>,
}

impl AttributeIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `locator` under every (attribute, value) pair.
    pub fn add(&mut self, namespace: &str, attrs: &BTreeMap<String, String>, locator: Locator) {
        if attrs.is_empty() {
            return;
        }
        let ns = self.namespaces.entry(namespace.to_string()).or_default();
        for (name, value) in attrs {
            ns.entry(name.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(locator);
        }
    }

    /// Removes `locator` from every (attribute, value) pair.
    ///
    /// Removing a mapping that does not exist is a no-op. Empty value sets,
    /// value trees, and namespaces are pruned.
    pub fn remove(&mut self, namespace: &str, attrs: &BTreeMap<String, String>, locator: Locator) {
        let Some(ns) = self.namespaces.get_mut(namespace) else {
            return;
        };
        for (name, value) in attrs {
            if let Some(tree) = ns.get_mut(name) {
                if let Some(locators) = tree.get_mut(value) {
                    locators.remove(&locator);
                    if locators.is_empty() {
                        tree.remove(value);
                    }
                }
                if tree.is_empty() {
                    ns.remove(name);
                }
            }
        }
        if ns.is_empty() {
            self.namespaces.remove(namespace);
        }
    }

    /// Returns locators under (namespace, attribute) whose value satisfies
    /// `pattern`, stopping once `threshold` results are produced.
    pub fn query(
        &self,
        namespace: &str,
        attribute: &str,
        pattern: &ValuePattern,
        threshold: usize,
    ) -> Vec<Locator> {
        let Some(tree) = self
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.get(attribute))
        else {
            return Vec::new();
        };

        let mut out = Vec::new();
        match pattern {
            ValuePattern::Exact(value) => {
                if let Some(locators) = tree.get(value) {
                    collect(locators, threshold, &mut out);
                }
            }
            ValuePattern::Prefix(prefix) => {
                for (_, locators) in tree
                    .range(prefix.clone()..)
                    .take_while(|(value, _)| value.starts_with(prefix.as_str()))
                {
                    if !collect(locators, threshold, &mut out) {
                        break;
                    }
                }
            }
            _ => {
                for (value, locators) in tree {
                    if !pattern.matches(value) {
                        continue;
                    }
                    if !collect(locators, threshold, &mut out) {
                        break;
                    }
                }
            }
        }
        out
    }

    /// Returns every distinct locator indexed under `namespace`, stopping at
    /// `threshold`.
    pub fn list_namespace(&self, namespace: &str, threshold: usize) -> Vec<Locator> {
        let Some(ns) = self.namespaces.get(namespace) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for tree in ns.values() {
            for locators in tree.values() {
                for &locator in locators {
                    if out.len() >= threshold {
                        return out;
                    }
                    if seen.insert(locator) {
                        out.push(locator);
                    }
                }
            }
        }
        out
    }

    /// Every (attribute, value, locator) triple indexed under `namespace`.
    ///
    /// Feeds the full replication listing (`get_entries`).
    pub fn entry_list(&self, namespace: &str) -> Vec<(String, String, Locator)> {
        let Some(ns) = self.namespaces.get(namespace) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for (name, tree) in ns {
            for (value, locators) in tree {
                for &locator in locators {
                    out.push((name.clone(), value.clone(), locator));
                }
            }
        }
        out
    }

    /// Removes every mapping pointing at `locator`. Idempotent.
    pub fn purge_locator(&mut self, locator: Locator) {
        self.namespaces.retain(|_, ns| {
            ns.retain(|_, tree| {
                tree.retain(|_, locators| {
                    locators.remove(&locator);
                    !locators.is_empty()
                });
                !tree.is_empty()
            });
            !ns.is_empty()
        });
    }

    /// Every registered (namespace, attribute) pair.
    ///
    /// The GC sweep walks these as independently-locked chunks.
    pub fn registered_chunks(&self) -> Vec<(String, String)> {
        let mut chunks: Vec<(String, String)> = self
            .namespaces
            .iter()
            .flat_map(|(ns, attrs)| {
                attrs.keys().map(move |name| (ns.clone(), name.clone()))
            })
            .collect();
        chunks.sort();
        chunks
    }

    /// Locators under one (namespace, attribute) chunk.
    pub fn chunk_locators(&self, namespace: &str, attribute: &str) -> Vec<Locator> {
        self.query(namespace, attribute, &ValuePattern::Any, usize::MAX)
    }

    /// Total number of (attribute, value, locator) mappings.
    pub fn mapping_count(&self) -> usize {
        self.namespaces
            .values()
            .flat_map(|ns| ns.values())
            .flat_map(|tree| tree.values())
            .map(|locators| locators.len())
            .sum()
    }
}

/// Appends locators until `threshold`; returns false once full.
fn collect(locators: &BTreeSet<Locator>, threshold: usize, out: &mut Vec<Locator>) -> bool {
    for &locator in locators {
        if out.len() >= threshold {
            return false;
        }
        out.push(locator);
    }
    out.len() < threshold
}
