//! Completion items for script editors.
//!
//! Lists every name reachable in the script sandbox, scored by kind so that
//! modules and functions sort ahead of plain values. The list is computed once
//! per process and reused until explicitly invalidated.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Mapping key that is listed as a leaf instead of being expanded.
const OPAQUE_MAPPING: &str = "form_dict";

/// Kind of a name exposed to scripts.
#[derive(Debug, Clone, PartialEq)]
pub enum NamespaceEntry {
    Module,
    Function,
    Type,
    ExceptionType,
    Value,
    Mapping(Namespace),
}

impl NamespaceEntry {
    fn score(&self) -> u8 {
        match self {
            NamespaceEntry::ExceptionType => 0,
            NamespaceEntry::Module => 10,
            NamespaceEntry::Function => 9,
            NamespaceEntry::Type => 8,
            NamespaceEntry::Mapping(_) => 7,
            NamespaceEntry::Value => 6,
        }
    }
}

/// Tree of names visible to scripts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Namespace {
    entries: BTreeMap<String, NamespaceEntry>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: NamespaceEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&NamespaceEntry> {
        self.entries.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionItem {
    pub value: String,
    pub score: u8,
}

/// Flatten a namespace into scored, dotted names.
pub fn completion_items(namespace: &Namespace) -> Vec<CompletionItem> {
    let mut out = Vec::new();
    collect(namespace, "", &mut out);
    out
}

fn collect(namespace: &Namespace, prefix: &str, out: &mut Vec<CompletionItem>) {
    for (name, entry) in &namespace.entries {
        if name.starts_with('_') {
            continue;
        }
        let full = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match entry {
            NamespaceEntry::Mapping(inner) if !inner.is_empty() && name != OPAQUE_MAPPING => {
                collect(inner, &full, out);
            }
            _ => out.push(CompletionItem {
                value: full,
                score: entry.score(),
            }),
        }
    }
}

/// Lazily computed completion list with explicit invalidation.
#[derive(Debug, Default)]
pub struct CompletionCache {
    items: RwLock<Option<Arc<Vec<CompletionItem>>>>,
}

impl CompletionCache {
    pub const fn new() -> Self {
        Self {
            items: RwLock::new(None),
        }
    }

    /// Return the cached list, building it from `namespace` on first use.
    pub fn get_or_build<F>(&self, namespace: F) -> Arc<Vec<CompletionItem>>
    where
        F: FnOnce() -> Namespace,
    {
        if let Some(items) = self.items.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Arc::clone(items);
        }

        let mut guard = self.items.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have filled the slot while we waited.
        if let Some(items) = guard.as_ref() {
            return Arc::clone(items);
        }
        let items = Arc::new(completion_items(&namespace()));
        *guard = Some(Arc::clone(&items));
        items
    }

    pub fn invalidate(&self) {
        self.items.write().unwrap_or_else(PoisonError::into_inner).take();
    }
}

static PROCESS_CACHE: CompletionCache = CompletionCache::new();

/// Process-wide completion list for the script sandbox.
pub fn autocompletion_items<F>(namespace: F) -> Arc<Vec<CompletionItem>>
where
    F: FnOnce() -> Namespace,
{
    PROCESS_CACHE.get_or_build(namespace)
}

/// Drop the process-wide list so the next call rebuilds it.
pub fn invalidate_autocompletion_items() {
    PROCESS_CACHE.invalidate();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Namespace {
        let mut utils = Namespace::new();
        utils.insert("today", NamespaceEntry::Function);
        utils.insert("_private", NamespaceEntry::Function);

        let mut form = Namespace::new();
        form.insert("name", NamespaceEntry::Value);

        let mut ns = Namespace::new();
        ns.insert("json", NamespaceEntry::Module);
        ns.insert("utils", NamespaceEntry::Mapping(utils));
        ns.insert("form_dict", NamespaceEntry::Mapping(form));
        ns.insert("empty", NamespaceEntry::Mapping(Namespace::new()));
        ns.insert("Record", NamespaceEntry::Type);
        ns.insert("ValidationError", NamespaceEntry::ExceptionType);
        ns.insert("limit", NamespaceEntry::Value);
        ns
    }

    fn score_of(items: &[CompletionItem], value: &str) -> Option<u8> {
        items.iter().find(|i| i.value == value).map(|i| i.score)
    }

    #[test]
    fn test_scores_by_kind() {
        let items = completion_items(&sample());
        assert_eq!(score_of(&items, "json"), Some(10));
        assert_eq!(score_of(&items, "utils.today"), Some(9));
        assert_eq!(score_of(&items, "Record"), Some(8));
        assert_eq!(score_of(&items, "empty"), Some(7));
        assert_eq!(score_of(&items, "limit"), Some(6));
        assert_eq!(score_of(&items, "ValidationError"), Some(0));
    }

    #[test]
    fn test_private_names_skipped_and_form_dict_not_expanded() {
        let items = completion_items(&sample());
        assert_eq!(score_of(&items, "utils._private"), None);
        assert_eq!(score_of(&items, "utils"), None);
        assert_eq!(score_of(&items, "form_dict"), Some(7));
        assert_eq!(score_of(&items, "form_dict.name"), None);
    }

    #[test]
    fn test_cache_builds_once_until_invalidated() {
        let cache = CompletionCache::new();
        let mut builds = 0;

        let first = cache.get_or_build(|| {
            builds += 1;
            sample()
        });
        let second = cache.get_or_build(|| {
            builds += 1;
            Namespace::new()
        });
        assert_eq!(builds, 1);
        assert!(Arc::ptr_eq(&first, &second));

        cache.invalidate();
        let third = cache.get_or_build(|| {
            builds += 1;
            Namespace::new()
        });
        assert_eq!(builds, 2);
        assert!(third.is_empty());
    }
}
