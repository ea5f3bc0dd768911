//! Tag → key index.
//!
//! A best-effort shadow of which keys were stored under which tags. It is
//! local to the process and can go stale when the store expires keys on
//! its own; [`crate::Cache::reconcile_tags`] prunes those entries.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct TagIndex {
    tags: Mutex<HashMap<String, HashSet<String>>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key` under each of `tags`.
    pub fn tag<T: AsRef<str>>(&self, key: &str, tags: &[T]) {
        if tags.is_empty() {
            return;
        }
        let mut index = self.tags.lock();
        for tag in tags {
            index
                .entry(tag.as_ref().to_string())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Removes `key` from every tag, dropping tags left empty.
    pub fn remove_key(&self, key: &str) {
        let mut index = self.tags.lock();
        index.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
    }

    /// Removes the given tags and returns the union of their keys.
    pub fn take<T: AsRef<str>>(&self, tags: &[T]) -> HashSet<String> {
        let mut index = self.tags.lock();
        let mut keys = HashSet::new();
        for tag in tags {
            if let Some(tagged) = index.remove(tag.as_ref()) {
                keys.extend(tagged);
            }
        }
        keys
    }

    /// Keys currently recorded under `tag`.
    pub fn keys_for(&self, tag: &str) -> HashSet<String> {
        self.tags.lock().get(tag).cloned().unwrap_or_default()
    }

    /// Every key referenced by any tag.
    pub fn indexed_keys(&self) -> HashSet<String> {
        self.tags.lock().values().flatten().cloned().collect()
    }

    pub fn clear(&self) {
        self.tags.lock().clear();
    }

    pub fn tag_count(&self) -> usize {
        self.tags.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_and_lookup() {
        let index = TagIndex::new();
        index.tag("user:1", &["users", "profile"]);
        index.tag("user:2", &["users"]);

        assert_eq!(index.keys_for("users").len(), 2);
        assert_eq!(index.keys_for("profile").len(), 1);
        assert!(index.keys_for("missing").is_empty());
    }

    #[test]
    fn test_remove_key_prunes_empty_tags() {
        let index = TagIndex::new();
        index.tag("a", &["t1", "t2"]);
        index.tag("b", &["t2"]);

        index.remove_key("a");

        assert_eq!(index.tag_count(), 1);
        assert!(index.keys_for("t2").contains("b"));
    }

    #[test]
    fn test_take_unions_and_removes() {
        let index = TagIndex::new();
        index.tag("a", &["t1"]);
        index.tag("b", &["t2"]);
        index.tag("c", &["t3"]);

        let keys = index.take(&["t1", "t2", "nope"]);

        assert_eq!(keys.len(), 2);
        assert!(keys.contains("a") && keys.contains("b"));
        assert_eq!(index.tag_count(), 1);
        assert!(index.keys_for("t3").contains("c"));
    }

    #[test]
    fn test_empty_tags_is_noop() {
        let index = TagIndex::new();
        index.tag::<&str>("a", &[]);
        assert!(index.is_empty());
    }

    #[test]
    fn test_concurrent_tagging() {
        use std::sync::Arc;

        let index = Arc::new(TagIndex::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let index = index.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        index.tag(&format!("k{i}:{j}"), &["shared"]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(index.keys_for("shared").len(), 800);
    }
}
