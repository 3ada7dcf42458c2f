//! # Finalizer Set
//!
//! Finalizers are order-insensitive and membership-tested, so they are held
//! in a set. Insert and remove are idempotent and report whether anything
//! changed, which tells callers whether a write is needed.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizerSet(BTreeSet<String>);

impl FinalizerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the optional list stored in object metadata
    pub fn from_metadata(finalizers: Option<&Vec<String>>) -> Self {
        finalizers.into_iter().flatten().cloned().collect()
    }

    /// Convert back to the metadata representation (`None` when empty)
    pub fn into_metadata(self) -> Option<Vec<String>> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.into_iter().collect())
        }
    }

    /// Returns true if the token was not already present
    pub fn insert(&mut self, token: &str) -> bool {
        self.0.insert(token.to_string())
    }

    /// Returns true if the token was present
    pub fn remove(&mut self, token: &str) -> bool {
        self.0.remove(token)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromIterator<String> for FinalizerSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for FinalizerSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_collapse() {
        let raw = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let set = FinalizerSet::from_metadata(Some(&raw));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_insert_and_remove_are_idempotent() {
        let mut set = FinalizerSet::new();
        assert!(set.insert("token"));
        assert!(!set.insert("token"));
        assert_eq!(set.len(), 1);
        assert!(set.remove("token"));
        assert!(!set.remove("token"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_empty_set_clears_metadata() {
        assert_eq!(FinalizerSet::new().into_metadata(), None);
        let set: FinalizerSet = ["x"].into_iter().collect();
        assert_eq!(set.into_metadata(), Some(vec!["x".to_string()]));
    }

    #[test]
    fn test_other_finalizers_are_preserved() {
        let raw = vec!["other.io/guard".to_string(), "mine".to_string()];
        let mut set = FinalizerSet::from_metadata(Some(&raw));
        set.remove("mine");
        assert!(set.contains("other.io/guard"));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["other.io/guard"]);
    }
}
