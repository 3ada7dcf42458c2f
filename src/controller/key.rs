//! # Object Keys
//!
//! Keys are the only unit of work in the queue. They are derived from an
//! object's namespace and name as `<namespace>/<name>`, or `<name>` for
//! cluster-scoped objects.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("unexpected key format: {0:?}")]
    Malformed(String),
    #[error("object has no name")]
    MissingName,
}

/// Namespace/name identity of a managed object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Build a key from raw metadata fields
    ///
    /// An empty namespace is treated as cluster scope.
    pub fn from_parts(namespace: Option<&str>, name: Option<&str>) -> Result<Self, KeyError> {
        let name = name.filter(|n| !n.is_empty()).ok_or(KeyError::MissingName)?;
        Ok(Self {
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            name: name.to_string(),
        })
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = KeyError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let mut parts = key.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Ok(Self::cluster(name)),
            (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => {
                Ok(Self::namespaced(ns, name))
            }
            _ => Err(KeyError::Malformed(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_namespaced_key() {
        let key: ObjectKey = "ns/a".parse().unwrap();
        assert_eq!(key, ObjectKey::namespaced("ns", "a"));
        assert_eq!(key.to_string(), "ns/a");
    }

    #[test]
    fn test_parse_cluster_key() {
        let key: ObjectKey = "global".parse().unwrap();
        assert_eq!(key.namespace(), None);
        assert_eq!(key.to_string(), "global");
    }

    #[test]
    fn test_malformed_keys_are_rejected() {
        for raw in ["", "/", "ns/", "/name", "a/b/c", "a//b"] {
            assert!(
                matches!(raw.parse::<ObjectKey>(), Err(KeyError::Malformed(_))),
                "{raw:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_from_parts_requires_name() {
        assert_eq!(
            ObjectKey::from_parts(Some("ns"), None),
            Err(KeyError::MissingName)
        );
        assert_eq!(
            ObjectKey::from_parts(Some(""), Some("x")).unwrap(),
            ObjectKey::cluster("x")
        );
    }
}
