//! # Managed Objects
//!
//! Any Kubernetes resource with static type information can be reconciled.
//! This trait exposes the handful of metadata fields the engine cares about.

use super::finalizer::FinalizerSet;
use super::key::{KeyError, ObjectKey};
use kube::Resource;
use std::fmt::Debug;

pub trait ManagedObject: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static {
    /// Queue key derived from namespace and name
    fn object_key(&self) -> Result<ObjectKey, KeyError> {
        let meta = self.meta();
        ObjectKey::from_parts(meta.namespace.as_deref(), meta.name.as_deref())
    }

    /// Version token used for optimistic concurrency
    fn version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }

    fn finalizer_set(&self) -> FinalizerSet {
        FinalizerSet::from_metadata(self.meta().finalizers.as_ref())
    }

    fn set_finalizer_set(&mut self, finalizers: FinalizerSet) {
        self.meta_mut().finalizers = finalizers.into_metadata();
    }

    fn has_finalizer(&self, token: &str) -> bool {
        self.meta()
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|x| x == token))
    }

    /// Deletion has been requested but not completed
    fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }
}

impl<K> ManagedObject for K where K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static
{}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Astro, AstroSpec};

    #[test]
    fn test_key_and_finalizers_from_metadata() {
        let mut astro = Astro::new("a", AstroSpec::default());
        astro.metadata.namespace = Some("ns".to_string());
        astro.metadata.finalizers = Some(vec!["x".to_string()]);
        assert_eq!(astro.object_key().unwrap().to_string(), "ns/a");
        assert!(astro.has_finalizer("x"));
        assert!(!astro.is_deleting());

        let mut set = astro.finalizer_set();
        set.remove("x");
        astro.set_finalizer_set(set);
        assert!(astro.metadata.finalizers.is_none());
    }

    #[test]
    fn test_unnamed_object_has_no_key() {
        let mut astro = Astro::new("a", AstroSpec::default());
        astro.metadata.name = None;
        assert_eq!(astro.object_key(), Err(KeyError::MissingName));
    }
}
