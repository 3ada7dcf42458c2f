//! # Astro
//!
//! An `Astro` declares a small graph of containerised "stars" that the
//! controller keeps running. Each star may depend on other stars by name.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Astro Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: astertower.kasterism.io/v1alpha1
/// kind: Astro
/// metadata:
///   name: pipeline
///   namespace: default
/// spec:
///   stars:
///     - name: fetch
///       image: ghcr.io/kasterism/fetch:latest
///       port: 8080
///     - name: render
///       image: ghcr.io/kasterism/render:latest
///       dependencies: ["fetch"]
/// ```
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Astro",
    group = "astertower.kasterism.io",
    version = "v1alpha1",
    namespaced,
    shortname = "astro",
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AstroSpec {
    /// Stars that make up this Astro
    #[serde(default)]
    pub stars: Vec<AstroStar>,
}

/// A single workload inside an Astro
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstroStar {
    /// Unique name of the star within the Astro
    pub name: String,
    /// Container image to run
    pub image: String,
    /// Action the star performs (e.g. an HTTP verb for request stars)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Port the star listens on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    /// Names of stars that must be ready before this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_crd_identity() {
        let crd = Astro::crd();
        assert_eq!(crd.spec.group, "astertower.kasterism.io");
        assert_eq!(crd.spec.names.kind, "Astro");
        assert_eq!(crd.spec.names.plural, "astros");
        assert_eq!(crd.spec.scope, "Namespaced");
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: AstroSpec = serde_json::from_value(serde_json::json!({
            "stars": [{"name": "fetch", "image": "fetch:latest"}]
        }))
        .unwrap();
        assert_eq!(spec.stars.len(), 1);
        assert!(spec.stars[0].dependencies.is_empty());
        assert!(spec.stars[0].port.is_none());
    }

    #[test]
    fn test_empty_spec_is_accepted() {
        let spec: AstroSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(spec.stars.is_empty());
    }
}
