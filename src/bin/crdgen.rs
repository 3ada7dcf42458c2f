//! # CRD Generator
//!
//! Prints the `Astro` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use anyhow::{Context, Result};
use astro_controller::crd::Astro;
use kube::core::CustomResourceExt;

fn main() -> Result<()> {
    let yaml = serde_yaml::to_string(&Astro::crd()).context("Failed to serialize CRD to YAML")?;
    print!("{yaml}");
    Ok(())
}
