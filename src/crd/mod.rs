//! # Custom Resource Definitions
//!
//! CRD types for the Astro controller.
//!
//! ## Module Structure
//!
//! - `astro.rs` - The `Astro` resource and its star definitions

mod astro;

pub use astro::{Astro, AstroSpec, AstroStar};
