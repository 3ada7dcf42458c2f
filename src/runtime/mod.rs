//! # Runtime
//!
//! Binary-side wiring for the `Astro` controller.
//!
//! - `initialization`: process setup (TLS, tracing, metrics, server, client)
//! - `policy`: lifecycle hooks for `Astro` resources
//! - `watch_loop`: runs the controller until shutdown

pub mod initialization;
pub mod policy;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use policy::AstroPolicy;
pub use watch_loop::run_watch_loop;
