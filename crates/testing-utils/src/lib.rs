//! # Harvest Testing Utils
//!
//! Shared testing utilities for the harvest workspace.
//!
//! ## Features
//!
//! - **Handlers**: task handlers that fail on a script or record concurrency
//! - **Probes**: a scripted proxy probe for health-check tests
//! - **Builders**: task and request builders with sensible defaults
//! - **Helpers**: polling and event-collection helpers
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! harvest-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod handlers;
pub mod helpers;
pub mod probes;

pub use builders::*;
pub use handlers::*;
pub use helpers::*;
pub use probes::*;
