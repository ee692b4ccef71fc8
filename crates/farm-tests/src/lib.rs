//! Test infrastructure for the buildfarm.
//!
//! Provides build file and package fixtures plus in-memory stand-ins for
//! the metadata source, the templating engine and the CI backend, so whole
//! passes can run without network access.
//!
//! # Usage
//!
//! ```ignore
//! use farm_tests::{BuildFileFixture, InMemoryBackend, StaticMetadataProvider};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let backend = InMemoryBackend::new();
//!     let provider = StaticMetadataProvider::new([pkg("a", &["b"]), pkg("b", &[])]);
//!     // Build a PassContext and call run_pass.
//! }
//! ```

pub mod fakes;
pub mod fixtures;

pub use fakes::*;
pub use fixtures::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,farm_scheduler=debug")),
        )
        .with_test_writer()
        .try_init();
}
