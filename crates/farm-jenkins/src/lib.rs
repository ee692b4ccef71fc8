//! Jenkins adapters for the buildfarm.
//!
//! - [`JenkinsBackend`] opens [`JenkinsClient`] sessions over the remote API.
//! - [`GroovyScriptSink`] writes job and view documents plus a script
//!   that applies them from the Jenkins script console.
//! - [`XmlJobRenderer`] turns job records into `config.xml` documents.

pub mod client;
pub mod error;
pub mod render;
pub mod script;

pub use client::{JenkinsBackend, JenkinsClient, JenkinsConfig};
pub use error::JenkinsError;
pub use render::XmlJobRenderer;
pub use script::GroovyScriptSink;
