//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the job generator and its
//! collaborators: the metadata source, the templating engine and the CI
//! backend.

use crate::error::BackendError;
use crate::job::{JobRecord, ViewSpec};
use crate::package::Package;
use crate::Result;
use async_trait::async_trait;

/// Supplies a package's raw dependency names from its build-recipe.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Fetch and parse the build-recipe for `package`.
    ///
    /// Fails with [`crate::Error::Fetch`] when the recipe cannot be
    /// retrieved or parsed.
    async fn fetch(&self, package: &str) -> Result<Package>;
}

/// Turns job and view records into backend-native configuration documents.
pub trait JobRenderer: Send + Sync {
    fn render_job(&self, record: &JobRecord) -> Result<String>;

    fn render_view(&self, view: &ViewSpec) -> Result<String>;
}

/// Opens sessions against a CI backend.
#[async_trait]
pub trait CiBackend: Send + Sync {
    async fn connect(&self) -> std::result::Result<Box<dyn CiSession>, BackendError>;
}

/// A live writer session against a CI backend.
///
/// One session is held per pass and released with [`CiSession::close`].
#[async_trait]
pub trait CiSession: Send + Sync {
    /// Names of every job the backend holds.
    async fn list_jobs(&self) -> std::result::Result<Vec<String>, BackendError>;

    /// Stored configuration document of a job.
    async fn job_config(&self, name: &str) -> std::result::Result<String, BackendError>;

    async fn create_job(&self, name: &str, config: &str) -> std::result::Result<(), BackendError>;

    async fn update_job(&self, name: &str, config: &str) -> std::result::Result<(), BackendError>;

    async fn delete_job(&self, name: &str) -> std::result::Result<(), BackendError>;

    /// Create the view if missing, otherwise replace its configuration.
    async fn upsert_view(&self, name: &str, config: &str) -> std::result::Result<(), BackendError>;

    async fn close(&self) -> std::result::Result<(), BackendError>;
}

/// Collects job and view documents for offline application.
#[async_trait]
pub trait ScriptSink: Send + Sync {
    async fn write_job(&self, name: &str, config: &str) -> Result<()>;

    async fn write_view(&self, name: &str, config: &str) -> Result<()>;

    /// Emit the script tying all written documents together.
    async fn finish(&self) -> Result<()>;
}

/// How a pass reaches the backend.
pub enum BackendHandle {
    /// Read and write through a live session.
    Connected(Box<dyn CiSession>),
    /// Read through a live session; never mutate.
    DryRun(Box<dyn CiSession>),
    /// Never contact the backend; write documents and a script instead.
    OfflineScript(Box<dyn ScriptSink>),
}

impl BackendHandle {
    /// Session used for reading the inventory, if any.
    pub fn reader(&self) -> Option<&dyn CiSession> {
        match self {
            BackendHandle::Connected(session) | BackendHandle::DryRun(session) => {
                Some(session.as_ref())
            }
            BackendHandle::OfflineScript(_) => None,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, BackendHandle::DryRun(_))
    }

    pub fn mode(&self) -> &'static str {
        match self {
            BackendHandle::Connected(_) => "connected",
            BackendHandle::DryRun(_) => "dry-run",
            BackendHandle::OfflineScript(_) => "offline-script",
        }
    }

    /// Release the session or flush the script sink.
    pub async fn release(self) -> Result<()> {
        match self {
            BackendHandle::Connected(session) | BackendHandle::DryRun(session) => {
                session.close().await?;
                Ok(())
            }
            BackendHandle::OfflineScript(sink) => sink.finish().await,
        }
    }

    /// Release the session without flushing anything a script sink holds.
    pub async fn abandon(self) -> Result<()> {
        match self {
            BackendHandle::Connected(session) | BackendHandle::DryRun(session) => {
                session.close().await?;
                Ok(())
            }
            BackendHandle::OfflineScript(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BackendHandle").field(&self.mode()).finish()
    }
}
