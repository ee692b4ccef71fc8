//! In-memory stand-ins for the pass collaborators.

use async_trait::async_trait;
use farm_core::error::{BackendError, Error, Result};
use farm_core::job::{JobRecord, ViewSpec};
use farm_core::package::Package;
use farm_core::ports::{CiBackend, CiSession, JobRenderer, MetadataProvider, ScriptSink};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Serves package metadata from a fixed table.
#[derive(Debug, Default)]
pub struct StaticMetadataProvider {
    packages: BTreeMap<String, Package>,
    failing: BTreeSet<String>,
    fetches: AtomicUsize,
}

impl StaticMetadataProvider {
    pub fn new(packages: impl IntoIterator<Item = Package>) -> Self {
        Self {
            packages: packages.into_iter().map(|p| (p.name.clone(), p)).collect(),
            ..Self::default()
        }
    }

    /// Make fetching `package` fail.
    pub fn with_failure(mut self, package: &str) -> Self {
        self.failing.insert(package.to_string());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataProvider for StaticMetadataProvider {
    async fn fetch(&self, package: &str) -> Result<Package> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(package) {
            return Err(Error::fetch(package, "recipe returned HTTP 404"));
        }
        self.packages
            .get(package)
            .cloned()
            .ok_or_else(|| Error::fetch(package, "no such recipe"))
    }
}

/// Renders records as JSON so payloads change whenever a record does.
#[derive(Debug, Default, Clone)]
pub struct JsonRenderer;

impl JobRenderer for JsonRenderer {
    fn render_job(&self, record: &JobRecord) -> Result<String> {
        Ok(serde_json::to_string_pretty(record)?)
    }

    fn render_view(&self, view: &ViewSpec) -> Result<String> {
        Ok(serde_json::to_string_pretty(view)?)
    }
}

/// One call received by an [`InMemoryBackend`] session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    ListJobs,
    JobConfig(String),
    CreateJob(String),
    UpdateJob(String),
    DeleteJob(String),
    UpsertView(String),
    Close,
}

impl BackendCall {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            BackendCall::CreateJob(_)
                | BackendCall::UpdateJob(_)
                | BackendCall::DeleteJob(_)
                | BackendCall::UpsertView(_)
        )
    }
}

#[derive(Debug, Default)]
struct BackendState {
    jobs: BTreeMap<String, String>,
    views: BTreeMap<String, String>,
    calls: Vec<BackendCall>,
    connects: usize,
    closes: usize,
    failing: BTreeSet<String>,
}

/// A CI backend that keeps jobs in memory and records every call.
///
/// Clones share state, so a test can keep one clone for assertions while a
/// pass uses another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a stored job.
    pub fn with_job(self, name: &str, config: &str) -> Self {
        self.lock().jobs.insert(name.to_string(), config.to_string());
        self
    }

    /// Make every mutation of `name` fail with a transient error.
    pub fn with_failing_job(self, name: &str) -> Self {
        self.lock().failing.insert(name.to_string());
        self
    }

    pub fn jobs(&self) -> BTreeMap<String, String> {
        self.lock().jobs.clone()
    }

    pub fn views(&self) -> BTreeMap<String, String> {
        self.lock().views.clone()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Mutating calls, in the order they arrived.
    pub fn mutations(&self) -> Vec<BackendCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    /// Job mutations only; views are upserted on every connected pass.
    pub fn job_mutations(&self) -> Vec<BackendCall> {
        self.mutations()
            .into_iter()
            .filter(|call| !matches!(call, BackendCall::UpsertView(_)))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CiBackend for InMemoryBackend {
    async fn connect(&self) -> std::result::Result<Box<dyn CiSession>, BackendError> {
        self.lock().connects += 1;
        Ok(Box::new(InMemorySession {
            backend: self.clone(),
        }))
    }
}

struct InMemorySession {
    backend: InMemoryBackend,
}

impl InMemorySession {
    fn mutate(
        &self,
        call: BackendCall,
        name: &str,
        apply: impl FnOnce(&mut BackendState) -> std::result::Result<(), BackendError>,
    ) -> std::result::Result<(), BackendError> {
        let mut state = self.backend.lock();
        state.calls.push(call);
        if state.failing.contains(name) {
            return Err(BackendError::transient(format!(
                "HTTP 503 while changing '{name}'"
            )));
        }
        apply(&mut state)
    }
}

#[async_trait]
impl CiSession for InMemorySession {
    async fn list_jobs(&self) -> std::result::Result<Vec<String>, BackendError> {
        let mut state = self.backend.lock();
        state.calls.push(BackendCall::ListJobs);
        Ok(state.jobs.keys().cloned().collect())
    }

    async fn job_config(&self, name: &str) -> std::result::Result<String, BackendError> {
        let mut state = self.backend.lock();
        state.calls.push(BackendCall::JobConfig(name.to_string()));
        state
            .jobs
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::fatal(format!("no job named '{name}'")))
    }

    async fn create_job(&self, name: &str, config: &str) -> std::result::Result<(), BackendError> {
        self.mutate(BackendCall::CreateJob(name.to_string()), name, |state| {
            if state.jobs.contains_key(name) {
                return Err(BackendError::fatal(format!("job '{name}' already exists")));
            }
            state.jobs.insert(name.to_string(), config.to_string());
            Ok(())
        })
    }

    async fn update_job(&self, name: &str, config: &str) -> std::result::Result<(), BackendError> {
        self.mutate(BackendCall::UpdateJob(name.to_string()), name, |state| {
            match state.jobs.get_mut(name) {
                Some(stored) => {
                    *stored = config.to_string();
                    Ok(())
                }
                None => Err(BackendError::fatal(format!("no job named '{name}'"))),
            }
        })
    }

    async fn delete_job(&self, name: &str) -> std::result::Result<(), BackendError> {
        self.mutate(BackendCall::DeleteJob(name.to_string()), name, |state| {
            state
                .jobs
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| BackendError::fatal(format!("no job named '{name}'")))
        })
    }

    async fn upsert_view(&self, name: &str, config: &str) -> std::result::Result<(), BackendError> {
        self.mutate(BackendCall::UpsertView(name.to_string()), name, |state| {
            state.views.insert(name.to_string(), config.to_string());
            Ok(())
        })
    }

    async fn close(&self) -> std::result::Result<(), BackendError> {
        let mut state = self.backend.lock();
        state.calls.push(BackendCall::Close);
        state.closes += 1;
        Ok(())
    }
}

/// A backend whose connection attempts always fail.
#[derive(Debug, Clone)]
pub struct FailingBackend {
    error: BackendError,
}

impl FailingBackend {
    pub fn new(error: BackendError) -> Self {
        Self { error }
    }

    pub fn unreachable() -> Self {
        Self::new(BackendError::transient("connection refused"))
    }
}

#[async_trait]
impl CiBackend for FailingBackend {
    async fn connect(&self) -> std::result::Result<Box<dyn CiSession>, BackendError> {
        Err(self.error.clone())
    }
}

#[derive(Debug, Default)]
struct SinkState {
    jobs: BTreeMap<String, String>,
    views: BTreeMap<String, String>,
    finished: usize,
    fail_finish: bool,
}

/// A script sink that keeps documents in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make finalising the script fail.
    pub fn with_failing_finish(self) -> Self {
        self.lock().fail_finish = true;
        self
    }

    pub fn jobs(&self) -> BTreeMap<String, String> {
        self.lock().jobs.clone()
    }

    pub fn views(&self) -> BTreeMap<String, String> {
        self.lock().views.clone()
    }

    /// How many times the script was finalised.
    pub fn finished(&self) -> usize {
        self.lock().finished
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ScriptSink for RecordingSink {
    async fn write_job(&self, name: &str, config: &str) -> Result<()> {
        self.lock().jobs.insert(name.to_string(), config.to_string());
        Ok(())
    }

    async fn write_view(&self, name: &str, config: &str) -> Result<()> {
        self.lock().views.insert(name.to_string(), config.to_string());
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        let mut state = self.lock();
        if state.fail_finish {
            return Err(Error::Io(std::io::Error::other("disk full")));
        }
        state.finished += 1;
        Ok(())
    }
}
