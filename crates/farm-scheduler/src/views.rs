//! Dashboard views.
//!
//! One view per target, grouping the package jobs of that target by name
//! pattern. Views are recomputed from the naming scheme every pass.

use crate::matrix::TargetMatrix;
use crate::naming::JobNamer;
use crate::report::{ApplyResult, ViewOutcome};
use farm_core::error::BackendError;
use farm_core::job::ViewSpec;
use farm_core::ports::{BackendHandle, JobRenderer};
use std::collections::BTreeMap;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct ViewManager<'a> {
    namer: &'a JobNamer,
}

impl<'a> ViewManager<'a> {
    pub fn new(namer: &'a JobNamer) -> Self {
        Self { namer }
    }

    /// Views for every target of `matrix`, sorted by name.
    pub fn derive(&self, matrix: &TargetMatrix) -> Vec<ViewSpec> {
        let views: BTreeMap<String, ViewSpec> = matrix
            .targets()
            .iter()
            .map(|target| {
                let name = self.namer.view(target);
                let view = ViewSpec {
                    name: name.clone(),
                    include_regex: self.namer.view_pattern(target),
                    target: target.clone(),
                };
                (name, view)
            })
            .collect();
        views.into_values().collect()
    }

    /// Render and upsert `views` one at a time.
    pub async fn apply(
        &self,
        handle: &BackendHandle,
        renderer: &dyn JobRenderer,
        views: &[ViewSpec],
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<ViewOutcome> {
        let mut outcomes = Vec::with_capacity(views.len());

        for view in views {
            let result = if *shutdown.borrow() {
                Ok(ApplyResult::Skipped)
            } else {
                upsert(handle, renderer, view).await
            };

            let (result, error) = match result {
                Ok(result) => (result, None),
                Err(err) => {
                    warn!(view = %view.name, error = %err, "View update failed");
                    (ApplyResult::Failed, Some(err))
                }
            };
            outcomes.push(ViewOutcome {
                name: view.name.clone(),
                include_regex: view.include_regex.clone(),
                result,
                error,
            });
        }

        outcomes
    }
}

async fn upsert(
    handle: &BackendHandle,
    renderer: &dyn JobRenderer,
    view: &ViewSpec,
) -> Result<ApplyResult, BackendError> {
    let config = renderer
        .render_view(view)
        .map_err(|e| BackendError::fatal(e.to_string()))?;

    match handle {
        BackendHandle::Connected(session) => {
            session.upsert_view(&view.name, &config).await?;
            debug!(view = %view.name, "Configured view");
            Ok(ApplyResult::Applied)
        }
        BackendHandle::DryRun(_) => Ok(ApplyResult::Planned),
        BackendHandle::OfflineScript(sink) => {
            sink.write_view(&view.name, &config)
                .await
                .map_err(|e| BackendError::fatal(e.to_string()))?;
            Ok(ApplyResult::Applied)
        }
    }
}
