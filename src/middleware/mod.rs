//! Commit pipeline.
//!
//! Every commit produced by the mutation core is handed to each stage in a
//! fixed order, inner to outer:
//!
//! 1. change broadcast ([`SubscriptionManager`](crate::subscriptions::SubscriptionManager))
//! 2. persistence ([`PersistAdapter`](crate::persist::PersistAdapter))
//! 3. devtools inspection ([`DevtoolsInspector`])
//!
//! Each stage is optional. A failing stage is logged and skipped; the commit it
//! observed stays committed.

mod devtools;

pub use devtools::{DevtoolsInspector, InspectorHandle, Transition};

use crate::error::Result;
use crate::store::Commit;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// A stage observing committed snapshots.
pub trait Middleware<S>: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_commit(&self, commit: &Commit<'_, S>) -> Result<()>;
}

/// Ordered list of stages run after each commit.
pub struct Pipeline<S> {
    stages: Vec<Arc<dyn Middleware<S>>>,
}

impl<S> Pipeline<S> {
    pub(crate) fn new(stages: Vec<Arc<dyn Middleware<S>>>) -> Self {
        Self { stages }
    }

    pub(crate) fn run(&self, commit: &Commit<'_, S>) {
        for stage in &self.stages {
            if let Err(e) = stage.on_commit(commit) {
                warn!(
                    stage = stage.name(),
                    label = commit.label,
                    version = %commit.current.version,
                    error = %e,
                    "middleware stage failed"
                );
            }
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl<S> fmt::Debug for Pipeline<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}
