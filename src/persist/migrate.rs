//! Versioned migrations for persisted views.
//!
//! Steps work on `serde_json::Value` so each one can describe the shape it
//! receives without a Rust type per historical version.

use crate::error::{Result, StoreError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

type StepFn = Box<dyn Fn(Value) -> Result<Value> + Send + Sync>;

struct MigrationStep {
    description: &'static str,
    apply: StepFn,
}

/// Ordered chain of migration steps, keyed by the version each step upgrades from.
#[derive(Default)]
pub struct Migrations {
    steps: BTreeMap<u32, MigrationStep>,
}

impl Migrations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the step that turns a `from` shape into a `from + 1` shape.
    pub fn step<F>(mut self, from: u32, description: &'static str, apply: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.steps.insert(
            from,
            MigrationStep {
                description,
                apply: Box::new(apply),
            },
        );
        self
    }

    /// Bring `value` from `stored` up to `current`.
    ///
    /// Versions with no registered step are carried over unchanged. A value
    /// written by a newer schema is returned as-is.
    pub fn run(&self, value: Value, stored: u32, current: u32) -> Result<Value> {
        if stored >= current {
            if stored > current {
                debug!(stored, current, "persisted view is newer than schema, passing through");
            }
            return Ok(value);
        }

        let mut value = value;
        for version in stored..current {
            match self.steps.get(&version) {
                Some(step) => {
                    debug!(from = version, to = version + 1, step = step.description, "migrating persisted view");
                    value = (step.apply)(value).map_err(|e| match e {
                        StoreError::Migration { .. } => e,
                        other => StoreError::Migration {
                            from: version,
                            reason: other.to_string(),
                        },
                    })?;
                }
                None => debug!(from = version, "no migration step registered"),
            }
        }
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Debug for Migrations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.steps.iter().map(|(from, step)| (from, step.description)))
            .finish()
    }
}
