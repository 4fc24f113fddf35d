//! Ordering of the pipeline relative to host build steps.
//!
//! The pipeline never runs host steps itself. It only declares "before" and
//! "after" constraints through [`StepRegistry`]; the host maps each
//! [`StepRole`] onto its own step names. [`StepPlan`] is a small in-process
//! host used by the CLI and tests.

use std::collections::HashMap;
use std::fmt;

use anyhow::{bail, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use tracing::{debug, warn};

/// Host steps the pipeline orders itself against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StepRole {
    PreBuild,
    GenerateBuildConfig,
    Assemble,
}

impl StepRole {
    #[must_use]
    pub fn default_name(self) -> &'static str {
        match self {
            Self::PreBuild => "preBuild",
            Self::GenerateBuildConfig => "generateBuildConfig",
            Self::Assemble => "assemble",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineStep {
    Prepare,
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StepRef {
    Pipeline(PipelineStep),
    Host(StepRole),
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline(PipelineStep::Prepare) => f.write_str("prepareStandalone"),
            Self::Pipeline(PipelineStep::Cleanup) => f.write_str("cleanupStandalone"),
            Self::Host(role) => f.write_str(role.default_name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Relation {
    /// `step` must run before `other` when both are scheduled.
    RunsBefore,
    /// `step` depends on `other`.
    RunsAfter,
    /// `step` runs after `other` whether or not `other` succeeded.
    Finalizes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderingConstraint {
    pub step: StepRef,
    pub relation: Relation,
    pub other: StepRef,
}

const PREPARE: StepRef = StepRef::Pipeline(PipelineStep::Prepare);
const CLEANUP: StepRef = StepRef::Pipeline(PipelineStep::Cleanup);

/// Constraints the pipeline installs on the host scheduler.
pub const ORDERING: [OrderingConstraint; 4] = [
    OrderingConstraint {
        step: PREPARE,
        relation: Relation::RunsBefore,
        other: StepRef::Host(StepRole::PreBuild),
    },
    OrderingConstraint {
        step: PREPARE,
        relation: Relation::RunsBefore,
        other: StepRef::Host(StepRole::GenerateBuildConfig),
    },
    OrderingConstraint {
        step: StepRef::Host(StepRole::Assemble),
        relation: Relation::RunsAfter,
        other: PREPARE,
    },
    OrderingConstraint {
        step: CLEANUP,
        relation: Relation::Finalizes,
        other: StepRef::Host(StepRole::Assemble),
    },
];

/// Receives ordering declarations; implemented by the host scheduler.
pub trait StepRegistry {
    fn declare(&mut self, constraint: OrderingConstraint);
}

/// Installs [`ORDERING`] into `registry`. Call once per build configuration.
pub fn register_ordering(registry: &mut dyn StepRegistry) {
    for constraint in ORDERING {
        debug!(
            step = %constraint.step,
            relation = ?constraint.relation,
            other = %constraint.other,
            "declaring step ordering"
        );
        registry.declare(constraint);
    }
}

/// Step that failed while running a [`StepPlan`].
#[derive(Debug, Clone, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StepRunReport {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    pub failures: Vec<StepFailure>,
}

impl StepRunReport {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Dependency graph over pipeline and host steps.
#[derive(Debug, Default)]
pub struct StepPlan {
    graph: DiGraph<StepRef, ()>,
    nodes: HashMap<StepRef, NodeIndex>,
    finalizers: HashMap<StepRef, StepRef>,
    host_names: HashMap<StepRole, String>,
}

impl StepPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `role` onto a host-specific step name.
    #[must_use]
    pub fn with_host_name(mut self, role: StepRole, name: impl Into<String>) -> Self {
        self.host_names.insert(role, name.into());
        self
    }

    #[must_use]
    pub fn step_name(&self, step: StepRef) -> String {
        match step {
            StepRef::Host(role) => self
                .host_names
                .get(&role)
                .cloned()
                .unwrap_or_else(|| role.default_name().to_string()),
            StepRef::Pipeline(_) => step.to_string(),
        }
    }

    fn node(&mut self, step: StepRef) -> NodeIndex {
        if let Some(index) = self.nodes.get(&step) {
            return *index;
        }
        let index = self.graph.add_node(step);
        self.nodes.insert(step, index);
        index
    }

    fn edge(&mut self, first: StepRef, then: StepRef) {
        let from = self.node(first);
        let to = self.node(then);
        self.graph.update_edge(from, to, ());
    }

    /// Steps in an order satisfying every declared constraint.
    ///
    /// # Errors
    /// Fails when the declarations form a cycle.
    pub fn execution_order(&self) -> Result<Vec<StepRef>> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order.into_iter().map(|index| self.graph[index]).collect()),
            Err(cycle) => bail!(
                "step ordering contains a cycle through {}",
                self.step_name(self.graph[cycle.node_id()])
            ),
        }
    }

    /// Runs every step in order through `action`.
    ///
    /// After the first failure the remaining ordinary steps are skipped, but
    /// finalizers still run so that cleanup always follows preparation.
    ///
    /// # Errors
    /// Fails only when the plan cannot be ordered; step failures are reported
    /// in the returned [`StepRunReport`].
    pub fn run<F>(&self, mut action: F) -> Result<StepRunReport>
    where
        F: FnMut(StepRef) -> Result<()>,
    {
        let order = self.execution_order()?;
        let mut report = StepRunReport::default();
        for step in order {
            let name = self.step_name(step);
            let is_finalizer = self.finalizers.contains_key(&step);
            if !report.failures.is_empty() && !is_finalizer {
                debug!(step = %name, "skipping after earlier failure");
                report.skipped.push(name);
                continue;
            }
            debug!(step = %name, "running step");
            match action(step) {
                Ok(()) => report.executed.push(name),
                Err(err) => {
                    warn!(step = %name, error = %format!("{err:#}"), "step failed");
                    report.failures.push(StepFailure {
                        step: name,
                        error: format!("{err:#}"),
                    });
                }
            }
        }
        Ok(report)
    }
}

impl StepRegistry for StepPlan {
    fn declare(&mut self, constraint: OrderingConstraint) {
        let OrderingConstraint {
            step,
            relation,
            other,
        } = constraint;
        match relation {
            Relation::RunsBefore => self.edge(step, other),
            Relation::RunsAfter => self.edge(other, step),
            Relation::Finalizes => {
                self.edge(other, step);
                self.finalizers.insert(step, other);
            }
        }
    }
}
