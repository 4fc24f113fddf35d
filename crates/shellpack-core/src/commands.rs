use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::{debug, info};

use crate::archive::{extract_program_name, open_archive};
use crate::config::{EnvSnapshot, GlobalOptions, InvocationOptions, ShellLayout};
use crate::error::PackError;
use crate::icon::extract_icon;
use crate::manifest::strip_intent_filters;
use crate::outcome::ExecutionOutcome;
use crate::pipeline::{BuildOverrides, CleanupReport, HttpFetcher, Pipeline, PrepareReport};
use crate::schedule::{
    register_ordering, OrderingConstraint, PipelineStep, Relation, StepPlan, StepRef, StepRegistry,
    StepRole,
};

pub struct CommandContext<'a> {
    pub global: &'a GlobalOptions,
    env: EnvSnapshot,
}

impl<'a> CommandContext<'a> {
    #[must_use]
    pub fn new(global: &'a GlobalOptions) -> Self {
        Self {
            global,
            env: EnvSnapshot::capture(),
        }
    }
}

/// Options shared by `prepare`, `cleanup` and `build`.
#[derive(Debug, Clone, Default)]
pub struct ShellRequest {
    /// Raw `key=value` properties.
    pub properties: Vec<String>,
    pub root: PathBuf,
    pub assets_dir: Option<PathBuf>,
    pub icon: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
    /// Where to write the build overrides as JSON after preparation.
    pub emit_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub shell: ShellRequest,
    pub assemble: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InspectRequest {
    pub archive: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StripRequest {
    pub manifest: PathBuf,
}

fn resolve(
    ctx: &CommandContext<'_>,
    request: &ShellRequest,
) -> Result<(InvocationOptions, ShellLayout), PackError> {
    let options = InvocationOptions::from_pairs(&request.properties)?.with_env_fallback(&ctx.env);
    let layout = ShellLayout::new(&request.root).with_overrides(
        request.assets_dir.as_deref(),
        request.icon.as_deref(),
        request.manifest.as_deref(),
    );
    debug!(?options, ?layout, "resolved shell request");
    Ok((options, layout))
}

fn emit_overrides(path: Option<&Path>, overrides: &BuildOverrides) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(overrides)?)
        .with_context(|| format!("failed to write build overrides to {}", path.display()))?;
    info!(path = %path.display(), "wrote build overrides");
    Ok(())
}

/// Runs preparation for the shell described by `request`.
///
/// # Errors
/// Returns an error only when the overrides file cannot be written; pipeline
/// failures become failed outcomes.
pub fn prepare_shell(ctx: &CommandContext<'_>, request: &ShellRequest) -> Result<ExecutionOutcome> {
    let (options, layout) = match resolve(ctx, request) {
        Ok(resolved) => resolved,
        Err(err) => return Ok(ExecutionOutcome::from_pack_error(&err)),
    };
    let mut pipeline = Pipeline::new(&options, &layout, &HttpFetcher);
    let mut overrides = BuildOverrides::default();
    match pipeline.prepare(&mut overrides) {
        Ok(Some(report)) => {
            emit_overrides(request.emit_config.as_deref(), &overrides)?;
            Ok(ExecutionOutcome::success(
                format!("prepared {}", report.application_id),
                json!({
                    "state": pipeline.state(),
                    "report": report,
                    "overrides": overrides,
                }),
            ))
        }
        Ok(None) => Ok(ExecutionOutcome::success(
            "no download configured; nothing to prepare",
            json!({ "state": pipeline.state() }),
        )),
        Err(err) => Ok(ExecutionOutcome::from_pack_error(&err)),
    }
}

/// Runs cleanup for the shell described by `request`.
///
/// # Errors
/// Never fails outright; failed steps become a failed outcome.
pub fn cleanup_shell(ctx: &CommandContext<'_>, request: &ShellRequest) -> Result<ExecutionOutcome> {
    let (options, layout) = match resolve(ctx, request) {
        Ok(resolved) => resolved,
        Err(err) => return Ok(ExecutionOutcome::from_pack_error(&err)),
    };
    let mut pipeline = Pipeline::new(&options, &layout, &HttpFetcher);
    match pipeline.cleanup() {
        Ok(Some(report)) => Ok(cleanup_outcome(report)),
        Ok(None) => Ok(ExecutionOutcome::success(
            "no download configured; nothing to clean up",
            json!({ "state": pipeline.state() }),
        )),
        Err(err) => Ok(ExecutionOutcome::from_pack_error(&err)),
    }
}

fn cleanup_outcome(report: CleanupReport) -> ExecutionOutcome {
    let details = json!({ "report": &report });
    match report.ensure_clean() {
        Ok(report) => ExecutionOutcome::success(
            format!("restored {} file(s)", report.restored.len()),
            details,
        ),
        Err(err) => {
            let mut outcome = ExecutionOutcome::from_pack_error(&err);
            outcome.details["report"] = details["report"].clone();
            outcome
        }
    }
}

/// Prepares, runs the assemble command, then cleans up, in the order the
/// pipeline declares against the host steps.
///
/// # Errors
/// Returns an error if the step plan cannot be ordered.
pub fn build_shell(ctx: &CommandContext<'_>, request: &BuildRequest) -> Result<ExecutionOutcome> {
    let Some(program) = request.assemble.first() else {
        return Ok(ExecutionOutcome::user_error(
            "build needs an assemble command after `--`",
            json!({ "reason": "missing_assemble_command" }),
        ));
    };
    let (options, layout) = match resolve(ctx, &request.shell) {
        Ok(resolved) => resolved,
        Err(err) => return Ok(ExecutionOutcome::from_pack_error(&err)),
    };

    let plan = build_plan(program);

    let mut pipeline = Pipeline::new(&options, &layout, &HttpFetcher);
    let mut overrides = BuildOverrides::default();
    let mut prepared: Option<PrepareReport> = None;
    let mut cleaned: Option<CleanupReport> = None;
    let run = plan.run(|step| match step {
        StepRef::Pipeline(PipelineStep::Prepare) => {
            prepared = pipeline.prepare(&mut overrides)?;
            if prepared.is_some() {
                emit_overrides(request.shell.emit_config.as_deref(), &overrides)?;
            }
            Ok(())
        }
        StepRef::Host(StepRole::Assemble) => {
            run_assemble(&request.assemble, &layout.root, ctx.global)?;
            pipeline.mark_assembled();
            Ok(())
        }
        StepRef::Host(role) => {
            debug!(step = role.default_name(), "host step runs inside the assemble command");
            Ok(())
        }
        StepRef::Pipeline(PipelineStep::Cleanup) => {
            cleaned = pipeline.cleanup()?;
            if let Some(report) = &cleaned {
                report.clone().ensure_clean()?;
            }
            Ok(())
        }
    })?;

    let details = json!({
        "steps": &run,
        "prepared": prepared,
        "cleanup": cleaned,
        "overrides": overrides,
    });
    match run.failures.first() {
        None => Ok(ExecutionOutcome::success(
            format!("ran {} step(s)", run.executed.len()),
            details,
        )),
        Some(failure) => Ok(ExecutionOutcome::failure(
            format!("{} failed: {}", failure.step, failure.error),
            details,
        )),
    }
}

/// Plan for `build`: the pipeline's ordering plus the host's own edges. The
/// assemble command stands in for the whole host build, so the pre-build
/// roles are ordered ahead of it.
fn build_plan(assemble: &str) -> StepPlan {
    let mut plan = StepPlan::new().with_host_name(StepRole::Assemble, assemble);
    register_ordering(&mut plan);
    for role in [StepRole::PreBuild, StepRole::GenerateBuildConfig] {
        plan.declare(OrderingConstraint {
            step: StepRef::Host(role),
            relation: Relation::RunsBefore,
            other: StepRef::Host(StepRole::Assemble),
        });
    }
    plan
}

fn run_assemble(command: &[String], root: &Path, global: &GlobalOptions) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        bail!("empty assemble command");
    };
    info!(program = %program, root = %root.display(), "running assemble command");
    // Stdout belongs to the outcome: the JSON envelope, or nothing under -q.
    let stdout = if global.quiet {
        Stdio::null()
    } else if global.json {
        Stdio::from(io::stderr())
    } else {
        Stdio::inherit()
    };
    let status = Command::new(program)
        .args(args)
        .current_dir(root)
        .stdout(stdout)
        .status()
        .with_context(|| format!("failed to start {program}"))?;
    if !status.success() {
        bail!("{program} exited with {status}");
    }
    Ok(())
}

/// Reports what preparation would read from an archive, without touching any
/// shell.
///
/// # Errors
/// Never fails outright; archive problems become a failed outcome.
pub fn inspect_archive(request: &InspectRequest) -> Result<ExecutionOutcome> {
    let path = request.archive.as_path();
    let inspected = open_archive(path).and_then(|mut archive| {
        let name = extract_program_name(&mut archive, path)?;
        let icon = extract_icon(&mut archive, path);
        Ok((name, icon))
    });
    match inspected {
        Ok((name, icon)) => Ok(ExecutionOutcome::success(
            format!("program '{}'", name.raw()),
            json!({
                "archive": path,
                "program_name": name.raw(),
                "app_name": name.markup(),
                "program_name_literal": name.source_literal(),
                "icon_entry": icon.as_ref().map(|icon| icon.entry.as_str()),
                "icon_bytes": icon.as_ref().map(|icon| icon.bytes.len()),
            }),
        )),
        Err(err) => Ok(ExecutionOutcome::from_pack_error(&err)),
    }
}

/// Removes VIEW/SEND intent filters from a manifest in place.
///
/// # Errors
/// Never fails outright; I/O problems become a failed outcome.
pub fn strip_manifest(request: &StripRequest) -> Result<ExecutionOutcome> {
    match strip_intent_filters(&request.manifest) {
        Ok(removed) => Ok(ExecutionOutcome::success(
            format!("removed {removed} intent filter(s)"),
            json!({ "manifest": request.manifest, "removed": removed }),
        )),
        Err(err) => Ok(ExecutionOutcome::from_pack_error(&err)),
    }
}
