#![deny(clippy::all)]

//! Turns a generic app shell into a standalone app for one downloaded
//! program archive, then puts the shell back.

pub mod archive;
pub mod backup;
mod commands;
mod config;
mod error;
pub mod escape;
pub mod icon;
pub mod manifest;
mod outcome;
pub mod pipeline;
pub mod schedule;

#[cfg(test)]
mod test_support;

pub use crate::archive::ProgramName;
pub use crate::commands::{
    build_shell, cleanup_shell, inspect_archive, prepare_shell, strip_manifest, BuildRequest,
    CommandContext, InspectRequest, ShellRequest, StripRequest,
};
pub use crate::config::{GlobalOptions, InvocationOptions, ProjectIdentity, ShellLayout};
pub use crate::error::PackError;
pub use crate::outcome::{
    format_status_message, to_json_response, CommandInfo, CommandStatus, ExecutionOutcome,
};
pub use crate::pipeline::{
    ArchiveFetcher, BuildConfiguration, BuildOverrides, CleanupReport, HttpFetcher, Pipeline,
    PipelineState, PrepareReport,
};
pub use crate::schedule::{register_ordering, StepPlan, StepRegistry, StepRole};
