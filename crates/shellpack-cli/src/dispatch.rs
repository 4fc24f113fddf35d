use color_eyre::Result;
use shellpack_core::{
    BuildRequest, CommandContext, CommandInfo, ExecutionOutcome, InspectRequest, PackError,
    ShellRequest, StripRequest,
};

use crate::cli::{CommandGroupCli, ShellArgs};

pub fn dispatch_command(
    ctx: &CommandContext,
    group: &CommandGroupCli,
) -> Result<(CommandInfo, ExecutionOutcome)> {
    match group {
        CommandGroupCli::Prepare(args) => {
            let info = CommandInfo::new("prepare");
            let request = shell_request_from_args(args);
            core_call(info, || shellpack_core::prepare_shell(ctx, &request))
        }
        CommandGroupCli::Cleanup(args) => {
            let info = CommandInfo::new("cleanup");
            let request = shell_request_from_args(args);
            core_call(info, || shellpack_core::cleanup_shell(ctx, &request))
        }
        CommandGroupCli::Build(args) => {
            let info = CommandInfo::new("build");
            let request = BuildRequest {
                shell: shell_request_from_args(&args.shell),
                assemble: args.assemble.clone(),
            };
            core_call(info, || shellpack_core::build_shell(ctx, &request))
        }
        CommandGroupCli::Inspect(args) => {
            let info = CommandInfo::new("inspect");
            let request = InspectRequest {
                archive: args.archive.clone(),
            };
            core_call(info, || shellpack_core::inspect_archive(&request))
        }
        CommandGroupCli::StripIntentFilters(args) => {
            let info = CommandInfo::new("strip-intent-filters");
            let request = StripRequest {
                manifest: args.manifest.clone(),
            };
            core_call(info, || shellpack_core::strip_manifest(&request))
        }
    }
}

fn shell_request_from_args(args: &ShellArgs) -> ShellRequest {
    ShellRequest {
        properties: args.properties.clone(),
        root: args.root.clone(),
        assets_dir: args.assets_dir.clone(),
        icon: args.icon.clone(),
        manifest: args.manifest.clone(),
        emit_config: args.emit_config.clone(),
    }
}

fn core_call<F>(info: CommandInfo, action: F) -> Result<(CommandInfo, ExecutionOutcome)>
where
    F: FnOnce() -> anyhow::Result<ExecutionOutcome>,
{
    match action() {
        Ok(outcome) => Ok((info, outcome)),
        Err(err) => {
            if let Some(pack) = err.downcast_ref::<PackError>() {
                return Ok((info, ExecutionOutcome::from_pack_error(pack)));
            }
            let issues: Vec<String> = err.chain().map(ToString::to_string).collect();
            tracing::debug!(command = info.name, error = %format!("{err:#}"), "command failed");
            Ok((
                info,
                ExecutionOutcome::failure(
                    err.to_string(),
                    serde_json::json!({
                        "reason": "internal_error",
                        "error": err.to_string(),
                        "issues": issues,
                    }),
                ),
            ))
        }
    }
}
