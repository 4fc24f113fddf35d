use atty::Stream;
use clap::Parser;
use color_eyre::Result;
use serde_json::Value;
use shellpack_core::{CommandContext, CommandInfo, CommandStatus, ExecutionOutcome, GlobalOptions};
use tracing_subscriber::EnvFilter;

mod cli;
mod dispatch;
mod style;

use cli::ShellpackCli;
use style::Style;

const LOG_ENV: &str = "SHELLPACK_LOG";

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = ShellpackCli::parse();
    init_tracing(cli.trace, cli.verbose, cli.quiet);

    let global = GlobalOptions {
        quiet: cli.quiet,
        verbose: cli.verbose,
        trace: cli.trace,
        json: cli.json,
    };
    let ctx = CommandContext::new(&global);
    let (info, outcome) = dispatch::dispatch_command(&ctx, &cli.command)?;
    let code = emit_output(&cli, info, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8, quiet: bool) {
    let level = if trace {
        "trace"
    } else if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "shellpack_core={level},shellpack_store={level},shellpack={level}"
        ))
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn emit_output(cli: &ShellpackCli, info: CommandInfo, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();

    if cli.json {
        let payload = shellpack_core::to_json_response(info, outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }

    let message = shellpack_core::format_status_message(info, &outcome.message);
    if outcome.status == CommandStatus::Ok {
        if cli.quiet {
            return Ok(code);
        }
        let style = Style::new(cli.no_color, atty::is(Stream::Stdout));
        println!("{}", style.status(outcome.status, &message));
        for (label, value) in summary_fields(&outcome.details) {
            println!("{}", style.field(label, &value));
        }
    } else {
        let style = Style::new(cli.no_color, atty::is(Stream::Stderr));
        eprintln!("{}", style.status(outcome.status, &message));
        if let Some(failures) = outcome.details.get("failures").and_then(Value::as_array) {
            for failure in failures.iter().filter_map(Value::as_str) {
                eprintln!("  - {failure}");
            }
        }
        if let Some(hint) = outcome.details.get("hint").and_then(Value::as_str) {
            eprintln!("{}", style.info(&format!("Hint: {hint}")));
        }
    }

    Ok(code)
}

/// Human-readable lines for the fields worth showing without `--json`.
fn summary_fields(details: &Value) -> Vec<(&'static str, String)> {
    let source = details.get("report").unwrap_or(details);
    let mut fields = Vec::new();
    for (label, key) in [
        ("program", "program_name"),
        ("app name", "app_name"),
        ("application id", "application_id"),
        ("icon", "icon_entry"),
        ("injected", "injected_archive"),
    ] {
        if let Some(value) = source.get(key).and_then(Value::as_str) {
            fields.push((label, value.to_string()));
        }
    }
    if let Some(restored) = source.get("restored").and_then(Value::as_array) {
        for path in restored.iter().filter_map(Value::as_str) {
            fields.push(("restored", path.to_string()));
        }
    }
    fields
}
