#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]
// clasper-cli/src/main.rs
// ============================================================================
// Module: Clasper CLI Entry Point
// Description: Command dispatcher for the Clasper control-plane binary (C15).
// Purpose: Provide an operator-facing CLI for running the server, verifying
// an exported audit chain offline, and inspecting configuration.
// Dependencies: clap, clasper-config, clasper-core, clasper-server, serde,
// thiserror, tokio.
// ============================================================================

//! ## Overview
//! The Clasper CLI offers three subcommands: `serve` starts the HTTP control
//! plane (C14) from loaded configuration (C12); `verify-chain` runs C8's pure
//! [`clasper_core::verify_chain`] routine against a previously exported JSON
//! audit chain, entirely offline and without touching the store; `config
//! check` loads and validates configuration, printing the aggregated result.
//! All user-facing strings are routed through the i18n catalog to prepare for
//! future localization.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clasper_cli::t;
use clasper_config::ClasperConfig;
use clasper_config::ConfigError;
use clasper_core::AuditEntry;
use clasper_core::ChainBreak;
use clasper_core::ChainBreakReason;
use clasper_core::TenantId;
use clasper_core::verify_chain;
use clasper_server::ClasperServer;
use serde::de::DeserializeOwned;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "clasper", disable_help_subcommand = true, disable_version_flag = true, arg_required_else_help = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the Clasper HTTP server.
    Serve,
    /// Verify a previously exported audit chain offline.
    VerifyChain(VerifyChainCommand),
    /// Configuration inspection commands.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Arguments for `verify-chain`.
#[derive(Args, Debug)]
struct VerifyChainCommand {
    /// Tenant the exported chain belongs to.
    tenant: String,
    /// Path to a JSON file containing the exported `AuditEntry` array,
    /// ordered ascending by `seq`.
    export_file: PathBuf,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate configuration, printing the aggregated result.
    Check,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for localized error messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`] from a localized message.
    const fn new(message: String) -> Self {
        Self { message }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();

    if cli.show_version {
        let version = env!("CARGO_PKG_VERSION");
        write_stdout_line(&t!("main.version", version = version)).map_err(|err| CliError::new(output_error("stdout", &err)))?;
        return Ok(ExitCode::SUCCESS);
    }

    match cli.command {
        Commands::Serve => command_serve().await,
        Commands::VerifyChain(command) => command_verify_chain(&command),
        Commands::Config { command } => match command {
            ConfigCommand::Check => command_config_check(),
        },
    }
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command.
async fn command_serve() -> CliResult<ExitCode> {
    let config = load_config()?;
    let server = ClasperServer::new(config).map_err(|err| CliError::new(t!("serve.init_failed", error = err)))?;
    server.serve().await.map_err(|err| CliError::new(t!("serve.failed", error = err)))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Config Command
// ============================================================================

/// Executes the `config check` command.
fn command_config_check() -> CliResult<ExitCode> {
    match ClasperConfig::load() {
        Ok(_config) => {
            write_stdout_line(&t!("config.validate.ok")).map_err(|err| CliError::new(output_error("stdout", &err)))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(ConfigError::Invalid(problems)) => {
            write_stderr_line(&t!("config.validate.failed_header")).map_err(|err| CliError::new(output_error("stderr", &err)))?;
            for problem in &problems {
                write_stderr_line(&t!("config.validate.problem", problem = problem)).map_err(|err| CliError::new(output_error("stderr", &err)))?;
            }
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(CliError::new(t!("config.load_failed", error = err))),
    }
}

/// Loads configuration, mapping any failure to a localized [`CliError`].
fn load_config() -> CliResult<ClasperConfig> {
    ClasperConfig::load().map_err(|err| CliError::new(t!("config.load_failed", error = err)))
}

// ============================================================================
// SECTION: Verify-Chain Command
// ============================================================================

/// Executes the `verify-chain` command.
fn command_verify_chain(command: &VerifyChainCommand) -> CliResult<ExitCode> {
    let tenant = TenantId::from(command.tenant.as_str());
    let entries: Vec<AuditEntry> = read_chain_export(&command.export_file)?;

    for entry in &entries {
        if entry.tenant_id != tenant {
            return Err(CliError::new(t!(
                "verify_chain.tenant_mismatch",
                seq = entry.seq,
                actual = entry.tenant_id.as_str(),
                expected = tenant.as_str(),
            )));
        }
    }

    let breaks = verify_chain(&entries).map_err(|err| CliError::new(t!("verify_chain.failed", error = err)))?;

    if breaks.is_empty() {
        write_stdout_line(&t!("verify_chain.ok", count = entries.len())).map_err(|err| CliError::new(output_error("stdout", &err)))?;
        return Ok(ExitCode::SUCCESS);
    }

    write_stdout_line(&t!("verify_chain.breaks_header", count = breaks.len())).map_err(|err| CliError::new(output_error("stdout", &err)))?;
    for chain_break in &breaks {
        write_stdout_line(&t!("verify_chain.break_line", seq = chain_break.seq, reason = format_break_reason(chain_break)))
            .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    }
    Ok(ExitCode::FAILURE)
}

/// Reads and parses a JSON-encoded audit chain export.
fn read_chain_export(path: &Path) -> CliResult<Vec<AuditEntry>> {
    let bytes = fs::read(path).map_err(|err| CliError::new(t!("verify_chain.read_failed", path = path.display(), error = err)))?;
    parse_json(&bytes, path)
}

/// Parses a JSON byte slice into `T`, mapping failure to a localized error.
fn parse_json<T: DeserializeOwned>(bytes: &[u8], path: &Path) -> CliResult<T> {
    serde_json::from_slice(bytes).map_err(|err| CliError::new(t!("verify_chain.parse_failed", path = path.display(), error = err)))
}

/// Renders a [`ChainBreakReason`] as a short, human-readable label.
fn format_break_reason(chain_break: &ChainBreak) -> &'static str {
    match chain_break.reason {
        ChainBreakReason::HashMismatch => "hash mismatch",
        ChainBreakReason::PrevHashMismatch => "prev_hash mismatch",
        ChainBreakReason::SequenceGap => "sequence gap",
    }
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats a localized output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    let stream_label = match stream {
        "stdout" => t!("output.stream.stdout"),
        "stderr" => t!("output.stream.stderr"),
        _ => t!("output.stream.unknown"),
    };
    t!("output.write_failed", stream = stream_label, error = error)
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}

#[cfg(test)]
mod main_tests;
