//! CLI - attach/start subcommands
//!
//! Streams the debug output strings of the target to stdout until it exits
//! or the run is cancelled.

pub mod cmdline;

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::core::{DebugError, DebugStringStream, SessionOptions};
use crate::debug::DebugApi;
use cmdline::CommandLineError;

/// dbgstr: capture debug output strings of a process
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Longest single wait for a debug event, in milliseconds
    #[arg(long, default_value_t = 50, global = true)]
    pub poll_interval_ms: u64,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Attach to a running process
    Attach {
        /// Process ID
        pid: u32,
    },
    /// Start a process and capture its output
    Start {
        /// Program followed by its arguments
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        cmdline: Vec<String>,
    },
}

impl Args {
    /// Default log filter for the verbosity level
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

/// Failure before any output was produced
enum SetupError {
    CommandLine(CommandLineError),
    Debug(DebugError),
}

impl SetupError {
    fn describe(&self) -> String {
        match self {
            SetupError::CommandLine(e) => e.to_string(),
            SetupError::Debug(DebugError::Native(e)) => {
                format!("Win32({}): {}", e.code, e.message.trim_end())
            }
            SetupError::Debug(e) => e.to_string(),
        }
    }
}

fn open_stream<A: DebugApi>(
    api: A,
    command: &Command,
    options: SessionOptions,
) -> Result<DebugStringStream<A>, SetupError> {
    match command {
        Command::Attach { pid } => {
            DebugStringStream::attach(api, *pid, options).map_err(SetupError::Debug)
        }
        Command::Start { cmdline } => {
            let (module, rest) = cmdline
                .split_first()
                .ok_or(SetupError::CommandLine(CommandLineError::MissingModuleName))?;
            let line = cmdline::build_with_module(module, rest).map_err(SetupError::CommandLine)?;
            log::debug!("Command line: {}", line);
            DebugStringStream::launch(api, None, Some(line), options).map_err(SetupError::Debug)
        }
    }
}

/// Write one output string, keeping the output newline-delimited.
fn write_text(out: &mut impl Write, text: &str) -> std::io::Result<()> {
    out.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        out.write_all(b"\n")?;
    }
    out.flush()
}

/// Run `args.command` against `api`. Returns the process exit code.
///
/// Setup failures are reported on `err` with exit code 1; failures while
/// streaming are returned as errors.
pub async fn run<A: DebugApi>(
    api: A,
    args: &Args,
    cancellation: CancellationToken,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<u8> {
    let stream = match open_stream(api, &args.command, args.session_options()) {
        Ok(stream) => stream,
        Err(e) => {
            writeln!(err, "{} {}", "ERROR:".red().bold(), e.describe())?;
            return Ok(1);
        }
    };
    log::info!("Streaming debug output of process {}", stream.process_id());

    let mut stream = stream.with_cancellation(cancellation);
    while let Some(item) = stream.next_async().await {
        match item {
            Ok(text) => write_text(out, &text)?,
            Err(e) if e.is_cancelled() => {
                log::info!("Cancelled");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(0)
}

/// Run against the debug API of this platform.
#[cfg(target_os = "windows")]
pub async fn run_platform(args: &Args, cancellation: CancellationToken) -> Result<u8> {
    let api = crate::debug::PlatformDebugApi::new();
    run(
        api,
        args,
        cancellation,
        &mut std::io::stdout(),
        &mut std::io::stderr(),
    )
    .await
}

#[cfg(not(target_os = "windows"))]
pub async fn run_platform(_args: &Args, _cancellation: CancellationToken) -> Result<u8> {
    eprintln!(
        "{} debugging processes requires the Windows debug API",
        "ERROR:".red().bold()
    );
    Ok(1)
}
