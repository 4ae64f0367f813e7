//! conduitwatch command-line entry point.
//!
//! Loads one or more watch files, runs their watches until Ctrl-C or
//! SIGTERM, then stops every watch and waits for in-flight events to finish.

use std::path::PathBuf;

use {
    anyhow::Result,
    clap::{ArgAction, Args as ClapArgs, Parser, Subcommand},
    tokio::{signal, task},
    tracing::{info, warn},
};

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal as unix_signal};

use conduitwatch::{
    ConduitRegistry, LoggingConfig, WatchSupervisor, error::operational::ResultExt, init_logging,
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "conduitwatch", version)]
#[command(about = "Watch directories and fan changes out to conduits")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every watch defined in the given watch files
    #[command(alias = "tricks")]
    Run(RunArgs),
}

#[derive(ClapArgs, Debug, Clone)]
struct RunArgs {
    /// YAML watch files
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// INFO level; -vv for DEBUG
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// ERROR level
    #[arg(short, long, action = ArgAction::Count)]
    quiet: u8,

    /// Regular expression whose matches are redacted from logs (repeatable)
    #[arg(long, value_name = "REGEX")]
    redact: Vec<String>,
}

impl RunArgs {
    fn logging(&self) -> LoggingConfig {
        let verbosity = i16::from(self.verbose) - i16::from(self.quiet);
        LoggingConfig {
            verbosity: verbosity.clamp(-1, 2) as i8,
            log_file: self.log_file.clone(),
            redact: self.redact.clone(),
        }
    }
}

/// Ctrl-C, plus SIGTERM on unix.
struct ShutdownSignal {
    #[cfg(unix)]
    terminate: Signal,
}

impl ShutdownSignal {
    /// Registers the handlers, so neither signal kills the process from now on.
    fn install() -> Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: unix_signal(SignalKind::terminate())
                .add_context("Failed to listen for SIGTERM")?,
        })
    }

    /// Waits for the first shutdown signal.
    #[cfg(unix)]
    async fn recv(&mut self) -> Result<()> {
        tokio::select! {
            interrupted = signal::ctrl_c() => interrupted.add_context("Failed to listen for Ctrl-C")?,
            _ = self.terminate.recv() => info!("SIGTERM received"),
        }
        Ok(())
    }

    /// Waits for Ctrl-C.
    #[cfg(not(unix))]
    async fn recv(&mut self) -> Result<()> {
        signal::ctrl_c()
            .await
            .add_context("Failed to listen for Ctrl-C")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Command::Run(args) = cli.command;
    init_logging(&args.logging())?;

    let mut supervisor = WatchSupervisor::new(ConduitRegistry::with_builtins());
    let started = supervisor.load_files(&args.files);
    if supervisor.is_empty() {
        warn!("There are no watches to run");
        return Ok(());
    }
    info!("{} watches running; press Ctrl-C to stop", started);

    ShutdownSignal::install()?.recv().await?;
    info!("Shutting down");

    supervisor.stop_all();
    task::spawn_blocking(move || supervisor.shutdown())
        .await
        .add_context("Shutdown task failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use crate::{Cli, Command};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::parse_from(["conduitwatch", "tricks", "-vv", "--redact", "secret", "a.yaml", "b.yaml"]);
        let Command::Run(args) = cli.command;
        assert_eq!(args.files.len(), 2);
        let logging = args.logging();
        assert_eq!(logging.verbosity, 2);
        assert_eq!(logging.redact, vec!["secret"]);

        let quiet = Cli::parse_from(["conduitwatch", "run", "-q", "a.yaml"]);
        let Command::Run(args) = quiet.command;
        assert_eq!(args.logging().verbosity, -1);

        assert!(Cli::try_parse_from(["conduitwatch", "run"]).is_err());
        assert!(Cli::try_parse_from(["conduitwatch", "run", "-v", "-q", "a.yaml"]).is_err());
    }

    #[cfg(unix)]
    mod unix {
        use std::{
            process::{Command as Process, id},
            time::Duration,
        };

        use tokio::time::timeout;

        use crate::ShutdownSignal;

        #[tokio::test]
        async fn test_sigterm_ends_the_wait() {
            let mut shutdown = ShutdownSignal::install().unwrap();
            let status = Process::new("kill")
                .args(["-TERM", &id().to_string()])
                .status()
                .unwrap();
            assert!(status.success());

            timeout(Duration::from_secs(10), shutdown.recv())
                .await
                .unwrap()
                .unwrap();
        }
    }
}
