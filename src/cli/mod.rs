//! Command line interface.
//!
//! Parses arguments, loads the configuration, wires the real process runner
//! and signal handling into a [`Pipeline`], and turns the report into an exit
//! code.

mod args;
mod output;

pub use args::Args;
pub use output::OutputManager;

use crate::config::Context;
use crate::error::{EXIT_CONFIG_ERROR, PipelineError};
use crate::pipeline::{Pipeline, PipelineState};
use crate::runner::{CommandRunner, ProcessRunner};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Main CLI entry point
pub async fn run() -> anyhow::Result<i32> {
    execute(Args::parse_args()).await
}

/// Runs the pipeline for already-parsed arguments.
pub async fn execute(args: Args) -> anyhow::Result<i32> {
    let output = OutputManager::new(args.verbose, args.quiet);
    let pipeline = Pipeline::standard();

    if args.list_stages {
        for name in pipeline.stage_names() {
            output.line(name);
        }
        return Ok(0);
    }

    let ctx = match args.config_path().and_then(Context::load) {
        Ok(ctx) => ctx,
        Err(e) => {
            output.error(&e.to_string());
            return Ok(PipelineError::from(e).exit_code());
        }
    };

    if args.dry_run {
        if let Err(e) = ctx.validate() {
            output.error(&e.to_string());
            return Ok(EXIT_CONFIG_ERROR);
        }
        output.section("Plan");
        for (stage, enabled) in pipeline.plan(&ctx) {
            output.plan_entry(stage, enabled);
        }
        return Ok(0);
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(output.clone()));
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_signal(cancel.clone()));

    let mut state = PipelineState::new(ctx, runner, output);
    let report = pipeline.run(&mut state, &cancel).await;
    watcher.abort();

    log::debug!(
        "Executed {:?}, skipped {:?}, keychain teardowns {}",
        report.executed,
        report.skipped,
        report.keychain_teardowns
    );
    Ok(report.exit_code())
}

/// Cancels `token` on SIGINT or SIGTERM.
///
/// Installing the handlers also stops the default disposition from killing
/// the process, so the pipeline gets to restore the keychain.
async fn cancel_on_signal(token: CancellationToken) {
    if wait_for_signal().await {
        log::warn!("Interrupt received; stopping after keychain teardown");
        token.cancel();
    }
}

/// Resolves once a termination signal arrives. Returns `false` if no
/// handler could be installed, after waiting forever.
#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut interrupt, mut terminate) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(interrupt), Ok(terminate)) => (interrupt, terminate),
        (Err(e), _) | (_, Err(e)) => {
            log::warn!("Could not install signal handlers: {e}");
            std::future::pending::<()>().await;
            return false;
        }
    };

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
    true
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Could not install signal handler: {e}");
            std::future::pending::<()>().await;
            false
        }
    }
}
