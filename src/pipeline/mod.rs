//! Stage pipeline.
//!
//! A pipeline is a declarative table of [`Stage`]s, each a name, a predicate
//! over the configuration [`Context`] and an action. [`Pipeline::run`] walks
//! the table in order:
//!
//! 1. the predicate is evaluated right before the stage, against the current
//!    context, and a false predicate skips the stage with no side effects
//! 2. an enabled stage runs to completion, racing the cancellation token
//! 3. the first failure stops the walk; nothing is retried
//!
//! Whatever the outcome, the keychain session is torn down before `run`
//! returns, so an unlocked keychain never outlives the pipeline.

pub mod build_tool;
pub mod stages;

use crate::artifacts::ArtifactDescriptor;
use crate::cli::OutputManager;
use crate::config::{Context, keys};
use crate::error::{ConfigError, PipelineError, Result};
use crate::keychain::KeychainSession;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec, OutputFilter};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Gate deciding whether a stage runs.
pub type Predicate = Box<dyn Fn(&Context) -> bool + Send + Sync>;

/// Work performed by a stage.
#[async_trait]
pub trait StageAction: Send + Sync {
    async fn run(&self, state: &mut PipelineState) -> Result<()>;
}

/// Stage that always runs.
pub fn always() -> Predicate {
    Box::new(|_| true)
}

/// Stage gated by a boolean flag. Absent means disabled.
pub fn when_flag(key: &'static str) -> Predicate {
    Box::new(move |ctx| ctx.flag(key))
}

/// Stage gated by a key being set to a non-empty value.
pub fn when_set(key: &'static str) -> Predicate {
    Box::new(move |ctx| ctx.get(key).is_some())
}

/// One named, conditionally enabled step.
pub struct Stage {
    name: &'static str,
    predicate: Predicate,
    action: Box<dyn StageAction>,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Stage {
    pub fn new(name: &'static str, predicate: Predicate, action: impl StageAction + 'static) -> Self {
        Self {
            name,
            predicate,
            action: Box::new(action),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_enabled(&self, ctx: &Context) -> bool {
        (self.predicate)(ctx)
    }
}

/// Everything a stage may read or change.
pub struct PipelineState {
    /// Configuration, frozen by `configure`
    pub ctx: Context,
    pub runner: Arc<dyn CommandRunner>,
    pub keychain: KeychainSession,
    /// Set by `resolve-version`
    pub artifacts: Option<ArtifactDescriptor>,
    pub output: OutputManager,
    filter: OutputFilter,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineState")
            .field("ctx", &self.ctx)
            .field("keychain", &self.keychain)
            .field("artifacts", &self.artifacts)
            .finish_non_exhaustive()
    }
}

impl PipelineState {
    pub fn new(ctx: Context, runner: Arc<dyn CommandRunner>, output: OutputManager) -> Self {
        // Lenient until configure validates; bootstrap runs before that.
        let filter = ctx
            .get(keys::OUTPUT_FILTER)
            .and_then(|v| OutputFilter::parse(v).ok())
            .unwrap_or_default();
        let timeout = ctx.command_timeout().ok().flatten();
        Self {
            keychain: KeychainSession::new(runner.clone()),
            ctx,
            runner,
            artifacts: None,
            output,
            filter,
            timeout,
        }
    }

    /// Re-reads output and timeout settings from the validated context.
    pub(crate) fn apply_runtime_settings(&mut self) -> std::result::Result<(), ConfigError> {
        self.filter = OutputFilter::parse(self.ctx.get_or(keys::OUTPUT_FILTER, "condensed"))?;
        self.timeout = self.ctx.command_timeout()?;
        Ok(())
    }

    /// Command for the tool configured under `tool_key`, carrying the
    /// context as its environment.
    pub fn command(&self, tool_key: &str, default_tool: &str) -> CommandSpec {
        self.program(self.ctx.get_or(tool_key, default_tool))
    }

    /// Command for a fixed `program`, carrying the context as its environment.
    pub fn program(&self, program: &str) -> CommandSpec {
        CommandSpec::new(program)
            .envs(self.ctx.env_vars())
            .filter(self.filter)
            .timeout(self.timeout)
    }

    /// Runs `spec`, turning a non-zero exit into an error.
    pub async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.output.verbose(&format!("$ {}", spec.display()));
        self.runner.run(spec).await?.check(spec)
    }

    /// Artifact names, available once `resolve-version` has run.
    pub fn artifacts(&self) -> Result<&ArtifactDescriptor> {
        self.artifacts.as_ref().ok_or_else(|| {
            ConfigError::MissingRequiredKey {
                key: keys::ARTIFACT_ID.to_string(),
            }
            .into()
        })
    }
}

/// Terminal outcome of a run.
#[derive(Debug)]
pub enum PipelineOutcome {
    Success,
    Failed {
        stage: &'static str,
        exit_code: i32,
        error: PipelineError,
    },
}

/// What happened during a run.
#[derive(Debug)]
pub struct PipelineReport {
    /// Stages whose action ran, in order, including a failed one
    pub executed: Vec<&'static str>,
    /// Stages whose predicate was false
    pub skipped: Vec<&'static str>,
    pub outcome: PipelineOutcome,
    /// Keychain teardowns performed during the run
    pub keychain_teardowns: usize,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PipelineOutcome::Success)
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            PipelineOutcome::Success => 0,
            PipelineOutcome::Failed { exit_code, .. } => *exit_code,
        }
    }

    pub fn failed_stage(&self) -> Option<&'static str> {
        match &self.outcome {
            PipelineOutcome::Success => None,
            PipelineOutcome::Failed { stage, .. } => Some(stage),
        }
    }
}

/// Ordered stage table and the generic runner over it.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// The standard release pipeline.
    pub fn standard() -> Self {
        Self::new(stages::standard_stages())
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Whether each stage would run against `ctx`, in order.
    ///
    /// Predicates see the context as loaded; values computed during a real
    /// run are not known here.
    pub fn plan(&self, ctx: &Context) -> Vec<(&'static str, bool)> {
        self.stages
            .iter()
            .map(|stage| (stage.name, stage.is_enabled(ctx)))
            .collect()
    }

    /// Runs every enabled stage in order until one fails or `cancel` fires.
    pub async fn run(&self, state: &mut PipelineState, cancel: &CancellationToken) -> PipelineReport {
        let mut executed = Vec::new();
        let mut skipped = Vec::new();
        let mut outcome = PipelineOutcome::Success;

        for stage in &self.stages {
            if cancel.is_cancelled() {
                outcome = failed(stage.name, PipelineError::Interrupted);
                break;
            }

            if !stage.is_enabled(&state.ctx) {
                log::debug!("Skipping stage {}", stage.name);
                skipped.push(stage.name);
                continue;
            }

            state.output.section(stage.name);
            log::info!("Running stage {}", stage.name);
            executed.push(stage.name);

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PipelineError::Interrupted),
                result = stage.action.run(state) => result,
            };

            if let Err(error) = result {
                outcome = failed(stage.name, error);
                break;
            }
        }

        state.keychain.deactivate().await;

        match &outcome {
            PipelineOutcome::Success => state.output.success("Pipeline finished"),
            PipelineOutcome::Failed {
                stage,
                exit_code,
                error,
            } => {
                log::error!("Stage {stage} failed: {error}");
                state.output.failure_banner(
                    stage,
                    *exit_code,
                    &format!("{}: {error}", error.category()),
                );
                if let PipelineError::ExternalCommand { output_tail, .. } = error
                    && !output_tail.is_empty()
                {
                    for line in output_tail.lines() {
                        state.output.indent(line);
                    }
                }
            }
        }

        PipelineReport {
            executed,
            skipped,
            outcome,
            keychain_teardowns: state.keychain.teardown_count(),
        }
    }
}

fn failed(stage: &'static str, error: PipelineError) -> PipelineOutcome {
    PipelineOutcome::Failed {
        stage,
        exit_code: error.exit_code(),
        error,
    }
}
