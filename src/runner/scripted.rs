//! Scripted command runner for tests and dry runs.
//!
//! Records every invocation and answers from a list of rules. Commands no
//! rule matches succeed with empty output.

use super::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Mutex;

type Matcher = Box<dyn Fn(&CommandSpec) -> bool + Send + Sync>;
type Responder = Box<dyn Fn(&CommandSpec) -> CommandOutput + Send + Sync>;

enum Response {
    Output(CommandOutput),
    With(Responder),
    Hang,
}

struct Rule {
    matcher: Matcher,
    response: Response,
}

/// In-memory [`CommandRunner`] returning scripted results.
///
/// Rules registered later take precedence over earlier ones, so a test can
/// start from a baseline and override a single command.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("calls", &self.calls().len())
            .finish_non_exhaustive()
    }
}

/// Matcher for `program` (compared by file name) whose arguments contain
/// every entry of `args`.
pub fn matches(program: &str, args: &[&str]) -> impl Fn(&CommandSpec) -> bool + Send + Sync + use<> {
    let program = program.to_string();
    let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
    move |spec: &CommandSpec| {
        (spec.program == program || spec.program_name() == program)
            && args.iter().all(|needle| spec.args.iter().any(|a| a == needle))
    }
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers commands accepted by `matcher` with `output`.
    pub fn on<F>(&self, matcher: F, output: CommandOutput) -> &Self
    where
        F: Fn(&CommandSpec) -> bool + Send + Sync + 'static,
    {
        self.push(Box::new(matcher), Response::Output(output));
        self
    }

    /// Answers commands accepted by `matcher` by calling `respond`, which may
    /// touch the filesystem the way the real tool would.
    pub fn respond_with<F, R>(&self, matcher: F, respond: R) -> &Self
    where
        F: Fn(&CommandSpec) -> bool + Send + Sync + 'static,
        R: Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static,
    {
        self.push(Box::new(matcher), Response::With(Box::new(respond)));
        self
    }

    /// Commands accepted by `matcher` never finish.
    pub fn hang_on<F>(&self, matcher: F) -> &Self
    where
        F: Fn(&CommandSpec) -> bool + Send + Sync + 'static,
    {
        self.push(Box::new(matcher), Response::Hang);
        self
    }

    fn push(&self, matcher: Matcher, response: Response) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule { matcher, response });
        }
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of recorded commands accepted by `matcher`.
    pub fn count<F>(&self, matcher: F) -> usize
    where
        F: Fn(&CommandSpec) -> bool,
    {
        self.calls().iter().filter(|spec| matcher(spec)).count()
    }

    /// Records the call and picks the response. `None` means hang.
    fn respond(&self, spec: &CommandSpec) -> Option<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        log::debug!("Scripted: {}", spec.display());

        let rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return Some(CommandOutput::default()),
        };
        match rules.iter().rev().find(|rule| (rule.matcher)(spec)) {
            Some(Rule {
                response: Response::Output(output),
                ..
            }) => Some(output.clone()),
            Some(Rule {
                response: Response::With(respond),
                ..
            }) => Some(respond(spec)),
            Some(Rule {
                response: Response::Hang,
                ..
            }) => None,
            None => Some(CommandOutput::default()),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        match self.respond(spec) {
            Some(output) => Ok(output),
            None => {
                std::future::pending::<()>().await;
                Ok(CommandOutput::default())
            }
        }
    }

    fn run_blocking(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        // Hanging is meaningless without an executor; treat it as success.
        Ok(self.respond(spec).unwrap_or_default())
    }
}
