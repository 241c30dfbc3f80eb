//! Coloured terminal output for pipeline progress.
//!
//! All output here is decorative: write errors (closed stdout, broken pipe)
//! are swallowed so that a detached terminal can never fail a build.

use console::{Style, Term};

/// Terminal output manager with verbosity control.
#[derive(Debug, Clone)]
pub struct OutputManager {
    verbose: bool,
    quiet: bool,
    mute: bool,
}

impl Default for OutputManager {
    fn default() -> Self {
        Self::new(false, false)
    }
}

impl OutputManager {
    /// Creates an output manager.
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self {
            verbose,
            quiet,
            mute: false,
        }
    }

    /// Output manager that prints nothing at all, warnings and failure
    /// banners included. For embedding and tests; `--quiet` still reports
    /// problems on stderr.
    pub fn silent() -> Self {
        Self {
            verbose: false,
            quiet: true,
            mute: true,
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn is_silent(&self) -> bool {
        self.mute
    }

    fn out(&self, line: &str) {
        if !self.quiet {
            let _ = Term::stdout().write_line(line);
        }
    }

    fn err(&self, line: &str) {
        if !self.mute {
            let _ = Term::stderr().write_line(line);
        }
    }

    /// Section header, printed before each stage.
    pub fn section(&self, title: &str) {
        let style = Style::new().cyan().bold();
        self.out(&format!("{}", style.apply_to(format!("==> {title}"))));
    }

    /// Progress message.
    pub fn progress(&self, message: &str) {
        self.out(&format!("{} {message}", Style::new().blue().apply_to("•")));
    }

    /// Success message.
    pub fn success(&self, message: &str) {
        self.out(&format!("{} {message}", Style::new().green().apply_to("✓")));
    }

    /// Warning message. Printed even in quiet mode.
    pub fn warn(&self, message: &str) {
        let style = Style::new().yellow();
        self.err(&format!("{} {}", style.apply_to("⚠"), style.apply_to(message)));
    }

    /// Error message. Printed even in quiet mode.
    pub fn error(&self, message: &str) {
        let style = Style::new().red().bold();
        self.err(&format!("{} {}", style.apply_to("✗"), style.apply_to(message)));
    }

    /// Plain line.
    pub fn line(&self, text: &str) {
        self.out(text);
    }

    /// One row of a dry-run plan.
    pub fn plan_entry(&self, stage: &str, enabled: bool) {
        if enabled {
            self.out(&format!("  {} {stage}", Style::new().green().apply_to("run ")));
        } else {
            self.out(&format!("  {} {}", Style::new().dim().apply_to("skip"), Style::new().dim().apply_to(stage)));
        }
    }

    /// Indented text, used for streamed tool output.
    pub fn indent(&self, message: &str) {
        self.out(&format!("    {message}"));
    }

    /// Only printed in verbose mode.
    pub fn verbose(&self, message: &str) {
        if self.verbose {
            self.out(&format!("{}", Style::new().dim().apply_to(message)));
        }
    }

    /// Clearly marked failure banner naming the failed stage.
    pub fn failure_banner(&self, stage: &str, exit_code: i32, reason: &str) {
        let style = Style::new().red().bold();
        let rule = "=".repeat(60);
        self.err(&format!("{}", style.apply_to(&rule)));
        self.err(&format!(
            "{}",
            style.apply_to(format!("BUILD FAILED at stage '{stage}' (exit code {exit_code})"))
        ));
        self.err(&format!("{}", Style::new().red().apply_to(reason)));
        self.err(&format!("{}", style.apply_to(&rule)));
    }
}
