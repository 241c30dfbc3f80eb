//! Real process execution via `tokio::process`.

use super::{CommandOutput, CommandRunner, CommandSpec, OutputFilter};
use crate::cli::OutputManager;
use crate::error::{EXIT_COMMAND_NOT_FOUND, EXIT_FAILURE, EXIT_TIMEOUT, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Runs commands as child processes, streaming their output line by line.
///
/// Children are killed if the future driving them is dropped, which is how
/// an operator interrupt stops a running tool.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    output: OutputManager,
}

impl ProcessRunner {
    pub fn new(output: OutputManager) -> Self {
        Self { output }
    }

    fn not_found(spec: &CommandSpec, reason: &str) -> CommandOutput {
        let message = format!("{}: {reason}", spec.program);
        log::error!("{message}");
        CommandOutput::failed(EXIT_COMMAND_NOT_FOUND, message)
    }
}

/// Program path as the child will see it: relative paths with a directory
/// part are taken from the command's working directory.
fn program_path(spec: &CommandSpec) -> PathBuf {
    let program = Path::new(&spec.program);
    match &spec.cwd {
        Some(dir) if program.is_relative() && program.components().count() > 1 => {
            dir.join(program)
        }
        _ => program.to_path_buf(),
    }
}

/// Reads `reader` to the end, echoing lines that pass `filter`.
///
/// Lines are decoded lossily; tools are free to print any bytes. The stream
/// is always drained to EOF so the child never blocks on a full pipe.
async fn pump_lines<R>(reader: Option<R>, filter: OutputFilter, output: &OutputManager) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(reader) = reader else {
        return captured;
    };

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut read_errors = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                if filter.keep(line) {
                    output.indent(line);
                }
                captured.push_str(line);
                captured.push('\n');
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                read_errors += 1;
                log::warn!("Error reading tool output: {e}");
                if read_errors >= 3 {
                    break;
                }
            }
        }
    }
    captured
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    EXIT_FAILURE
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        log::debug!("Running: {}", spec.display());

        let program = match which::which(program_path(spec)) {
            Ok(path) => path,
            Err(e) => return Ok(Self::not_found(spec, &format!("not found ({e})"))),
        };

        let mut cmd = Command::new(program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::not_found(spec, "command not found"));
            }
            Err(e) => return Err(e.into()),
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let filter = spec.filter;

        // Both streams must be drained before waiting, or a chatty tool
        // blocks on a full pipe.
        let finished = async {
            let (out, err) = tokio::join!(
                pump_lines(stdout, filter, &self.output),
                pump_lines(stderr, filter, &self.output)
            );
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((out, err, status))
        };

        let outcome = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, finished).await.ok(),
            None => Some(finished.await),
        };

        let Some(result) = outcome else {
            log::warn!(
                "{} exceeded {}s, terminating",
                spec.program_name(),
                spec.timeout.map(|t| t.as_secs()).unwrap_or_default()
            );
            if let Err(e) = child.kill().await {
                log::warn!("Failed to kill {}: {e}", spec.program_name());
            }
            return Ok(CommandOutput::failed(
                EXIT_TIMEOUT,
                format!("{} timed out", spec.program_name()),
            ));
        };

        let (stdout, stderr, status) = result?;
        let exit_code = exit_code_of(status);
        log::debug!("{} exited with {exit_code}", spec.program_name());

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    fn run_blocking(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        log::debug!("Running (blocking): {}", spec.display());

        let mut cmd = std::process::Command::new(program_path(spec));
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        match cmd.output() {
            Ok(output) => Ok(CommandOutput {
                exit_code: exit_code_of(output.status),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::not_found(spec, "command not found"))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(OutputManager::silent())
    }

    #[tokio::test]
    async fn captures_exit_code_and_output() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo out; echo err >&2; exit 3"])
            .filter(OutputFilter::Quiet);
        let output = runner().run(&spec).await.unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn passes_context_as_environment() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "printf %s \"$APP_SCHEME\""])
            .envs(vec![("APP_SCHEME".into(), "MyApp".into())])
            .filter(OutputFilter::Quiet);
        let output = runner().run(&spec).await.unwrap();
        assert_eq!(output.stdout, "MyApp\n");
    }

    #[tokio::test]
    async fn missing_program_reports_127() {
        let spec = CommandSpec::new("definitely-not-a-real-tool-xyz");
        let output = runner().run(&spec).await.unwrap();
        assert_eq!(output.exit_code, EXIT_COMMAND_NOT_FOUND);
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .timeout(Some(Duration::from_millis(100)));
        let output = runner().run(&spec).await.unwrap();
        assert_eq!(output.exit_code, EXIT_TIMEOUT);
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_stop_draining() {
        // Well past a pipe buffer after the bad bytes.
        let script = "printf 'start\\n\\377\\377 bad\\n'; \
                      i=0; while [ $i -lt 3000 ]; do echo \"line $i of the build log\"; i=$((i+1)); done; \
                      echo done; exit 0";
        let spec = CommandSpec::new("sh")
            .args(["-c", script])
            .filter(OutputFilter::Quiet);
        let output = runner().run(&spec).await.unwrap();

        assert_eq!(output.exit_code, 0);
        let lines: Vec<&str> = output.stdout.lines().collect();
        assert_eq!(lines.len(), 3003);
        assert_eq!(lines[0], "start");
        assert_eq!(lines[1], "\u{FFFD}\u{FFFD} bad");
        assert_eq!(lines.last(), Some(&"done"));
        assert!(output.stdout.len() > 64 * 1024);
    }

    #[tokio::test]
    async fn relative_program_resolves_from_working_directory() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        let tool = bin.join("tool");
        std::fs::write(&tool, "#!/bin/sh\necho from-tool\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let spec = CommandSpec::new("./bin/tool")
            .current_dir(dir.path())
            .filter(OutputFilter::Quiet);
        let output = runner().run(&spec).await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, "from-tool\n");

        let output = runner().run_blocking(&spec).unwrap();
        assert_eq!(output.exit_code, 0);
    }

    #[test]
    fn blocking_run_reports_exit_code() {
        let spec = CommandSpec::new("sh").args(["-c", "exit 4"]);
        let output = runner().run_blocking(&spec).unwrap();
        assert_eq!(output.exit_code, 4);
    }
}
