//! Juju command execution
//!
//! Every call to the `juju` binary goes through a [`CommandRunner`]. The
//! process-backed implementation is [`JujuCli`]; tests use
//! [`MockRunner`](crate::mock::MockRunner).

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use tracing::debug;

use crate::config::JujuConfig;
use crate::error::{JujuError, Result};

const MISSING_NAMESPACE: &str = "missing namespace, config not prepared";
const UNABLE_TO_CONNECT: &str = "Unable to connect to environment";

/// One `juju` invocation.
///
/// Rendered as `<action words> <args...> <--flag value...>`. Flags keep the
/// order in which call sites added them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    action: String,
    args: Vec<String>,
    flags: Vec<(String, String)>,
}

impl Invocation {
    /// Start an invocation of a subcommand (e.g. `status`, `action do`)
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            args: vec![],
            flags: vec![],
        }
    }

    /// Append a positional argument
    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Append several positional arguments
    pub fn args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        self.args.extend(args.into_iter().map(|a| a.to_string()));
        self
    }

    /// Target a named environment (`-e <name>`)
    pub fn environment(self, name: &str) -> Self {
        self.arg("-e").arg(name)
    }

    /// Append a `--key value` option
    pub fn flag(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.flags.push((key.into(), value.to_string()));
        self
    }

    /// Subcommand as written (e.g. `add-machine`)
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Value of the first `--key` option, if set
    pub fn flag_value(&self, key: &str) -> Option<&str> {
        self.flags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Arguments passed to the binary, excluding the program itself
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv: Vec<String> = self.action.split_whitespace().map(String::from).collect();
        argv.extend(self.args.iter().cloned());
        for (key, value) in &self.flags {
            argv.push(format!("--{key}"));
            argv.push(value.clone());
        }
        argv
    }

    /// Full command line for diagnostics
    pub fn command_line(&self, program: &Path) -> String {
        let mut parts = vec![program.display().to_string()];
        parts.extend(self.to_argv());
        parts.join(" ")
    }
}

/// Executes `juju` invocations
pub trait CommandRunner: Send + Sync {
    /// Run to completion and return stdout
    fn output(&self, invocation: &Invocation) -> Result<String>;

    /// Run to completion, checking only the exit status.
    ///
    /// Stdout goes to the terminal, so a failure carries stderr only.
    fn call(&self, invocation: &Invocation) -> Result<()>;

    /// Start without waiting; the returned handle reports the outcome
    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn PendingCommand>>;
}

/// A command started by [`CommandRunner::spawn`]
pub trait PendingCommand: Send {
    /// Block until the command exits
    fn wait(self: Box<Self>) -> Result<()>;
}

/// Map a failed command's captured output to an error kind.
///
/// The two sentinel messages from `juju` become [`JujuError::NotFound`] and
/// [`JujuError::Unreachable`]; everything else is an execution failure that
/// carries the output and command line.
pub fn classify_failure(output: &str, command_line: &str) -> JujuError {
    if output.contains(MISSING_NAMESPACE) {
        return JujuError::NotFound(MISSING_NAMESPACE.into());
    }
    if output.contains(UNABLE_TO_CONNECT) {
        return JujuError::Unreachable(format!("ERROR {UNABLE_TO_CONNECT}"));
    }
    JujuError::Execution {
        command: command_line.into(),
        output: output.trim_end().into(),
    }
}

/// Runs the real `juju` binary as a child process
#[derive(Debug, Clone)]
pub struct JujuCli {
    program: PathBuf,
    juju_home: Option<PathBuf>,
}

impl JujuCli {
    /// Create a runner for the given binary; children inherit `$JUJU_HOME`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            juju_home: None,
        }
    }

    /// Runner for `config.juju_bin` that points juju at `config.juju_home`,
    /// the directory the [`EnvironmentStore`](crate::store::EnvironmentStore) writes to
    pub fn from_config(config: &JujuConfig) -> Self {
        Self::new(&config.juju_bin).juju_home(&config.juju_home)
    }

    /// Export `JUJU_HOME` to every child
    pub fn juju_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.juju_home = Some(home.into());
        self
    }

    fn command(&self, invocation: &Invocation) -> (Command, String) {
        let command_line = invocation.command_line(&self.program);
        debug!(command = %command_line, "running juju");
        let mut command = Command::new(&self.program);
        command.args(invocation.to_argv());
        if let Some(home) = &self.juju_home {
            command.env("JUJU_HOME", home);
        }
        (command, command_line)
    }
}

impl Default for JujuCli {
    fn default() -> Self {
        Self::new("juju")
    }
}

impl CommandRunner for JujuCli {
    fn output(&self, invocation: &Invocation) -> Result<String> {
        let (mut command, command_line) = self.command(invocation);
        let output = command
            .stdin(Stdio::null())
            .output()
            .map_err(|source| JujuError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        if !output.status.success() {
            // Warnings on stderr are kept out of the parsed stdout, but both
            // streams go into the error.
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(classify_failure(&combined, &command_line));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn call(&self, invocation: &Invocation) -> Result<()> {
        let (mut command, command_line) = self.command(invocation);
        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| JujuError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, &command_line));
        }
        Ok(())
    }

    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn PendingCommand>> {
        let (mut command, command_line) = self.command(invocation);
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| JujuError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        Ok(Box::new(RunningCommand {
            child,
            command_line,
        }))
    }
}

/// Child process started by [`JujuCli::spawn`]
struct RunningCommand {
    child: Child,
    command_line: String,
}

impl PendingCommand for RunningCommand {
    fn wait(self: Box<Self>) -> Result<()> {
        let Self {
            child,
            command_line,
        } = *self;
        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, &command_line));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_orders_args_then_environment_then_flags() {
        let inv = Invocation::new("deploy")
            .arg("cs:trusty/mysql")
            .arg("db")
            .environment("tengu")
            .flag("to", 3)
            .flag("config", "/tmp/db.yaml");

        assert_eq!(
            inv.to_argv(),
            [
                "deploy",
                "cs:trusty/mysql",
                "db",
                "-e",
                "tengu",
                "--to",
                "3",
                "--config",
                "/tmp/db.yaml"
            ]
        );
        assert_eq!(inv.flag_value("config"), Some("/tmp/db.yaml"));
    }

    #[test]
    fn multi_word_action_is_split() {
        let inv = Invocation::new("action do").arg("web/0").arg("restart");
        assert_eq!(inv.to_argv(), ["action", "do", "web/0", "restart"]);
        assert_eq!(
            inv.command_line(Path::new("juju")),
            "juju action do web/0 restart"
        );
    }

    #[test]
    fn sentinels_are_classified() {
        let err = classify_failure(
            "ERROR missing namespace, config not prepared\n",
            "juju status",
        );
        assert!(err.is_not_found());

        let err = classify_failure(
            "ERROR Unable to connect to environment \"tengu\"",
            "juju status",
        );
        assert!(matches!(err, JujuError::Unreachable(_)));

        let err = classify_failure("ERROR charm not found\n", "juju deploy foo");
        match err {
            JujuError::Execution { command, output } => {
                assert_eq!(command, "juju deploy foo");
                assert_eq!(output, "ERROR charm not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let runner = JujuCli::new("/nonexistent/juju-binary");
        let err = runner.output(&Invocation::new("status")).unwrap_err();
        assert_eq!(err.kind(), "spawn");
    }

    #[cfg(unix)]
    mod process {
        use std::os::unix::fs::PermissionsExt;
        use std::fs;
        use std::time::{Duration, Instant};

        use super::*;

        /// Shell script standing in for the juju binary
        fn fake_juju(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("juju");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn output_returns_stdout() {
            let dir = tempfile::tempdir().unwrap();
            let runner = JujuCli::new(fake_juju(dir.path(), r#"echo "ok $*""#));

            let out = runner
                .output(&Invocation::new("status").environment("tengu"))
                .unwrap();
            assert_eq!(out, "ok status -e tengu\n");
        }

        #[test]
        fn juju_home_reaches_the_child() {
            let dir = tempfile::tempdir().unwrap();
            let program = fake_juju(dir.path(), r#"printf '%s' "$JUJU_HOME""#);
            let home = dir.path().join("juju-home");

            let config = JujuConfig::builder()
                .juju_bin(&program)
                .juju_home(&home)
                .build();
            let out = JujuCli::from_config(&config)
                .output(&Invocation::new("switch"))
                .unwrap();
            assert_eq!(out, home.display().to_string());

            let out = JujuCli::new(&program)
                .juju_home("/srv/juju")
                .output(&Invocation::new("switch"))
                .unwrap();
            assert_eq!(out, "/srv/juju");
        }

        #[test]
        fn failure_keeps_both_streams_on_separate_lines() {
            let dir = tempfile::tempdir().unwrap();
            let program = fake_juju(
                dir.path(),
                "printf 'partial'; printf 'ERROR charm not found' >&2; exit 1",
            );

            let err = JujuCli::new(&program)
                .output(&Invocation::new("deploy").arg("foo"))
                .unwrap_err();
            match err {
                JujuError::Execution { command, output } => {
                    assert_eq!(command, format!("{} deploy foo", program.display()));
                    assert_eq!(output, "partial\nERROR charm not found");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[test]
        fn sentinels_on_stderr_are_classified() {
            let dir = tempfile::tempdir().unwrap();
            let program = fake_juju(
                dir.path(),
                r#"echo 'ERROR Unable to connect to environment "tengu"' >&2; exit 1"#,
            );
            let runner = JujuCli::new(&program);
            let status = Invocation::new("status");

            assert_eq!(runner.output(&status).unwrap_err().kind(), "unreachable");
            assert_eq!(runner.call(&status).unwrap_err().kind(), "unreachable");
            let pending = runner.spawn(&status).unwrap();
            assert_eq!(pending.wait().unwrap_err().kind(), "unreachable");
        }

        #[test]
        fn call_reports_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let program = fake_juju(dir.path(), "echo 'ERROR no such service' >&2; exit 2");

            let err = JujuCli::new(&program)
                .call(&Invocation::new("destroy-service").arg("web"))
                .unwrap_err();
            assert_eq!(err.kind(), "execution");
            assert!(err.to_string().starts_with("ERROR no such service\nCOMMAND: "));
        }

        #[test]
        fn spawned_commands_run_concurrently() {
            let dir = tempfile::tempdir().unwrap();
            let program = fake_juju(
                dir.path(),
                r#"sleep 1; [ "$2" = bad ] && { echo "ERROR cannot reach $2" >&2; exit 1; }; exit 0"#,
            );
            let runner = JujuCli::new(&program);

            let started = Instant::now();
            let pending: Vec<_> = ["a", "bad", "c"]
                .into_iter()
                .map(|host| {
                    runner
                        .spawn(&Invocation::new("add-machine").arg(host))
                        .unwrap()
                })
                .collect();
            let results: Vec<_> = pending.into_iter().map(|p| p.wait()).collect();
            let elapsed = started.elapsed();

            assert!(elapsed < Duration::from_millis(2500), "took {elapsed:?}");
            assert!(results[0].is_ok());
            assert!(results[1].as_ref().unwrap_err().to_string().contains("cannot reach bad"));
            assert!(results[2].is_ok());
        }
    }
}
