//! Local and ssh command execution

use std::fmt;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::DeployError;

/// A command line plus optional stdin contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The command as a single string safe to hand to a POSIX shell
    pub fn to_shell_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| shell_quote(part))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_shell_line())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stderr if present, otherwise stdout; used in error messages
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Where commands run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Local,
    Ssh(SshTarget),
}

/// Destination of the remote execution channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// `user@host` or an ssh config alias
    pub destination: String,

    /// Extra `-o` options, e.g. `StrictHostKeyChecking=accept-new`
    pub options: Vec<String>,
}

impl Transport {
    pub fn is_remote(&self) -> bool {
        matches!(self, Transport::Ssh(_))
    }

    /// The command actually spawned on this machine
    pub fn wrap(&self, spec: &CommandSpec) -> CommandSpec {
        match self {
            Transport::Local => spec.clone(),
            Transport::Ssh(target) => {
                let mut wrapped = CommandSpec::new("ssh").args(["-o", "BatchMode=yes"]);
                for option in &target.options {
                    wrapped = wrapped.arg("-o").arg(option.clone());
                }
                wrapped = wrapped
                    .arg(target.destination.clone())
                    .arg("--")
                    .arg(spec.to_shell_line());
                wrapped.stdin = spec.stdin.clone();
                wrapped
            }
        }
    }

    /// Run a command and capture its output. A non-zero exit is not an
    /// error here; callers decide what a failure means.
    pub async fn exec(&self, spec: &CommandSpec) -> Result<CommandOutput, DeployError> {
        let wrapped = self.wrap(spec);
        debug!("exec: {}", wrapped);

        let mut child = Command::new(&wrapped.program)
            .args(&wrapped.args)
            .stdin(if wrapped.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DeployError::CommandError(format!("Failed to run {}: {}", wrapped.program, e))
            })?;

        // Feed stdin while draining stdout, or a large payload fills the pipe
        let stdin = child.stdin.take();
        let feed = async move {
            if let (Some(input), Some(mut stdin)) = (wrapped.stdin.as_ref(), stdin) {
                match stdin.write_all(input.as_bytes()).await {
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            Ok(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run a command and turn a non-zero exit into an error built by `on_fail`
    pub async fn exec_ok<F>(&self, spec: &CommandSpec, on_fail: F) -> Result<CommandOutput, DeployError>
    where
        F: FnOnce(String) -> DeployError,
    {
        let output = self.exec(spec).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(on_fail(format!(
                "`{}` exited with {}: {}",
                spec,
                output
                    .code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                output.diagnostic()
            )))
        }
    }
}

/// Quote one word for a POSIX shell
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
