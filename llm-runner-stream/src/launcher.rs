//! Process invocation collaborator.
//!
//! The runner never builds command lines itself. A [`Launcher`] is handed a
//! fully formed invocation and only has to start it, expose its output
//! streams, and let the runner wait for or kill it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tracing::debug;

/// Readable half of an invocation's output stream
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Handle to a running invocation
#[async_trait]
pub trait Invocation: Send {
    /// Wait for the invocation to end, returning its exit code.
    ///
    /// `None` means it ended without one, e.g. killed by a signal.
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Terminate the invocation and reap it
    async fn kill(&mut self) -> io::Result<()>;
}

/// A started invocation with its output streams detached
pub struct Launched {
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    pub process: Box<dyn Invocation>,
}

/// Starts invocations; called once per attempt
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> io::Result<Launched>;
}

/// A fully formed external command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

/// Spawns a [`CommandSpec`] as a child process.
///
/// stdin is closed, stdout and stderr are piped, and the child is killed if
/// its handle is dropped before it exits.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    spec: CommandSpec,
}

impl CommandLauncher {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .envs(&self.spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.spec.current_dir {
            command.current_dir(dir);
        }
        command
    }
}

#[async_trait]
impl Launcher for CommandLauncher {
    async fn launch(&self) -> io::Result<Launched> {
        let mut child = self.command().spawn()?;
        debug!(program = %self.spec.program, pid = ?child.id(), "spawned invocation");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr was not piped"))?;

        Ok(Launched {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            process: Box::new(ChildInvocation { child }),
        })
    }
}

struct ChildInvocation {
    child: Child,
}

#[async_trait]
impl Invocation for ChildInvocation {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.wait().await?.code())
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("tool")
            .arg("--print")
            .args(["--output-format", "stream-json"])
            .env("LOG", "debug")
            .current_dir("/tmp");

        assert_eq!(spec.program, "tool");
        assert_eq!(spec.args, vec!["--print", "--output-format", "stream-json"]);
        assert_eq!(spec.env.get("LOG").map(String::as_str), Some("debug"));
        assert_eq!(spec.current_dir, Some(PathBuf::from("/tmp")));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_launch() {
        let launcher = CommandLauncher::new(CommandSpec::new("/nonexistent/llm-runner-test-binary"));
        let err = launcher.launch().await.err().map(|e| e.kind());
        assert_eq!(err, Some(io::ErrorKind::NotFound));
    }
}
