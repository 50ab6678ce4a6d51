//! Scripted launcher replaying canned output over in-memory pipes.

#![allow(dead_code)]

use async_trait::async_trait;
use llm_runner_stream::{Invocation, Launched, Launcher};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

const PIPE_CAPACITY: usize = 64 * 1024;

/// What one scripted invocation writes and how it ends
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Keep stdout open and never exit until killed
    pub hang: bool,
}

impl Script {
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut stdout = String::new();
        for line in lines {
            stdout.push_str(line.as_ref());
            stdout.push('\n');
        }
        Self {
            stdout,
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn failing(stderr: &str, code: i32) -> Self {
        Self {
            stderr: stderr.to_string(),
            exit_code: Some(code),
            ..Default::default()
        }
    }

    pub fn stdout(text: &str) -> Self {
        Self {
            stdout: text.to_string(),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.to_string();
        self
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }
}

/// Replays scripts in order; the last one repeats
pub struct ScriptedLauncher {
    scripts: Vec<Script>,
    launches: AtomicUsize,
    kills: Mutex<Vec<CancellationToken>>,
}

impl ScriptedLauncher {
    pub fn new(script: Script) -> Self {
        Self::sequence(vec![script])
    }

    pub fn sequence(scripts: Vec<Script>) -> Self {
        assert!(!scripts.is_empty());
        Self {
            scripts,
            launches: AtomicUsize::new(0),
            kills: Mutex::new(Vec::new()),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Whether the most recent invocation was killed
    pub fn last_killed(&self) -> bool {
        self.kills
            .lock()
            .unwrap()
            .last()
            .map(CancellationToken::is_cancelled)
            .unwrap_or(false)
    }
}

#[async_trait]
impl Launcher for ScriptedLauncher {
    async fn launch(&self) -> io::Result<Launched> {
        let index = self.launches.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts[index.min(self.scripts.len() - 1)].clone();
        let killed = CancellationToken::new();
        self.kills.lock().unwrap().push(killed.clone());

        let (mut stdout_tx, stdout_rx) = tokio::io::duplex(PIPE_CAPACITY);
        let (mut stderr_tx, stderr_rx) = tokio::io::duplex(PIPE_CAPACITY);

        {
            let script = script.clone();
            let killed = killed.clone();
            tokio::spawn(async move {
                let _ = stderr_tx.write_all(script.stderr.as_bytes()).await;
                drop(stderr_tx);
                let _ = stdout_tx.write_all(script.stdout.as_bytes()).await;
                if script.hang {
                    killed.cancelled().await;
                }
            });
        }

        Ok(Launched {
            stdout: Box::new(stdout_rx),
            stderr: Box::new(stderr_rx),
            process: Box::new(ScriptedProcess {
                exit_code: script.exit_code,
                hang: script.hang,
                killed,
            }),
        })
    }
}

struct ScriptedProcess {
    exit_code: Option<i32>,
    hang: bool,
    killed: CancellationToken,
}

#[async_trait]
impl Invocation for ScriptedProcess {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        if self.hang {
            self.killed.cancelled().await;
            return Ok(None);
        }
        Ok(self.exit_code)
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.killed.cancel();
        Ok(())
    }
}

/// A launcher that can never start anything
pub struct BrokenLauncher;

#[async_trait]
impl Launcher for BrokenLauncher {
    async fn launch(&self) -> io::Result<Launched> {
        Err(io::Error::new(io::ErrorKind::NotFound, "tool not installed"))
    }
}

pub fn system_line(session: &str) -> String {
    format!(r#"{{"type":"system","subtype":"init","session_id":"{session}","tools":["Read"]}}"#)
}

pub fn assistant_line(session: &str, text: &str) -> String {
    format!(
        r#"{{"type":"assistant","session_id":"{session}","message":{{"role":"assistant","content":[{{"type":"text","text":"{text}"}}]}}}}"#
    )
}

pub fn result_line(session: &str, text: &str) -> String {
    format!(
        r#"{{"type":"result","subtype":"success","session_id":"{session}","result":"{text}","cost_usd":0.01,"num_turns":1,"is_error":false}}"#
    )
}
