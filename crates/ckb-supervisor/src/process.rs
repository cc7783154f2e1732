// SPDX-License-Identifier: MIT OR Apache-2.0
//! Low-level language-server process I/O.
//!
//! Servers speak newline-delimited JSON over stdio: one request line in,
//! one response line out. Stderr is forwarded through `tracing`.

use crate::config::LanguageServerSpec;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::warn;

/// Errors from spawning or talking to a server process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The executable could not be spawned.
    #[error("spawn failed: {0}")]
    Spawn(#[source] std::io::Error),
    /// Writing to the server's stdin failed.
    #[error("stdin write failed: {0}")]
    Stdin(#[source] std::io::Error),
    /// Reading from the server's stdout failed.
    #[error("stdout read failed: {0}")]
    Stdout(#[source] std::io::Error),
    /// The server closed its stdout.
    #[error("server exited (eof on stdout)")]
    Eof,
    /// The response line was not valid JSON.
    #[error("malformed response line: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// A spawned server with captured stdio.
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<tokio::process::ChildStdout>,
}

impl ServerProcess {
    /// Spawn the server described by `spec`.
    pub fn spawn(spec: &LanguageServerSpec) -> Result<Self, ProcessError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(ProcessError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcessError::Spawn(std::io::Error::other("stdin unavailable")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::Spawn(std::io::Error::other("stdout unavailable")))?;

        if let Some(stderr) = child.stderr.take() {
            let language = spec.language.clone();
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match r.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let s = line.trim_end();
                            if !s.is_empty() {
                                warn!(target: "ckb.supervisor.stderr", language = %language, "{s}");
                            }
                        }
                    }
                }
            });
        }

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// OS process ID, while the child is alive.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Send one request line and read one response line.
    pub async fn roundtrip(
        &mut self,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, ProcessError> {
        let mut line = serde_json::to_string(request).map_err(ProcessError::Malformed)?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(ProcessError::Stdin)?;
        self.stdin.flush().await.map_err(ProcessError::Stdin)?;

        let mut buf = String::new();
        loop {
            buf.clear();
            let n = self
                .stdout
                .read_line(&mut buf)
                .await
                .map_err(ProcessError::Stdout)?;
            if n == 0 {
                return Err(ProcessError::Eof);
            }
            let trimmed = buf.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_str(trimmed).map_err(ProcessError::Malformed);
        }
    }

    /// Kill the process and reap it.
    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn echo_spec() -> LanguageServerSpec {
        LanguageServerSpec {
            language: "echo".into(),
            command: "sh".into(),
            args: vec![
                "-c".into(),
                "while IFS= read -r line; do printf '%s\\n' \"$line\"; done".into(),
            ],
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    #[tokio::test]
    async fn roundtrip_echoes_json() {
        let mut proc = ServerProcess::spawn(&echo_spec()).unwrap();
        let req = serde_json::json!({"method": "initialize"});
        let resp = proc.roundtrip(&req).await.unwrap();
        assert_eq!(resp, req);
        proc.kill().await;
    }

    #[tokio::test]
    async fn eof_is_reported_when_server_exits() {
        let spec = LanguageServerSpec {
            language: "oneshot".into(),
            command: "sh".into(),
            args: vec!["-c".into(), "read line; exit 0".into()],
            env: BTreeMap::new(),
            cwd: None,
        };
        let mut proc = ServerProcess::spawn(&spec).unwrap();
        let err = proc
            .roundtrip(&serde_json::json!({"method": "ping"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Eof));
    }

    #[tokio::test]
    async fn spawn_failure_surfaces() {
        let spec = LanguageServerSpec {
            language: "missing".into(),
            command: "/nonexistent/definitely-not-a-binary".into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        };
        assert!(matches!(
            ServerProcess::spawn(&spec),
            Err(ProcessError::Spawn(_))
        ));
    }

    #[tokio::test]
    async fn malformed_response_is_an_error() {
        let spec = LanguageServerSpec {
            language: "garbage".into(),
            command: "sh".into(),
            args: vec!["-c".into(), "read line; echo 'not json'".into()],
            env: BTreeMap::new(),
            cwd: None,
        };
        let mut proc = ServerProcess::spawn(&spec).unwrap();
        let err = proc
            .roundtrip(&serde_json::json!({"method": "ping"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Malformed(_)));
        proc.kill().await;
    }
}
