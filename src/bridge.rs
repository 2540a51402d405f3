// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Process boundary for the device-bridge CLI
//!
//! Everything above this module talks to devices through [`Bridge::issue`].

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::trace;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{args}' exited with {status}: {stderr}")]
    ExitFailure {
        args: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("'{args}' timed out after {timeout:?}")]
    Timeout { args: String, timeout: Duration },

    #[error("{0}")]
    Other(String),
}

/// Request/response access to the device-bridge CLI.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Run one bridge invocation and return its captured output.
    ///
    /// `serial` scopes the call to one device and `shell` runs `args` through
    /// the device shell.
    async fn issue(
        &self,
        serial: Option<&str>,
        shell: bool,
        args: &[String],
    ) -> Result<String, BridgeError>;
}

/// Build the full argument list for one invocation.
pub fn invocation_args(serial: Option<&str>, shell: bool, args: &[String]) -> Vec<String> {
    let mut full = Vec::with_capacity(args.len() + 3);
    if let Some(serial) = serial {
        full.push("-s".to_string());
        full.push(serial.to_string());
    }
    if shell {
        full.push("shell".to_string());
    }
    full.extend(args.iter().cloned());
    full
}

/// Bridge backed by a real `adb` binary.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl AdbBridge {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl Default for AdbBridge {
    fn default() -> Self {
        Self::new("adb")
    }
}

#[async_trait]
impl Bridge for AdbBridge {
    async fn issue(
        &self,
        serial: Option<&str>,
        shell: bool,
        args: &[String],
    ) -> Result<String, BridgeError> {
        let full = invocation_args(serial, shell, args);
        trace!(program = %self.program.display(), args = ?full, "issuing bridge command");

        let mut cmd = Command::new(&self.program);
        cmd.args(&full)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, cmd.output())
                .await
                .map_err(|_| BridgeError::Timeout {
                    args: full.join(" "),
                    timeout,
                })?,
            None => cmd.output().await,
        }
        .map_err(|source| BridgeError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(BridgeError::ExitFailure {
                args: full.join(" "),
                status: output.status,
                stderr,
            });
        }

        // adb reports some results (e.g. `am start` warnings) only on stderr
        if stderr.is_empty() {
            Ok(stdout)
        } else {
            Ok(stderr)
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// One recorded bridge call.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Call {
        pub serial: Option<String>,
        pub shell: bool,
        pub args: Vec<String>,
    }

    /// In-memory bridge that records calls and answers from canned responses.
    ///
    /// Responses are matched on the first argument after `shell`; unmatched
    /// calls return an empty string.
    #[derive(Default)]
    pub struct ScriptedBridge {
        calls: Mutex<Vec<Call>>,
        responses: Mutex<Vec<(String, VecDeque<Result<String, String>>)>>,
    }

    impl ScriptedBridge {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, first_arg: &str, output: &str) -> &Self {
            self.push(first_arg, Ok(output.to_string()))
        }

        pub fn fail(&self, first_arg: &str, message: &str) -> &Self {
            self.push(first_arg, Err(message.to_string()))
        }

        fn push(&self, first_arg: &str, response: Result<String, String>) -> &Self {
            let mut responses = self.responses.lock().unwrap();
            match responses.iter_mut().find(|(key, _)| key == first_arg) {
                Some((_, queue)) => queue.push_back(response),
                None => responses.push((first_arg.to_string(), VecDeque::from([response]))),
            }
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        /// Argument lists of calls that started with `input`.
        pub fn inputs(&self) -> Vec<Vec<String>> {
            self.calls()
                .into_iter()
                .filter(|c| c.args.first().map(String::as_str) == Some("input"))
                .map(|c| c.args)
                .collect()
        }
    }

    #[async_trait]
    impl Bridge for ScriptedBridge {
        async fn issue(
            &self,
            serial: Option<&str>,
            shell: bool,
            args: &[String],
        ) -> Result<String, BridgeError> {
            self.calls.lock().unwrap().push(Call {
                serial: serial.map(str::to_string),
                shell,
                args: args.to_vec(),
            });

            let key = args.first().cloned().unwrap_or_default();
            let mut responses = self.responses.lock().unwrap();
            let Some((_, queue)) = responses.iter_mut().find(|(k, _)| *k == key) else {
                return Ok(String::new());
            };

            // The last response for a key is sticky
            let response = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };

            match response {
                Some(Ok(output)) => Ok(output),
                Some(Err(message)) => Err(BridgeError::Other(message)),
                None => Ok(String::new()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_invocation_args_shell() {
        let args = invocation_args(Some("emulator-5554"), true, &strings(&["input", "tap", "1", "2"]));
        assert_eq!(
            args,
            strings(&["-s", "emulator-5554", "shell", "input", "tap", "1", "2"])
        );
    }

    #[test]
    fn test_invocation_args_unscoped() {
        let args = invocation_args(None, false, &strings(&["devices"]));
        assert_eq!(args, strings(&["devices"]));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let bridge = AdbBridge::new("/nonexistent/adbflow-test-adb");
        let result = bridge.issue(None, false, &strings(&["devices"])).await;
        assert!(matches!(result, Err(BridgeError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_scripted_bridge_records_calls() {
        let bridge = mock::ScriptedBridge::new();
        bridge.respond("wm", "Physical size: 1080x1920");

        let output = bridge
            .issue(Some("abc"), true, &strings(&["wm", "size"]))
            .await
            .unwrap();
        assert_eq!(output, "Physical size: 1080x1920");
        assert_eq!(bridge.calls().len(), 1);
        assert_eq!(bridge.calls()[0].serial.as_deref(), Some("abc"));
    }
}
