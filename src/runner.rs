use std::fmt;
use std::future::Future;
use std::io;
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::process::Command;
use tokio::time;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &'static str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{command}: executable not found")]
    NotFound { command: String },
    #[error("{command}: failed to spawn: {source}")]
    Spawn { command: String, source: io::Error },
    #[error("{command}: exited with {}: {stderr}", exit_reason(.code))]
    Status {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{command}: timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("{command}: output is not valid UTF-8")]
    Output { command: String },
}

fn exit_reason(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}

#[derive(Debug)]
pub struct RawSample {
    pub source: &'static str,
    pub text: String,
    pub captured_at: SystemTime,
    pub error: Option<ExecError>,
}

impl RawSample {
    pub fn capture(source: &'static str, result: Result<String, ExecError>) -> Self {
        let (text, error) = match result {
            Ok(text) => (text, None),
            Err(err) => (String::new(), Some(err)),
        };
        Self {
            source,
            text,
            captured_at: SystemTime::now(),
            error,
        }
    }

    pub fn into_text(self) -> Result<String, ExecError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.text),
        }
    }
}

pub trait CommandRunner: Send + Sync + 'static {
    fn run(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> impl Future<Output = Result<String, ExecError>> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandSpec, timeout: Duration) -> Result<String, ExecError> {
        let child = Command::new(command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ExecError::NotFound {
                    command: command.to_string(),
                })
            }
            Ok(Err(source)) => {
                return Err(ExecError::Spawn {
                    command: command.to_string(),
                    source,
                })
            }
            Err(_elapsed) => {
                return Err(ExecError::Timeout {
                    command: command.to_string(),
                    timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(ExecError::Status {
                command: command.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| ExecError::Output {
            command: command.to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum Canned {
        Stdout(String),
        Exit(i32),
        Missing,
    }

    #[derive(Debug, Default)]
    pub struct FakeRunner {
        outputs: Mutex<HashMap<&'static str, Canned>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        pub fn with(self, program: &'static str, canned: Canned) -> Self {
            self.set(program, canned);
            self
        }

        pub fn set(&self, program: &'static str, canned: Canned) {
            self.outputs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(program, canned);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    impl CommandRunner for FakeRunner {
        async fn run(&self, command: &CommandSpec, _timeout: Duration) -> Result<String, ExecError> {
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(command.to_string());
            let canned = self
                .outputs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(command.program)
                .cloned()
                .unwrap_or(Canned::Missing);
            match canned {
                Canned::Stdout(text) => Ok(text),
                Canned::Exit(code) => Err(ExecError::Status {
                    command: command.to_string(),
                    code: Some(code),
                    stderr: "simulated failure".to_string(),
                }),
                Canned::Missing => Err(ExecError::NotFound {
                    command: command.to_string(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_display_joins_arguments() {
        let spec = CommandSpec::new("zpool", ["list", "-p", "zones"]);
        assert_eq!(spec.to_string(), "zpool list -p zones");
        assert_eq!(CommandSpec::new("df", Vec::<String>::new()).to_string(), "df");
    }

    #[tokio::test]
    async fn missing_executable_is_reported() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-4f1c", Vec::<String>::new());
        let err = SystemRunner
            .run(&spec, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::NotFound { .. }), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_non_zero_exit() {
        let ok = CommandSpec::new("echo", ["hello"]);
        let out = SystemRunner.run(&ok, Duration::from_secs(5)).await.unwrap();
        assert_eq!(out.trim(), "hello");

        let failing = CommandSpec::new("false", Vec::<String>::new());
        let err = SystemRunner
            .run(&failing, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Status { code: Some(1), .. }), "{err}");
    }

    #[test]
    fn raw_sample_keeps_error_instead_of_text() {
        let ok = RawSample::capture("df", Ok("Filesystem\n".to_string()));
        assert!(ok.error.is_none());
        assert_eq!(ok.into_text().unwrap(), "Filesystem\n");

        let failed = RawSample::capture(
            "zpool",
            Err(ExecError::NotFound {
                command: "zpool list -p".to_string(),
            }),
        );
        assert!(failed.text.is_empty());
        assert!(matches!(failed.into_text(), Err(ExecError::NotFound { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let slow = CommandSpec::new("sleep", ["5"]);
        let err = SystemRunner
            .run(&slow, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }), "{err}");
    }
}
