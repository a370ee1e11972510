use crate::runner::{CommandRunner, CommandSpec, ExecError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ZoneContext {
    Global,
    Guest,
}

impl fmt::Display for ZoneContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ZoneContext::Global => "global",
            ZoneContext::Guest => "guest",
        })
    }
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("cannot determine zone: {0}")]
    Exec(#[from] ExecError),
    #[error("cannot determine zone: zonename printed nothing")]
    Empty,
}

pub fn classify(output: &str) -> Result<ZoneContext, ContextError> {
    match output.trim() {
        "" => Err(ContextError::Empty),
        "global" => Ok(ZoneContext::Global),
        _ => Ok(ZoneContext::Guest),
    }
}

pub async fn detect<R: CommandRunner>(
    runner: &R,
    timeout: Duration,
) -> Result<ZoneContext, ContextError> {
    let zonename = CommandSpec::new("zonename", Vec::<String>::new());
    let output = runner.run(&zonename, timeout).await?;
    classify(&output)
}
