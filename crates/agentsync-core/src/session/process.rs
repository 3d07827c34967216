//! The wrapped agent process.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::{agents::AgentIdentity, Error, Result};

#[async_trait]
pub trait WrappedProcess: Send {
    /// Wait for exit. `None` when the process was killed by a signal.
    async fn wait(&mut self) -> Result<Option<i32>>;

    /// Ask the process to stop. Safe to call after it exited.
    async fn terminate(&mut self) -> Result<()>;

    fn id(&self) -> Option<u32>;
}

/// A child process inheriting stdio, with the session identity exported.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    pub fn spawn(argv: &[String], identity: &AgentIdentity) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::InvalidInput("no command to wrap".to_string()))?;

        let child = Command::new(program)
            .args(args)
            .envs(identity.child_env())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::InvalidInput(format!("Failed to start {program}: {e}")))?;

        debug!(program = %program, pid = ?child.id(), "wrapped process started");
        Ok(Self { child })
    }
}

#[async_trait]
impl WrappedProcess for ChildProcess {
    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn terminate(&mut self) -> Result<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => {
                warn!(error = %err, "failed to stop wrapped process");
                Err(err.into())
            }
        }
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}
