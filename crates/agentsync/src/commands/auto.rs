//! `auto`: wrap an agent process in an auto-coordination session.

use std::time::Duration;

use agentsync_core::{
    session::{ChildProcess, GitStatusDetector, SessionOptions},
    AgentIdentity, AutoCoordinator, ClientKind,
};
use anyhow::{Context as _, Result};
use tracing::info;

use super::Context;
use crate::output::{self, OutputFormat};

#[derive(Debug, Clone)]
pub struct AutoOptions {
    pub client: ClientKind,
    /// `--agent`, when given, wins over detection.
    pub explicit_agent: Option<String>,
    pub ttl_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub description: String,
    pub command: Vec<String>,
}

/// Returns the wrapped process's exit code (1 if it died by signal).
pub async fn run(ctx: &Context, opts: AutoOptions) -> Result<i32> {
    let root = std::env::current_dir().context("Failed to read current directory")?;
    let mut identity = AgentIdentity::from_process_env(opts.client, &root);
    if let Some(agent_id) = opts.explicit_agent {
        identity.agent_id = agent_id;
    }

    let options = SessionOptions::from_config(
        ctx.service.config(),
        opts.ttl_secs.map(Duration::from_secs),
        opts.poll_interval_ms.map(Duration::from_millis),
    )?
    .with_description(opts.description);

    info!(
        agent_id = %identity.agent_id,
        label = %identity.session_label,
        ttl = ?options.ttl,
        renew_every = ?options.renew_interval,
        "starting auto-coordination"
    );
    let mut process = ChildProcess::spawn(&opts.command, &identity)?;
    let session = AutoCoordinator::new(
        &ctx.service,
        identity,
        Box::new(GitStatusDetector::new(root)),
        options,
    );
    let report = session.run(&mut process).await?;

    // The child owns the terminal's stdout; text summaries go to stderr.
    if ctx.format == OutputFormat::Json {
        output::emit(ctx.format, &report, |_| String::new())?;
    } else {
        eprintln!(
            "agentsync: session {} closed; claimed {} file(s), released {} on exit{}",
            report.session_id,
            report.claimed_ever.len(),
            report.released_on_drain.len(),
            if report.forced_drain {
                " (forced after repeated poll failures)"
            } else {
                ""
            }
        );
    }

    Ok(report.exit_code.unwrap_or(1))
}
