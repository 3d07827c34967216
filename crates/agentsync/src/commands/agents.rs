//! Agent registry, event log and summary views.

use agentsync_core::AgentStatus;
use anyhow::Result;
use itertools::Itertools;

use super::Context;
use crate::output;

pub async fn list(ctx: &Context, status: Option<&str>) -> Result<()> {
    let status = status.map(str::parse::<AgentStatus>).transpose()?;
    let agents = ctx.service.registry().list(status).await?;
    output::emit(ctx.format, &agents, |list| {
        if list.is_empty() {
            return "No agents".to_string();
        }
        list.iter()
            .map(|a| {
                format!(
                    "{}  {}  {}  last active {}",
                    a.agent_id,
                    a.agent_type,
                    a.status,
                    a.last_active.to_rfc3339()
                )
            })
            .join("\n")
    })
}

pub async fn events(ctx: &Context, limit: u32) -> Result<()> {
    let events = ctx.service.events().list_recent(limit).await?;
    output::emit(ctx.format, &events, |list| {
        list.iter()
            .map(|e| {
                format!(
                    "{}  {:<18} {} {} {}",
                    e.at.to_rfc3339(),
                    e.kind.as_str(),
                    e.agent_id.as_deref().unwrap_or("-"),
                    e.file_path.as_deref().unwrap_or("-"),
                    e.detail
                )
            })
            .join("\n")
    })
}

pub async fn stats(ctx: &Context) -> Result<()> {
    let stats = ctx.service.stats().await?;
    output::emit(ctx.format, &stats, |s| {
        format!(
            "AgentSync status:\n  Active leases: {} (held by {} agent(s))\n  Active work items: {}\n  Open conflicts: {}\n  Agents: {} active, {} known",
            s.active_leases,
            s.agents_holding_leases,
            s.active_work_items,
            s.open_conflicts,
            s.active_agents,
            s.known_agents
        )
    })
}
