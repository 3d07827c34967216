//! Lease commands: claim, renew, release, status, active, gc.

use agentsync_core::{
    coordination::PathState,
    service::{ClaimRequest, ReleaseRequest, RenewRequest},
    Error,
};
use anyhow::Result;
use itertools::Itertools;
use serde::Serialize;

use super::Context;
use crate::output;

pub async fn claim(
    ctx: &Context,
    files: Vec<String>,
    description: String,
    ttl_secs: Option<u64>,
    priority: i64,
) -> Result<()> {
    let response = ctx
        .service
        .claim(ClaimRequest {
            agent_id: ctx.agent_id.clone(),
            files,
            description,
            ttl_secs,
            priority,
        })
        .await?;

    output::emit(ctx.format, &response, |r| {
        let granted = r.outcome.granted.iter().map(|lease| {
            let verb = if r.outcome.extended.contains(&lease.file_path) {
                "Extended"
            } else {
                "Claimed"
            };
            format!(
                "✓ {verb} {} until {}",
                lease.file_path,
                lease.expires_at.to_rfc3339()
            )
        });
        let blocked = r.outcome.blocked.iter().map(|b| {
            if b.description.is_empty() {
                format!("✗ {} is held by {}", b.file_path, b.holder)
            } else {
                format!("✗ {} is held by {}: {}", b.file_path, b.holder, b.description)
            }
        });
        let failed = r
            .outcome
            .failed
            .iter()
            .map(|f| format!("✗ {} not claimed: {}", f.file_path, f.error));
        let work = r
            .work_item
            .iter()
            .map(|item| format!("  Work item #{}", item.work_item_id));
        granted.chain(blocked).chain(failed).chain(work).join("\n")
    })?;

    if let Some(blocked) = response.outcome.blocked.first() {
        return Err(blocked.to_error().into());
    }
    match response.outcome.failed.first() {
        Some(failed) => Err(Error::TransientIo(format!(
            "claim of '{}' did not complete: {}",
            failed.file_path, failed.error
        ))
        .into()),
        None => Ok(()),
    }
}

pub async fn renew(ctx: &Context, files: Vec<String>, ttl_secs: Option<u64>) -> Result<()> {
    let outcome = ctx
        .service
        .renew(RenewRequest {
            agent_id: ctx.agent_id.clone(),
            files,
            ttl_secs,
        })
        .await?;

    output::emit(ctx.format, &outcome, |o| {
        let renewed = o.renewed.iter().map(|lease| {
            format!(
                "✓ Renewed {} until {}",
                lease.file_path,
                lease.expires_at.to_rfc3339()
            )
        });
        let denied = o
            .denied
            .iter()
            .map(|d| format!("✗ {}", d.to_error(&ctx.agent_id)));
        renewed.chain(denied).join("\n")
    })?;

    match outcome.denied.first() {
        Some(denied) => Err(denied.to_error(&ctx.agent_id).into()),
        None => Ok(()),
    }
}

pub async fn release(
    ctx: &Context,
    files: Vec<String>,
    all: bool,
    commit_ref: Option<String>,
) -> Result<()> {
    let files = if all {
        ctx.service
            .locks()
            .locks_for_agent(&ctx.agent_id)
            .await?
            .into_iter()
            .map(|lease| lease.file_path)
            .collect()
    } else {
        files
    };

    let response = ctx
        .service
        .release(ReleaseRequest {
            agent_id: ctx.agent_id.clone(),
            files,
            commit_ref,
        })
        .await?;

    output::emit(ctx.format, &response, |r| {
        let released = r
            .outcome
            .released
            .iter()
            .map(|path| format!("✓ Released {path}"));
        let skipped = r
            .outcome
            .skipped
            .iter()
            .map(|s| format!("  {} was not held ({:?})", s.file_path, s.reason));
        let completed = r
            .completed
            .iter()
            .map(|item| format!("✓ Work item #{} done", item.work_item_id));
        let lines = released.chain(skipped).chain(completed).join("\n");
        if lines.is_empty() {
            "Nothing to release".to_string()
        } else {
            lines
        }
    })
}

pub async fn status(ctx: &Context, files: &[String]) -> Result<()> {
    let statuses = ctx.service.status(files).await?;
    output::emit(ctx.format, &statuses, |list| {
        list.iter()
            .map(|s| match &s.state {
                PathState::Held {
                    agent_id,
                    description,
                    expires_at,
                } => format!(
                    "{}  held by {agent_id} until {}{}",
                    s.file_path,
                    expires_at.to_rfc3339(),
                    if description.is_empty() {
                        String::new()
                    } else {
                        format!(" ({description})")
                    }
                ),
                PathState::Free => format!("{}  free", s.file_path),
            })
            .join("\n")
    })
}

pub async fn active(ctx: &Context) -> Result<()> {
    let work = ctx.service.active_work().await?;
    output::emit(ctx.format, &work, |grouped| {
        if grouped.is_empty() {
            return "No active leases".to_string();
        }
        grouped
            .iter()
            .map(|(agent, leases)| {
                let files = leases.iter().map(|l| l.file_path.as_str()).join(", ");
                format!("{agent} ({}): {files}", leases.len())
            })
            .join("\n")
    })
}

#[derive(Serialize)]
struct GcReport {
    expired_leases: u64,
    idle_agents: u64,
}

pub async fn gc(ctx: &Context) -> Result<()> {
    let report = GcReport {
        expired_leases: ctx.service.locks().sweep_expired().await?,
        idle_agents: ctx
            .service
            .registry()
            .mark_stale_idle(ctx.service.config().agent_stale_after())
            .await?,
    };
    output::emit(ctx.format, &report, |r| {
        format!(
            "Marked {} lease(s) expired and {} agent(s) idle",
            r.expired_leases, r.idle_agents
        )
    })
}
