//! Activity and conflict commands: record, conflicts, suggest, resolve.

use agentsync_core::{
    coordination::{ActionKind, ConflictKind, NewAction},
    ConflictFilter,
};
use anyhow::Result;
use itertools::Itertools;

use super::Context;
use crate::output;

pub async fn record(
    ctx: &Context,
    files: Vec<String>,
    kind: &str,
    intent: String,
    work_item_id: Option<i64>,
) -> Result<()> {
    let recorded = ctx
        .service
        .record_action(NewAction {
            agent_id: ctx.agent_id.clone(),
            kind: kind.parse::<ActionKind>()?,
            files,
            intent,
            work_item_id,
        })
        .await?;

    output::emit(ctx.format, &recorded, |r| {
        let header = format!(
            "✓ Recorded action #{} ({} on {})",
            r.action.action_id,
            r.action.kind,
            r.action.files.join(", ")
        );
        let opened = r.opened.iter().map(|c| {
            format!(
                "  ! {} conflict #{} on {} with {} ({})",
                c.severity,
                c.conflict_id,
                c.file_path,
                if c.agents.0 == ctx.agent_id {
                    &c.agents.1
                } else {
                    &c.agents.0
                },
                c.kind
            )
        });
        std::iter::once(header).chain(opened).join("\n")
    })
}

pub async fn list(
    ctx: &Context,
    file_path: Option<String>,
    agent_id: Option<String>,
    kind: Option<&str>,
) -> Result<()> {
    let filter = ConflictFilter {
        file_path,
        agent_id,
        kind: kind.map(str::parse::<ConflictKind>).transpose()?,
    };
    let conflicts = ctx.service.list_conflicts(&filter).await?;

    output::emit(ctx.format, &conflicts, |list| {
        if list.is_empty() {
            return "No open conflicts".to_string();
        }
        list.iter()
            .map(|c| {
                let suggestion = c
                    .suggestion
                    .as_ref()
                    .map(|s| format!("\n    suggested: {} ({:.0}%)", s.strategy, s.confidence * 100.0))
                    .unwrap_or_default();
                format!(
                    "#{} [{}] {} {} <-> {} on {}\n    {}{suggestion}",
                    c.conflict_id,
                    c.severity,
                    c.kind,
                    c.agents.0,
                    c.agents.1,
                    c.file_path,
                    c.description
                )
            })
            .join("\n")
    })
}

pub async fn resolve(ctx: &Context, conflict_id: i64, strategy: &str) -> Result<()> {
    let conflict = ctx.service.resolve_conflict(conflict_id, strategy).await?;
    output::emit(ctx.format, &conflict, |c| {
        format!(
            "✓ Conflict #{} resolved: {}",
            c.conflict_id,
            c.resolution_strategy.as_deref().unwrap_or(strategy)
        )
    })
}

pub async fn suggest(ctx: &Context, conflict_id: i64) -> Result<()> {
    let conflict = ctx.service.suggest_resolution(conflict_id).await?;
    output::emit(ctx.format, &conflict, |c| match &c.suggestion {
        Some(s) => format!(
            "✓ Conflict #{}: suggested {} ({:.0}%)",
            c.conflict_id,
            s.strategy,
            s.confidence * 100.0
        ),
        None => format!("Conflict #{}: no suggestion", c.conflict_id),
    })
}
