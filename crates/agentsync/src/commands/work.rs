//! Work item commands.

use anyhow::Result;
use itertools::Itertools;

use super::Context;
use crate::output;

pub async fn start(ctx: &Context, description: &str, files: &[String], priority: i64) -> Result<()> {
    let item = ctx
        .service
        .work()
        .create(&ctx.agent_id, description, files, priority)
        .await?;
    output::emit(ctx.format, &item, |w| {
        format!("✓ Started work item #{}: {}", w.work_item_id, w.description)
    })
}

pub async fn done(ctx: &Context, work_item_id: Option<i64>, commit_ref: Option<&str>) -> Result<()> {
    let work = ctx.service.work();
    let item = match work_item_id {
        Some(id) => work.complete(id, commit_ref).await?,
        None => work.complete_latest(&ctx.agent_id, commit_ref).await?,
    };
    output::emit(ctx.format, &item, |w| {
        let commit = w
            .commit_ref
            .as_deref()
            .map(|c| format!(" at {c}"))
            .unwrap_or_default();
        format!("✓ Work item #{} done{commit}", w.work_item_id)
    })
}

pub async fn abandon(ctx: &Context, work_item_id: i64) -> Result<()> {
    let item = ctx.service.work().abandon(work_item_id).await?;
    output::emit(ctx.format, &item, |w| {
        format!("Work item #{} abandoned", w.work_item_id)
    })
}

pub async fn list(ctx: &Context, mine: bool) -> Result<()> {
    let agent = mine.then_some(ctx.agent_id.as_str());
    let items = ctx.service.work().list_active(agent).await?;
    output::emit(ctx.format, &items, |list| {
        if list.is_empty() {
            return "No work in progress".to_string();
        }
        list.iter()
            .map(|w| {
                format!(
                    "#{} p{} {} - {} [{}]",
                    w.work_item_id,
                    w.priority,
                    w.agent_id,
                    w.description,
                    w.files.join(", ")
                )
            })
            .join("\n")
    })
}
