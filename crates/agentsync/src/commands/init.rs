//! `init`: create the database and a project config.

use std::path::Path;

use agentsync_core::{config::project_config_path, Config};
use anyhow::{Context as _, Result};
use serde::Serialize;

use super::Context;
use crate::output;

#[derive(Serialize)]
struct InitReport {
    db_path: String,
    schema_version: i64,
    config_path: String,
    config_created: bool,
}

pub async fn run(ctx: &Context) -> Result<()> {
    let root = std::env::current_dir().context("Failed to read current directory")?;
    let config_path = project_config_path(&root);
    let config_created = write_default_config(&config_path)?;

    let report = InitReport {
        db_path: ctx.service.config().db_path.clone(),
        schema_version: ctx.service.db().schema_version().await?,
        config_path: config_path.display().to_string(),
        config_created,
    };

    output::emit(ctx.format, &report, |r| {
        let config_note = if r.config_created { "created" } else { "kept" };
        format!(
            "✓ Database ready at {} (schema v{})\n  Config {config_note}: {}",
            r.db_path, r.schema_version, r.config_path
        )
    })
}

/// Write the default config unless a project config already exists.
fn write_default_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let body = toml::to_string_pretty(&Config::default()).context("Failed to serialize config")?;
    std::fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}
