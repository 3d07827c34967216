use anyhow::Result;
use agentsync_core::{
    config::load_config as load_layered_config, ClientKind, Config, CoordinationService,
};
use clap::ArgMatches;

use crate::{
    commands::{self, Context},
    output::OutputFormat,
};

/// Layered config with the `--db` flag applied last.
pub fn load_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = load_layered_config()?;
    if let Some(db) = matches.get_one::<String>("db") {
        config.db_path.clone_from(db);
    }
    config.validate()?;
    Ok(config)
}

/// Agent id for manual commands.
fn agent_id(matches: &ArgMatches) -> String {
    matches
        .get_one::<String>("agent")
        .cloned()
        .or_else(|| std::env::var(agentsync_core::agents::AGENT_ID_VAR).ok())
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("pid-{}", std::process::id()))
}

fn strings(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

fn string(matches: &ArgMatches, id: &str) -> String {
    matches.get_one::<String>(id).cloned().unwrap_or_default()
}

/// Run the selected command. Returns the process exit code.
pub async fn dispatch(matches: &ArgMatches, config: Config) -> Result<i32> {
    let service = CoordinationService::open(&config).await?;
    let ctx = Context {
        service,
        agent_id: agent_id(matches),
        format: OutputFormat::from_json_flag(matches.get_flag("json")),
    };

    match matches.subcommand() {
        Some(("init", _)) => commands::init::run(&ctx).await.map(|()| 0),
        Some(("claim", m)) => commands::leases::claim(
            &ctx,
            strings(m, "files"),
            string(m, "description"),
            m.get_one::<u64>("ttl").copied(),
            m.get_one::<i64>("priority").copied().unwrap_or_default(),
        )
        .await
        .map(|()| 0),
        Some(("renew", m)) => {
            commands::leases::renew(&ctx, strings(m, "files"), m.get_one::<u64>("ttl").copied())
                .await
                .map(|()| 0)
        }
        Some(("release", m)) => commands::leases::release(
            &ctx,
            strings(m, "files"),
            m.get_flag("all"),
            m.get_one::<String>("commit").cloned(),
        )
        .await
        .map(|()| 0),
        Some(("status", m)) => commands::leases::status(&ctx, &strings(m, "files"))
            .await
            .map(|()| 0),
        Some(("active", _)) => commands::leases::active(&ctx).await.map(|()| 0),
        Some(("stats", _)) => commands::agents::stats(&ctx).await.map(|()| 0),
        Some(("gc", _)) => commands::leases::gc(&ctx).await.map(|()| 0),
        Some(("record", m)) => commands::conflicts::record(
            &ctx,
            strings(m, "files"),
            &string(m, "kind"),
            string(m, "intent"),
            m.get_one::<i64>("work-item").copied(),
        )
        .await
        .map(|()| 0),
        Some(("conflicts", m)) => {
            let result = if let Some(("suggest", s)) = m.subcommand() {
                let id = s.get_one::<i64>("id").copied().unwrap_or_default();
                commands::conflicts::suggest(&ctx, id).await
            } else {
                commands::conflicts::list(
                    &ctx,
                    m.get_one::<String>("file").cloned(),
                    m.get_one::<String>("agent-filter").cloned(),
                    m.get_one::<String>("kind").map(String::as_str),
                )
                .await
            };
            result.map(|()| 0)
        }
        Some(("resolve", m)) => commands::conflicts::resolve(
            &ctx,
            m.get_one::<i64>("id").copied().unwrap_or_default(),
            &string(m, "strategy"),
        )
        .await
        .map(|()| 0),
        Some(("work", m)) => dispatch_work(&ctx, m).await.map(|()| 0),
        Some(("agents", m)) => {
            commands::agents::list(&ctx, m.get_one::<String>("status").map(String::as_str))
                .await
                .map(|()| 0)
        }
        Some(("events", m)) => {
            commands::agents::events(&ctx, m.get_one::<u32>("limit").copied().unwrap_or(20))
                .await
                .map(|()| 0)
        }
        Some(("auto", m)) => {
            let client: ClientKind = string(m, "client").parse()?;
            commands::auto::run(
                &ctx,
                commands::auto::AutoOptions {
                    client,
                    explicit_agent: m.get_one::<String>("agent").cloned(),
                    ttl_secs: m.get_one::<u64>("ttl").copied(),
                    poll_interval_ms: m.get_one::<u64>("poll-interval-ms").copied(),
                    description: string(m, "description"),
                    command: strings(m, "command"),
                },
            )
            .await
        }
        _ => anyhow::bail!("Unknown command. Run 'agentsync --help' for usage."),
    }
}

async fn dispatch_work(ctx: &Context, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("start", m)) => {
            commands::work::start(
                ctx,
                &string(m, "description"),
                &strings(m, "files"),
                m.get_one::<i64>("priority").copied().unwrap_or_default(),
            )
            .await
        }
        Some(("done", m)) => {
            commands::work::done(
                ctx,
                m.get_one::<i64>("id").copied(),
                m.get_one::<String>("commit").map(String::as_str),
            )
            .await
        }
        Some(("abandon", m)) => {
            commands::work::abandon(ctx, m.get_one::<i64>("id").copied().unwrap_or_default()).await
        }
        Some(("list", m)) => commands::work::list(ctx, m.get_flag("mine")).await,
        _ => anyhow::bail!("Unknown work subcommand. Run 'agentsync work --help' for usage."),
    }
}
