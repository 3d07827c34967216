pub mod handlers;

use clap::{value_parser, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("agentsync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("File lease coordination for agents sharing a working tree")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("db")
                .long("db")
                .global(true)
                .value_name("PATH")
                .help("Coordination database (default from config)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print JSON instead of text"),
        )
        .arg(
            Arg::new("agent")
                .long("agent")
                .global(true)
                .value_name("ID")
                .help("Agent id (default: $AGENTSYNC_AGENT_ID, else pid-<pid>)"),
        )
        .subcommand(Command::new("init").about("Create the database and project config"))
        .subcommand(cmd_claim())
        .subcommand(cmd_renew())
        .subcommand(cmd_release())
        .subcommand(
            Command::new("status")
                .about("Show who holds each file")
                .arg(files_arg()),
        )
        .subcommand(Command::new("active").about("List live leases grouped by agent"))
        .subcommand(cmd_record())
        .subcommand(cmd_conflicts())
        .subcommand(
            Command::new("resolve")
                .about("Resolve an open conflict")
                .arg(
                    Arg::new("id")
                        .required(true)
                        .value_parser(value_parser!(i64)),
                )
                .arg(Arg::new("strategy").required(true)),
        )
        .subcommand(cmd_work())
        .subcommand(
            Command::new("agents").about("List known agents").arg(
                Arg::new("status")
                    .long("status")
                    .value_name("STATUS")
                    .help("active, idle or gone"),
            ),
        )
        .subcommand(
            Command::new("events").about("Show recent coordination events").arg(
                Arg::new("limit")
                    .long("limit")
                    .default_value("20")
                    .value_parser(value_parser!(u32)),
            ),
        )
        .subcommand(Command::new("stats").about("Summarize leases, work items and agents"))
        .subcommand(Command::new("gc").about("Mark lapsed leases expired and stale agents idle"))
        .subcommand(cmd_auto())
}

fn files_arg() -> Arg {
    Arg::new("files")
        .required(true)
        .num_args(1..)
        .value_name("FILE")
}

fn ttl_arg() -> Arg {
    Arg::new("ttl")
        .long("ttl")
        .value_name("SECONDS")
        .value_parser(value_parser!(u64))
        .help("Lease TTL (default from config)")
}

fn cmd_claim() -> Command {
    Command::new("claim")
        .about("Claim exclusive leases on files")
        .arg(files_arg())
        .arg(
            Arg::new("description")
                .short('d')
                .long("description")
                .default_value("")
                .help("What you are doing, shown to blocked agents"),
        )
        .arg(ttl_arg())
        .arg(
            Arg::new("priority")
                .long("priority")
                .default_value("0")
                .value_parser(value_parser!(i64)),
        )
}

fn cmd_renew() -> Command {
    Command::new("renew")
        .about("Extend leases you hold")
        .arg(files_arg())
        .arg(ttl_arg())
}

fn cmd_release() -> Command {
    Command::new("release")
        .about("Release leases you hold")
        .arg(
            Arg::new("files")
                .num_args(1..)
                .value_name("FILE")
                .required_unless_present("all"),
        )
        .arg(
            Arg::new("all")
                .long("all")
                .action(ArgAction::SetTrue)
                .conflicts_with("files")
                .help("Release every lease you hold"),
        )
        .arg(
            Arg::new("commit")
                .long("commit")
                .value_name("REF")
                .help("Complete your latest work item with this commit"),
        )
}

fn cmd_record() -> Command {
    Command::new("record")
        .about("Record an action for conflict detection")
        .arg(files_arg())
        .arg(
            Arg::new("kind")
                .long("kind")
                .default_value("edit")
                .help("edit, create, delete or rename"),
        )
        .arg(Arg::new("intent").long("intent").default_value(""))
        .arg(
            Arg::new("work-item")
                .long("work-item")
                .value_name("ID")
                .value_parser(value_parser!(i64)),
        )
}

fn cmd_conflicts() -> Command {
    Command::new("conflicts")
        .about("List open conflicts, newest first")
        .args_conflicts_with_subcommands(true)
        .arg(Arg::new("file").long("file").value_name("PATH"))
        .arg(Arg::new("agent-filter").long("with-agent").value_name("ID"))
        .arg(
            Arg::new("kind")
                .long("kind")
                .help("lock-contention or semantic-overlap"),
        )
        .subcommand(
            Command::new("suggest")
                .about("Ask the suggestion command about an open conflict")
                .arg(
                    Arg::new("id")
                        .required(true)
                        .value_parser(value_parser!(i64)),
                ),
        )
}

fn cmd_work() -> Command {
    Command::new("work")
        .about("Manage work items")
        .subcommand_required(true)
        .subcommand(
            Command::new("start")
                .about("Declare a unit of work")
                .arg(Arg::new("description").required(true))
                .arg(
                    Arg::new("files")
                        .long("files")
                        .num_args(1..)
                        .value_name("FILE"),
                )
                .arg(
                    Arg::new("priority")
                        .long("priority")
                        .default_value("0")
                        .value_parser(value_parser!(i64)),
                ),
        )
        .subcommand(
            Command::new("done")
                .about("Complete a work item (default: your latest)")
                .arg(Arg::new("id").value_parser(value_parser!(i64)))
                .arg(Arg::new("commit").long("commit").value_name("REF")),
        )
        .subcommand(
            Command::new("abandon")
                .about("Abandon a work item")
                .arg(
                    Arg::new("id")
                        .required(true)
                        .value_parser(value_parser!(i64)),
                ),
        )
        .subcommand(
            Command::new("list").about("List work in progress").arg(
                Arg::new("mine")
                    .long("mine")
                    .action(ArgAction::SetTrue)
                    .help("Only your own items"),
            ),
        )
}

fn cmd_auto() -> Command {
    Command::new("auto")
        .about("Run a command under an auto-coordination session")
        .arg(
            Arg::new("client")
                .long("client")
                .default_value("auto")
                .help("codex, claude, auto or unknown"),
        )
        .arg(ttl_arg())
        .arg(
            Arg::new("poll-interval-ms")
                .long("poll-interval-ms")
                .value_name("MS")
                .value_parser(value_parser!(u64)),
        )
        .arg(Arg::new("description").long("description").default_value(""))
        .arg(
            Arg::new("command")
                .required(true)
                .num_args(1..)
                .last(true)
                .value_name("COMMAND"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        build_cli().debug_assert();
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let matches = build_cli()
            .try_get_matches_from(["agentsync", "claim", "x.py", "--json", "--agent", "a"])
            .unwrap();
        assert!(matches.get_flag("json"));
        assert_eq!(matches.get_one::<String>("agent").map(String::as_str), Some("a"));
    }

    #[test]
    fn auto_takes_command_after_separator() {
        let matches = build_cli()
            .try_get_matches_from(["agentsync", "auto", "--", "codex", "--model", "x"])
            .unwrap();
        let command: Vec<&String> = matches
            .subcommand_matches("auto")
            .and_then(|m| m.get_many::<String>("command"))
            .unwrap()
            .collect();
        assert_eq!(command, ["codex", "--model", "x"]);
    }

    #[test]
    fn conflicts_suggest_takes_an_id() {
        let matches = build_cli()
            .try_get_matches_from(["agentsync", "conflicts", "suggest", "7"])
            .unwrap();
        let id = matches
            .subcommand_matches("conflicts")
            .and_then(|m| m.subcommand_matches("suggest"))
            .and_then(|m| m.get_one::<i64>("id").copied());
        assert_eq!(id, Some(7));

        assert!(build_cli()
            .try_get_matches_from(["agentsync", "conflicts", "--file", "x.py"])
            .is_ok());
    }

    #[test]
    fn release_needs_files_or_all() {
        assert!(build_cli()
            .try_get_matches_from(["agentsync", "release"])
            .is_err());
        assert!(build_cli()
            .try_get_matches_from(["agentsync", "release", "--all"])
            .is_ok());
    }
}
