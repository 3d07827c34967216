#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end CLI behavior against a temporary database.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn cmd(&self, agent: &str) -> Command {
        let mut cmd = Command::cargo_bin("agentsync").unwrap();
        cmd.current_dir(self.dir.path())
            .env_remove("AGENTSYNC_AGENT_ID")
            .env_remove("AGENTSYNC_DB_PATH")
            .env("RUST_LOG", "error")
            .arg("--db")
            .arg(self.dir.path().join("state.db"))
            .arg("--agent")
            .arg(agent);
        cmd
    }

    fn json(&self, agent: &str, args: &[&str]) -> serde_json::Value {
        let output = self.cmd(agent).arg("--json").args(args).output().unwrap();
        serde_json::from_slice(&output.stdout).unwrap()
    }
}

#[test]
fn init_creates_database_and_config() {
    let ws = Workspace::new();
    ws.cmd("a")
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Database ready"));
    assert!(ws.dir.path().join("state.db").exists());
    assert!(ws.dir.path().join(".agentsync/config.toml").exists());
}

#[test]
fn claim_then_status_shows_holder() {
    let ws = Workspace::new();
    ws.cmd("agent-a")
        .args(["claim", "x.py", "-d", "split parser"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Claimed x.py"));

    let status = ws.json("agent-b", &["status", "x.py"]);
    assert_eq!(status[0]["state"], "held");
    assert_eq!(status[0]["agent_id"], "agent-a");
}

#[test]
fn blocked_claim_names_holder_and_exits_4() {
    let ws = Workspace::new();
    ws.cmd("agent-a")
        .args(["claim", "y.py", "-d", "rename module"])
        .assert()
        .success();

    ws.cmd("agent-b")
        .args(["claim", "y.py"])
        .assert()
        .code(4)
        .stdout(predicate::str::contains("held by agent-a"))
        .stderr(predicate::str::contains("rename module"));
}

#[test]
fn release_is_idempotent() {
    let ws = Workspace::new();
    ws.cmd("agent-a").args(["claim", "x.py"]).assert().success();
    ws.cmd("agent-a").args(["release", "x.py"]).assert().success();
    ws.cmd("agent-a")
        .args(["release", "x.py"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not held"));
    ws.cmd("agent-b").args(["claim", "x.py"]).assert().success();
}

#[test]
fn renewing_an_unheld_file_is_not_found() {
    let ws = Workspace::new();
    ws.cmd("agent-a").args(["renew", "x.py"]).assert().code(3);
}

#[test]
fn release_with_commit_completes_work() {
    let ws = Workspace::new();
    ws.cmd("agent-a").args(["claim", "x.py", "-d", "fix"]).assert().success();
    let released = ws.json("agent-a", &["release", "x.py", "--commit", "abc123"]);
    assert_eq!(released["released"][0], "x.py");
    assert_eq!(released["completed"]["status"], "done");
    assert_eq!(released["completed"]["commit_ref"], "abc123");
}

#[test]
fn overlapping_records_open_a_conflict() {
    let ws = Workspace::new();
    ws.cmd("agent-a")
        .args(["record", "lib.rs", "--intent", "refactor"])
        .assert()
        .success();
    ws.cmd("agent-b")
        .args(["record", "lib.rs", "--kind", "modify"])
        .assert()
        .success()
        .stdout(predicate::str::contains("conflict"));

    let conflicts = ws.json("agent-a", &["conflicts", "--kind", "semantic-overlap"]);
    let id = conflicts[0]["conflict_id"].as_i64().unwrap();
    assert_eq!(conflicts[0]["severity"], "high");

    ws.cmd("agent-a")
        .args(["resolve", &id.to_string(), "agent-b rebases"])
        .assert()
        .success();
    let after = ws.json("agent-a", &["conflicts"]);
    assert_eq!(after.as_array().map(Vec::len), Some(0));
}

#[test]
fn unknown_action_kind_is_invalid_input() {
    let ws = Workspace::new();
    ws.cmd("agent-a")
        .args(["record", "lib.rs", "--kind", "teleport"])
        .assert()
        .code(1);
}

#[test]
fn work_items_round_trip() {
    let ws = Workspace::new();
    ws.cmd("agent-a")
        .args(["work", "start", "parser rewrite", "--files", "a.rs", "b.rs"])
        .assert()
        .success();
    let list = ws.json("agent-a", &["work", "list", "--mine"]);
    assert_eq!(list[0]["files"][1], "b.rs");

    ws.cmd("agent-a").args(["work", "done", "--commit", "f00"]).assert().success();
    ws.cmd("agent-a").args(["work", "done"]).assert().code(3);
}

#[test]
fn active_and_agents_list_claims() {
    let ws = Workspace::new();
    ws.cmd("agent-a").args(["claim", "a.rs", "b.rs"]).assert().success();
    let active = ws.json("agent-b", &["active"]);
    assert_eq!(active["agent-a"].as_array().map(Vec::len), Some(2));

    let agents = ws.json("agent-b", &["agents", "--status", "active"]);
    assert!(agents
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["agent_id"] == "agent-a"));

    ws.cmd("agent-b")
        .args(["events", "--limit", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lease_granted"));
    ws.cmd("agent-b").arg("gc").assert().success();
}

#[cfg(unix)]
#[test]
fn auto_passes_through_child_exit_code() {
    let ws = Workspace::new();
    ws.cmd("auto-agent")
        .args(["auto", "--poll-interval-ms", "50", "--", "sh", "-c", "exit 5"])
        .assert()
        .code(5);

    let agents = ws.json("someone", &["agents", "--status", "gone"]);
    assert!(agents
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["agent_id"] == "auto-agent"));
}

#[test]
fn auto_rejects_poll_interval_not_shorter_than_ttl() {
    let ws = Workspace::new();
    ws.cmd("auto-agent")
        .args(["auto", "--ttl", "5", "--poll-interval-ms", "5000", "--", "true"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("poll interval"));
}

#[test]
fn stats_summarize_the_store() {
    let ws = Workspace::new();
    ws.cmd("agent-a").args(["claim", "x.py", "y.py"]).assert().success();
    ws.cmd("agent-b").args(["claim", "x.py"]).assert().code(4);

    let stats = ws.json("agent-a", &["stats"]);
    assert_eq!(stats["active_leases"], 2);
    assert_eq!(stats["agents_holding_leases"], 1);
    assert_eq!(stats["active_work_items"], 1);
    assert_eq!(stats["open_conflicts"], 1);
    assert_eq!(stats["known_agents"], 2);

    ws.cmd("agent-a")
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Active leases: 2"));
}

#[test]
fn conflict_suggestion_without_provider_is_unavailable() {
    let ws = Workspace::new();
    ws.cmd("agent-a").args(["claim", "x.py"]).assert().success();
    ws.cmd("agent-b").args(["claim", "x.py"]).assert().code(4);
    let conflicts = ws.json("agent-a", &["conflicts"]);
    let id = conflicts[0]["conflict_id"].as_i64().unwrap();

    ws.cmd("agent-a")
        .args(["conflicts", "suggest", &id.to_string()])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no suggestion provider"));
}

#[cfg(unix)]
#[test]
fn conflict_suggestion_comes_from_configured_command() {
    let ws = Workspace::new();
    let config_dir = ws.dir.path().join(".agentsync");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        r#"[suggestions]
command = ["sh", "-c", "cat > /dev/null; echo '{\"strategy\": \"take_turns\", \"confidence\": 0.7}'"]
"#,
    )
    .unwrap();

    ws.cmd("agent-a").args(["claim", "x.py"]).assert().success();
    ws.cmd("agent-b").args(["claim", "x.py"]).assert().code(4);
    let conflicts = ws.json("agent-a", &["conflicts"]);
    let id = conflicts[0]["conflict_id"].as_i64().unwrap();

    let enriched = ws.json("agent-a", &["conflicts", "suggest", &id.to_string()]);
    assert_eq!(enriched["suggestion"]["strategy"], "take_turns");
    let listed = ws.json("agent-a", &["conflicts"]);
    assert_eq!(listed[0]["suggestion"]["strategy"], "take_turns");
}
