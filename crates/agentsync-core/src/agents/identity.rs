//! Identity of the agent a wrapped session coordinates for.

use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};

use crate::{Error, Result};

pub const AGENT_ID_VAR: &str = "AGENTSYNC_AGENT_ID";
pub const AGENT_TYPE_VAR: &str = "AGENTSYNC_AGENT_TYPE";
pub const SESSION_LABEL_VAR: &str = "AGENTSYNC_SESSION_LABEL";
pub const AUTO_COORDINATION_VAR: &str = "AGENTSYNC_AUTO_COORDINATION";

/// Which agent tool is being wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Codex,
    Claude,
    /// Resolve from the environment.
    Auto,
    Unknown,
}

impl ClientKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Claude => "claude",
            Self::Auto => "auto",
            Self::Unknown => "unknown",
        }
    }

    /// Resolve `Auto` from environment markers left by the agent tools.
    fn resolve(self, env: &BTreeMap<String, String>) -> Self {
        if self != Self::Auto {
            return self;
        }
        if env.keys().any(|k| k.starts_with("CODEX_")) {
            Self::Codex
        } else if env.keys().any(|k| k.starts_with("CLAUDE_") || k == "CLAUDECODE") {
            Self::Claude
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "codex" => Ok(Self::Codex),
            "claude" => Ok(Self::Claude),
            "auto" => Ok(Self::Auto),
            "unknown" => Ok(Self::Unknown),
            _ => Err(Error::InvalidInput(format!(
                "Unknown client '{s}' (expected codex, claude or auto)"
            ))),
        }
    }
}

/// Resolved identity for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub client: ClientKind,
    pub session_label: String,
}

impl AgentIdentity {
    /// Detect the identity from the current process environment.
    pub fn from_process_env(requested: ClientKind, repo_root: &Path) -> Self {
        let env: BTreeMap<String, String> = std::env::vars().collect();
        Self::detect(requested, &env, repo_root, std::process::id())
    }

    /// An explicit `AGENTSYNC_AGENT_ID` wins; otherwise the id is
    /// `{client}-{host}-{pid}-{suffix}`, unique per invocation.
    pub fn detect(
        requested: ClientKind,
        env: &BTreeMap<String, String>,
        repo_root: &Path,
        pid: u32,
    ) -> Self {
        let client = requested.resolve(env);

        let agent_id = env
            .get(AGENT_ID_VAR)
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map_or_else(
                || {
                    let host = hostname::get()
                        .ok()
                        .and_then(|h| h.into_string().ok())
                        .map_or_else(|| "host".to_string(), |h| sanitize(&h));
                    let suffix = uuid::Uuid::new_v4().simple().to_string();
                    format!("{client}-{host}-{pid}-{}", &suffix[..6])
                },
                String::from,
            );

        let session_label = env
            .get(SESSION_LABEL_VAR)
            .map(|label| label.trim())
            .filter(|label| !label.is_empty())
            .map_or_else(
                || {
                    let repo = repo_root
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map_or_else(|| "repo".to_string(), sanitize);
                    format!("{client}-{repo}-{pid}")
                },
                String::from,
            );

        Self {
            agent_id,
            client,
            session_label,
        }
    }

    /// Variables exported to the wrapped process.
    pub fn child_env(&self) -> Vec<(&'static str, String)> {
        vec![
            (AGENT_ID_VAR, self.agent_id.clone()),
            (AGENT_TYPE_VAR, self.client.as_str().to_string()),
            (SESSION_LABEL_VAR, self.session_label.clone()),
            (AUTO_COORDINATION_VAR, "1".to_string()),
        ]
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn explicit_agent_id_wins() {
        let identity = AgentIdentity::detect(
            ClientKind::Codex,
            &env(&[(AGENT_ID_VAR, "reviewer-1")]),
            Path::new("/work/repo"),
            42,
        );
        assert_eq!(identity.agent_id, "reviewer-1");
        assert_eq!(identity.session_label, "codex-repo-42");
    }

    #[test]
    fn generated_ids_are_unique_per_invocation() {
        let vars = env(&[]);
        let root = Path::new("/work/repo");
        let a = AgentIdentity::detect(ClientKind::Claude, &vars, root, 7);
        let b = AgentIdentity::detect(ClientKind::Claude, &vars, root, 7);
        assert!(a.agent_id.starts_with("claude-"));
        assert!(a.agent_id.contains("-7-"));
        assert_ne!(a.agent_id, b.agent_id);
    }

    #[test]
    fn auto_client_resolves_from_markers() {
        let root = Path::new("/r");
        let codex = AgentIdentity::detect(ClientKind::Auto, &env(&[("CODEX_HOME", "/x")]), root, 1);
        assert_eq!(codex.client, ClientKind::Codex);

        let claude =
            AgentIdentity::detect(ClientKind::Auto, &env(&[("CLAUDE_CONFIG_DIR", "/y")]), root, 1);
        assert_eq!(claude.client, ClientKind::Claude);

        let neither = AgentIdentity::detect(ClientKind::Auto, &env(&[]), root, 1);
        assert_eq!(neither.client, ClientKind::Unknown);
    }

    #[test]
    fn child_env_marks_auto_coordination() {
        let identity = AgentIdentity::detect(
            ClientKind::Codex,
            &env(&[(AGENT_ID_VAR, "a"), (SESSION_LABEL_VAR, "label")]),
            Path::new("/r"),
            1,
        );
        let vars = identity.child_env();
        assert!(vars.contains(&(AUTO_COORDINATION_VAR, "1".to_string())));
        assert!(vars.contains(&(AGENT_TYPE_VAR, "codex".to_string())));
        assert!(vars.contains(&(SESSION_LABEL_VAR, "label".to_string())));
    }

    #[test]
    fn client_names_parse_case_insensitively() {
        assert_eq!("Claude".parse::<ClientKind>().ok(), Some(ClientKind::Claude));
        assert!("vim".parse::<ClientKind>().is_err());
    }
}
