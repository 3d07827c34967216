//! Suggestion collaborator: advisory resolution strategies for conflicts.
//!
//! The recorder works the same with or without a provider. Provider failures
//! surface as `CollaboratorUnavailable` and leave the conflict open.

use std::{fmt, process::Stdio};

use async_trait::async_trait;
use serde::Serialize;
use tokio::{io::AsyncWriteExt, process::Command};

use super::{conflict::Suggestion, recorder::ActionRecord, Conflict};
use crate::{Error, Result};

#[async_trait]
pub trait SuggestionProvider: Send + Sync + fmt::Debug {
    /// `actions` holds the recorded actions behind the conflict, oldest
    /// first. Contention conflicts may come with none.
    async fn suggest(&self, conflict: &Conflict, actions: &[ActionRecord]) -> Result<Suggestion>;
}

#[derive(Serialize)]
struct SuggestionRequest<'a> {
    conflict: &'a Conflict,
    actions: &'a [ActionRecord],
}

/// Runs an external program per request: JSON on stdin, JSON on stdout.
///
/// Expected reply: `{"strategy": "...", "confidence": 0.0..=1.0}`.
#[derive(Debug, Clone)]
pub struct CommandSuggester {
    argv: Vec<String>,
}

impl CommandSuggester {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() {
            return Err(Error::InvalidInput(
                "suggestion command must name a program".to_string(),
            ));
        }
        Ok(Self { argv })
    }
}

#[async_trait]
impl SuggestionProvider for CommandSuggester {
    async fn suggest(&self, conflict: &Conflict, actions: &[ActionRecord]) -> Result<Suggestion> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| {
                Error::CollaboratorUnavailable("empty suggestion command".to_string())
            })?;

        let payload = serde_json::to_vec(&SuggestionRequest { conflict, actions })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::CollaboratorUnavailable(format!("failed to start {program}: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| Error::CollaboratorUnavailable(format!("failed to write to {program}: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::CollaboratorUnavailable(format!("{program} did not finish: {e}")))?;

        if !output.status.success() {
            return Err(Error::CollaboratorUnavailable(format!("{program} exited with {}", output.status)));
        }

        let suggestion: Suggestion = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::CollaboratorUnavailable(format!("{program} returned malformed JSON: {e}")))?;

        if suggestion.strategy.trim().is_empty() {
            return Err(Error::CollaboratorUnavailable(format!("{program} returned an empty strategy")));
        }

        Ok(Suggestion {
            strategy: suggestion.strategy,
            confidence: suggestion.confidence.clamp(0.0, 1.0),
        })
    }
}
