//! The three agent roles and the conversation they share.
//!
//! Agents are prompt builders and output interpreters. The orchestrator owns control flow and
//! makes the model calls, so every turn is visible in one place.

pub mod admin;
pub mod critic;
pub mod researcher;

pub use admin::{UnverifiedReason, Verification};
pub use critic::Verdict;

use serde::Serialize;
use std::fmt;

/// Agent role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns the job: hands off the query and finalizes the answer.
    Admin,
    /// Drafts answers from retrieved context.
    Researcher,
    /// Checks drafts against the context.
    Critic,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Admin => "admin",
            Role::Researcher => "researcher",
            Role::Critic => "critic",
        })
    }
}

/// One message in the agent conversation. Content is always masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    /// Agent that spoke.
    pub speaker: Role,
    /// Masked message text.
    pub content: String,
    /// Round the turn belongs to, starting at 1.
    pub round: u32,
}

/// Append-only log of turns with non-decreasing round numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn. A round lower than the previous turn's is raised to it.
    pub fn push(&mut self, speaker: Role, content: impl Into<String>, round: u32) {
        let floor = self.turns.last().map_or(1, |turn| turn.round);
        self.turns.push(Turn {
            speaker,
            content: content.into(),
            round: round.max(floor),
        });
    }

    /// All turns in order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Most recent turn by `role`.
    pub fn last_from(&self, role: Role) -> Option<&Turn> {
        self.turns.iter().rev().find(|turn| turn.speaker == role)
    }

    /// Number of turns by `role`.
    pub fn count(&self, role: Role) -> usize {
        self.turns.iter().filter(|turn| turn.speaker == role).count()
    }
}
