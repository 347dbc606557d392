//! Admin messages and the verification outcome attached to every answer.

use serde::Serialize;
use std::fmt;

/// Why an answer was released without Critic approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnverifiedReason {
    /// The Critic never approved within the round limit.
    MaxRounds,
    /// The job deadline expired mid-loop.
    Deadline,
    /// The model stayed unreachable after a draft existed.
    ModelUnavailable,
}

impl fmt::Display for UnverifiedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnverifiedReason::MaxRounds => "round limit reached without approval",
            UnverifiedReason::Deadline => "job deadline expired",
            UnverifiedReason::ModelUnavailable => "model unavailable",
        })
    }
}

/// Whether the final answer passed review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The Critic approved the final draft.
    Verified,
    /// The Admin forced the answer out.
    Unverified(UnverifiedReason),
}

impl Verification {
    /// Whether the Critic approved.
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified)
    }

    /// Reason for a forced answer.
    pub fn reason(&self) -> Option<UnverifiedReason> {
        match self {
            Verification::Verified => None,
            Verification::Unverified(reason) => Some(*reason),
        }
    }
}

/// Opening message handing the masked query to the Researcher.
pub fn handoff(masked_query: &str) -> String {
    format!("Researcher, answer the following question from the patient documents: {masked_query}")
}

/// Closing message recorded when the Admin releases the answer.
pub fn closing_note(verification: Verification, rounds: u32) -> String {
    match verification {
        Verification::Verified => format!("Answer approved after {rounds} round(s)."),
        Verification::Unverified(reason) => {
            format!("Answer released unverified after {rounds} round(s): {reason}.")
        }
    }
}
