use std::fmt;
use thiserror::Error;

/// Phase of the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Researcher drafting the first answer.
    Researching,
    /// Critic reviewing the latest draft.
    Critiquing,
    /// Researcher revising after a REVISE verdict.
    Revising,
    /// Admin releasing the answer.
    Finalizing,
    /// Loop finished.
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Input driving a phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Researcher produced a draft.
    DraftReady,
    /// Critic approved.
    Approved,
    /// Critic asked for a revision and rounds remain.
    RevisionRequested,
    /// Admin stops the loop early (round limit, deadline, model unavailable).
    ForceFinalize,
    /// Admin released the answer.
    Finalized,
}

/// Transition not allowed from the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} in phase {from}")]
pub struct TransitionError {
    /// Phase the event arrived in.
    pub from: Phase,
    /// Rejected event.
    pub event: Event,
}

impl Phase {
    /// Apply `event`, returning the next phase.
    pub fn next(self, event: Event) -> Result<Phase, TransitionError> {
        use Event::*;
        use Phase::*;

        match (self, event) {
            (Researching | Revising, DraftReady) => Ok(Critiquing),
            (Critiquing, Approved) => Ok(Finalizing),
            (Critiquing, RevisionRequested) => Ok(Revising),
            (Researching | Critiquing | Revising, ForceFinalize) => Ok(Finalizing),
            (Finalizing, Finalized) => Ok(Done),
            (from, event) => Err(TransitionError { from, event }),
        }
    }

    /// Whether the loop has ended.
    pub fn is_done(self) -> bool {
        self == Phase::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approve_path() {
        let phase = Phase::Researching
            .next(Event::DraftReady)
            .and_then(|phase| phase.next(Event::Approved))
            .and_then(|phase| phase.next(Event::Finalized))
            .expect("valid path");
        assert!(phase.is_done());
    }

    #[test]
    fn revise_loops_back_through_critic() {
        let mut phase = Phase::Researching.next(Event::DraftReady).expect("draft");
        for _ in 0..3 {
            phase = phase.next(Event::RevisionRequested).expect("revise");
            assert_eq!(phase, Phase::Revising);
            phase = phase.next(Event::DraftReady).expect("redraft");
            assert_eq!(phase, Phase::Critiquing);
        }
        assert_eq!(phase.next(Event::ForceFinalize), Ok(Phase::Finalizing));
    }

    #[test]
    fn rejects_out_of_order_events() {
        assert_eq!(
            Phase::Researching.next(Event::Approved),
            Err(TransitionError {
                from: Phase::Researching,
                event: Event::Approved
            })
        );
        assert!(Phase::Done.next(Event::DraftReady).is_err());
        assert!(Phase::Finalizing.next(Event::ForceFinalize).is_err());
        assert!(Phase::Revising.next(Event::Approved).is_err());
    }
}
