//! The talk lifecycle: pending → accepted/rejected, accepted ↔ scheduled.
//!
//! The full edge list is the single source of truth; every status write in
//! the engine goes through `check_transition`. The scheduled edges are owned
//! by the booking commit/cancel paths — a plain status update may only
//! accept or reject a pending talk.

use crate::model::{Talk, TalkStatus};

use super::EngineError;

/// Every legal edge of the state machine. Rejected is terminal; scheduled is
/// left only by cancelling the booking.
pub fn transition_allowed(from: TalkStatus, to: TalkStatus) -> bool {
    use TalkStatus::*;
    matches!(
        (from, to),
        (Pending, Accepted) | (Pending, Rejected) | (Accepted, Scheduled) | (Scheduled, Accepted)
    )
}

/// Edges a caller may request through the status entry point. Scheduling
/// happens via booking creation and unscheduling via booking deletion, never
/// by writing the status column directly.
pub fn direct_edge(from: TalkStatus, to: TalkStatus) -> bool {
    use TalkStatus::*;
    matches!((from, to), (Pending, Accepted) | (Pending, Rejected))
}

pub(crate) fn check_transition(talk: &Talk, to: TalkStatus) -> Result<(), EngineError> {
    if transition_allowed(talk.status, to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            talk: talk.id,
            from: talk.status,
            to,
        })
    }
}
