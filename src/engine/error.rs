use ulid::Ulid;

use crate::model::{ConflictInfo, Ms, TalkStatus};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Start not strictly before end.
    InvalidOrder { start: Ms, end: Ms },
    /// Interval falls outside the operating-hours window of its day.
    OutOfHours { start: Ms, end: Ms },
    /// Requested status change is not legal from the talk's current state.
    InvalidTransition {
        talk: Ulid,
        from: TalkStatus,
        to: TalkStatus,
    },
    /// Requested room/interval overlaps existing bookings.
    SlotConflict(Vec<ConflictInfo>),
    /// Room still has bookings and cannot be deleted.
    RoomInUse(Ulid),
    LimitExceeded(&'static str),
    /// Storage failure — opaque to callers, never retried by the engine.
    Internal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidOrder { start, end } => {
                write!(f, "start {start} must be before end {end}")
            }
            EngineError::OutOfHours { start, end } => {
                write!(f, "interval [{start}, {end}) is outside operating hours")
            }
            EngineError::InvalidTransition { talk, from, to } => {
                write!(f, "talk {talk}: illegal status change {from} -> {to}")
            }
            EngineError::SlotConflict(conflicts) => {
                write!(f, "slot conflict with: ")?;
                for (i, c) in conflicts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}' [{}, {})", c.talk_title, c.start, c.end)?;
                }
                Ok(())
            }
            EngineError::RoomInUse(id) => {
                write!(f, "cannot delete room {id}: it has bookings")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Internal(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
