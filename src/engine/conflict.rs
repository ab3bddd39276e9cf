use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Sanity bounds on raw caller timestamps, checked before any Span is built.
pub(crate) fn validate_bounds(start: Ms, end: Ms) -> Result<(), EngineError> {
    use crate::limits::*;
    if start < MIN_VALID_TIMESTAMP_MS
        || end < MIN_VALID_TIMESTAMP_MS
        || start > MAX_VALID_TIMESTAMP_MS
        || end > MAX_VALID_TIMESTAMP_MS
    {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Every booking in the room overlapping the candidate interval, in start
/// order. `exclude` lets an update-in-place check ignore the booking being
/// moved. Read-only; the caller holds the room lock, so the list is a
/// consistent snapshot.
pub fn find_conflicts(room: &RoomState, span: &Span, exclude: Option<Ulid>) -> Vec<ConflictInfo> {
    room.overlapping(span)
        .filter(|b| exclude != Some(b.id))
        .map(|b| ConflictInfo {
            booking_id: b.id,
            talk_id: b.talk_id,
            talk_title: b.talk_title.clone(),
            start: b.span.start,
            end: b.span.end,
        })
        .collect()
}

pub(crate) fn check_slot_free(
    room: &RoomState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let conflicts = find_conflicts(room, span, exclude);
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(EngineError::SlotConflict(conflicts))
    }
}
