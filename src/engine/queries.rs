use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflicts, validate_bounds};
use super::hours::{DAY_MS, MINUTE_MS};
use super::slots::{free_spans, grid_cells};
use super::{Engine, EngineError};

// Read-only surface. Unknown room ids yield empty results rather than
// errors, matching how schedule-browsing callers probe.

impl Engine {
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(arcs.len());
        for rs in arcs {
            let guard = rs.read().await;
            rooms.push(RoomInfo {
                id: guard.id,
                name: guard.name.clone(),
                capacity: guard.capacity,
                description: guard.description.clone(),
            });
        }
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        rooms
    }

    pub async fn list_talks(&self, status: Option<TalkStatus>) -> Vec<TalkInfo> {
        let arcs: Vec<_> = self.talks.iter().map(|e| e.value().clone()).collect();
        let mut talks = Vec::with_capacity(arcs.len());
        for talk in arcs {
            let tg = talk.read().await;
            if let Some(s) = status
                && tg.status != s
            {
                continue;
            }
            talks.push(talk_info(&tg));
        }
        talks.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        talks
    }

    pub async fn get_talk_info(&self, id: Ulid) -> Result<TalkInfo, EngineError> {
        let talk = self.get_talk(&id).ok_or(EngineError::NotFound(id))?;
        let tg = talk.read().await;
        Ok(talk_info(&tg))
    }

    /// Bookings for one room (or all rooms), optionally restricted to a
    /// window, ordered by start time.
    pub async fn list_bookings(
        &self,
        room_id: Option<Ulid>,
        window: Option<(Ms, Ms)>,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        if let Some((start, end)) = window {
            validate_bounds(start, end)?;
            if start >= end {
                return Err(EngineError::InvalidOrder { start, end });
            }
            if end - start > MAX_QUERY_WINDOW_MS {
                return Err(EngineError::LimitExceeded("query window too wide"));
            }
        }

        let arcs: Vec<_> = match room_id {
            Some(rid) => self.get_room(&rid).into_iter().collect(),
            None => self.rooms.iter().map(|e| e.value().clone()).collect(),
        };

        let mut bookings = Vec::new();
        for rs in arcs {
            let guard = rs.read().await;
            match window {
                Some((start, end)) => {
                    let query = Span::new(start, end);
                    bookings.extend(guard.overlapping(&query).map(|b| booking_info(guard.id, b)));
                }
                None => {
                    bookings.extend(guard.bookings.iter().map(|b| booking_info(guard.id, b)));
                }
            }
        }
        bookings.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
        Ok(bookings)
    }

    /// Maximal free intervals of the operating window on `day` (UTC epoch
    /// day) for one room. Recomputed from current bookings on every call.
    pub async fn free_slots(&self, room_id: Ulid, day: i64) -> Result<Vec<Span>, EngineError> {
        let window = self.day_window(day)?;

        let rs = match self.get_room(&room_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        let busy = clamped_busy(&guard, &window);
        Ok(free_spans(window, &busy))
    }

    /// The discrete form of `free_slots`: fixed-length bookable cells,
    /// derived from the continuous free intervals by intersection.
    pub async fn slot_grid(
        &self,
        room_id: Ulid,
        day: i64,
        cell_min: u32,
    ) -> Result<Vec<Span>, EngineError> {
        if !(MIN_GRID_CELL_MIN..=MAX_GRID_CELL_MIN).contains(&cell_min) {
            return Err(EngineError::LimitExceeded("grid cell out of range"));
        }
        let window = self.day_window(day)?;

        let rs = match self.get_room(&room_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        let busy = clamped_busy(&guard, &window);
        let free = free_spans(window, &busy);
        Ok(grid_cells(window, &free, Ms::from(cell_min) * MINUTE_MS))
    }

    /// Rooms with no booking overlapping `[start, end)`, ordered by name.
    /// The window itself must be a valid booking interval.
    pub async fn available_rooms(&self, start: Ms, end: Ms) -> Result<Vec<RoomInfo>, EngineError> {
        validate_bounds(start, end)?;
        self.hours.validate(start, end)?;
        let query = Span::new(start, end);

        let arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut free = Vec::new();
        for rs in arcs {
            let guard = rs.read().await;
            if guard.overlapping(&query).next().is_none() {
                free.push(RoomInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                    capacity: guard.capacity,
                    description: guard.description.clone(),
                });
            }
        }
        free.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(free)
    }

    /// Bounds-check a day number before any millisecond arithmetic on it.
    fn day_window(&self, day: i64) -> Result<Span, EngineError> {
        if !(0..=MAX_VALID_TIMESTAMP_MS / DAY_MS).contains(&day) {
            return Err(EngineError::LimitExceeded("day out of range"));
        }
        Ok(self.hours.window_for_day(day))
    }

    /// Read-only conflict probe for scheduling UIs. `exclude` ignores one
    /// booking, for update-in-place checks.
    pub async fn conflicts_for(
        &self,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<Vec<ConflictInfo>, EngineError> {
        validate_bounds(start, end)?;
        if start >= end {
            return Err(EngineError::InvalidOrder { start, end });
        }
        let rs = match self.get_room(&room_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        Ok(find_conflicts(&guard, &Span::new(start, end), exclude))
    }
}

fn talk_info(t: &Talk) -> TalkInfo {
    TalkInfo {
        id: t.id,
        title: t.title.clone(),
        speaker: t.speaker.clone(),
        subject: t.subject.clone(),
        duration_min: t.duration_min,
        level: t.level,
        status: t.status,
        description: t.description.clone(),
        submitted_at: t.submitted_at,
        updated_at: t.updated_at,
    }
}

fn booking_info(room_id: Ulid, b: &BookingSlot) -> BookingInfo {
    BookingInfo {
        id: b.id,
        talk_id: b.talk_id,
        room_id,
        talk_title: b.talk_title.clone(),
        start: b.span.start,
        end: b.span.end,
    }
}

/// Booking spans overlapping `window`, clamped to it, in start order.
fn clamped_busy(room: &RoomState, window: &Span) -> Vec<Span> {
    room.overlapping(window)
        .map(|b| {
            Span::new(
                b.span.start.max(window.start),
                b.span.end.min(window.end),
            )
        })
        .collect()
}
