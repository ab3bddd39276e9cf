use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds UTC — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Lifecycle of a talk. Legal edges live in `engine::status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TalkStatus {
    Pending,
    Accepted,
    Rejected,
    Scheduled,
}

impl TalkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TalkStatus::Pending => "pending",
            TalkStatus::Accepted => "accepted",
            TalkStatus::Rejected => "rejected",
            TalkStatus::Scheduled => "scheduled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TalkStatus::Pending),
            "accepted" => Some(TalkStatus::Accepted),
            "rejected" => Some(TalkStatus::Rejected),
            "scheduled" => Some(TalkStatus::Scheduled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TalkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TalkLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl TalkLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            TalkLevel::Beginner => "beginner",
            TalkLevel::Intermediate => "intermediate",
            TalkLevel::Advanced => "advanced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "beginner" => Some(TalkLevel::Beginner),
            "intermediate" => Some(TalkLevel::Intermediate),
            "advanced" => Some(TalkLevel::Advanced),
            _ => None,
        }
    }
}

impl std::fmt::Display for TalkLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A talk as submitted by a speaker. Identity and speaker attribution come
/// from the caller; the engine owns status, booking reference and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Talk {
    pub id: Ulid,
    pub title: String,
    pub speaker: String,
    pub subject: String,
    pub duration_min: u32,
    pub level: TalkLevel,
    pub description: Option<String>,
    pub status: TalkStatus,
    /// Set iff status is Scheduled.
    pub booking: Option<Ulid>,
    pub submitted_at: Ms,
    pub updated_at: Ms,
}

/// One committed slot on a room's calendar. The talk title is denormalized
/// here so conflict reports need no cross-entity lookup under the room lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingSlot {
    pub id: Ulid,
    pub talk_id: Ulid,
    pub talk_title: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomState {
    pub id: Ulid,
    pub name: String,
    /// Seating capacity — informational only, never enforced by the scheduler.
    pub capacity: u32,
    pub description: Option<String>,
    /// All committed bookings, sorted by `span.start`.
    pub bookings: Vec<BookingSlot>,
}

impl RoomState {
    pub fn new(id: Ulid, name: String, capacity: u32, description: Option<String>) -> Self {
        Self {
            id,
            name,
            capacity,
            description,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, slot: BookingSlot) {
        let pos = self
            .bookings
            .binary_search_by_key(&slot.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, slot);
    }

    /// Remove a booking by id.
    pub fn remove_booking(&mut self, id: Ulid) -> Option<BookingSlot> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&BookingSlot> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &BookingSlot> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
/// A scheduling commit and its status flip share one record, so the pair is
/// atomic both live and across crash-replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        name: String,
        capacity: u32,
        description: Option<String>,
    },
    RoomUpdated {
        id: Ulid,
        name: String,
        capacity: u32,
        description: Option<String>,
    },
    RoomDeleted {
        id: Ulid,
    },
    TalkSubmitted {
        id: Ulid,
        title: String,
        speaker: String,
        subject: String,
        duration_min: u32,
        level: TalkLevel,
        description: Option<String>,
        at: Ms,
    },
    /// Content edit. Carries the fully resolved new values, not a patch.
    TalkUpdated {
        id: Ulid,
        title: String,
        subject: String,
        duration_min: u32,
        level: TalkLevel,
        description: Option<String>,
        at: Ms,
    },
    TalkDeleted {
        id: Ulid,
    },
    TalkAccepted {
        id: Ulid,
        at: Ms,
    },
    TalkRejected {
        id: Ulid,
        at: Ms,
    },
    /// The booking commit: creates the booking AND flips the talk to scheduled.
    TalkScheduled {
        talk_id: Ulid,
        booking_id: Ulid,
        room_id: Ulid,
        span: Span,
        at: Ms,
    },
    /// Reschedule in place; `room_id` is the destination room.
    BookingMoved {
        booking_id: Ulid,
        room_id: Ulid,
        span: Span,
        at: Ms,
    },
    /// Removes the booking AND reverts the talk to accepted.
    BookingCancelled {
        booking_id: Ulid,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkInfo {
    pub id: Ulid,
    pub title: String,
    pub speaker: String,
    pub subject: String,
    pub duration_min: u32,
    pub level: TalkLevel,
    pub status: TalkStatus,
    pub description: Option<String>,
    pub submitted_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub talk_id: Ulid,
    pub room_id: Ulid,
    pub talk_title: String,
    pub start: Ms,
    pub end: Ms,
}

/// Payload of a `SlotConflict` error — enough for a caller to render
/// "clashes with 'X' from .. to ..".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictInfo {
    pub booking_id: Ulid,
    pub talk_id: Ulid,
    pub talk_title: String,
    pub start: Ms,
    pub end: Ms,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        let partial = Span::new(50, 200);
        assert!(outer.contains_span(&inner));
        assert!(outer.contains_span(&outer)); // self-containment
        assert!(!outer.contains_span(&partial));
    }

    fn slot(start: Ms, end: Ms) -> BookingSlot {
        BookingSlot {
            id: Ulid::new(),
            talk_id: Ulid::new(),
            talk_title: "t".into(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn booking_ordering() {
        let mut rs = RoomState::new(Ulid::new(), "R".into(), 50, None);
        rs.insert_booking(slot(300, 400));
        rs.insert_booking(slot(100, 200));
        rs.insert_booking(slot(200, 300));
        assert_eq!(rs.bookings[0].span.start, 100);
        assert_eq!(rs.bookings[1].span.start, 200);
        assert_eq!(rs.bookings[2].span.start, 300);
    }

    #[test]
    fn booking_remove() {
        let mut rs = RoomState::new(Ulid::new(), "R".into(), 50, None);
        let s = slot(100, 200);
        let id = s.id;
        rs.insert_booking(s);
        assert_eq!(rs.bookings.len(), 1);
        rs.remove_booking(id);
        assert!(rs.bookings.is_empty());
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut rs = RoomState::new(Ulid::new(), "R".into(), 50, None);
        rs.insert_booking(slot(100, 200));
        assert!(rs.remove_booking(Ulid::new()).is_none());
        assert_eq!(rs.bookings.len(), 1); // original still there
    }

    #[test]
    fn overlapping_skips_disjoint() {
        let mut rs = RoomState::new(Ulid::new(), "R".into(), 50, None);
        rs.insert_booking(slot(100, 200));
        rs.insert_booking(slot(450, 600));
        rs.insert_booking(slot(1000, 1100));

        let query = Span::new(500, 800);
        let hits: Vec<_> = rs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        // Booking ending exactly at query.start is NOT overlapping (half-open)
        let mut rs = RoomState::new(Ulid::new(), "R".into(), 50, None);
        rs.insert_booking(slot(100, 200));
        let query = Span::new(200, 300);
        assert_eq!(rs.overlapping(&query).count(), 0);
    }

    #[test]
    fn overlapping_spanning_booking_found() {
        let mut rs = RoomState::new(Ulid::new(), "R".into(), 50, None);
        // One huge booking that starts before and ends after the query
        rs.insert_booking(slot(0, 10_000));
        let query = Span::new(500, 600);
        assert_eq!(rs.overlapping(&query).count(), 1);
    }

    #[test]
    fn overlapping_empty_room() {
        let rs = RoomState::new(Ulid::new(), "R".into(), 50, None);
        assert_eq!(rs.overlapping(&Span::new(0, 1000)).count(), 0);
    }

    #[test]
    fn status_roundtrip() {
        for s in [
            TalkStatus::Pending,
            TalkStatus::Accepted,
            TalkStatus::Rejected,
            TalkStatus::Scheduled,
        ] {
            assert_eq!(TalkStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TalkStatus::parse("refused"), None);
    }

    #[test]
    fn level_roundtrip() {
        for l in [
            TalkLevel::Beginner,
            TalkLevel::Intermediate,
            TalkLevel::Advanced,
        ] {
            assert_eq!(TalkLevel::parse(l.as_str()), Some(l));
        }
        assert_eq!(TalkLevel::parse("expert"), None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::TalkScheduled {
            talk_id: Ulid::new(),
            booking_id: Ulid::new(),
            room_id: Ulid::new(),
            span: Span::new(1000, 2000),
            at: 5000,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
