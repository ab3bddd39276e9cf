use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_slot_free, now_ms, validate_bounds};
use super::{apply_cancel, apply_schedule, status, BookingRef, Engine, EngineError, WalCommand};

/// Partial content edit for a talk. `description: Some(None)` clears the field.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TalkPatch {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub duration_min: Option<u32>,
    pub level: Option<TalkLevel>,
    pub description: Option<Option<String>>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RoomPatch {
    pub name: Option<String>,
    pub capacity: Option<u32>,
    pub description: Option<Option<String>>,
}

/// One entry of a multi-row booking insert.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRequest {
    pub booking_id: Ulid,
    pub talk_id: Ulid,
    pub room_id: Ulid,
    pub start: Ms,
    pub end: Ms,
}

// Lock ordering, process-wide: talk locks before room locks, and within one
// class ascending by id. Every path below follows it; that is the whole
// deadlock argument.

impl Engine {
    // ── Rooms ────────────────────────────────────────────

    pub async fn create_room(
        &self,
        id: Ulid,
        name: String,
        capacity: u32,
        description: Option<String>,
    ) -> Result<(), EngineError> {
        if self.rooms.len() >= MAX_ROOMS_PER_CONFERENCE {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        if let Some(ref d) = description
            && d.len() > MAX_TEXT_LEN
        {
            return Err(EngineError::LimitExceeded("room description too long"));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomCreated {
            id,
            name: name.clone(),
            capacity,
            description: description.clone(),
        };
        self.wal_append(&event).await?;
        let rs = RoomState::new(id, name, capacity, description);
        self.rooms.insert(id, Arc::new(RwLock::new(rs)));
        Ok(())
    }

    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<(), EngineError> {
        if let Some(ref n) = patch.name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        if let Some(Some(ref d)) = patch.description
            && d.len() > MAX_TEXT_LEN
        {
            return Err(EngineError::LimitExceeded("room description too long"));
        }
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::RoomUpdated {
            id,
            name: patch.name.unwrap_or_else(|| guard.name.clone()),
            capacity: patch.capacity.unwrap_or(guard.capacity),
            description: match patch.description {
                Some(d) => d,
                None => guard.description.clone(),
            },
        };
        self.wal_append(&event).await?;
        if let Event::RoomUpdated { name, capacity, description, .. } = event {
            guard.name = name;
            guard.capacity = capacity;
            guard.description = description;
        }
        Ok(())
    }

    /// Rooms with bookings cannot be deleted; cancel or move the bookings
    /// first.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write().await;
        if !guard.bookings.is_empty() {
            return Err(EngineError::RoomInUse(id));
        }

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        self.rooms.remove(&id);
        Ok(())
    }

    // ── Talks ────────────────────────────────────────────

    pub async fn submit_talk(
        &self,
        id: Ulid,
        title: String,
        speaker: String,
        subject: String,
        duration_min: u32,
        level: TalkLevel,
        description: Option<String>,
    ) -> Result<(), EngineError> {
        if self.talks.len() >= MAX_TALKS_PER_CONFERENCE {
            return Err(EngineError::LimitExceeded("too many talks"));
        }
        if title.len() > MAX_TITLE_LEN {
            return Err(EngineError::LimitExceeded("talk title too long"));
        }
        if speaker.len() > MAX_NAME_LEN || subject.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("speaker or subject too long"));
        }
        if let Some(ref d) = description
            && d.len() > MAX_TEXT_LEN
        {
            return Err(EngineError::LimitExceeded("talk description too long"));
        }
        if duration_min == 0 || duration_min > MAX_TALK_DURATION_MIN {
            return Err(EngineError::LimitExceeded("talk duration out of range"));
        }
        if self.talks.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let at = now_ms();
        let event = Event::TalkSubmitted {
            id,
            title: title.clone(),
            speaker: speaker.clone(),
            subject: subject.clone(),
            duration_min,
            level,
            description: description.clone(),
            at,
        };
        self.wal_append(&event).await?;
        let talk = Talk {
            id,
            title,
            speaker,
            subject,
            duration_min,
            level,
            description,
            status: TalkStatus::Pending,
            booking: None,
            submitted_at: at,
            updated_at: at,
        };
        self.talks.insert(id, Arc::new(RwLock::new(talk)));
        Ok(())
    }

    /// Content edit. A title change is propagated to the denormalized copy on
    /// the talk's live booking, in the same WAL record.
    pub async fn update_talk(&self, id: Ulid, patch: TalkPatch) -> Result<(), EngineError> {
        if let Some(ref t) = patch.title
            && t.len() > MAX_TITLE_LEN
        {
            return Err(EngineError::LimitExceeded("talk title too long"));
        }
        if let Some(ref s) = patch.subject
            && s.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("speaker or subject too long"));
        }
        if let Some(Some(ref d)) = patch.description
            && d.len() > MAX_TEXT_LEN
        {
            return Err(EngineError::LimitExceeded("talk description too long"));
        }
        if let Some(d) = patch.duration_min
            && (d == 0 || d > MAX_TALK_DURATION_MIN)
        {
            return Err(EngineError::LimitExceeded("talk duration out of range"));
        }

        let talk = self.get_talk(&id).ok_or(EngineError::NotFound(id))?;
        let mut tg = talk.write().await;

        let title = patch.title.unwrap_or_else(|| tg.title.clone());
        let title_changed = title != tg.title;
        let at = now_ms();
        let event = Event::TalkUpdated {
            id,
            title: title.clone(),
            subject: patch.subject.unwrap_or_else(|| tg.subject.clone()),
            duration_min: patch.duration_min.unwrap_or(tg.duration_min),
            level: patch.level.unwrap_or(tg.level),
            description: match patch.description {
                Some(d) => d,
                None => tg.description.clone(),
            },
            at,
        };

        // The talk write lock pins the booking: cancel/move/delete all take it
        // first, so the index entry cannot change underneath us.
        let room_guard = match tg.booking.and_then(|b| self.booking_ref(&b)) {
            Some(bref) if title_changed => {
                let room = self
                    .get_room(&bref.room_id)
                    .ok_or(EngineError::NotFound(bref.room_id))?;
                Some(room.write_owned().await)
            }
            _ => None,
        };

        self.wal_append(&event).await?;
        if let Event::TalkUpdated { title, subject, duration_min, level, description, at, .. } =
            event
        {
            tg.title = title;
            tg.subject = subject;
            tg.duration_min = duration_min;
            tg.level = level;
            tg.description = description;
            tg.updated_at = at;
        }
        if let Some(mut rg) = room_guard
            && let Some(booking_id) = tg.booking
            && let Some(slot) = rg.bookings.iter_mut().find(|b| b.id == booking_id)
        {
            slot.talk_title = tg.title.clone();
        }
        Ok(())
    }

    /// Deleting a scheduled talk also removes its booking — one WAL record,
    /// both or neither.
    pub async fn delete_talk(&self, id: Ulid) -> Result<(), EngineError> {
        let talk = self.get_talk(&id).ok_or(EngineError::NotFound(id))?;
        let tg = talk.write().await;

        let event = Event::TalkDeleted { id };
        match tg.booking.and_then(|b| self.booking_ref(&b).map(|r| (b, r))) {
            Some((booking_id, bref)) => {
                let room = self
                    .get_room(&bref.room_id)
                    .ok_or(EngineError::NotFound(bref.room_id))?;
                let mut rg = room.write().await;
                self.wal_append(&event).await?;
                rg.remove_booking(booking_id);
                self.bookings.remove(&booking_id);
            }
            None => {
                self.wal_append(&event).await?;
            }
        }
        self.talks.remove(&id);
        Ok(())
    }

    /// Organizer decision: accept or reject a pending talk. Scheduling and
    /// unscheduling are not reachable from here — they belong to the booking
    /// commit and cancel paths.
    pub async fn set_talk_status(&self, id: Ulid, to: TalkStatus) -> Result<(), EngineError> {
        let talk = self.get_talk(&id).ok_or(EngineError::NotFound(id))?;
        let mut tg = talk.write().await;

        if !status::direct_edge(tg.status, to) {
            return Err(EngineError::InvalidTransition {
                talk: id,
                from: tg.status,
                to,
            });
        }

        let at = now_ms();
        let event = match to {
            TalkStatus::Accepted => Event::TalkAccepted { id, at },
            TalkStatus::Rejected => Event::TalkRejected { id, at },
            // direct_edge only admits the two above.
            _ => unreachable!(),
        };
        self.wal_append(&event).await?;
        tg.status = to;
        tg.updated_at = at;
        Ok(())
    }

    // ── Booking commit protocol ──────────────────────────

    /// Commit a booking: the talk must be `accepted`, the interval inside
    /// operating hours, and the room free. The room write lock is held from
    /// the conflict check through the write, so two committers for the same
    /// room serialize and the loser sees the winner's booking. The booking
    /// row and the status flip share one WAL record.
    pub async fn schedule_talk(
        &self,
        booking_id: Ulid,
        talk_id: Ulid,
        room_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<BookingInfo, EngineError> {
        if self.bookings.contains_key(&booking_id) {
            return Err(EngineError::AlreadyExists(booking_id));
        }

        let talk = self.get_talk(&talk_id).ok_or(EngineError::NotFound(talk_id))?;
        let mut tg = talk.write().await;
        status::check_transition(&tg, TalkStatus::Scheduled)?;

        let room = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut rg = room.write().await;
        if rg.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        validate_bounds(start, end)?;
        self.hours.validate(start, end)?;
        let span = Span::new(start, end);
        check_slot_free(&rg, &span, None)?;

        let at = now_ms();
        let event = Event::TalkScheduled {
            talk_id,
            booking_id,
            room_id,
            span,
            at,
        };
        self.wal_append(&event).await?;
        apply_schedule(&mut rg, &mut tg, booking_id, span, at);
        self.bookings.insert(booking_id, BookingRef { room_id, talk_id });

        Ok(BookingInfo {
            id: booking_id,
            talk_id,
            room_id,
            talk_title: tg.title.clone(),
            start,
            end,
        })
    }

    /// Atomically schedule several talks, possibly across rooms. All-or-
    /// nothing: every request is validated against current state and against
    /// the rest of the batch before anything is committed.
    pub async fn batch_schedule(
        &self,
        requests: Vec<ScheduleRequest>,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        if requests.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }

        let mut seen_bookings = HashSet::new();
        let mut seen_talks = HashSet::new();
        for r in &requests {
            validate_bounds(r.start, r.end)?;
            self.hours.validate(r.start, r.end)?;
            if self.bookings.contains_key(&r.booking_id) || !seen_bookings.insert(r.booking_id) {
                return Err(EngineError::AlreadyExists(r.booking_id));
            }
            // A talk has at most one booking, so it may appear once per batch.
            if !seen_talks.insert(r.talk_id) {
                return Err(EngineError::AlreadyExists(r.talk_id));
            }
        }

        // Acquire write locks in sorted order: all talks, then all rooms.
        let mut talk_ids: Vec<Ulid> = requests.iter().map(|r| r.talk_id).collect();
        talk_ids.sort();
        let mut talk_guards = Vec::with_capacity(talk_ids.len());
        let mut talk_idx = HashMap::new();
        for tid in &talk_ids {
            let talk = self.get_talk(tid).ok_or(EngineError::NotFound(*tid))?;
            let guard = talk.write_owned().await;
            status::check_transition(&guard, TalkStatus::Scheduled)?;
            talk_idx.insert(*tid, talk_guards.len());
            talk_guards.push(guard);
        }

        let mut room_ids: Vec<Ulid> = requests.iter().map(|r| r.room_id).collect();
        room_ids.sort();
        room_ids.dedup();
        let mut room_guards = Vec::with_capacity(room_ids.len());
        let mut room_idx = HashMap::new();
        for rid in &room_ids {
            let room = self.get_room(rid).ok_or(EngineError::NotFound(*rid))?;
            let guard = room.write_owned().await;
            room_idx.insert(*rid, room_guards.len());
            room_guards.push(guard);
        }

        // Phase 1: validate everything against current state + intra-batch.
        let mut by_room: HashMap<Ulid, Vec<&ScheduleRequest>> = HashMap::new();
        for r in &requests {
            by_room.entry(r.room_id).or_default().push(r);
        }

        for (rid, batch) in &by_room {
            let guard = &room_guards[room_idx[rid]];
            if guard.bookings.len() + batch.len() > MAX_BOOKINGS_PER_ROOM {
                return Err(EngineError::LimitExceeded("too many bookings on room"));
            }
            for r in batch {
                check_slot_free(guard, &Span::new(r.start, r.end), None)?;
            }
            for i in 0..batch.len() {
                for j in (i + 1)..batch.len() {
                    let a = Span::new(batch[i].start, batch[i].end);
                    let b = Span::new(batch[j].start, batch[j].end);
                    if a.overlaps(&b) {
                        let other = batch[i];
                        let title = talk_guards[talk_idx[&other.talk_id]].title.clone();
                        return Err(EngineError::SlotConflict(vec![ConflictInfo {
                            booking_id: other.booking_id,
                            talk_id: other.talk_id,
                            talk_title: title,
                            start: other.start,
                            end: other.end,
                        }]));
                    }
                }
            }
        }

        // Phase 2: all validated — commit every booking.
        let at = now_ms();
        let mut committed = Vec::with_capacity(requests.len());
        for r in requests {
            let span = Span::new(r.start, r.end);
            let event = Event::TalkScheduled {
                talk_id: r.talk_id,
                booking_id: r.booking_id,
                room_id: r.room_id,
                span,
                at,
            };
            self.wal_append(&event).await?;
            let tg = &mut talk_guards[talk_idx[&r.talk_id]];
            let rg = &mut room_guards[room_idx[&r.room_id]];
            apply_schedule(rg, tg, r.booking_id, span, at);
            self.bookings.insert(
                r.booking_id,
                BookingRef {
                    room_id: r.room_id,
                    talk_id: r.talk_id,
                },
            );
            committed.push(BookingInfo {
                id: r.booking_id,
                talk_id: r.talk_id,
                room_id: r.room_id,
                talk_title: tg.title.clone(),
                start: r.start,
                end: r.end,
            });
        }

        Ok(committed)
    }

    /// Reschedule a booking in place, optionally to another room. The talk
    /// stays `scheduled`; the conflict check ignores the booking being moved
    /// when the room is unchanged.
    pub async fn move_booking(
        &self,
        booking_id: Ulid,
        new_room: Option<Ulid>,
        start: Ms,
        end: Ms,
    ) -> Result<BookingInfo, EngineError> {
        let bref = self
            .booking_ref(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let talk = self
            .get_talk(&bref.talk_id)
            .ok_or(EngineError::NotFound(bref.talk_id))?;
        // Held for serialization only: cancel/delete/update all take the talk
        // lock first, so the booking cannot disappear under us.
        let tg = talk.write().await;
        let bref = self
            .booking_ref(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if tg.booking != Some(booking_id) {
            return Err(EngineError::NotFound(booking_id));
        }

        validate_bounds(start, end)?;
        self.hours.validate(start, end)?;
        let span = Span::new(start, end);
        let dest = new_room.unwrap_or(bref.room_id);
        let at = now_ms();

        if dest == bref.room_id {
            let room = self
                .get_room(&dest)
                .ok_or(EngineError::NotFound(dest))?;
            let mut rg = room.write().await;
            check_slot_free(&rg, &span, Some(booking_id))?;

            let event = Event::BookingMoved { booking_id, room_id: dest, span, at };
            self.wal_append(&event).await?;
            if let Some(slot) = rg.remove_booking(booking_id) {
                rg.insert_booking(BookingSlot { span, ..slot });
            }
        } else {
            let old_room = self
                .get_room(&bref.room_id)
                .ok_or(EngineError::NotFound(bref.room_id))?;
            let target = self.get_room(&dest).ok_or(EngineError::NotFound(dest))?;
            // Two room locks: ascending id order, same as everywhere else.
            let (mut og, mut ng) = if bref.room_id < dest {
                let og = old_room.write_owned().await;
                let ng = target.write_owned().await;
                (og, ng)
            } else {
                let ng = target.write_owned().await;
                let og = old_room.write_owned().await;
                (og, ng)
            };
            if ng.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
                return Err(EngineError::LimitExceeded("too many bookings on room"));
            }
            if og.booking(booking_id).is_none() {
                return Err(EngineError::NotFound(booking_id));
            }
            check_slot_free(&ng, &span, None)?;

            let event = Event::BookingMoved { booking_id, room_id: dest, span, at };
            self.wal_append(&event).await?;
            if let Some(slot) = og.remove_booking(booking_id) {
                ng.insert_booking(BookingSlot { span, ..slot });
            }
            self.bookings.insert(
                booking_id,
                BookingRef {
                    room_id: dest,
                    talk_id: bref.talk_id,
                },
            );
        }

        Ok(BookingInfo {
            id: booking_id,
            talk_id: bref.talk_id,
            room_id: dest,
            talk_title: tg.title.clone(),
            start,
            end,
        })
    }

    /// Cancel a booking and revert its talk to `accepted` so it can be
    /// rescheduled. One WAL record; mirror image of the commit.
    pub async fn cancel_booking(&self, booking_id: Ulid) -> Result<Ulid, EngineError> {
        let bref = self
            .booking_ref(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let talk = self
            .get_talk(&bref.talk_id)
            .ok_or(EngineError::NotFound(bref.talk_id))?;
        let mut tg = talk.write().await;
        // Re-check under the talk lock — a concurrent cancel or move may have
        // won the race for this booking.
        let bref = self
            .booking_ref(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if tg.booking != Some(booking_id) {
            return Err(EngineError::NotFound(booking_id));
        }
        status::check_transition(&tg, TalkStatus::Accepted)?;

        let room = self
            .get_room(&bref.room_id)
            .ok_or(EngineError::NotFound(bref.room_id))?;
        let mut rg = room.write().await;

        let at = now_ms();
        let event = Event::BookingCancelled { booking_id, at };
        self.wal_append(&event).await?;
        apply_cancel(&mut rg, &mut tg, booking_id, at);
        self.bookings.remove(&booking_id);
        Ok(bref.talk_id)
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        // Clone the Arcs out first; never await while holding a shard guard.
        let room_arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in room_arcs {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                id: guard.id,
                name: guard.name.clone(),
                capacity: guard.capacity,
                description: guard.description.clone(),
            });
        }

        let talk_arcs: Vec<_> = self.talks.iter().map(|e| e.value().clone()).collect();
        for talk in talk_arcs {
            let tg = talk.read().await;
            events.push(Event::TalkSubmitted {
                id: tg.id,
                title: tg.title.clone(),
                speaker: tg.speaker.clone(),
                subject: tg.subject.clone(),
                duration_min: tg.duration_min,
                level: tg.level,
                description: tg.description.clone(),
                at: tg.submitted_at,
            });
            match tg.status {
                TalkStatus::Pending => {}
                TalkStatus::Accepted => {
                    events.push(Event::TalkAccepted { id: tg.id, at: tg.updated_at });
                }
                TalkStatus::Rejected => {
                    events.push(Event::TalkRejected { id: tg.id, at: tg.updated_at });
                }
                TalkStatus::Scheduled => {
                    events.push(Event::TalkAccepted { id: tg.id, at: tg.updated_at });
                    // The talk read lock pins its booking, so the room's slot
                    // is still there when we read it.
                    if let Some(booking_id) = tg.booking
                        && let Some(bref) = self.booking_ref(&booking_id)
                        && let Some(room) = self.get_room(&bref.room_id)
                    {
                        let rg = room.read().await;
                        if let Some(slot) = rg.booking(booking_id) {
                            events.push(Event::TalkScheduled {
                                talk_id: tg.id,
                                booking_id,
                                room_id: bref.room_id,
                                span: slot.span,
                                at: tg.updated_at,
                            });
                        }
                    }
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Internal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Internal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Internal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
