mod conflict;
mod error;
pub mod hours;
mod mutations;
mod queries;
pub mod slots;
pub mod status;

pub use conflict::find_conflicts;
pub use error::EngineError;
pub use hours::OperatingHours;
pub use mutations::{RoomPatch, ScheduleRequest, TalkPatch};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub type SharedTalk = Arc<RwLock<Talk>>;

/// Where a booking lives: its room and the talk it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct BookingRef {
    pub room_id: Ulid,
    pub talk_id: Ulid,
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One conference's scheduling state: rooms, talks, and the booking index,
/// all rebuilt from the WAL on startup.
pub struct Engine {
    pub hours: OperatingHours,
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) talks: DashMap<Ulid, SharedTalk>,
    /// Reverse lookup: booking id → (room, talk).
    pub(super) bookings: DashMap<Ulid, BookingRef>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

// ── Shared apply logic ───────────────────────────────────
//
// Each helper mutates exactly the state one WAL record describes. The live
// command paths call them under held write locks; replay calls them with
// uncontended try_write guards. Keeping both paths on the same functions is
// what makes "one record = one atomic change" true.

fn apply_schedule(room: &mut RoomState, talk: &mut Talk, booking_id: Ulid, span: Span, at: Ms) {
    room.insert_booking(BookingSlot {
        id: booking_id,
        talk_id: talk.id,
        talk_title: talk.title.clone(),
        span,
    });
    talk.status = TalkStatus::Scheduled;
    talk.booking = Some(booking_id);
    talk.updated_at = at;
}

fn apply_cancel(room: &mut RoomState, talk: &mut Talk, booking_id: Ulid, at: Ms) {
    room.remove_booking(booking_id);
    talk.status = TalkStatus::Accepted;
    talk.booking = None;
    talk.updated_at = at;
}

impl Engine {
    pub fn new(wal_path: PathBuf, hours: OperatingHours) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            hours,
            rooms: DashMap::new(),
            talks: DashMap::new(),
            bookings: DashMap::new(),
            wal_tx,
        };

        // Replay — we're the sole owner of every Arc here, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/
        // blocking_write here because this may run inside an async context
        // (e.g. lazy conference creation).
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    /// Apply one already-durable event to in-memory state. Every event was
    /// validated before it was appended, so missing lookups only occur for
    /// logs hand-edited or truncated mid-history; those events are skipped.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::RoomCreated { id, name, capacity, description } => {
                let rs = RoomState::new(*id, name.clone(), *capacity, description.clone());
                self.rooms.insert(*id, Arc::new(RwLock::new(rs)));
            }
            Event::RoomUpdated { id, name, capacity, description } => {
                if let Some(entry) = self.rooms.get(id) {
                    let rs = entry.value().clone();
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    guard.name = name.clone();
                    guard.capacity = *capacity;
                    guard.description = description.clone();
                }
            }
            Event::RoomDeleted { id } => {
                self.rooms.remove(id);
            }
            Event::TalkSubmitted {
                id,
                title,
                speaker,
                subject,
                duration_min,
                level,
                description,
                at,
            } => {
                let talk = Talk {
                    id: *id,
                    title: title.clone(),
                    speaker: speaker.clone(),
                    subject: subject.clone(),
                    duration_min: *duration_min,
                    level: *level,
                    description: description.clone(),
                    status: TalkStatus::Pending,
                    booking: None,
                    submitted_at: *at,
                    updated_at: *at,
                };
                self.talks.insert(*id, Arc::new(RwLock::new(talk)));
            }
            Event::TalkUpdated { id, title, subject, duration_min, level, description, at } => {
                if let Some(entry) = self.talks.get(id) {
                    let talk = entry.value().clone();
                    let mut guard = talk.try_write().expect("replay: uncontended write");
                    guard.title = title.clone();
                    guard.subject = subject.clone();
                    guard.duration_min = *duration_min;
                    guard.level = *level;
                    guard.description = description.clone();
                    guard.updated_at = *at;
                    if let Some(booking_id) = guard.booking
                        && let Some(bref) = self.booking_ref(&booking_id)
                        && let Some(room) = self.get_room(&bref.room_id)
                    {
                        let mut rg = room.try_write().expect("replay: uncontended write");
                        if let Some(slot) = rg.bookings.iter_mut().find(|b| b.id == booking_id) {
                            slot.talk_title = title.clone();
                        }
                    }
                }
            }
            Event::TalkDeleted { id } => {
                if let Some(entry) = self.talks.get(id) {
                    let talk = entry.value().clone();
                    let guard = talk.try_read().expect("replay: uncontended read");
                    if let Some(booking_id) = guard.booking
                        && let Some((_, bref)) = self.bookings.remove(&booking_id)
                        && let Some(room) = self.get_room(&bref.room_id)
                    {
                        let mut rg = room.try_write().expect("replay: uncontended write");
                        rg.remove_booking(booking_id);
                    }
                }
                self.talks.remove(id);
            }
            Event::TalkAccepted { id, at } => {
                if let Some(entry) = self.talks.get(id) {
                    let talk = entry.value().clone();
                    let mut guard = talk.try_write().expect("replay: uncontended write");
                    guard.status = TalkStatus::Accepted;
                    guard.updated_at = *at;
                }
            }
            Event::TalkRejected { id, at } => {
                if let Some(entry) = self.talks.get(id) {
                    let talk = entry.value().clone();
                    let mut guard = talk.try_write().expect("replay: uncontended write");
                    guard.status = TalkStatus::Rejected;
                    guard.updated_at = *at;
                }
            }
            Event::TalkScheduled { talk_id, booking_id, room_id, span, at } => {
                if let Some(room) = self.get_room(room_id)
                    && let Some(talk) = self.get_talk(talk_id)
                {
                    let mut rg = room.try_write().expect("replay: uncontended write");
                    let mut tg = talk.try_write().expect("replay: uncontended write");
                    apply_schedule(&mut rg, &mut tg, *booking_id, *span, *at);
                    self.bookings.insert(
                        *booking_id,
                        BookingRef {
                            room_id: *room_id,
                            talk_id: *talk_id,
                        },
                    );
                }
            }
            Event::BookingMoved { booking_id, room_id, span, .. } => {
                if let Some(mut bref) = self.bookings.get_mut(booking_id)
                    && let Some(old_room) = self.get_room(&bref.room_id)
                {
                    let mut og = old_room.try_write().expect("replay: uncontended write");
                    if let Some(slot) = og.remove_booking(*booking_id) {
                        if bref.room_id == *room_id {
                            og.insert_booking(BookingSlot {
                                span: *span,
                                ..slot
                            });
                        } else if let Some(new_room) = self.get_room(room_id) {
                            drop(og);
                            let mut ng = new_room.try_write().expect("replay: uncontended write");
                            ng.insert_booking(BookingSlot {
                                span: *span,
                                ..slot
                            });
                            bref.room_id = *room_id;
                        }
                    }
                }
            }
            Event::BookingCancelled { booking_id, at } => {
                if let Some((_, bref)) = self.bookings.remove(booking_id)
                    && let Some(room) = self.get_room(&bref.room_id)
                    && let Some(talk) = self.get_talk(&bref.talk_id)
                {
                    let mut rg = room.try_write().expect("replay: uncontended write");
                    let mut tg = talk.try_write().expect("replay: uncontended write");
                    apply_cancel(&mut rg, &mut tg, *booking_id, *at);
                }
            }
        }
    }

    /// Write an event to the WAL via the background group-commit writer.
    /// Called before any in-memory mutation, so a storage failure leaves
    /// state untouched.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Internal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Internal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Internal(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_talk(&self, id: &Ulid) -> Option<SharedTalk> {
        self.talks.get(id).map(|e| e.value().clone())
    }

    pub(super) fn booking_ref(&self, booking_id: &Ulid) -> Option<BookingRef> {
        self.bookings.get(booking_id).map(|e| *e.value())
    }
}
