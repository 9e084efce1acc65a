mod consecutive;
mod constraints;
mod eligibility;
mod error;
mod lifecycle;
mod mutations;
mod overlap;
mod queries;
mod quota;
mod recurrence;
mod store;
#[cfg(test)]
mod tests;

pub use consecutive::{check_run, longest_run};
pub use constraints::ConstraintSet;
pub use eligibility::{evaluate, Proposal};
pub use error::{EngineError, Entity, Rejection};
pub use lifecycle::{ensure_deletable, transition};
pub use mutations::{BookingRequest, RecurrenceRequest};
pub use overlap::{conflicts, find_conflict};
pub use quota::effective_limit;
pub use recurrence::expand;
pub use store::{LeaveLedger, RoomState};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Notification, NotifyHub};
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

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
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
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
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// Keep the booking and template indexes in step with a committed event.
fn index_event(
    event: &Event,
    booking_to_room: &DashMap<Ulid, Ulid>,
    templates: &DashMap<Ulid, RecurrenceTemplate>,
) {
    match event {
        Event::RoomBooked { booking } => {
            booking_to_room.insert(booking.id, booking.room_id);
        }
        Event::RecurrenceCreated { template, bookings } => {
            templates.insert(template.id, template.clone());
            for b in bookings {
                booking_to_room.insert(b.id, b.room_id);
            }
        }
        Event::BookingDeleted { id, .. } => {
            booking_to_room.remove(id);
        }
        Event::TemplateDeleted { id } => {
            templates.remove(id);
        }
        _ => {}
    }
}

/// Room the event's bookings belong to, if it is a booking event.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomBooked { booking } => Some(booking.room_id),
        Event::RecurrenceCreated { template, .. } => Some(template.room_id),
        Event::BookingUpdated { room_id, .. } | Event::BookingDeleted { room_id, .. } => Some(*room_id),
        _ => None,
    }
}

/// One tenant's state: the leave ledger, the rooms and their bookings.
///
/// Every mutation holds `commit_gate` for reading from its first check until the
/// event is applied; compaction takes it for writing so the snapshot it writes
/// can never miss an event that is already on disk.
pub struct Engine {
    pub(super) ledger: RwLock<LeaveLedger>,
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    pub(super) templates: DashMap<Ulid, RecurrenceTemplate>,
    pub(super) periods: DashMap<PeriodId, Period>,
    pub(super) commit_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut ledger = LeaveLedger::new();
        let mut rooms: HashMap<Ulid, RoomState> = HashMap::new();
        let booking_to_room = DashMap::new();
        let templates = DashMap::new();
        let periods = DashMap::new();

        for event in &events {
            match event {
                Event::RoomCreated { room } => {
                    rooms.insert(room.id, RoomState::new(room.clone()));
                }
                Event::RoomDeleted { id } => {
                    rooms.remove(id);
                }
                Event::PeriodDefined { period } => {
                    periods.insert(period.id, period.clone());
                }
                other => match event_room_id(other) {
                    Some(room_id) => {
                        if let Some(rs) = rooms.get_mut(&room_id) {
                            rs.apply(other);
                        }
                        index_event(other, &booking_to_room, &templates);
                    }
                    None => {
                        ledger.apply(other);
                        index_event(other, &booking_to_room, &templates);
                    }
                },
            }
        }

        tracing::debug!(
            "replayed {} events from {}: {} rooms, {} leave requests",
            events.len(),
            wal_path.display(),
            rooms.len(),
            ledger.request_count()
        );

        Ok(Self {
            ledger: RwLock::new(ledger),
            rooms: rooms
                .into_iter()
                .map(|(id, rs)| (id, Arc::new(RwLock::new(rs))))
                .collect(),
            booking_to_room,
            templates,
            periods,
            commit_gate: RwLock::new(()),
            wal_tx,
            notify,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append then apply to the ledger.
    pub(super) async fn persist_ledger(&self, ledger: &mut LeaveLedger, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        ledger.apply(event);
        Ok(())
    }

    /// WAL-append then apply to one room and the booking indexes.
    pub(super) async fn persist_room(&self, rs: &mut RoomState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        rs.apply(event);
        index_event(event, &self.booking_to_room, &self.templates);
        Ok(())
    }

    /// Hand a notification to the dispatcher. Called only after the commit.
    pub(super) fn publish(&self, notification: Notification) {
        metrics::counter!(
            crate::observability::NOTIFICATIONS_PUBLISHED_TOTAL,
            "kind" => notification.payload.kind()
        )
        .increment(1);
        self.notify.send(notification);
    }
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}
