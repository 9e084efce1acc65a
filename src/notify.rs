use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::*;

const CHANNEL_CAPACITY: usize = 1024;

/// What happened, with enough context to render a message without another lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    LeaveRequested { request: LeaveRequest, obfuscate: bool },
    LeaveReviewed { request: LeaveRequest },
    RoomBooked { booking: RoomBooking, room_name: String },
    RecurrenceCreated { template: RecurrenceTemplate, room_name: String, child_count: usize },
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::LeaveRequested { .. } => "leave_requested",
            Payload::LeaveReviewed { .. } => "leave_reviewed",
            Payload::RoomBooked { .. } => "room_booked",
            Payload::RecurrenceCreated { .. } => "recurrence_created",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub recipient: PersonId,
    pub email: Option<String>,
    pub payload: Payload,
}

/// Post-commit fan-out. Sending never blocks and never fails the caller.
pub struct NotifyHub {
    sender: broadcast::Sender<Notification>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, notification: Notification) {
        let _ = self.sender.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn reviewed() -> Notification {
        Notification {
            recipient: "ana".into(),
            email: None,
            payload: Payload::LeaveReviewed {
                request: LeaveRequest {
                    id: Ulid::new(),
                    person: "ana".into(),
                    date: Day::from_ymd(2025, 1, 1).unwrap(),
                    category: Category::PERSONAL_DAYS,
                    description: String::new(),
                    status: Status::Accepted,
                    created_by: "ana".into(),
                    created_at: 0,
                    updated_by: "jefe".into(),
                    updated_at: 1,
                },
            },
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe();
        hub.send(reviewed());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.payload.kind(), "leave_reviewed");
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        NotifyHub::new().send(reviewed());
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let json = serde_json::to_value(reviewed()).unwrap();
        assert_eq!(json["payload"]["kind"], "leave_reviewed");
        assert_eq!(json["payload"]["request"]["date"], "2025-01-01");
    }
}
