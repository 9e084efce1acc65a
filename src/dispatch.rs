//! Post-commit notification delivery.
//!
//! The engine publishes to the tenant's [`NotifyHub`](crate::notify::NotifyHub)
//! after a write is durable; the dispatcher task renders each notification and
//! hands it to a [`NotificationSink`]. Delivery failures are retried, logged and
//! counted, and never reach the request that caused them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::directory::Directory;
use crate::model::*;
use crate::notify::{Notification, Payload};

/// A rendered notification ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub recipient: PersonId,
    pub email: Option<String>,
    pub subject: String,
    pub body: String,
    /// The structured payload as JSON, for transports that forward it verbatim.
    pub payload_json: String,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport unavailable: {0}")]
    Transport(String),
    #[error("recipient rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, message: &Message) -> Result<(), DeliveryError>;
}

/// Writes each message to the log. Used when no mail transport is configured.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, message: &Message) -> Result<(), DeliveryError> {
        info!(
            recipient = %message.recipient,
            email = message.email.as_deref().unwrap_or("-"),
            "{}",
            message.subject
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first.
    pub attempts: u32,
    /// Delay before the second try; doubles after each failure.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, failed_attempts: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(failed_attempts.saturating_sub(1)))
    }
}

pub fn render(notification: &Notification, directory: &dyn Directory) -> Message {
    let name = directory.display_name_or_unknown(&notification.recipient);
    let (subject, body) = match &notification.payload {
        Payload::LeaveRequested { request, .. } => (
            format!("[{}] New request ({})", request.category.label(), request.date),
            leave_body(&name, request),
        ),
        Payload::LeaveReviewed { request } => (
            format!(
                "[{}] Request {} ({})",
                request.category.label(),
                request.status.as_str(),
                request.date
            ),
            leave_body(&name, request),
        ),
        Payload::RoomBooked { booking, room_name } => (
            format!("[ROOM BOOKING] {room_name} on {}", booking.date),
            format!(
                "Occupant: {name}\nRoom: {room_name}\nDate: {}\nPeriods: {}\nDescription: {}",
                booking.date, booking.periods, booking.description
            ),
        ),
        Payload::RecurrenceCreated {
            template,
            room_name,
            child_count,
        } => (
            format!("[ROOM BOOKING] {room_name}, {child_count} dates"),
            format!(
                "Occupant: {name}\nRoom: {room_name}\nFrom: {}\nTo: {}\nRepeats: {}\nPeriods: {}\nDates booked: {child_count}",
                template.from,
                template.to,
                template.frequency.as_str(),
                template.periods
            ),
        ),
    };
    Message {
        recipient: notification.recipient.clone(),
        email: notification.email.clone(),
        subject,
        body,
        payload_json: serde_json::to_string(&notification.payload).unwrap_or_default(),
    }
}

fn leave_body(name: &str, request: &LeaveRequest) -> String {
    format!(
        "Employee: {name}\nDate: {}\nCategory: {}\nDescription: {}\nStatus: {}",
        request.date,
        request.category.label(),
        request.description,
        request.status.as_str()
    )
}

/// Deliver one message under `policy`. Returns the last error if every try failed.
pub async fn deliver_with_retry(
    sink: &dyn NotificationSink,
    message: &Message,
    policy: RetryPolicy,
) -> Result<(), DeliveryError> {
    let mut attempt = 1;
    loop {
        match sink.deliver(message).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= policy.attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.attempts,
                    "notification to {} failed, retrying in {delay:?}: {e}",
                    message.recipient
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Drain the hub until it closes. Spawned once per tenant.
pub async fn run_dispatcher(
    mut rx: broadcast::Receiver<Notification>,
    directory: Arc<dyn Directory>,
    sink: Arc<dyn NotificationSink>,
    policy: RetryPolicy,
) {
    loop {
        let notification = match rx.recv().await {
            Ok(n) => n,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("notification dispatcher lagged, {skipped} notifications dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let kind = notification.payload.kind();
        let message = render(&notification, directory.as_ref());
        let outcome = match deliver_with_retry(sink.as_ref(), &message, policy).await {
            Ok(()) => "delivered",
            Err(e) => {
                tracing::error!("notification {kind} to {} dropped: {e}", message.recipient);
                "failed"
            }
        };
        metrics::counter!(
            crate::observability::NOTIFICATIONS_DELIVERED_TOTAL,
            "kind" => kind,
            "outcome" => outcome
        )
        .increment(1);
    }
}
