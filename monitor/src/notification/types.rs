//! Notification message model and status transitions

use crate::types::{PersonId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Delivery state of a notification
///
/// ```text
/// PENDING -> SENT -> DELIVERED -> READ -> RESPONDED
///    |        |
///    +--------+--> FAILED
/// ```
///
/// Receipts may skip ahead (a reply to a SENT message goes straight to
/// RESPONDED) but never move backwards. RESPONDED and FAILED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Responded,
    Failed,
}

impl NotificationStatus {
    pub fn can_transition_to(self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;
        matches!(
            (self, next),
            (Pending, Sent)
                | (Pending, Failed)
                | (Sent, Delivered)
                | (Sent, Read)
                | (Sent, Responded)
                | (Sent, Failed)
                | (Delivered, Read)
                | (Delivered, Responded)
                | (Read, Responded)
        )
    }

    /// Move to `next` when the transition is allowed; otherwise stay put
    pub fn advance(&mut self, next: NotificationStatus) -> bool {
        if self.can_transition_to(next) {
            *self = next;
            true
        } else {
            false
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NotificationStatus::Responded | NotificationStatus::Failed)
    }

    /// Still waiting on receipts or a reply
    pub fn awaits_response(self) -> bool {
        matches!(
            self,
            NotificationStatus::Sent | NotificationStatus::Delivered | NotificationStatus::Read
        )
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationStatus::Pending => "PENDING",
            NotificationStatus::Sent => "SENT",
            NotificationStatus::Delivered => "DELIVERED",
            NotificationStatus::Read => "READ",
            NotificationStatus::Responded => "RESPONDED",
            NotificationStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Urgency {
    Normal,
    /// Medical staff
    High,
}

/// Who a message is addressed to, relative to the recipient user's record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactTarget {
    /// Index into the user's emergency contacts
    EmergencyContact(usize),
    FamilyDoctor,
}

/// One alert message to one contact
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    /// Alert this message belongs to; all messages of one fall alert share it
    pub alert_seq: u64,
    pub recipient_user_id: UserId,
    pub person_id: PersonId,
    pub target: ContactTarget,
    pub urgency: Urgency,
    pub body: String,
    pub created_at: SystemTime,
    pub status: NotificationStatus,
    pub response_body: Option<String>,
    pub responded_at: Option<SystemTime>,
}

impl NotificationMessage {
    pub fn new(
        alert_seq: u64,
        recipient_user_id: UserId,
        person_id: PersonId,
        target: ContactTarget,
        urgency: Urgency,
        body: String,
    ) -> Self {
        Self {
            alert_seq,
            recipient_user_id,
            person_id,
            target,
            urgency,
            body,
            created_at: SystemTime::now(),
            status: NotificationStatus::Pending,
            response_body: None,
            responded_at: None,
        }
    }

    pub fn key(&self) -> (UserId, PersonId) {
        (self.recipient_user_id, self.person_id)
    }
}
