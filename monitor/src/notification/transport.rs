//! Outbound message transport and inbound response events

use crate::error::TransportError;
use crate::types::{PersonId, UserId};

/// Receipt or reply reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Delivered,
    Read,
    Replied { body: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEvent {
    pub user_id: UserId,
    pub person_id: PersonId,
    pub kind: EventKind,
}

impl ResponseEvent {
    pub fn new(user_id: UserId, person_id: PersonId, kind: EventKind) -> Self {
        Self {
            user_id,
            person_id,
            kind,
        }
    }
}

/// SMS / email delivery plus the response inbox
///
/// Shared between the delivery and the response polling threads.
pub trait MessageTransport: Send + Sync {
    fn send_sms(&self, phone: &str, body: &str) -> Result<(), TransportError>;

    fn send_email(&self, address: &str, subject: &str, body: &str) -> Result<(), TransportError>;

    /// Events received since the previous call
    fn check_responses(&self) -> Result<Vec<ResponseEvent>, TransportError>;
}

/// Transport that only logs; every send succeeds and nobody ever answers
#[derive(Debug, Default)]
pub struct LoggingTransport;

impl MessageTransport for LoggingTransport {
    fn send_sms(&self, phone: &str, body: &str) -> Result<(), TransportError> {
        log::info!("SMS to {}: {}", phone, body);
        Ok(())
    }

    fn send_email(&self, address: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        log::info!("Email to {} [{}]: {}", address, subject, body);
        Ok(())
    }

    fn check_responses(&self) -> Result<Vec<ResponseEvent>, TransportError> {
        Ok(Vec::new())
    }
}
