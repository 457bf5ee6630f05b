//! The persistent message model and API request types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CourierError, Result};

/// Recipient phone numbers are plain digit strings.
pub const PHONE_MIN_DIGITS: usize = 10;
pub const PHONE_MAX_DIGITS: usize = 15;
/// Upper bound on message body length, in characters.
pub const MESSAGE_MAX_CHARS: usize = 4096;

/// A message scheduled for future delivery.
///
/// Serialized field names (`to`, `message`, `scheduledTime`, ...) are the
/// storage snapshot format and the API wire format, so they must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMessage {
    /// Unique id, generated at creation, never reused.
    pub id: String,
    /// Recipient phone number as submitted (digits).
    pub to: String,
    /// Message body.
    pub message: String,
    /// When the message is due to be sent.
    pub scheduled_time: DateTime<Utc>,
    /// Lifecycle status; transitions are one-directional.
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    /// Bumped on every status change.
    pub updated_at: DateTime<Utc>,
    /// Last delivery error, recorded when the status becomes `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ScheduledMessage {
    /// Create a new pending message due at `scheduled_time`.
    pub fn new(to: &str, message: &str, scheduled_time: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            to: to.to_string(),
            message: message.to_string(),
            scheduled_time,
            status: MessageStatus::Pending,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }
}

/// Message lifecycle status.
///
/// `pending` is the only initial state; the other three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl MessageStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::Pending)
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageStatus::Pending => write!(f, "pending"),
            MessageStatus::Sent => write!(f, "sent"),
            MessageStatus::Failed => write!(f, "failed"),
            MessageStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Request to schedule a message for future delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub to: String,
    pub message: String,
    pub scheduled_time: DateTime<Utc>,
}

impl ScheduleRequest {
    /// Validate recipient, body, and due time against `now`.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        validate_recipient(&self.to)?;
        validate_body(&self.message)?;
        if self.scheduled_time <= now {
            return Err(CourierError::InvalidInput(
                "scheduledTime must be in the future".into(),
            ));
        }
        Ok(())
    }
}

/// Request for an immediate send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub to: String,
    pub message: String,
}

/// A recipient is 10-15 ASCII digits.
pub fn validate_recipient(to: &str) -> Result<()> {
    let digits_only = to.chars().all(|c| c.is_ascii_digit());
    if !digits_only || to.len() < PHONE_MIN_DIGITS || to.len() > PHONE_MAX_DIGITS {
        return Err(CourierError::InvalidInput(format!(
            "to must be {PHONE_MIN_DIGITS}-{PHONE_MAX_DIGITS} digits"
        )));
    }
    Ok(())
}

/// A body is 1-4096 characters.
pub fn validate_body(message: &str) -> Result<()> {
    let length = message.chars().count();
    if length == 0 || length > MESSAGE_MAX_CHARS {
        return Err(CourierError::InvalidInput(format!(
            "message must be 1-{MESSAGE_MAX_CHARS} characters"
        )));
    }
    Ok(())
}
