//! Message types for queue operations including core domain identifiers.

use crate::error::{SerializationError, ValidationError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Reserved Headers
// ============================================================================

/// Header names the transport reads or writes on outgoing messages.
pub mod headers {
    /// Logical message identifier, used to name messages in errors and logs.
    pub const MESSAGE_ID: &str = "x-message-id";

    /// Time-to-live of the message, TimeSpan style: `[d.]hh:mm:ss[.fffffff]`.
    pub const TIME_TO_BE_RECEIVED: &str = "x-time-to-be-received";

    /// Absolute RFC 3339 timestamp before which the message must not be delivered.
    pub const DEFERRED_UNTIL: &str = "x-deferred-until";
}

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Queue name, case-folded to lowercase and (optionally) validated.
///
/// Valid names are 3-63 characters of `[a-z0-9-]`, start and end with a
/// letter or digit, and never contain two consecutive hyphens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into().to_lowercase();

        if name.len() < 3 || name.len() > 63 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                value: name,
                message: "must be 3-63 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                value: name,
                message: "only ASCII letters, digits and hyphens allowed".to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                value: name,
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Create queue name without validation (still case-folded)
    pub fn unchecked(name: impl Into<String>) -> Self {
        Self(name.into().to_lowercase())
    }

    /// Create queue name, validating only when requested
    pub fn parse(name: &str, validate: bool) -> Result<Self, ValidationError> {
        if validate {
            Self::new(name)
        } else if name.is_empty() {
            Err(ValidationError::Required {
                field: "queue_name".to_string(),
            })
        } else {
            Ok(Self::unchecked(name))
        }
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier assigned to a message by the queue service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque lease token issued by the queue service.
///
/// A new pop receipt is issued on every dequeue and every visibility update;
/// deleting or updating a message requires the most recent one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PopReceipt(String);

impl PopReceipt {
    /// Wrap a pop receipt returned by the service
    pub fn new(receipt: impl Into<String>) -> Self {
        Self(receipt.into())
    }

    /// Generate a fresh random pop receipt
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get receipt as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PopReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message as held by the queue service, fetched under a visibility lease
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message_id: MessageId,
    pub pop_receipt: PopReceipt,
    /// Encoded payload text
    pub text: String,
    pub dequeue_count: u32,
    pub inserted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// End of the current lease
    pub next_visible_at: DateTime<Utc>,
}

/// Logical message exchanged with the message-bus runtime: headers and body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessage {
    pub headers: HashMap<String, String>,
    #[serde(with = "bytes_serde")]
    pub body: Bytes,
}

/// Serialization for Bytes as base64 text
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl TransportMessage {
    /// Create new message with headers and body
    pub fn new(headers: HashMap<String, String>, body: impl Into<Bytes>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Logical message ID from the headers, if present
    pub fn message_id(&self) -> Option<&str> {
        self.headers.get(headers::MESSAGE_ID).map(String::as_str)
    }

    /// Logical message ID or a placeholder for diagnostics
    pub fn message_id_or_unknown(&self) -> String {
        self.message_id().unwrap_or("<unknown>").to_string()
    }
}

// ============================================================================
// Header Value Parsing
// ============================================================================

/// Parse a TimeSpan style duration: `[d.]hh:mm[:ss[.fffffff]]`.
pub fn parse_time_span(key: &str, value: &str) -> Result<Duration, SerializationError> {
    let invalid = |message: &str| SerializationError::InvalidHeader {
        key: key.to_string(),
        value: value.to_string(),
        message: message.to_string(),
    };

    let trimmed = value.trim();
    let first_colon = trimmed
        .find(':')
        .ok_or_else(|| invalid("expected hh:mm:ss"))?;

    let (days, clock) = match trimmed[..first_colon].find('.') {
        Some(dot) => (&trimmed[..dot], &trimmed[dot + 1..]),
        None => ("0", trimmed),
    };

    let days: u64 = days.parse().map_err(|_| invalid("invalid day count"))?;

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(invalid("expected hh:mm:ss"));
    }

    let hours: u64 = parts[0].parse().map_err(|_| invalid("invalid hours"))?;
    let minutes: u64 = parts[1].parse().map_err(|_| invalid("invalid minutes"))?;
    let (seconds, nanos) = match parts.get(2) {
        Some(seconds) => parse_seconds(seconds).ok_or_else(|| invalid("invalid seconds"))?,
        None => (0, 0),
    };

    if minutes >= 60 || seconds >= 60 || (days > 0 && hours >= 24) {
        return Err(invalid("component out of range"));
    }

    let total_seconds = days
        .checked_mul(86_400)
        .zip(hours.checked_mul(3_600))
        .and_then(|(days, hours)| days.checked_add(hours))
        .and_then(|total| total.checked_add(minutes * 60 + seconds))
        .ok_or_else(|| invalid("duration out of range"))?;
    Ok(Duration::new(total_seconds, nanos))
}

fn parse_seconds(value: &str) -> Option<(u64, u32)> {
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (value, ""),
    };

    let whole = whole.parse().ok()?;
    if fraction.is_empty() {
        return Some((whole, 0));
    }

    if fraction.len() > 9 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let nanos = format!("{:0<9}", fraction).parse().ok()?;
    Some((whole, nanos))
}

/// Format a duration as a TimeSpan style string
pub fn format_time_span(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let mut formatted = if days > 0 {
        format!("{}.{:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    };

    let ticks = duration.subsec_nanos() / 100;
    if ticks > 0 {
        formatted.push_str(&format!(".{:07}", ticks));
    }

    formatted
}

/// Parse an RFC 3339 timestamp header value
pub fn parse_timestamp(key: &str, value: &str) -> Result<DateTime<Utc>, SerializationError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SerializationError::InvalidHeader {
            key: key.to_string(),
            value: value.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
