//! Outbound message types
//!
//! Defines the unit of delivery and the JSON schema the ingestion boundary
//! accepts. A message addresses either one client (`Direct`), every
//! connection of a logical user (`User`), or everyone (`Broadcast`).
//! `Group` is reserved in the wire schema but not routed.

use serde::Deserialize;

/// How a message is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// One specific client connection (`recipient` = client id)
    Direct,
    /// Every connection owned by a user (`recipient` = user id as text)
    User,
    /// Reserved, currently dropped with a diagnostic
    Group,
    /// Every registered connection (`recipient` ignored)
    Broadcast,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Direct => write!(f, "direct"),
            MessageType::User => write!(f, "user"),
            MessageType::Group => write!(f, "group"),
            MessageType::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// One unit of outbound data
///
/// Field names match the ingestion wire schema, so this deserializes
/// directly from the JSON the ingestion source pushes.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    /// Opaque identifier, used only for diagnostics
    pub message_id: String,

    /// SSE event name
    #[serde(default)]
    pub event: Option<String>,

    /// SSE payload
    #[serde(default)]
    pub data: Option<String>,

    /// Addressing mode
    pub message_type: MessageType,

    /// Client id for `Direct`, user id (as text) for `User`
    #[serde(default)]
    pub recipient: Option<String>,
}

impl Message {
    /// Create a message with all fields explicit
    pub fn new(
        message_id: impl Into<String>,
        event: Option<String>,
        data: Option<String>,
        message_type: MessageType,
        recipient: Option<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            event,
            data,
            message_type,
            recipient,
        }
    }

    /// Convenience constructor for a broadcast message
    pub fn broadcast(
        message_id: impl Into<String>,
        event: impl Into<String>,
        data: Option<String>,
    ) -> Self {
        Self::new(
            message_id,
            Some(event.into()),
            data,
            MessageType::Broadcast,
            None,
        )
    }

    /// Convenience constructor for a direct message
    pub fn direct(
        message_id: impl Into<String>,
        event: impl Into<String>,
        data: Option<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self::new(
            message_id,
            Some(event.into()),
            data,
            MessageType::Direct,
            Some(client_id.into()),
        )
    }

    /// Convenience constructor for a user-addressed message
    pub fn to_user(
        message_id: impl Into<String>,
        event: impl Into<String>,
        data: Option<String>,
        user_id: i64,
    ) -> Self {
        Self::new(
            message_id,
            Some(event.into()),
            data,
            MessageType::User,
            Some(user_id.to_string()),
        )
    }
}
