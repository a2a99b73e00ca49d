//! SSE wire framing
//!
//! Renders a [`Message`] into the text frame written verbatim to a
//! transport. Frames are rendered once per message into `Bytes`, so the
//! fan-out path clones a reference count instead of the payload.
//!
//! Framing convention: every delivered frame carries an `event:` line.
//! A message with `data` but no `event` is malformed and never framed.

use bytes::Bytes;

use crate::message::Message;

/// Frame sent to a connection that is being replaced by a newer socket
/// for the same client id.
pub const CLOSE_FRAME: &[u8] = b"event: close\ndata: new socket for same client\n\n";

/// SSE comment line used as a liveness probe. Clients ignore comment
/// lines, so probing is invisible to well-behaved consumers.
pub const KEEPALIVE_FRAME: &[u8] = b": ping\n\n";

/// Why a message could not be framed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// `data` present without an `event` line
    MissingEvent,
    /// Neither `event` nor `data` present
    EmptyMessage,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::MissingEvent => write!(f, "message has data but no event"),
            FrameError::EmptyMessage => write!(f, "message has neither event nor data"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Render the SSE frame for a message
///
/// Returns the frame bytes, or the reason the message is malformed.
pub fn render(message: &Message) -> Result<Bytes, FrameError> {
    match (message.event.as_deref(), message.data.as_deref()) {
        (Some(event), Some(data)) => {
            let mut frame = String::with_capacity(event.len() + data.len() + 18);
            frame.push_str("event: ");
            frame.push_str(event);
            frame.push_str("\ndata: ");
            frame.push_str(data);
            frame.push_str("\n\n");
            Ok(Bytes::from(frame))
        }
        (Some(event), None) => {
            let mut frame = String::with_capacity(event.len() + 9);
            frame.push_str("event: ");
            frame.push_str(event);
            frame.push_str("\n\n");
            Ok(Bytes::from(frame))
        }
        (None, Some(_)) => Err(FrameError::MissingEvent),
        (None, None) => Err(FrameError::EmptyMessage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    fn msg(event: Option<&str>, data: Option<&str>) -> Message {
        Message::new(
            "m-test",
            event.map(str::to_owned),
            data.map(str::to_owned),
            MessageType::Broadcast,
            None,
        )
    }

    #[test]
    fn test_render_event_and_data() {
        let frame = render(&msg(Some("ping"), Some("hello"))).unwrap();
        assert_eq!(&frame[..], b"event: ping\ndata: hello\n\n");
    }

    #[test]
    fn test_render_event_only() {
        let frame = render(&msg(Some("ping"), None)).unwrap();
        assert_eq!(&frame[..], b"event: ping\n\n");
    }

    #[test]
    fn test_data_without_event_is_invalid() {
        assert_eq!(render(&msg(None, Some("x"))), Err(FrameError::MissingEvent));
    }

    #[test]
    fn test_empty_message_is_invalid() {
        assert_eq!(render(&msg(None, None)), Err(FrameError::EmptyMessage));
    }

    #[test]
    fn test_close_frame_wire_format() {
        assert_eq!(CLOSE_FRAME, b"event: close\ndata: new socket for same client\n\n");
    }
}
