//! Inbound wire format: one `<action> <event_id> <remainder>` line per
//! connection.

use crate::error::RelayError;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

/// Keyword for an alarm notification.
pub const ALARM_KEYWORD: &str = "shake_alarm";
/// Keyword for a cancellation notification.
pub const CANCEL_KEYWORD: &str = "shake_cancel";

/// Requested action of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// `shake_alarm`
    Alarm,
    /// `shake_cancel`
    Cancel,
    /// Any other keyword, kept verbatim for logging.
    Unknown(String),
}

impl Action {
    fn parse(keyword: &str) -> Self {
        match keyword {
            ALARM_KEYWORD => Self::Alarm,
            CANCEL_KEYWORD => Self::Cancel,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Label used for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Alarm => "alarm",
            Self::Cancel => "cancel",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alarm => f.write_str(ALARM_KEYWORD),
            Self::Cancel => f.write_str(CANCEL_KEYWORD),
            Self::Unknown(keyword) => f.write_str(keyword),
        }
    }
}

/// A decoded inbound notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// What the sender asks for.
    pub action: Action,
    /// Event identifier as known to the event catalog.
    pub event_id: String,
    /// Unparsed trailing text.
    pub payload: String,
}

impl InboundMessage {
    /// Decode raw bytes into a message.
    ///
    /// Fields are separated by runs of whitespace and the split stops after
    /// the second separator, so the payload keeps its inner whitespace.
    ///
    /// # Errors
    ///
    /// [`RelayError::Malformed`] for invalid UTF-8 or fewer than three fields.
    pub fn decode(bytes: &[u8]) -> Result<Self, RelayError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| RelayError::Malformed(format!("invalid utf-8: {e}")))?;

        let (action, rest) = split_field(text)
            .ok_or_else(|| RelayError::Malformed("empty message".to_string()))?;
        let (event_id, rest) = split_field(rest)
            .ok_or_else(|| RelayError::Malformed(format!("{action}: missing event id")))?;
        let payload = rest.trim();
        if payload.is_empty() {
            return Err(RelayError::Malformed(format!(
                "{action} {event_id}: missing payload"
            )));
        }

        Ok(Self {
            action: Action::parse(action),
            event_id: event_id.to_string(),
            payload: payload.to_string(),
        })
    }
}

/// Split off the first whitespace-delimited field.
fn split_field(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    match text.find(char::is_whitespace) {
        Some(end) => Some((&text[..end], &text[end..])),
        None => Some((text, "")),
    }
}

/// Read one message from `stream`.
///
/// A single read of at most `max_bytes` is performed; senders write the
/// whole line at once.
///
/// # Errors
///
/// [`RelayError::ReadTimeout`] if nothing arrives within `wait`,
/// [`RelayError::Io`] on socket errors, and [`RelayError::Malformed`] if the
/// peer closed without sending or the bytes do not decode.
pub async fn read_message<R>(
    stream: &mut R,
    max_bytes: usize,
    wait: Duration,
) -> Result<InboundMessage, RelayError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; max_bytes];
    let n = timeout(wait, stream.read(&mut buf))
        .await
        .map_err(|_| RelayError::ReadTimeout)??;
    if n == 0 {
        return Err(RelayError::Malformed("connection closed before message".to_string()));
    }
    InboundMessage::decode(&buf[..n])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_alarm() {
        let msg = InboundMessage::decode(b"shake_alarm 12345 ignored\n").unwrap();
        assert_eq!(msg.action, Action::Alarm);
        assert_eq!(msg.event_id, "12345");
        assert_eq!(msg.payload, "ignored");
    }

    #[test]
    fn decodes_cancel() {
        let msg = InboundMessage::decode(b"shake_cancel 777 x").unwrap();
        assert_eq!(msg.action, Action::Cancel);
        assert_eq!(msg.event_id, "777");
    }

    #[test]
    fn payload_keeps_inner_whitespace() {
        let msg = InboundMessage::decode(b"  shake_alarm \t 42   a  b\tc \r\n").unwrap();
        assert_eq!(msg.event_id, "42");
        assert_eq!(msg.payload, "a  b\tc");
    }

    #[test]
    fn unknown_action_is_preserved() {
        let msg = InboundMessage::decode(b"bogus 99 x").unwrap();
        assert_eq!(msg.action, Action::Unknown("bogus".to_string()));
        assert_eq!(msg.action.to_string(), "bogus");
        assert_eq!(msg.action.label(), "unknown");
    }

    #[test]
    fn too_few_fields_is_malformed() {
        let inputs: [&[u8]; 5] = [
            b"",
            b"   ",
            b"shake_alarm",
            b"shake_alarm 12345",
            b"shake_alarm 12345  \n",
        ];
        for input in inputs {
            let err = InboundMessage::decode(input).unwrap_err();
            assert!(matches!(err, RelayError::Malformed(_)), "{input:?}");
        }
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let err = InboundMessage::decode(b"shake_alarm \xff\xfe x").unwrap_err();
        assert!(matches!(err, RelayError::Malformed(_)));
    }

    #[tokio::test]
    async fn read_message_decodes_from_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, b"shake_cancel 5 now")
            .await
            .unwrap();
        let msg = read_message(&mut server, 1024, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(msg.action, Action::Cancel);
        assert_eq!(msg.event_id, "5");
    }

    #[tokio::test]
    async fn read_message_times_out() {
        let (_client, mut server) = tokio::io::duplex(64);
        let err = read_message(&mut server, 1024, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ReadTimeout));
    }

    #[tokio::test]
    async fn read_message_is_bounded() {
        let (mut client, mut server) = tokio::io::duplex(256);
        tokio::io::AsyncWriteExt::write_all(&mut client, b"shake_alarm 123456789 tail")
            .await
            .unwrap();
        // Only the first 16 bytes are read: "shake_alarm 1234" has no payload.
        let err = read_message(&mut server, 16, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Malformed(_)));
    }

    #[tokio::test]
    async fn read_message_rejects_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let err = read_message(&mut server, 1024, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Malformed(_)));
    }
}
