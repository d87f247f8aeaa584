//! Extended text messages
//!
//! A text frame whose first four bytes are `REXT` is an in-band control
//! message: `REXT` + 4-byte subhead + body. Unknown subheads are errors
//! but never drop the connection.

use crate::error::{Error, Result};

/// A parsed extended text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtMessage {
    /// `MIME`: set the track MIME to the body
    Mime(String),
    /// `CARD`: store the body as the sender's agent card
    Card(String),
    /// `XCMD`: reserved command
    Cmd(String),
    /// `XACK`: reserved acknowledgement
    Ack(String),
    /// `XERR`: reserved error report
    Err(String),
}

/// True when a text payload is an extended message.
pub fn is_ext_message(data: &[u8]) -> bool {
    data.len() >= 8 && &data[..4] == b"REXT"
}

impl ExtMessage {
    /// Parse an extended message payload (including the `REXT` lead-in).
    pub fn parse(data: &[u8]) -> Result<ExtMessage> {
        if data.len() < 12 {
            return Err(Error::Validation(format!("invalid ext msg length: {}", data.len())));
        }
        let body = String::from_utf8_lossy(&data[8..]).into_owned();
        match &data[4..8] {
            b"MIME" => Ok(ExtMessage::Mime(body)),
            b"CARD" => Ok(ExtMessage::Card(body)),
            b"XCMD" => Ok(ExtMessage::Cmd(body)),
            b"XACK" => Ok(ExtMessage::Ack(body)),
            b"XERR" => Ok(ExtMessage::Err(body)),
            head => Err(Error::Validation(format!(
                "unknown ext msg head: {}",
                String::from_utf8_lossy(head)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection() {
        assert!(is_ext_message(b"REXTMIMEvideo/jpeg"));
        assert!(is_ext_message(b"REXTCARD"));
        assert!(!is_ext_message(b"REXT")); // too short
        assert!(!is_ext_message(b"video/jpeg"));
    }

    #[test]
    fn test_parse_mime_and_card() {
        assert_eq!(
            ExtMessage::parse(b"REXTMIMEvideo/h264").unwrap(),
            ExtMessage::Mime("video/h264".into())
        );
        assert_eq!(
            ExtMessage::parse(b"REXTCARDrobot-arm").unwrap(),
            ExtMessage::Card("robot-arm".into())
        );
    }

    #[test]
    fn test_reserved_heads_parse() {
        assert!(matches!(ExtMessage::parse(b"REXTXCMDnoop").unwrap(), ExtMessage::Cmd(_)));
        assert!(matches!(ExtMessage::parse(b"REXTXACKokay").unwrap(), ExtMessage::Ack(_)));
        assert!(matches!(ExtMessage::parse(b"REXTXERRboom").unwrap(), ExtMessage::Err(_)));
    }

    #[test]
    fn test_unknown_head_is_error() {
        assert!(ExtMessage::parse(b"REXTWHATbody").is_err());
    }

    #[test]
    fn test_short_message_is_error() {
        assert!(ExtMessage::parse(b"REXTMIME").is_err());
    }
}
