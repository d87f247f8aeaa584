//! RSSP wire protocol
//!
//! RSSP frames every message with a FourCC mark and a big-endian length.
//! TCP uses prefix framing (`[mark][len][payload]`), UDP uses suffix
//! framing (`[payload][len][mark]`) with datagram fragmentation, and
//! WebSocket carries payloads in native frames where the frame type
//! (text/binary) stands in for the mark.

mod ext;
mod tcp;
mod udp;

pub use ext::{is_ext_message, ExtMessage};
pub use tcp::{read_tcp_frame, write_tcp_frame};
pub use udp::{recv_udp_frame, recv_udp_frame_ack, send_udp_frame, send_udp_frame_ack, send_udp_frame_retry};

use bytes::Bytes;

/// Size of a FourCC mark, used as prefix or suffix
pub const MARK_SIZE: usize = 4;

/// Maximum size of a text payload
pub const MAX_TEXT_SIZE: usize = 1024;

/// Maximum size of any payload
pub const MAX_DATA_SIZE: usize = 1024 * 1024;

/// Maximum payload bytes carried by one UDP datagram (Ethernet MTU 1500
/// minus IP/UDP headers)
pub const UDP_MSG_SIZE: usize = 1472;

/// FourCC frame mark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mark {
    /// Text payload: MIME labels, request lines
    Rtxt,
    /// Binary payload: opaque media/data frames
    #[default]
    Rbin,
    /// Control commands in text form
    Rctl,
    /// Extended control commands in text form
    Rext,
}

impl Mark {
    /// The mark's four wire bytes.
    pub fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            Mark::Rtxt => b"RTXT",
            Mark::Rbin => b"RBIN",
            Mark::Rctl => b"RCTL",
            Mark::Rext => b"REXT",
        }
    }

    /// Parse four wire bytes into a mark.
    pub fn from_bytes(b: &[u8]) -> Option<Mark> {
        match b {
            b"RTXT" => Some(Mark::Rtxt),
            b"RBIN" => Some(Mark::Rbin),
            b"RCTL" => Some(Mark::Rctl),
            b"REXT" => Some(Mark::Rext),
            _ => None,
        }
    }

    /// True for marks whose payload is text.
    pub fn is_text(self) -> bool {
        matches!(self, Mark::Rtxt | Mark::Rctl | Mark::Rext)
    }
}

impl std::fmt::Display for Mark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // as_bytes only yields ASCII
        f.write_str(std::str::from_utf8(self.as_bytes()).unwrap_or("????"))
    }
}

/// One framed message in transit between a socket and a ring.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame mark; on WebSocket, text frames map to `Rtxt` and binary to
    /// `Rbin`
    pub mark: Mark,
    /// Payload (zero-copy on fan-out)
    pub data: Bytes,
}

impl Frame {
    /// Create a text frame.
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self { mark: Mark::Rtxt, data: data.into() }
    }

    /// Create a binary frame.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self { mark: Mark::Rbin, data: data.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_round_trip() {
        for mark in [Mark::Rtxt, Mark::Rbin, Mark::Rctl, Mark::Rext] {
            assert_eq!(Mark::from_bytes(mark.as_bytes()), Some(mark));
        }
    }

    #[test]
    fn test_unknown_mark() {
        assert_eq!(Mark::from_bytes(b"XXXX"), None);
        assert_eq!(Mark::from_bytes(b"rtxt"), None);
    }

    #[test]
    fn test_text_marks() {
        assert!(Mark::Rtxt.is_text());
        assert!(Mark::Rext.is_text());
        assert!(!Mark::Rbin.is_text());
    }
}
