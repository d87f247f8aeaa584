//! RSSP suffix framing for UDP
//!
//! A logical message is `[payload][4-byte big-endian length][4-byte
//! mark]`. A datagram carries at most 1472 payload bytes; larger messages
//! are sent as consecutive datagrams and reassembled by accumulating
//! until a trailing `RBIN` or `RTXT` suffix appears. A reassembled
//! message whose length field disagrees with the payload is rejected.
//! The ACK variant echoes the message back and retransmits on length
//! mismatch; only the length is verified.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::protocol::{Frame, Mark, MARK_SIZE, MAX_DATA_SIZE, UDP_MSG_SIZE};

const SUFFIX_SIZE: usize = MARK_SIZE + 4;
const RECV_BUF_SIZE: usize = 65536;

/// Send one suffix-framed message on a connected socket, fragmenting into
/// MTU-sized datagrams.
pub async fn send_udp_frame(sock: &UdpSocket, deadline: Duration, mark: Mark, data: &[u8]) -> Result<()> {
    if data.len() > MAX_DATA_SIZE {
        return Err(Error::Framing(format!("payload too large: {}", data.len())));
    }

    let mut message = Vec::with_capacity(data.len() + SUFFIX_SIZE);
    message.extend_from_slice(data);
    message.extend_from_slice(&(data.len() as u32).to_be_bytes());
    message.extend_from_slice(mark.as_bytes());

    timeout(deadline, async {
        let mut rest = &message[..];
        while rest.len() > UDP_MSG_SIZE {
            sock.send(&rest[..UDP_MSG_SIZE]).await?;
            rest = &rest[UDP_MSG_SIZE..];
        }
        if !rest.is_empty() {
            sock.send(rest).await?;
        }
        Ok::<_, std::io::Error>(())
    })
    .await??;
    Ok(())
}

/// Receive one suffix-framed message, reassembling fragments until a
/// trailing `RBIN`/`RTXT` mark appears. Returns the frame and the sender.
pub async fn recv_udp_frame(sock: &UdpSocket, deadline: Duration) -> Result<(Frame, SocketAddr)> {
    timeout(deadline, async {
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        let mut acc: Vec<u8> = Vec::new();
        let mut from;

        loop {
            let (n, addr) = sock.recv_from(&mut buf).await?;
            from = addr;
            acc.extend_from_slice(&buf[..n]);

            if acc.len() > MAX_DATA_SIZE + SUFFIX_SIZE {
                return Err(Error::Framing(format!("message too large: {}", acc.len())));
            }
            if acc.len() > SUFFIX_SIZE {
                let tail = &acc[acc.len() - MARK_SIZE..];
                if tail == Mark::Rbin.as_bytes() || tail == Mark::Rtxt.as_bytes() {
                    break;
                }
            }
        }

        let total = acc.len();
        let mark = Mark::from_bytes(&acc[total - MARK_SIZE..])
            .ok_or_else(|| Error::Framing("bad suffix mark".into()))?;
        let len_bytes: [u8; 4] = acc[total - SUFFIX_SIZE..total - MARK_SIZE]
            .try_into()
            .map_err(|_| Error::Framing("short suffix".into()))?;
        let announced = u32::from_be_bytes(len_bytes) as usize;

        acc.truncate(total - SUFFIX_SIZE);
        if acc.len() != announced {
            return Err(Error::Framing(format!(
                "length mismatch: got {}, announced {announced}",
                acc.len()
            )));
        }
        Ok((Frame { mark, data: Bytes::from(acc) }, from))
    })
    .await?
}

/// Send with acknowledgement: the receiver echoes the message, and only
/// the echoed length is verified.
pub async fn send_udp_frame_ack(sock: &UdpSocket, deadline: Duration, mark: Mark, data: &[u8]) -> Result<()> {
    send_udp_frame(sock, deadline, mark, data).await?;
    let (echo, _) = recv_udp_frame(sock, deadline).await?;
    if echo.data.len() != data.len() {
        return Err(Error::Framing(format!(
            "ack length mismatch: sent {}, echoed {}",
            data.len(),
            echo.data.len()
        )));
    }
    Ok(())
}

/// Receive and echo back for the ACK variant.
pub async fn recv_udp_frame_ack(sock: &UdpSocket, deadline: Duration) -> Result<(Frame, SocketAddr)> {
    let (frame, from) = recv_udp_frame(sock, deadline).await?;
    send_udp_frame(sock, deadline, frame.mark, &frame.data).await?;
    Ok((frame, from))
}

/// Send with acknowledgement, retransmitting up to `retry` times.
pub async fn send_udp_frame_retry(
    sock: &UdpSocket,
    deadline: Duration,
    mark: Mark,
    data: &[u8],
    retry: usize,
) -> Result<()> {
    let mut last = Error::Framing("no send attempted".into());
    for _ in 0..retry.max(1) {
        match send_udp_frame_ack(sock, deadline, mark, data).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "udp ack retry");
                last = e;
            }
        }
    }
    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: Duration = Duration::from_secs(3);

    async fn socket_pair() -> (UdpSocket, UdpSocket) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a.connect(b.local_addr().unwrap()).await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_single_datagram_round_trip() {
        let (a, b) = socket_pair().await;
        send_udp_frame(&a, DEADLINE, Mark::Rtxt, b"video/jpeg").await.unwrap();
        let (frame, _) = recv_udp_frame(&b, DEADLINE).await.unwrap();
        assert_eq!(frame.mark, Mark::Rtxt);
        assert_eq!(&frame.data[..], b"video/jpeg");
    }

    #[tokio::test]
    async fn test_empty_payload_round_trip() {
        let (a, b) = socket_pair().await;
        send_udp_frame(&a, DEADLINE, Mark::Rbin, b"").await.unwrap();
        let (frame, _) = recv_udp_frame(&b, DEADLINE).await.unwrap();
        assert_eq!(frame.data.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fragmented_round_trip() {
        let (a, b) = socket_pair().await;
        // several datagrams worth of payload
        let data: Vec<u8> = (0..UDP_MSG_SIZE * 4 + 123).map(|i| (i % 251) as u8).collect();

        let sender = send_udp_frame(&a, DEADLINE, Mark::Rbin, &data);
        let receiver = recv_udp_frame(&b, DEADLINE);
        let (s, r) = tokio::join!(sender, receiver);
        s.unwrap();
        let (frame, _) = r.unwrap();
        assert_eq!(frame.data.len(), data.len());
        assert_eq!(&frame.data[..], &data[..]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_large_fragmented_round_trip() {
        let (a, b) = socket_pair().await;
        let data = vec![0x5au8; 64 * 1024];

        let sender = send_udp_frame(&a, DEADLINE, Mark::Rbin, &data);
        let receiver = recv_udp_frame(&b, DEADLINE);
        let (s, r) = tokio::join!(sender, receiver);
        s.unwrap();
        assert_eq!(r.unwrap().0.data.len(), data.len());
    }

    #[tokio::test]
    async fn test_length_mismatch_rejected() {
        let (a, b) = socket_pair().await;
        // hand-crafted message announcing 9 bytes but carrying 3
        let mut raw = Vec::new();
        raw.extend_from_slice(b"abc");
        raw.extend_from_slice(&9u32.to_be_bytes());
        raw.extend_from_slice(b"RBIN");
        a.send(&raw).await.unwrap();

        assert!(matches!(
            recv_udp_frame(&b, DEADLINE).await,
            Err(Error::Framing(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ack_round_trip() {
        let (a, b) = socket_pair().await;
        let sender = send_udp_frame_ack(&a, DEADLINE, Mark::Rbin, b"payload");
        let receiver = recv_udp_frame_ack(&b, DEADLINE);
        let (s, r) = tokio::join!(sender, receiver);
        s.unwrap();
        assert_eq!(&r.unwrap().0.data[..], b"payload");
    }

    #[tokio::test]
    async fn test_recv_deadline() {
        let (_a, b) = socket_pair().await;
        assert!(matches!(
            recv_udp_frame(&b, Duration::from_millis(50)).await,
            Err(Error::Timeout)
        ));
    }
}
