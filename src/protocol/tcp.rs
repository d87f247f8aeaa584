//! RSSP prefix framing for TCP
//!
//! Each message on the wire is `[4-byte FourCC mark][4-byte big-endian
//! length][payload]`. Receive is strict: a short read or an unknown mark
//! fails the connection. Payloads are capped at 1 MiB.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::protocol::{Frame, Mark, MARK_SIZE, MAX_DATA_SIZE};

/// Send one framed message within `deadline`. Returns the bytes written.
pub async fn write_tcp_frame<W>(w: &mut W, deadline: Duration, mark: Mark, data: &[u8]) -> Result<usize>
where
    W: AsyncWrite + Unpin + Send,
{
    if data.len() > MAX_DATA_SIZE {
        return Err(Error::Framing(format!("payload too large: {}", data.len())));
    }

    let mut message = Vec::with_capacity(MARK_SIZE + 4 + data.len());
    message.extend_from_slice(mark.as_bytes());
    message.extend_from_slice(&(data.len() as u32).to_be_bytes());
    message.extend_from_slice(data);

    timeout(deadline, async {
        w.write_all(&message).await?;
        w.flush().await?;
        Ok::<_, std::io::Error>(())
    })
    .await??;
    Ok(message.len())
}

/// Receive one framed message within `deadline`.
///
/// A clean close before the first mark byte surfaces as [`Error::Closed`];
/// anything torn mid-frame is a framing error.
pub async fn read_tcp_frame<R>(r: &mut R, deadline: Duration) -> Result<Frame>
where
    R: AsyncRead + Unpin + Send,
{
    timeout(deadline, async {
        let mut fourcc = [0u8; MARK_SIZE];
        match r.read_exact(&mut fourcc).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(Error::Closed),
            Err(e) => return Err(e.into()),
        }
        let mark = Mark::from_bytes(&fourcc)
            .ok_or_else(|| Error::Framing(format!("bad mark: {fourcc:02x?}")))?;

        let mut len_bytes = [0u8; 4];
        read_strict(r, &mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_DATA_SIZE {
            return Err(Error::Framing(format!("length too large: {len}")));
        }

        let mut data = vec![0u8; len];
        read_strict(r, &mut data).await?;
        Ok(Frame { mark, data: Bytes::from(data) })
    })
    .await?
}

async fn read_strict<R>(r: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    match r.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(Error::Framing("short read".into()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: Duration = Duration::from_secs(3);

    #[tokio::test]
    async fn test_round_trip_all_marks() {
        let (mut a, mut b) = tokio::io::duplex(MAX_DATA_SIZE * 2);
        for mark in [Mark::Rtxt, Mark::Rbin, Mark::Rctl, Mark::Rext] {
            write_tcp_frame(&mut a, DEADLINE, mark, b"payload").await.unwrap();
            let frame = read_tcp_frame(&mut b, DEADLINE).await.unwrap();
            assert_eq!(frame.mark, mark);
            assert_eq!(&frame.data[..], b"payload");
        }
    }

    #[tokio::test]
    async fn test_empty_and_single_byte_payloads() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_tcp_frame(&mut a, DEADLINE, Mark::Rbin, b"").await.unwrap();
        write_tcp_frame(&mut a, DEADLINE, Mark::Rbin, b"x").await.unwrap();

        let f0 = read_tcp_frame(&mut b, DEADLINE).await.unwrap();
        assert_eq!(f0.data.len(), 0);
        let f1 = read_tcp_frame(&mut b, DEADLINE).await.unwrap();
        assert_eq!(&f1.data[..], b"x");
    }

    #[tokio::test]
    async fn test_max_payload_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(MAX_DATA_SIZE + 64);
        let data = vec![0xabu8; MAX_DATA_SIZE];
        let writer = write_tcp_frame(&mut a, DEADLINE, Mark::Rbin, &data);
        let reader = read_tcp_frame(&mut b, DEADLINE);
        let (w, r) = tokio::join!(writer, reader);
        assert_eq!(w.unwrap(), MAX_DATA_SIZE + 8);
        assert_eq!(r.unwrap().data.len(), MAX_DATA_SIZE);
    }

    #[tokio::test]
    async fn test_oversize_payload_refused() {
        let (mut a, _b) = tokio::io::duplex(64);
        let data = vec![0u8; MAX_DATA_SIZE + 1];
        assert!(matches!(
            write_tcp_frame(&mut a, DEADLINE, Mark::Rbin, &data).await,
            Err(Error::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_mark_fails() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(b"XXXX\x00\x00\x00\x01y").await.unwrap();
        assert!(matches!(
            read_tcp_frame(&mut b, DEADLINE).await,
            Err(Error::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_short_read_fails() {
        let (mut a, mut b) = tokio::io::duplex(64);
        // announce 16 bytes, deliver 3, close
        a.write_all(b"RBIN\x00\x00\x00\x10abc").await.unwrap();
        drop(a);
        assert!(matches!(
            read_tcp_frame(&mut b, DEADLINE).await,
            Err(Error::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_clean_close_between_frames() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(matches!(read_tcp_frame(&mut b, DEADLINE).await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_oversize_announced_length_refused() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let too_big = ((MAX_DATA_SIZE + 1) as u32).to_be_bytes();
        a.write_all(b"RBIN").await.unwrap();
        a.write_all(&too_big).await.unwrap();
        assert!(matches!(
            read_tcp_frame(&mut b, DEADLINE).await,
            Err(Error::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_read_deadline() {
        let (_a, mut b) = tokio::io::duplex(64);
        let r = read_tcp_frame(&mut b, Duration::from_millis(50)).await;
        assert!(matches!(r, Err(Error::Timeout)));
    }
}
