//! Length-prefixed JSON framing over an async byte stream (spec.md §4.1).
//!
//! Wire shape: a fixed 10-byte ASCII decimal length header, right-justified
//! with leading spaces, followed by that many bytes of UTF-8 JSON — the
//! exact format used by `original_source/src/stream.py`'s `read`/`write`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::{Message, MAX_FRAME};

const HEADER_LEN: usize = 10;

/// Read one [`Message`] from `stream`.
///
/// Returns `Ok(None)` on a clean EOF observed *before* any header bytes are
/// read — the normal "stream closed, no more frames" termination. Any other
/// failure (a short read inside the header or payload, an unparseable or
/// out-of-range header, or invalid JSON) is an [`Error`].
pub async fn read_frame<S>(stream: &mut S) -> Result<Option<Message>>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match read_exact_or_eof(stream, &mut header).await? {
        ReadOutcome::Eof => return Ok(None),
        ReadOutcome::Short => return Err(Error::ShortRead),
        ReadOutcome::Full => {}
    }

    let header_str = std::str::from_utf8(&header)
        .map_err(|_| Error::InvalidHeader(format!("{:?}", header)))?;
    let len: i64 = header_str
        .trim()
        .parse()
        .map_err(|_| Error::InvalidHeader(header_str.to_string()))?;
    if len < 0 {
        return Err(Error::InvalidHeader(header_str.to_string()));
    }
    let len = len as usize;
    if len > MAX_FRAME {
        return Err(Error::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ShortRead
        } else {
            Error::Io(e)
        }
    })?;

    let message: Message =
        serde_json::from_slice(&payload).map_err(|e| Error::Malformed(e.to_string()))?;
    Ok(Some(message))
}

/// Serialize `message` and write it as a single frame: header then payload.
pub async fn write_frame<S>(stream: &mut S, message: &Message) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message).expect("Message always serializes");
    let header = format!("{:>width$}", body.len(), width = HEADER_LEN);
    debug_assert_eq!(header.len(), HEADER_LEN);

    stream.write_all(header.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;
    Ok(())
}

enum ReadOutcome {
    Full,
    /// EOF with zero bytes read — a clean stream close between frames.
    Eof,
    /// EOF partway through — the peer closed mid-header.
    Short,
}

async fn read_exact_or_eof<S>(stream: &mut S, buf: &mut [u8]) -> Result<ReadOutcome>
where
    S: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Ok(if filled == 0 {
                ReadOutcome::Eof
            } else {
                ReadOutcome::Short
            });
        }
        filled += n;
    }
    Ok(ReadOutcome::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn round_trip(messages: &[Message]) -> Vec<Message> {
        let (mut client, mut server) = duplex(64 * 1024);
        for m in messages {
            write_frame(&mut client, m).await.unwrap();
        }
        drop(client);

        let mut out = Vec::new();
        while let Some(m) = read_frame(&mut server).await.unwrap() {
            out.push(m);
        }
        out
    }

    #[tokio::test]
    async fn frame_round_trip() {
        let messages = vec![
            Message::hello(Some("abc".into())),
            Message::open("r1".into()),
            Message::accept("r1".into()),
            Message::close(),
        ];
        let got = round_trip(&messages).await;
        assert_eq!(got, messages);
    }

    #[tokio::test]
    async fn frame_boundary_split_anywhere() {
        // Serialize two frames back-to-back into one buffer, then feed it
        // back in arbitrary byte-sized chunks through a duplex stream: the
        // reader must not care where the underlying reads happen to split.
        let messages = vec![Message::hello(None), Message::open("request-2".into())];
        let mut bytes = Vec::new();
        {
            let (mut w, mut r) = duplex(64 * 1024);
            for m in &messages {
                write_frame(&mut w, m).await.unwrap();
            }
            drop(w);
            r.read_to_end(&mut bytes).await.unwrap();
        }

        for chunk_size in [1usize, 3, 7, 64] {
            let (mut tx, mut rx) = duplex(64 * 1024);
            let bytes2 = bytes.clone();
            let writer = tokio::spawn(async move {
                for chunk in bytes2.chunks(chunk_size) {
                    tx.write_all(chunk).await.unwrap();
                }
            });

            let mut got = Vec::new();
            while let Some(m) = read_frame(&mut rx).await.unwrap() {
                got.push(m);
            }
            writer.await.unwrap();
            assert_eq!(got, messages, "chunk_size={chunk_size}");
        }
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut w, mut r) = duplex(64);
        let header = format!("{:>10}", MAX_FRAME + 1);
        let write_task = tokio::spawn(async move {
            let _ = w.write_all(header.as_bytes()).await;
        });
        let err = read_frame(&mut r).await.unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge(_)));
        write_task.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let (mut w, mut r) = duplex(64);
        let body = b"not json";
        let header = format!("{:>10}", body.len());
        let write_task = tokio::spawn(async move {
            w.write_all(header.as_bytes()).await.unwrap();
            w.write_all(body).await.unwrap();
        });
        let err = read_frame(&mut r).await.unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
        write_task.await.unwrap();
    }

    #[tokio::test]
    async fn clean_eof_before_header_ends_stream() {
        let (w, mut r) = duplex(64);
        drop(w);
        let result = read_frame(&mut r).await.unwrap();
        assert!(result.is_none());
    }
}
