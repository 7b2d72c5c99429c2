//! Full-duplex byte bridge (spec.md §4.2).
//!
//! Splices two byte streams in both directions until either direction sees
//! EOF or a transport error, then closes both sides. This generalizes
//! `original_source/src/stream.py`'s `bridge`/`_pipe` pair, but joins on
//! *both* directions completing (`ALL_COMPLETED`) rather than stopping
//! after the first one finishes — see spec.md §9's note that one observed
//! source revision used `FIRST_COMPLETED, timeout=0`, which is effectively
//! a single poll and not what this spec wants.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Splice `a` and `b` until either side closes; absorbs all errors.
///
/// A half-close on one side terminates the whole bridge (spec.md §4.2,
/// §9 "Bridge half-close"): once either copy direction returns, the other
/// stream is shut down too, so its in-flight copy unblocks and the bridge
/// returns.
pub async fn bridge<A, B>(a: A, b: B)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let a_to_b = async {
        let result = tokio::io::copy(&mut a_read, &mut b_write).await;
        let _ = b_write.shutdown().await;
        result
    };
    let b_to_a = async {
        let result = tokio::io::copy(&mut b_read, &mut a_write).await;
        let _ = a_write.shutdown().await;
        result
    };

    let (r1, r2) = tokio::join!(a_to_b, b_to_a);
    if let Err(e) = r1 {
        tracing::debug!("bridge: a->b ended: {e}");
    }
    if let Err(e) = r2 {
        tracing::debug!("bridge: b->a ended: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Two real TCP connections, bridged together: bytes written into one
    /// public-side socket must emerge, in order, from the other.
    #[tokio::test]
    async fn transparent_byte_relay_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_task = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            sock
        });
        let public_side = TcpStream::connect(addr).await.unwrap();
        let client_side = accept_task.await.unwrap();

        // A second pair stands in for the upstream/local-service leg.
        let listener2 = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr2 = listener2.local_addr().unwrap();
        let accept_task2 = tokio::spawn(async move {
            let (sock, _) = listener2.accept().await.unwrap();
            sock
        });
        let mut upstream_writer_side = TcpStream::connect(addr2).await.unwrap();
        let upstream_listener_side = accept_task2.await.unwrap();

        let bridge_task = tokio::spawn(bridge(client_side, upstream_listener_side));

        let payload = b"hello from the public internet";
        let mut public_side = public_side;
        public_side.write_all(payload).await.unwrap();
        public_side.shutdown().await.unwrap();

        let mut received = Vec::new();
        upstream_writer_side
            .read_to_end(&mut received)
            .await
            .unwrap();
        assert_eq!(received, payload);

        bridge_task.await.unwrap();
    }

    #[tokio::test]
    async fn half_close_terminates_the_whole_bridge() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_task = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let side_a = TcpStream::connect(addr).await.unwrap();
        let side_b = accept_task.await.unwrap();

        let listener2 = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr2 = listener2.local_addr().unwrap();
        let accept_task2 = tokio::spawn(async move { listener2.accept().await.unwrap().0 });
        let mut side_c = TcpStream::connect(addr2).await.unwrap();
        let side_d = accept_task2.await.unwrap();

        let bridge_task = tokio::spawn(bridge(side_b, side_d));

        // side_a closes immediately; the bridge must wind down entirely,
        // including shutting down side_c's peer, rather than hang forever.
        drop(side_a);

        let mut buf = Vec::new();
        side_c.read_to_end(&mut buf).await.unwrap();
        bridge_task.await.unwrap();
    }
}
