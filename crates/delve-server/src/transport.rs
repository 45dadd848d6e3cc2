//! Socket-backed [`Transport`]: a bounded per-peer outbound queue drained by
//! a writer task, plus a stop signal shared by the peer's reader and writer.

use std::sync::Arc;

use delve_protocol::{FrameConfig, write_frame};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::registry::{Transport, TransportClosed};

/// Handle the registry stores for each live connection.
///
/// Sending only enqueues, so a slow peer never stalls a broadcast. A peer
/// whose queue fills up is not reading; it is closed and further sends fail.
/// Dropping the handle ends the writer task once the queue drains.
pub struct ChannelTransport {
    outbound: mpsc::Sender<Arc<str>>,
    stop: watch::Sender<bool>,
}

impl ChannelTransport {
    /// Create a transport holding at most `queue_depth` unsent frames, and
    /// the receiving ends for its writer and reader tasks.
    pub fn new(queue_depth: usize) -> (Self, mpsc::Receiver<Arc<str>>, watch::Receiver<bool>) {
        let (outbound, outbound_rx) = mpsc::channel(queue_depth.max(1));
        let (stop, stop_rx) = watch::channel(false);
        (Self { outbound, stop }, outbound_rx, stop_rx)
    }

    fn is_stopping(&self) -> bool {
        *self.stop.borrow()
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: Arc<str>) -> Result<(), TransportClosed> {
        if self.is_stopping() {
            return Err(TransportClosed);
        }
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    "Outbound queue full ({} frames), dropping slow peer",
                    self.outbound.max_capacity()
                );
                self.close();
                Err(TransportClosed)
            }
            Err(TrySendError::Closed(_)) => Err(TransportClosed),
        }
    }

    fn close(&self) {
        self.stop.send_replace(true);
    }
}

/// Drain a peer's outbound queue onto its socket until the queue closes, the
/// stop signal fires, or a write fails; then shut the write half down.
pub async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut outbound: mpsc::Receiver<Arc<str>>,
    mut stop_rx: watch::Receiver<bool>,
    config: FrameConfig,
) {
    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write_frame(&mut writer, frame.as_bytes(), &config).await {
                    tracing::debug!("Write failed, dropping connection: {e}");
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader, duplex};

    #[tokio::test]
    async fn test_send_enqueues_frames_in_order() {
        let (transport, mut rx, _stop) = ChannelTransport::new(8);
        transport.send(Arc::from("one")).unwrap();
        transport.send(Arc::from("two")).unwrap();

        for expected in ["one", "two"] {
            assert_eq!(rx.recv().await.as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_send_after_writer_gone_fails() {
        let (transport, rx, _stop) = ChannelTransport::new(8);
        drop(rx);
        assert_eq!(transport.send(Arc::from("x")), Err(TransportClosed));
    }

    #[tokio::test]
    async fn test_close_signals_reader_and_writer() {
        let (transport, _rx, mut stop) = ChannelTransport::new(8);
        transport.close();
        stop.changed().await.unwrap();
        assert!(*stop.borrow());
        assert_eq!(transport.send(Arc::from("late")), Err(TransportClosed));
    }

    #[tokio::test]
    async fn test_peer_that_never_reads_is_cut_off() {
        let (transport, rx, stop) = ChannelTransport::new(4);
        for i in 0..4 {
            transport.send(Arc::from(format!("frame {i}"))).unwrap();
        }

        assert_eq!(transport.send(Arc::from("overflow")), Err(TransportClosed));
        assert!(*stop.borrow(), "slow peer must be closed");
        assert_eq!(rx.len(), 4, "queue never grows past its depth");

        // Every later broadcast fails fast instead of buffering.
        for _ in 0..1000 {
            assert_eq!(transport.send(Arc::from("more")), Err(TransportClosed));
        }
        assert_eq!(rx.len(), 4);
    }

    #[tokio::test]
    async fn test_write_loop_writes_frames_then_stops() {
        let (transport, rx, stop) = ChannelTransport::new(8);
        let (client, server) = duplex(1024);
        let writer = tokio::spawn(write_loop(server, rx, stop, FrameConfig::default()));

        transport.send(Arc::from("hello")).unwrap();
        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("hello"));

        transport.close();
        writer.await.unwrap();
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
