//! Socket plumbing behind the network manager.
//!
//! [`open_link`] dials the relay, sends the `hello` handshake and spawns a
//! reader and a writer task. The game thread talks to those tasks only
//! through channels: outbound frames go in through [`Link::send`], decoded
//! inbound messages come out of [`Link::try_recv`].

use std::time::Duration;

use delve_protocol::{
    FrameConfig, FrameError, Hello, Message, ProtocolError, decode, encode, read_frame,
    write_frame,
};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

/// Output of the reader task.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Message(Message),
    /// The connection ended. Nothing follows this event.
    Closed,
}

/// Unanswered keepalives before the relay is declared dead.
const KEEPALIVE_RETRIES: u32 = 5;

/// Socket settings for one link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub frame: FrameConfig,
    /// Give up on a dial that has not completed by then.
    pub connect_timeout: Duration,
    /// Drop the connection once the relay has acknowledged nothing, neither
    /// data nor keepalives, for this long.
    pub dead_link_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            connect_timeout: Duration::from_secs(5),
            dead_link_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("could not reach relay: {0}")]
    Io(#[from] std::io::Error),
    #[error("relay did not answer within {0:?}")]
    Timeout(Duration),
    #[error("handshake failed: {0}")]
    Handshake(#[from] FrameError),
    #[error("could not encode hello: {0}")]
    Encode(#[from] ProtocolError),
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Encode(#[from] ProtocolError),
    #[error("link closed")]
    Closed,
}

/// An open connection to the relay.
///
/// Dropping the link stops both background tasks and closes the socket.
pub struct Link {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<LinkEvent>,
    shutdown_tx: watch::Sender<bool>,
}

impl Link {
    /// Queue `msg` for the writer task. Never blocks.
    pub fn send(&self, msg: &Message) -> Result<(), SendError> {
        let line = encode(msg)?;
        self.outbound.send(line).map_err(|_| SendError::Closed)
    }

    /// Next inbound event, if one has arrived.
    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        match self.inbound.try_recv() {
            Ok(event) => Some(event),
            Err(mpsc::error::TryRecvError::Empty) => None,
            // Both tasks are gone without reporting; treat as a close.
            Err(mpsc::error::TryRecvError::Disconnected) => Some(LinkEvent::Closed),
        }
    }

    /// Wait for the next inbound event.
    pub async fn recv(&mut self) -> LinkEvent {
        self.inbound.recv().await.unwrap_or(LinkEvent::Closed)
    }

    /// Stop the background tasks. The writer shuts the socket down.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect to `endpoint` (`host:port`) and announce ourselves with `hello`.
///
/// Resolves once the hello is on the wire; the relay's `init` arrives later
/// as the first [`LinkEvent::Message`]. A relay that vanishes without closing
/// the socket is detected by TCP keepalive and surfaces as
/// [`LinkEvent::Closed`].
pub async fn open_link(
    endpoint: &str,
    hello: Hello,
    config: LinkConfig,
) -> Result<Link, ConnectError> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(endpoint))
        .await
        .map_err(|_| ConnectError::Timeout(config.connect_timeout))??;
    stream.set_nodelay(true)?;
    watch_for_dead_peer(&stream, config.dead_link_timeout)?;
    let (read_half, mut write_half) = stream.into_split();

    let line = encode(&Message::Hello(hello))?;
    write_frame(&mut write_half, line.as_bytes(), &config.frame).await?;
    tracing::info!("Connected to relay at {endpoint}");

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(read_loop(
        BufReader::new(read_half),
        inbound_tx.clone(),
        config.frame.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(write_loop(
        write_half,
        outbound_rx,
        inbound_tx,
        config.frame,
        shutdown_rx,
    ));

    Ok(Link {
        outbound: outbound_tx,
        inbound: inbound_rx,
        shutdown_tx,
    })
}

/// Let the kernel notice a relay that stopped answering. Keepalive covers an
/// idle socket; the user timeout covers unacknowledged writes.
fn watch_for_dead_peer(stream: &TcpStream, timeout: Duration) -> std::io::Result<()> {
    let idle = timeout / 3;
    let keepalive = TcpKeepalive::new()
        .with_time(idle)
        .with_interval((timeout - idle) / KEEPALIVE_RETRIES);

    #[cfg(any(target_os = "linux", target_os = "windows"))]
    let keepalive = keepalive.with_retries(KEEPALIVE_RETRIES);

    let sock_ref = SockRef::from(stream);
    sock_ref.set_tcp_keepalive(&keepalive)?;

    #[cfg(target_os = "linux")]
    sock_ref.set_tcp_user_timeout(Some(timeout))?;

    Ok(())
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    inbound: mpsc::UnboundedSender<LinkEvent>,
    frame_config: FrameConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = read_frame(&mut reader, &frame_config) => {
                match frame {
                    Ok(bytes) => match decode(&bytes) {
                        Ok(message) => {
                            if inbound.send(LinkEvent::Message(message)).is_err() {
                                return;
                            }
                        }
                        Err(e) => tracing::warn!("Dropping frame from relay: {e}"),
                    },
                    Err(FrameError::ConnectionClosed) => {
                        tracing::info!("Relay closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Relay connection failed: {e}");
                        break;
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
    let _ = inbound.send(LinkEvent::Closed);
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<LinkEvent>,
    frame_config: FrameConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            line = outbound.recv() => {
                let Some(line) = line else { break };
                if let Err(e) = write_frame(&mut writer, line.as_bytes(), &frame_config).await {
                    tracing::warn!("Send to relay failed: {e}");
                    let _ = inbound.send(LinkEvent::Closed);
                    break;
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}
