//! TCP relay server.
//!
//! Task layout:
//!
//! - **Accept loop**: accepts sockets and spawns one connection task each.
//! - **Connection task**: waits for the `hello` handshake, asks the event
//!   loop to register the peer, spawns the peer's writer task, then reads
//!   frames and forwards decoded messages as [`ServerEvent`]s.
//! - **Event loop**: the only owner of the [`Relay`] (and therefore of the
//!   session registry). Connect, message, disconnect and heartbeat-sweep
//!   events are applied one at a time, each to completion.

use std::net::SocketAddr;
use std::time::Instant;

use delve_config::ServerConfig;
use delve_protocol::{FrameConfig, FrameError, Message, PeerId, decode, read_frame};
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::registry::SessionRegistry;
use crate::relay::Relay;
use crate::transport::{ChannelTransport, write_loop};

/// Depth of the queue between connection tasks and the event loop.
const EVENT_QUEUE_DEPTH: usize = 1024;

/// Events funnelled from connection tasks into the event loop.
enum ServerEvent {
    Connected {
        transport: ChannelTransport,
        character_tag: String,
        peer_addr: SocketAddr,
        reply: oneshot::Sender<Option<PeerId>>,
    },
    MessageFrom {
        id: PeerId,
        message: Message,
    },
    Disconnected {
        id: PeerId,
    },
}

/// Relay server: accepts peers and relays their state to each other.
pub struct RelayServer {
    config: ServerConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Bind to the configured address and serve until shut down.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        tracing::info!("Relay listening on {}", listener.local_addr()?);
        self.run_with_listener(listener).await
    }

    /// Serve on a pre-bound listener (useful for tests).
    pub async fn run_with_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let frame_config = FrameConfig {
            max_payload_size: self.config.max_frame_bytes,
        };
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let mut relay = Relay::new(
            SessionRegistry::new(self.config.max_peers),
            self.config.session_timeout(),
        );
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            tracing::debug!("Accepted socket from {peer_addr}");
                            tokio::spawn(serve_connection(
                                stream,
                                peer_addr,
                                events_tx.clone(),
                                frame_config.clone(),
                                self.config.clone(),
                            ));
                        }
                        Err(e) => tracing::warn!("Accept failed: {e}"),
                    }
                }
                Some(event) = events_rx.recv() => {
                    handle_event(&mut relay, event);
                }
                _ = heartbeat.tick() => {
                    relay.reap(Instant::now());
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Relay shutting down");
                        break;
                    }
                }
            }
        }

        relay.close_all();
        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Bind and run on a background task. Returns a handle and the bound
    /// address (port 0 lets the OS choose).
    pub async fn start(config: ServerConfig) -> std::io::Result<(RelayHandle, SocketAddr)> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        let addr = listener.local_addr()?;
        let server = RelayServer::new(config);
        let shutdown_tx = server.shutdown_tx.clone();
        let task = tokio::spawn(async move { server.run_with_listener(listener).await });
        Ok((RelayHandle { shutdown_tx, task }, addr))
    }
}

/// Handle to a relay started with [`RelayServer::start`].
pub struct RelayHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<std::io::Result<()>>,
}

impl RelayHandle {
    /// Stop the relay and wait for its event loop to exit.
    pub async fn stop(self) -> std::io::Result<()> {
        let _ = self.shutdown_tx.send(true);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(std::io::Error::other(e)),
        }
    }
}

fn handle_event(relay: &mut Relay<ChannelTransport>, event: ServerEvent) {
    match event {
        ServerEvent::Connected {
            transport,
            character_tag,
            peer_addr,
            reply,
        } => {
            let id = relay.on_connect(transport, character_tag, Instant::now());
            if id.is_none() {
                tracing::debug!("Closing refused socket {peer_addr}");
            }
            let _ = reply.send(id);
        }
        ServerEvent::MessageFrom { id, message } => {
            tracing::trace!("{id} sent {:?}", message.message_type());
            relay.on_message(id, message, Instant::now());
        }
        ServerEvent::Disconnected { id } => relay.on_disconnect(id),
    }
}

/// Per-socket task: handshake, registration, then the read loop.
async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    events: mpsc::Sender<ServerEvent>,
    frame_config: FrameConfig,
    config: ServerConfig,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("set_nodelay failed for {peer_addr}: {e}");
    }
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let handshake = tokio::time::timeout(
        config.handshake_timeout(),
        read_frame(&mut reader, &frame_config),
    )
    .await;
    let character_tag = match handshake {
        Ok(Ok(bytes)) => match decode(&bytes) {
            Ok(Message::Hello(hello)) => hello.character_tag,
            Ok(other) => {
                tracing::debug!(
                    "{peer_addr} opened with {:?} instead of hello",
                    other.message_type()
                );
                return;
            }
            Err(e) => {
                tracing::debug!("{peer_addr} sent a bad hello: {e}");
                return;
            }
        },
        Ok(Err(e)) => {
            tracing::debug!("{peer_addr} closed during handshake: {e}");
            return;
        }
        Err(_) => {
            tracing::debug!("{peer_addr} handshake timed out");
            return;
        }
    };

    let (transport, outbound_rx, stop_rx) = ChannelTransport::new(config.outbound_queue_depth);
    tokio::spawn(write_loop(
        write_half,
        outbound_rx,
        stop_rx.clone(),
        frame_config.clone(),
    ));

    let (reply_tx, reply_rx) = oneshot::channel();
    let connected = ServerEvent::Connected {
        transport,
        character_tag,
        peer_addr,
        reply: reply_tx,
    };
    if events.send(connected).await.is_err() {
        return;
    }
    let Ok(Some(id)) = reply_rx.await else {
        return;
    };

    read_loop(id, reader, &events, &frame_config, stop_rx).await;
    let _ = events.send(ServerEvent::Disconnected { id }).await;
}

/// Forward decoded messages until the socket closes or the session's
/// transport is closed from the relay side.
async fn read_loop(
    id: PeerId,
    mut reader: BufReader<OwnedReadHalf>,
    events: &mpsc::Sender<ServerEvent>,
    frame_config: &FrameConfig,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = read_frame(&mut reader, frame_config) => {
                match frame {
                    Ok(bytes) => match decode(&bytes) {
                        Ok(message) => {
                            if events.send(ServerEvent::MessageFrom { id, message }).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Dropping frame from {id}: {e}"),
                    },
                    Err(FrameError::ConnectionClosed) => {
                        tracing::info!("{id} closed its connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Dropping connection to {id}: {e}");
                        break;
                    }
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}
