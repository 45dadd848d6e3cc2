//! Delve relay server: tracks connected peers and fans their state updates
//! out to everyone else.
//!
//! - [`registry`]: the session table and best-effort broadcast.
//! - [`reaper`]: eviction of peers that went silent.
//! - [`relay`]: the connect / message / disconnect protocol on top of the
//!   registry.
//! - [`transport`]: the per-connection send queue backing a session.
//! - [`server`]: TCP accept loop and the single task that owns the registry.

pub mod reaper;
pub mod registry;
pub mod relay;
pub mod server;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use reaper::reap_stale;
pub use registry::{
    BroadcastReport, PeerSession, RegistryFull, SessionRegistry, Transport, TransportClosed,
};
pub use relay::Relay;
pub use server::{RelayHandle, RelayServer};
pub use transport::ChannelTransport;
