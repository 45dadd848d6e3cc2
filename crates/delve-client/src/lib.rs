//! Game-side half of the relay protocol.
//!
//! A [`NetworkManager`] keeps one connection to the relay, mirrors the
//! roster as [`RemotePeerProxy`] values and smooths their movement with a
//! [`PositionInterpolator`]. Everything is driven by calling
//! [`NetworkManager::update`] once per frame.

pub mod connection;
pub mod interpolation;
pub mod network_manager;
pub mod peers;
pub mod proxy;
pub mod reconciliation;
pub mod reconnect;
pub mod router;

pub use connection::{ConnectError, Link, LinkConfig, LinkEvent, SendError, open_link};
pub use interpolation::{PositionInterpolator, PositionSample};
pub use network_manager::{ConnectionState, NetworkManager};
pub use peers::{PeerEvent, PeerTable};
pub use proxy::{AbilityEvent, RemotePeerProxy, Transform};
pub use reconciliation::{Correction, StateReconciler, StateSnapshot};
pub use reconnect::ReconnectSchedule;
pub use router::{MessageHandler, MessageRouter};
