//! Wire protocol shared by the relay server and game clients: typed message
//! envelopes, their JSON codec, and newline-delimited framing.

pub mod framing;
pub mod messages;
pub mod types;

pub use framing::{FrameConfig, FrameError, read_frame, write_frame};
pub use messages::{
    AbilityUsed, CastAbility, Hello, Init, Message, MessageType, PeerSnapshot, PlayerJoined,
    PlayerLeft, PlayerPosition, ProtocolError, decode, encode,
};
pub use types::{PeerId, Vector3};
