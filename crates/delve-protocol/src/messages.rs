//! Network message types and the JSON envelope codec.
//!
//! Every message travels as `{"type": <tag>, "data": <payload>}`. Use
//! [`encode`] and [`decode`] for conversion; a decode failure means "drop the
//! frame and keep the connection", never "tear the connection down".

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{PeerId, Vector3};

// ---------------------------------------------------------------------------
// Top-level enum
// ---------------------------------------------------------------------------

/// Top-level network message. The variant name, camel-cased, is the type tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Message {
    /// Client announces itself; first frame on every connection.
    Hello(Hello),
    /// Server tells a newcomer its id and who is already present.
    Init(Init),
    /// Server announces a newcomer to everyone else.
    PlayerJoined(PlayerJoined),
    /// Server announces a departure.
    PlayerLeft(PlayerLeft),
    /// Position/rotation update, client→server and relayed server→clients.
    PlayerPosition(PlayerPosition),
    /// Client asks for an ability to be shown to the others.
    CastAbility(CastAbility),
    /// Server relays an ability cast.
    AbilityUsed(AbilityUsed),
}

/// Discriminant of [`Message`], used as the dispatch key on clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Hello,
    Init,
    PlayerJoined,
    PlayerLeft,
    PlayerPosition,
    CastAbility,
    AbilityUsed,
}

impl MessageType {
    pub const ALL: [MessageType; 7] = [
        MessageType::Hello,
        MessageType::Init,
        MessageType::PlayerJoined,
        MessageType::PlayerLeft,
        MessageType::PlayerPosition,
        MessageType::CastAbility,
        MessageType::AbilityUsed,
    ];

    /// The tag string written into the envelope's `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Hello => "hello",
            MessageType::Init => "init",
            MessageType::PlayerJoined => "playerJoined",
            MessageType::PlayerLeft => "playerLeft",
            MessageType::PlayerPosition => "playerPosition",
            MessageType::CastAbility => "castAbility",
            MessageType::AbilityUsed => "abilityUsed",
        }
    }

    /// Inverse of [`MessageType::as_str`].
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl Message {
    /// Extract the type tag without consuming the message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Hello(_) => MessageType::Hello,
            Message::Init(_) => MessageType::Init,
            Message::PlayerJoined(_) => MessageType::PlayerJoined,
            Message::PlayerLeft(_) => MessageType::PlayerLeft,
            Message::PlayerPosition(_) => MessageType::PlayerPosition,
            Message::CastAbility(_) => MessageType::CastAbility,
            Message::AbilityUsed(_) => MessageType::AbilityUsed,
        }
    }
}

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

/// Client greeting carrying the chosen character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub character_tag: String,
}

/// Last-known state of one peer, as listed in [`Init`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub position: Vector3,
    pub rotation: Vector3,
    pub character_tag: String,
}

/// Sent once to a newly registered peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Init {
    /// The id the server assigned to the receiving peer.
    pub id: PeerId,
    /// Everyone else currently connected.
    pub players: Vec<PeerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoined {
    pub id: PeerId,
    pub character_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerLeft {
    pub id: PeerId,
}

/// Position/rotation update.
///
/// `id` is absent when a client reports its own state; the server fills it
/// in with the sender's id before relaying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPosition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PeerId>,
    pub position: Vector3,
    pub rotation: Vector3,
}

/// Ability request from a client. `target` is opaque to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastAbility {
    pub ability: String,
    #[serde(default)]
    pub target: Value,
}

/// Relayed ability cast, attributed to `player_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityUsed {
    pub player_id: PeerId,
    pub ability: String,
    #[serde(default)]
    pub target: Value,
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Errors produced while encoding or decoding an envelope.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON, missing the envelope shell, or a payload that does not fit
    /// its type.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope's `type` tag is not one we know.
    #[error("unknown message type '{0}'")]
    UnknownType(String),

    /// Serialization failed.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Serialize a message into a single-line JSON envelope.
pub fn encode(msg: &Message) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(ProtocolError::Encode)
}

/// Parse a JSON envelope into a typed message.
pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
    let raw: RawEnvelope = serde_json::from_slice(bytes)?;
    let kind = MessageType::from_tag(&raw.kind).ok_or(ProtocolError::UnknownType(raw.kind))?;
    let data = raw.data;

    let msg = match kind {
        MessageType::Hello => Message::Hello(serde_json::from_value(data)?),
        MessageType::Init => Message::Init(serde_json::from_value(data)?),
        MessageType::PlayerJoined => Message::PlayerJoined(serde_json::from_value(data)?),
        MessageType::PlayerLeft => Message::PlayerLeft(serde_json::from_value(data)?),
        MessageType::PlayerPosition => Message::PlayerPosition(serde_json::from_value(data)?),
        MessageType::CastAbility => Message::CastAbility(serde_json::from_value(data)?),
        MessageType::AbilityUsed => Message::AbilityUsed(serde_json::from_value(data)?),
    };
    Ok(msg)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
