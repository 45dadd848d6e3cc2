//! Dispatch of decoded server messages to per-type handlers.
//!
//! [`MessageRouter`] maps a [`MessageType`] to at most one [`MessageHandler`].
//! The network manager drains its inbound queue once per frame and routes
//! every message through here, so handlers always run on the game thread.

use std::collections::HashMap;
use std::time::Instant;

use delve_protocol::{Message, MessageType};

use crate::peers::{self, PeerTable};

/// Something that reacts to one kind of server message.
pub trait MessageHandler: Send {
    fn handle(&self, msg: &Message, peers: &mut PeerTable, now: Instant);
}

impl<F> MessageHandler for F
where
    F: Fn(&Message, &mut PeerTable, Instant) + Send,
{
    fn handle(&self, msg: &Message, peers: &mut PeerTable, now: Instant) {
        self(msg, peers, now);
    }
}

/// Routes incoming messages to registered handlers by [`MessageType`].
pub struct MessageRouter {
    handlers: HashMap<MessageType, Box<dyn MessageHandler>>,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRouter {
    /// Create a router with no handlers at all.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Create a router wired to the handlers that keep a [`PeerTable`] in
    /// sync with the server roster.
    pub fn with_default_handlers() -> Self {
        let mut router = Self::new();
        router.register_handler(MessageType::Init, peers::handle_init);
        router.register_handler(MessageType::PlayerJoined, peers::handle_player_joined);
        router.register_handler(MessageType::PlayerLeft, peers::handle_player_left);
        router.register_handler(MessageType::PlayerPosition, peers::handle_player_position);
        router.register_handler(MessageType::AbilityUsed, peers::handle_ability_used);
        router
    }

    /// Install `handler` for `message_type`, replacing any previous one.
    pub fn register_handler<H: MessageHandler + 'static>(
        &mut self,
        message_type: MessageType,
        handler: H,
    ) {
        if self
            .handlers
            .insert(message_type, Box::new(handler))
            .is_some()
        {
            tracing::debug!("Replaced handler for '{}'", message_type.as_str());
        }
    }

    /// Remove the handler for `message_type`. Returns whether one existed.
    pub fn remove_handler(&mut self, message_type: MessageType) -> bool {
        self.handlers.remove(&message_type).is_some()
    }

    pub fn has_handler(&self, message_type: MessageType) -> bool {
        self.handlers.contains_key(&message_type)
    }

    /// Route `msg` to its handler.
    ///
    /// Returns `true` if a handler ran. Messages without a handler are logged
    /// and dropped.
    pub fn route(&self, msg: &Message, peers: &mut PeerTable, now: Instant) -> bool {
        let message_type = msg.message_type();
        match self.handlers.get(&message_type) {
            Some(handler) => {
                handler.handle(msg, peers, now);
                true
            }
            None => {
                tracing::warn!("No handler for message type '{}'", message_type.as_str());
                false
            }
        }
    }
}
