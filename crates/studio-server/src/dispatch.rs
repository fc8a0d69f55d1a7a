//! Client message dispatch table.
//!
//! Each inbound message type maps to a plain function from
//! `(session, payload)` to an [`Action`]. Handlers never touch the registry
//! or the network themselves; the session loop applies the returned action.

use std::collections::HashMap;

use serde_json::Value;
use studio_core::Topic;
use tracing::debug;

use crate::protocol::{ClientFrame, ServerMessage, SubscribeParams, UnsubscribeParams};
use crate::websocket::connection::Session;

/// What the session loop should do with one inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Join `topic` and acknowledge with `ack`.
    Join {
        /// Topic to join.
        topic: Topic,
        /// Acknowledgement sent to the requesting session.
        ack: ServerMessage,
    },
    /// Leave a topic.
    Leave(Topic),
    /// Send the requesting session a full snapshot.
    Resync,
    /// Nothing to do.
    Ignore(String),
}

/// Handler signature for one message type.
pub type Handler = fn(&Session, Option<Value>) -> Action;

/// Message-type → handler map.
pub struct MessageTable {
    handlers: HashMap<&'static str, Handler>,
}

impl MessageTable {
    /// An empty table.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The standard table: `subscribe`, `unsubscribe`, `requestSync`, and
    /// the legacy `subscribe:config` / `request:sync` names.
    pub fn new() -> Self {
        let mut table = Self::empty();
        table.register("subscribe", subscribe);
        table.register("subscribe:config", subscribe);
        table.register("unsubscribe", unsubscribe);
        table.register("requestSync", request_sync);
        table.register("request:sync", request_sync);
        table
    }

    /// Register (or replace) the handler for `message_type`.
    pub fn register(&mut self, message_type: &'static str, handler: Handler) {
        let _ = self.handlers.insert(message_type, handler);
    }

    /// Registered message types, sorted.
    pub fn message_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Parse a text frame and route it to its handler.
    pub fn route(&self, session: &Session, text: &str) -> Action {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => return Action::Ignore(format!("unparseable frame: {e}")),
        };
        match self.handlers.get(frame.message_type.as_str()) {
            Some(handler) => handler(session, frame.data),
            None => Action::Ignore(format!("unrecognized message type '{}'", frame.message_type)),
        }
    }
}

impl Default for MessageTable {
    fn default() -> Self {
        Self::new()
    }
}

fn subscribe(session: &Session, data: Option<Value>) -> Action {
    let params: SubscribeParams = match data.map(serde_json::from_value).transpose() {
        Ok(Some(p)) => p,
        Ok(None) => return Action::Ignore("subscribe without payload".into()),
        Err(e) => return Action::Ignore(format!("invalid subscribe payload: {e}")),
    };
    match Topic::subscription(params.kind, params.variant.as_deref()) {
        Ok(topic) => {
            debug!(conn_id = %session.id, topic = %topic, "subscribe requested");
            Action::Join {
                ack: ServerMessage::Subscribed {
                    topic: topic.clone(),
                    kind: params.kind,
                    variant: params.variant,
                },
                topic,
            }
        }
        Err(e) => Action::Ignore(e.to_string()),
    }
}

fn unsubscribe(session: &Session, data: Option<Value>) -> Action {
    let params: UnsubscribeParams = match data.map(serde_json::from_value).transpose() {
        Ok(p) => p.unwrap_or_default(),
        Err(e) => return Action::Ignore(format!("invalid unsubscribe payload: {e}")),
    };
    let topic = match (params.topic, params.kind) {
        (Some(topic), _) => Topic::parse(&topic),
        (None, Some(kind)) => Topic::subscription(kind, params.variant.as_deref()),
        (None, None) => return Action::Ignore("unsubscribe without topic or kind".into()),
    };
    match topic {
        Ok(topic) if topic.is_global() => {
            Action::Ignore("the privileged-audience topic cannot be left".into())
        }
        Ok(topic) => {
            debug!(conn_id = %session.id, topic = %topic, "unsubscribe requested");
            Action::Leave(topic)
        }
        Err(e) => Action::Ignore(e.to_string()),
    }
}

fn request_sync(_session: &Session, _data: Option<Value>) -> Action {
    Action::Resync
}
