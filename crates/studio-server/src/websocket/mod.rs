//! `WebSocket` transport for privileged sessions.
//!
//! - [`connection`]: per-connection state and outbound queue
//! - [`handler`]: applies dispatch actions for one inbound frame
//! - [`session`]: the connection lifecycle from upgrade to disconnect

pub mod connection;
pub mod handler;
pub mod session;
