//! # studio-server
//!
//! Real-time propagation of studio configuration changes to connected
//! privileged sessions, across any number of server processes.
//!
//! - **Session gateway**: handshake credential verification ([`auth`], [`gateway`])
//! - **Subscription registry**: per-process topic membership ([`registry`])
//! - **Cross-instance relay**: one publish path and one subscribe path on a shared bus ([`relay`], [`bus`])
//! - **Resync service**: on-demand full snapshot from the read path ([`resync`], [`store`])
//! - **Mutation publisher**: entry point for the external write path ([`publisher`])
//! - **Transport**: Axum HTTP + `WebSocket` endpoints, health, metrics, graceful shutdown

#![deny(unsafe_code)]

pub mod auth;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod publisher;
pub mod registry;
pub mod relay;
pub mod resync;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod websocket;
