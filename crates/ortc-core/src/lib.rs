//! # ortc-core
//!
//! Session lifecycle for the ORTC realtime messaging client.
//!
//! This crate provides the client itself and the pieces it coordinates:
//!
//! - **Client** - Connect, subscribe, publish and disconnect
//! - **Channels** - Subscription records and per-channel handlers
//! - **Permissions** - Pluggable proof tokens for subscribe and send
//! - **Reassembly** - Multipart messages delivered once, in order
//! - **Heartbeat / Reconnect** - Liveness detection and automatic recovery
//! - **REST** - Presence and authentication calls, cluster discovery
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│   Router    │────▶│  Channels   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │
//!        │                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Client    │◀────│  Heartbeat  │────▶│  Reconnect  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```

pub mod channel;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod permissions;
pub mod reassembly;
pub mod rest;
pub mod state;

mod heartbeat;
mod link;
mod reconnect;
mod router;

pub use channel::{ChannelRegistry, ChannelSubscription, MessageHandler};
pub use client::{Client, ClientBuilder, DEFAULT_AUTH_TOKEN};
pub use cluster::{ClusterResolver, HttpClusterResolver};
pub use config::ClientConfig;
pub use error::ClientError;
pub use event::{ClientEvent, EventStream};
pub use permissions::{Action, PatternPermissionHash, PermissionHash, Permissions};
pub use rest::{
    AuthenticationRequest, ChannelPermission, Endpoint, PresenceInfo, RestClient, RestError,
};
pub use state::ConnectionState;
