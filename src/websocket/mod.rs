//! WebSocket subsystem: a management-API broadcaster layered on the
//! [`crate::store::ConnectionStore`] capability. Route-key dispatch itself
//! lives in [`crate::router::Router::register_websocket`] / `match_websocket`
//! alongside HTTP routing, since both are "look up a handler by a string
//! key" tables differing only in what the key is.
//!
//! A Lambda handler runs once per message and returns, so there is no
//! long-lived connection to hold a room's membership in-process: "the room"
//! is whatever rows the injected `ConnectionStore` holds, and "broadcasting"
//! is a sequence of HTTP posts to API Gateway's Management API, not a write
//! into an open socket.

mod broadcast;

pub use broadcast::{BroadcastTarget, Broadcaster, ConnectionPoster, UnconfiguredPoster};
