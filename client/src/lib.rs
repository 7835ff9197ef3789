//! Renderer-facing client library.
//!
//! Owns the transport state machine (connect, heartbeat, bounded
//! reconnection), the session context the renderer reads, the event bus
//! for discrete server events, and the local save-slot store. The
//! renderer never mutates simulation state; it sends intents and rebuilds
//! its view from snapshots.

pub mod events;
pub mod network;
pub mod saves;
pub mod session;

pub use events::{EventBus, Subscription};
pub use network::{ClientConfig, ConnectionState, NetworkClient};
pub use saves::{SaveError, SaveStore};
pub use session::SessionContext;
