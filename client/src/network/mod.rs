//! Client networking.

mod client;

pub use client::{ClientConfig, ConnectionState, NetworkClient};
