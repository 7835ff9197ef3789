//! Authoritative dungeon-crawler simulation server.

pub mod combat;
pub mod config;
pub mod entities;
pub mod loot;
pub mod network;
pub mod progression;
pub mod vendor;
pub mod world;
