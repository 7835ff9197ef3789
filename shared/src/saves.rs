//! Versioned character save record.
//!
//! The record crosses the wire in both directions: a client resumes a run by
//! sending its save up, and the server hands back an updated record at save
//! points (floor completion, manual save, life loss). Durable storage is the
//! client's concern.

use serde::{Deserialize, Serialize};

use crate::abilities::default_loadout;
use crate::entities::{AbilitySlot, ClassId, Stats};
use crate::items::{BackpackEntry, Equipment};
use crate::protocol::MAX_LIVES;

/// Current save schema version. Records with any other version are
/// treated as unreadable and skipped.
pub const SAVE_VERSION: u32 = 1;

/// Snapshot of a player sufficient to reconstruct a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveData {
    pub version: u32,
    /// Unix seconds at write time; drives oldest-slot eviction
    pub timestamp: i64,
    pub player_name: String,
    pub class: ClassId,
    pub level: u32,
    pub xp: u64,
    pub xp_to_next_level: u64,
    pub gold: u64,
    pub reroll_tokens: u32,
    /// Level-scaled stat block before equipment and buffs
    pub base_stats: Stats,
    pub equipment: Equipment,
    /// Cooldowns are transient and stored zeroed
    pub abilities: Vec<AbilitySlot>,
    pub backpack: Vec<BackpackEntry>,
    pub highest_floor: u32,
    /// Permitted deaths remaining, 0..=5; the record is deleted at 0
    pub lives: u8,
}

impl SaveData {
    /// Fresh level-1 character record
    pub fn new_character(player_name: String, class: ClassId) -> Self {
        Self {
            version: SAVE_VERSION,
            timestamp: 0,
            player_name,
            class,
            level: 1,
            xp: 0,
            xp_to_next_level: 0,
            gold: 0,
            reroll_tokens: 0,
            base_stats: class.base_stats(),
            equipment: Equipment::default(),
            abilities: default_loadout(class).into_iter().map(AbilitySlot::new).collect(),
            backpack: Vec::new(),
            highest_floor: 1,
            lives: MAX_LIVES,
        }
    }

    pub fn is_current_version(&self) -> bool {
        self.version == SAVE_VERSION
    }
}
