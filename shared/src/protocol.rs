//! Network protocol definitions shared between client and server.

use serde::{Deserialize, Serialize};

use crate::entities::{AbilitySlot, ClassId, EnemyArchetype, EquipSlot};
use crate::items::{BackpackEntry, Equipment, Item, ItemRarity, Potion};
use crate::saves::SaveData;

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Server tick rate in Hz
pub const SERVER_TICK_RATE: u32 = 20;

/// Default server port
pub const DEFAULT_PORT: u16 = 7777;

/// Save slots retained per client
pub const MAX_SAVE_SLOTS: usize = 5;

/// Permitted deaths before a character is deleted
pub const MAX_LIVES: u8 = 5;

/// Defeating the boss here and advancing ends the run victorious
pub const FINAL_FLOOR: u32 = 10;

/// Reconnection: delay grows linearly, `RECONNECT_BASE_DELAY_MS * attempt`
pub const RECONNECT_BASE_DELAY_MS: u64 = 500;

/// Reconnection attempts before giving up
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

// =============================================================================
// Client -> Server Messages
// =============================================================================

/// Intents sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Start a fresh run with a new character
    CreateRun {
        protocol_version: u32,
        player_name: String,
        class: ClassId,
    },

    /// Start a run reconstructed from a save record
    ResumeRun {
        protocol_version: u32,
        save: SaveData,
    },

    /// Join another player's run with a fresh character
    JoinRun {
        protocol_version: u32,
        run_id: u64,
        player_name: String,
        class: ClassId,
    },

    /// Re-attach to an existing run after a transport drop
    Reconnect {
        run_id: u64,
        player_id: u64,
    },

    /// Movement input for this tick (direction vector, unnormalized ok)
    Input {
        movement: [f32; 2],
    },

    /// Select or clear the current target
    SetTarget {
        target: Option<u64>,
    },

    /// Cast an ability, optionally at a target
    CastAbility {
        ability_id: u32,
        target: Option<u64>,
    },

    /// Descend to the next floor (legal once the boss room is cleared)
    AdvanceFloor,

    /// Use a consumable from the backpack
    UseItem {
        slot: u8,
    },

    /// Equip an item out of the backpack, swapping with the worn piece
    EquipFromBackpack {
        slot: u8,
    },

    /// Unequip a worn item back into the backpack
    UnequipItem {
        slot: EquipSlot,
    },

    /// Open a chest
    OpenChest {
        chest_id: u64,
    },

    /// Ask a vendor for its service list
    InteractVendor {
        vendor_id: u64,
    },

    /// Buy a vendor service
    PurchaseService {
        vendor_id: u64,
        service: VendorService,
    },

    /// Pick up a ground item
    PickupItem {
        entity_id: u64,
    },

    /// Request a manual save point
    RequestSave,

    /// Liveness ping; the server answers with `HeartbeatPong`
    Heartbeat {
        nonce: u32,
    },

    /// Disconnect gracefully
    Disconnect,
}

// =============================================================================
// Server -> Client Messages
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Run created; the first snapshot is included
    RunCreated {
        run_id: u64,
        player_id: u64,
        snapshot: WorldSnapshot,
    },

    /// Run creation rejected (bad protocol version, unreadable save)
    CreateRunFailed {
        reason: String,
    },

    /// Reconnect accepted; state re-synced from the included snapshot
    RunJoined {
        run_id: u64,
        player_id: u64,
        snapshot: WorldSnapshot,
    },

    /// Reconnect rejected (unknown run, grace period expired)
    JoinFailed {
        reason: String,
    },

    /// Full world state, broadcast once per tick
    Snapshot(WorldSnapshot),

    /// Another player joined the run
    PlayerJoined {
        player_id: u64,
        name: String,
        class: ClassId,
    },

    /// A player left the run
    PlayerLeft {
        player_id: u64,
    },

    /// One resolved attack or ability use
    Combat(CombatEvent),

    /// Loot generated by a kill or chest
    LootDrop {
        source_id: u64,
        position: [f32; 2],
        awards: Vec<LootAward>,
    },

    /// A ground item entered a player's backpack
    ItemCollected {
        player_id: u64,
        entry: BackpackEntry,
    },

    ChestOpened {
        chest_id: u64,
    },

    /// Floor cleared and descended; carries the updated save record
    FloorComplete {
        floor: u32,
        save: SaveData,
    },

    /// Updated save record after a manual save or a life loss
    SavePoint {
        save: SaveData,
    },

    /// A player's lives reached zero; their record must be deleted
    CharacterExhausted {
        player_id: u64,
    },

    /// The run is over
    RunEnded {
        victory: bool,
    },

    /// Vendor service list with prices
    VendorServices {
        vendor_id: u64,
        services: Vec<ServiceQuote>,
    },

    /// Outcome of a purchase attempt
    PurchaseResult {
        success: bool,
        message: String,
    },

    HeartbeatPong {
        nonce: u32,
    },
}

// =============================================================================
// Vendor services
// =============================================================================

/// Purchasable vendor services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VendorService {
    /// Restore full health and mana
    Heal,
    /// Buy a healing potion
    BuyPotion,
    /// Upgrade an ability's rank (floor-gated; a blocked upgrade pays out
    /// scaled gold and possibly a reroll token instead)
    RankUpAbility { ability_id: u32 },
    /// Re-roll the bonuses on a worn item; costs a reroll token
    RerollEquipped { slot: EquipSlot },
}

/// A service with its price tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceQuote {
    pub service: VendorService,
    pub gold_cost: u64,
    pub token_cost: u32,
}

// =============================================================================
// Combat events
// =============================================================================

/// Result of one resolved attack or ability use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatEvent {
    pub source_id: u64,
    pub target_id: u64,
    /// None for basic attacks
    pub ability_id: Option<u32>,
    pub damage: Option<u32>,
    pub heal: Option<u32>,
    pub is_crit: bool,
    /// Attack landed on an enemy that was still hidden (ambush opener)
    pub is_stealth_attack: bool,
    pub killed: bool,
    pub target_health: u32,
}

/// One award inside a loot drop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LootAward {
    /// Credited directly to the player
    Gold(u64),
    RerollToken,
    /// Spawned on the ground for pickup
    Item(Item),
    Potion(Potion),
    /// An already-known ability grew a rank
    AbilityRankUp { ability_id: u32, rank: u8 },
    /// Opaque cosmetic unlock (rendering is not the simulation's concern)
    Cosmetic { cosmetic_id: u32 },
}

// =============================================================================
// Snapshot state types
// =============================================================================

/// Room type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomKind {
    Start,
    Normal,
    Rare,
    Boss,
}

/// Optional room modifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomModifier {
    /// Enemies hit harder
    Cursed,
    /// Better loot
    Blessed,
    /// Periodic fire pools
    Burning,
    /// Enemies are hidden until a player enters (ambush)
    Dark,
}

/// Room state for snapshots. Adjacency is by room id; rooms never
/// reference each other directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomView {
    pub id: u32,
    /// x, y, width, height
    pub rect: [f32; 4],
    pub kind: RoomKind,
    pub modifier: Option<RoomModifier>,
    pub cleared: bool,
    pub neighbors: Vec<u32>,
}

/// Status effect summary for snapshots
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectView {
    pub id: u32,
    pub stacks: u32,
    pub remaining: f32,
    pub is_debuff: bool,
}

/// Player state for snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: u64,
    pub name: String,
    pub class: ClassId,
    pub position: [f32; 2],
    pub room_id: u32,
    pub level: u32,
    pub xp: u64,
    pub xp_to_next_level: u64,
    pub gold: u64,
    pub reroll_tokens: u32,
    pub lives: u8,
    pub alive: bool,
    pub health: u32,
    pub max_health: u32,
    pub mana: u32,
    pub max_mana: u32,
    pub target: Option<u64>,
    pub equipment: Equipment,
    pub backpack: Vec<BackpackEntry>,
    pub abilities: Vec<AbilitySlot>,
    pub effects: Vec<EffectView>,
}

/// Enemy state for snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnemyView {
    pub id: u64,
    pub archetype: EnemyArchetype,
    pub is_boss: bool,
    pub is_rare: bool,
    pub is_elite: bool,
    pub position: [f32; 2],
    pub room_id: u32,
    pub level: u32,
    pub health: u32,
    pub max_health: u32,
    pub target: Option<u64>,
    pub effects: Vec<EffectView>,
}

/// Pet state for snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetView {
    pub id: u64,
    pub owner_id: u64,
    pub position: [f32; 2],
    pub health: u32,
    pub max_health: u32,
    pub remaining: f32,
}

/// Ground item state for snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundItemView {
    pub id: u64,
    pub position: [f32; 2],
    pub entry: BackpackEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrapView {
    pub id: u64,
    pub position: [f32; 2],
    pub triggered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChestView {
    pub id: u64,
    pub position: [f32; 2],
    pub locked: bool,
    pub opened: bool,
    pub tier: ItemRarity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VendorView {
    pub id: u64,
    pub position: [f32; 2],
    pub room_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundEffectView {
    pub id: u64,
    pub position: [f32; 2],
    pub radius: f32,
    pub remaining: f32,
}

/// Full world state for one tick.
///
/// Carries the run id so a client can reject snapshots from a run it is no
/// longer part of, and the tick so reordered datagrams never regress the view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub run_id: u64,
    pub tick: u64,
    pub floor: u32,
    pub rooms: Vec<RoomView>,
    pub players: Vec<PlayerView>,
    pub enemies: Vec<EnemyView>,
    pub pets: Vec<PetView>,
    pub ground_items: Vec<GroundItemView>,
    pub traps: Vec<TrapView>,
    pub chests: Vec<ChestView>,
    pub vendors: Vec<VendorView>,
    pub ground_effects: Vec<GroundEffectView>,
}

// =============================================================================
// Serialization helpers
// =============================================================================

impl ClientMessage {
    pub fn serialize(&self) -> Vec<u8> {
        bincode::serialize(self).expect("Failed to serialize ClientMessage")
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

impl ServerMessage {
    pub fn serialize(&self) -> Vec<u8> {
        bincode::serialize(self).expect("Failed to serialize ServerMessage")
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
