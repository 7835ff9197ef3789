//! Game world management.
//!
//! The world is the single writer: every mutation happens inside a tick or
//! synchronously while applying a validated intent between ticks. The
//! network layer only queues work for it.

mod floor;

pub use floor::{plan_floor, EnemySpawn, FloorPlan, PlannedRoom, Room};

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};
use rand::Rng;

use delve_shared::{
    BackpackEntry, ChestView, ClientMessage, GroundEffectView, GroundItemView, ItemRarity,
    LootAward, RoomKind, RoomModifier, ServerMessage, TrapView, VendorView, WorldSnapshot,
    FINAL_FLOOR,
};

use crate::entities::{
    distance, EnemyDecision, MechanicEffect, ServerEnemy, ServerPet, ServerPlayer,
};
use crate::entities::player::PLAYER_SPEED;
use crate::loot;
use crate::progression::{self, party_scaling};

/// Pickup reach for ground items
const PICKUP_RANGE: f32 = 1.5;

/// Interaction reach for chests and vendors
const INTERACT_RANGE: f32 = 2.5;

/// Trap trigger radius
const TRAP_RADIUS: f32 = 0.8;

/// Unix seconds, stamped into save records
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A message leaving the simulation, addressed or broadcast to the run
#[derive(Debug, Clone)]
pub enum Outgoing {
    Broadcast(ServerMessage),
    To(u64, ServerMessage),
}

// =============================================================================
// World objects
// =============================================================================

#[derive(Debug, Clone)]
pub struct GroundItem {
    pub id: u64,
    pub position: [f32; 2],
    pub entry: BackpackEntry,
}

#[derive(Debug, Clone)]
pub struct Trap {
    pub id: u64,
    pub room_id: u32,
    pub position: [f32; 2],
    pub damage: u32,
    pub triggered: bool,
}

#[derive(Debug, Clone)]
pub struct Chest {
    pub id: u64,
    pub room_id: u32,
    pub position: [f32; 2],
    pub tier: ItemRarity,
    pub locked: bool,
    pub opened: bool,
}

#[derive(Debug, Clone)]
pub struct Vendor {
    pub id: u64,
    pub room_id: u32,
    pub position: [f32; 2],
}

#[derive(Debug, Clone)]
pub struct GroundEffect {
    pub id: u64,
    pub position: [f32; 2],
    pub radius: f32,
    pub growth: f32,
    pub damage_per_tick: u32,
    pub interval: f32,
    pub tick_timer: f32,
    pub remaining: f32,
    /// Entity that placed the effect; kills credit its owner
    pub source_id: u64,
    /// Hostile effects burn players; friendly ones burn enemies
    pub hostile: bool,
}

// =============================================================================
// Run
// =============================================================================

/// One dungeon instance: the authoritative entity store for a party.
pub struct Run {
    pub id: u64,
    pub floor: u32,
    pub tick_count: u64,
    pub ended: bool,
    pub rooms: HashMap<u32, Room>,
    pub players: HashMap<u64, ServerPlayer>,
    pub enemies: HashMap<u64, ServerEnemy>,
    pub pets: HashMap<u64, ServerPet>,
    pub ground_items: HashMap<u64, GroundItem>,
    pub traps: HashMap<u64, Trap>,
    pub chests: HashMap<u64, Chest>,
    pub vendors: HashMap<u64, Vendor>,
    pub ground_effects: HashMap<u64, GroundEffect>,
    next_entity_id: u64,
}

impl Run {
    pub fn new(id: u64, floor: u32) -> Self {
        Self {
            id,
            floor,
            tick_count: 0,
            ended: false,
            rooms: HashMap::new(),
            players: HashMap::new(),
            enemies: HashMap::new(),
            pets: HashMap::new(),
            ground_items: HashMap::new(),
            traps: HashMap::new(),
            chests: HashMap::new(),
            vendors: HashMap::new(),
            ground_effects: HashMap::new(),
            // Entity IDs start high to stay clear of session-assigned player IDs
            next_entity_id: 10_000,
        }
    }

    pub fn alloc_id(&mut self) -> u64 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    /// Loot generation mints item ids from the same counter; these two
    /// keep the cursor consistent around a `loot::roll` call.
    pub(crate) fn loot_id_cursor(&self) -> u64 {
        self.next_entity_id
    }

    pub(crate) fn advance_loot_ids(&mut self, next: u64) {
        self.next_entity_id = self.next_entity_id.max(next);
    }

    /// Insert a player and place them in the start room. Idempotent by id.
    pub fn add_player(&mut self, mut player: ServerPlayer) {
        let start = self.start_room_center();
        player.position = start;
        player.room_id = self.start_room_id();
        player.target = None;
        player.move_dir = [0.0, 0.0];
        self.players.insert(player.id, player);
    }

    /// Remove a player, clearing every reference to them. Idempotent by id.
    pub fn remove_player(&mut self, player_id: u64) -> Option<ServerPlayer> {
        let player = self.players.remove(&player_id);
        if player.is_some() {
            self.clear_target_references(player_id);
            self.pets.retain(|_, p| p.owner_id != player_id);
        }
        player
    }

    /// Drop every target lock on a removed entity so no id dangles
    pub(crate) fn clear_target_references(&mut self, id: u64) {
        for enemy in self.enemies.values_mut() {
            if enemy.target == Some(id) {
                enemy.target = None;
            }
        }
        for player in self.players.values_mut() {
            if player.target == Some(id) {
                player.target = None;
            }
        }
    }

    pub fn start_room_id(&self) -> u32 {
        self.rooms
            .values()
            .find(|r| r.kind == RoomKind::Start)
            .map(|r| r.id)
            .unwrap_or(0)
    }

    fn start_room_center(&self) -> [f32; 2] {
        self.rooms
            .values()
            .find(|r| r.kind == RoomKind::Start)
            .map(|r| r.center())
            .unwrap_or([0.0, 0.0])
    }

    // =========================================================================
    // Floor loading
    // =========================================================================

    /// Tear down the old floor and build the new one from a plan.
    pub fn load_floor(&mut self, floor: u32, rng: &mut impl Rng) {
        self.floor = floor;
        self.rooms.clear();
        self.enemies.clear();
        self.pets.clear();
        self.ground_items.clear();
        self.traps.clear();
        self.chests.clear();
        self.vendors.clear();
        self.ground_effects.clear();

        let plan = plan_floor(floor, rng);
        self.consume_plan(plan, rng);

        // Reset the party at the entrance
        let start_id = self.start_room_id();
        let start = self.start_room_center();
        let mut index = 0;
        for player in self.players.values_mut() {
            player.position = [start[0] + index as f32 * 0.8, start[1]];
            player.room_id = start_id;
            player.target = None;
            player.move_dir = [0.0, 0.0];
            index += 1;
        }
        if let Some(room) = self.rooms.get_mut(&start_id) {
            room.visited = true;
        }
    }

    /// Materialize a floor plan into live entities, applying floor, party
    /// and room-modifier scaling.
    fn consume_plan(&mut self, plan: FloorPlan, rng: &mut impl Rng) {
        let extra_players = (self.players.len() as u32).saturating_sub(1);
        let avg_power = {
            let mut total = 0.0;
            let mut count = 0;
            for p in self.players.values() {
                total += p.equipment.average_power();
                count += 1;
            }
            if count == 0 {
                0.0
            } else {
                total / count as f32
            }
        };
        let (party_health, party_damage) = party_scaling(extra_players, avg_power, self.floor);

        for planned in plan.rooms {
            let room = Room {
                id: planned.id,
                rect: planned.rect,
                kind: planned.kind,
                modifier: planned.modifier,
                // Rooms with nothing to fight start cleared
                cleared: planned.enemies.is_empty(),
                visited: false,
                neighbors: planned.neighbors,
            };
            let origin = [room.rect[0], room.rect[1]];
            let hidden = planned.modifier == Some(RoomModifier::Dark);
            let cursed = planned.modifier == Some(RoomModifier::Cursed);

            for spawn in &planned.enemies {
                let id = self.alloc_id();
                let mut enemy = ServerEnemy::new(
                    id,
                    room.id,
                    spawn.archetype,
                    self.floor,
                    [origin[0] + spawn.offset[0], origin[1] + spawn.offset[1]],
                    party_health,
                    party_damage,
                    spawn.is_boss,
                    spawn.is_rare,
                    spawn.is_elite,
                    hidden,
                    rng,
                );
                if cursed {
                    enemy.stats.attack_power = (enemy.stats.attack_power as f32 * 1.25) as u32;
                    enemy.stats.spell_power = (enemy.stats.spell_power as f32 * 1.25) as u32;
                }
                self.enemies.insert(id, enemy);
            }

            for offset in &planned.trap_offsets {
                let id = self.alloc_id();
                self.traps.insert(
                    id,
                    Trap {
                        id,
                        room_id: room.id,
                        position: [origin[0] + offset[0], origin[1] + offset[1]],
                        damage: (12.0 * progression::floor_damage_mult(self.floor)) as u32,
                        triggered: false,
                    },
                );
            }

            for (offset, tier, locked) in &planned.chests {
                let id = self.alloc_id();
                self.chests.insert(
                    id,
                    Chest {
                        id,
                        room_id: room.id,
                        position: [origin[0] + offset[0], origin[1] + offset[1]],
                        tier: *tier,
                        locked: *locked,
                        opened: false,
                    },
                );
            }

            if planned.has_vendor {
                let id = self.alloc_id();
                self.vendors.insert(
                    id,
                    Vendor {
                        id,
                        room_id: room.id,
                        position: [origin[0] + 2.0, origin[1] + 2.0],
                    },
                );
            }

            if planned.modifier == Some(RoomModifier::Burning) {
                let id = self.alloc_id();
                let center = room.center();
                self.ground_effects.insert(
                    id,
                    GroundEffect {
                        id,
                        position: center,
                        radius: 2.0,
                        growth: 0.0,
                        damage_per_tick: (4.0 * progression::floor_damage_mult(self.floor)) as u32,
                        interval: 1.0,
                        tick_timer: 1.0,
                        remaining: f32::MAX,
                        source_id: 0,
                        hostile: true,
                    },
                );
            }

            self.rooms.insert(room.id, room);
        }
    }

    // =========================================================================
    // Intent application
    // =========================================================================

    /// Validate and apply one client intent. Invalid intents mutate nothing
    /// and produce nothing; clients may retry freely.
    pub fn apply_intent(
        &mut self,
        player_id: u64,
        message: ClientMessage,
        rng: &mut impl Rng,
    ) -> Vec<Outgoing> {
        let mut out = Vec::new();
        if self.ended {
            return out;
        }
        // The originating entity may have died or been removed since the
        // intent was queued; liveness is checked here, at application time
        if !self.players.contains_key(&player_id) {
            return out;
        }

        match message {
            ClientMessage::Input { movement } => {
                if let Some(player) = self.players.get_mut(&player_id) {
                    if player.alive {
                        let mag = (movement[0] * movement[0] + movement[1] * movement[1]).sqrt();
                        player.move_dir = if mag > 1.0 {
                            [movement[0] / mag, movement[1] / mag]
                        } else {
                            movement
                        };
                    }
                }
            }
            ClientMessage::SetTarget { target } => {
                self.handle_set_target(player_id, target);
            }
            ClientMessage::CastAbility { ability_id, target } => {
                let target_id = target.unwrap_or(player_id);
                self.resolve(player_id, target_id, Some(ability_id), rng, &mut out);
            }
            ClientMessage::AdvanceFloor => {
                self.handle_advance_floor(player_id, rng, &mut out);
            }
            ClientMessage::UseItem { slot } => {
                if let Some(player) = self.players.get_mut(&player_id) {
                    if player.alive {
                        player.use_item(slot);
                    }
                }
            }
            ClientMessage::EquipFromBackpack { slot } => {
                if let Some(player) = self.players.get_mut(&player_id) {
                    if player.alive {
                        if let Err(reason) = player.equip_from_backpack(slot) {
                            debug!("player {} equip rejected: {}", player_id, reason);
                        }
                    }
                }
            }
            ClientMessage::UnequipItem { slot } => {
                if let Some(player) = self.players.get_mut(&player_id) {
                    if player.alive {
                        if let Err(reason) = player.unequip(slot) {
                            debug!("player {} unequip rejected: {}", player_id, reason);
                        }
                    }
                }
            }
            ClientMessage::OpenChest { chest_id } => {
                self.handle_open_chest(player_id, chest_id, rng, &mut out);
            }
            ClientMessage::InteractVendor { vendor_id } => {
                self.handle_interact_vendor(player_id, vendor_id, &mut out);
            }
            ClientMessage::PurchaseService { vendor_id, service } => {
                self.handle_purchase(player_id, vendor_id, service, rng, &mut out);
            }
            ClientMessage::PickupItem { entity_id } => {
                self.handle_pickup(player_id, entity_id, &mut out);
            }
            ClientMessage::RequestSave => {
                if let Some(player) = self.players.get(&player_id) {
                    out.push(Outgoing::To(
                        player_id,
                        ServerMessage::SavePoint {
                            save: player.to_save(now_unix()),
                        },
                    ));
                }
            }
            // Session-level messages are handled by the network layer
            ClientMessage::CreateRun { .. }
            | ClientMessage::ResumeRun { .. }
            | ClientMessage::JoinRun { .. }
            | ClientMessage::Reconnect { .. }
            | ClientMessage::Heartbeat { .. }
            | ClientMessage::Disconnect => {}
        }

        out
    }

    fn handle_set_target(&mut self, player_id: u64, target: Option<u64>) {
        let valid = match target {
            None => true,
            Some(id) => {
                self.enemies.get(&id).map(|e| !e.hidden && !e.is_dead()).unwrap_or(false)
                    || self.players.get(&id).map(|p| p.alive).unwrap_or(false)
            }
        };
        if !valid {
            return;
        }
        if let Some(player) = self.players.get_mut(&player_id) {
            if player.alive {
                player.target = target;
            }
        }
    }

    fn handle_pickup(&mut self, player_id: u64, entity_id: u64, out: &mut Vec<Outgoing>) {
        let (player_pos, player_alive) = match self.players.get(&player_id) {
            Some(p) => (p.position, p.alive),
            None => return,
        };
        if !player_alive {
            return;
        }
        let in_range = self
            .ground_items
            .get(&entity_id)
            .map(|item| distance(player_pos, item.position) <= PICKUP_RANGE)
            .unwrap_or(false);
        if !in_range {
            return;
        }

        let item = self.ground_items.remove(&entity_id).expect("checked above");
        let player = self.players.get_mut(&player_id).expect("checked above");
        if !player.add_to_backpack(item.entry.clone()) {
            // Backpack full: the item stays on the ground
            self.ground_items.insert(entity_id, item);
            return;
        }

        out.push(Outgoing::Broadcast(ServerMessage::ItemCollected {
            player_id,
            entry: item.entry,
        }));
    }

    fn handle_open_chest(
        &mut self,
        player_id: u64,
        chest_id: u64,
        rng: &mut impl Rng,
        out: &mut Vec<Outgoing>,
    ) {
        let (player_pos, player_alive) = match self.players.get(&player_id) {
            Some(p) => (p.position, p.alive),
            None => return,
        };
        let openable = self
            .chests
            .get(&chest_id)
            .map(|c| {
                !c.opened
                    && !c.locked
                    && player_alive
                    && distance(player_pos, c.position) <= INTERACT_RANGE
            })
            .unwrap_or(false);
        if !openable {
            return;
        }

        let (position, tier) = {
            let chest = self.chests.get_mut(&chest_id).expect("checked above");
            chest.opened = true;
            (chest.position, chest.tier)
        };

        let loadout = self
            .players
            .get(&player_id)
            .map(|p| p.abilities.clone())
            .unwrap_or_default();
        let mut next_item_id = self.next_entity_id;
        let awards = loot::roll(
            self.floor,
            tier >= ItemRarity::Epic,
            tier >= ItemRarity::Rare,
            &loadout,
            &mut next_item_id,
            rng,
        );
        self.next_entity_id = next_item_id;

        out.push(Outgoing::Broadcast(ServerMessage::ChestOpened { chest_id }));
        self.apply_awards(player_id, chest_id, position, awards, rng, out);
    }

    fn handle_advance_floor(
        &mut self,
        player_id: u64,
        rng: &mut impl Rng,
        out: &mut Vec<Outgoing>,
    ) {
        let alive = self.players.get(&player_id).map(|p| p.alive).unwrap_or(false);
        let boss_cleared = self
            .rooms
            .values()
            .any(|r| r.kind == RoomKind::Boss && r.cleared);
        if !alive || !boss_cleared {
            return;
        }

        if self.floor >= FINAL_FLOOR {
            info!("run {} completed floor {} and ends victorious", self.id, self.floor);
            self.ended = true;
            let now = now_unix();
            for player in self.players.values() {
                out.push(Outgoing::To(
                    player.id,
                    ServerMessage::SavePoint {
                        save: player.to_save(now),
                    },
                ));
            }
            out.push(Outgoing::Broadcast(ServerMessage::RunEnded { victory: true }));
            return;
        }

        let next = self.floor + 1;
        info!("run {} advancing to floor {}", self.id, next);
        for player in self.players.values_mut() {
            player.highest_floor = player.highest_floor.max(next);
        }
        self.load_floor(next, rng);

        let now = now_unix();
        for player in self.players.values() {
            out.push(Outgoing::To(
                player.id,
                ServerMessage::FloorComplete {
                    floor: next,
                    save: player.to_save(now),
                },
            ));
        }
    }

    // =========================================================================
    // Loot application
    // =========================================================================

    /// Credit direct awards and scatter item drops on the ground.
    pub(crate) fn apply_awards(
        &mut self,
        player_id: u64,
        source_id: u64,
        position: [f32; 2],
        awards: Vec<LootAward>,
        rng: &mut impl Rng,
        out: &mut Vec<Outgoing>,
    ) {
        if awards.is_empty() {
            return;
        }
        for award in &awards {
            match award {
                LootAward::Gold(gold) => {
                    if let Some(player) = self.players.get_mut(&player_id) {
                        player.gold += gold;
                    }
                }
                LootAward::RerollToken => {
                    if let Some(player) = self.players.get_mut(&player_id) {
                        player.reroll_tokens += 1;
                    }
                }
                LootAward::AbilityRankUp { ability_id, rank } => {
                    if let Some(player) = self.players.get_mut(&player_id) {
                        if let Some(slot) = player.ability_slot_mut(*ability_id) {
                            slot.rank = (*rank).max(slot.rank);
                        }
                    }
                }
                LootAward::Cosmetic { .. } => {
                    // Cosmetics are a renderer concern; the drop event is all
                }
                LootAward::Item(item) => {
                    let id = self.alloc_id();
                    self.ground_items.insert(
                        id,
                        GroundItem {
                            id,
                            position: scatter(position, rng),
                            entry: BackpackEntry::Item(item.clone()),
                        },
                    );
                }
                LootAward::Potion(potion) => {
                    let id = self.alloc_id();
                    self.ground_items.insert(
                        id,
                        GroundItem {
                            id,
                            position: scatter(position, rng),
                            entry: BackpackEntry::Potion(potion.clone()),
                        },
                    );
                }
            }
        }

        out.push(Outgoing::Broadcast(ServerMessage::LootDrop {
            source_id,
            position,
            awards,
        }));
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Advance the simulation one tick. Intents for this tick have already
    /// been applied by the session layer.
    pub fn tick(&mut self, delta: f32, rng: &mut impl Rng) -> Vec<Outgoing> {
        let mut out = Vec::new();
        if self.ended {
            return out;
        }
        self.tick_count += 1;

        // Stage 2: movement and AI
        self.move_players(delta);
        self.reveal_entered_rooms();
        let enemy_decisions = self.update_enemies(delta);
        let pet_attacks = self.update_pets(delta);

        // Stage 3: cooldowns and effect durations
        for player in self.players.values_mut() {
            player.tick_timers(delta);
        }
        for enemy in self.enemies.values_mut() {
            enemy.tick_timers(delta);
        }

        // Stage 4: ground effects and traps
        self.update_ground_effects(delta, rng, &mut out);
        self.update_traps(rng, &mut out);

        // Stage 5: due combat
        for (enemy_id, decision) in enemy_decisions {
            for mechanic in decision.mechanics {
                self.execute_mechanic(enemy_id, mechanic, rng);
            }
            if let Some(target) = decision.attack {
                self.resolve(enemy_id, target, None, rng, &mut out);
            }
        }
        for (pet_id, target) in pet_attacks {
            self.resolve(pet_id, target, None, rng, &mut out);
        }
        self.run_auto_attacks(rng, &mut out);

        self.reap_pets();

        out
    }

    fn move_players(&mut self, delta: f32) {
        let mut moves: Vec<(u64, [f32; 2], u32)> = Vec::new();

        for player in self.players.values() {
            if !player.alive || (player.move_dir[0] == 0.0 && player.move_dir[1] == 0.0) {
                continue;
            }
            let candidate = [
                player.position[0] + player.move_dir[0] * PLAYER_SPEED * delta,
                player.position[1] + player.move_dir[1] * PLAYER_SPEED * delta,
            ];
            let current = match self.rooms.get(&player.room_id) {
                Some(r) => r,
                None => continue,
            };

            if current.contains(candidate) {
                moves.push((player.id, candidate, current.id));
                continue;
            }

            // Leaving a room requires it cleared; then any neighbor whose
            // rect contains the new position accepts the player
            let next_room = if current.cleared {
                current
                    .neighbors
                    .iter()
                    .filter_map(|id| self.rooms.get(id))
                    .find(|r| r.contains(candidate))
            } else {
                None
            };

            match next_room {
                Some(room) => moves.push((player.id, candidate, room.id)),
                None => moves.push((player.id, current.clamp(candidate), current.id)),
            }
        }

        for (player_id, position, room_id) in moves {
            if let Some(player) = self.players.get_mut(&player_id) {
                player.position = position;
                player.room_id = room_id;
            }
        }
    }

    /// Mark rooms with players inside as visited and reveal their ambushers
    fn reveal_entered_rooms(&mut self) {
        let occupied: Vec<u32> = self.players.values().filter(|p| p.alive).map(|p| p.room_id).collect();
        for room_id in occupied {
            let newly_visited = match self.rooms.get_mut(&room_id) {
                Some(room) if !room.visited => {
                    room.visited = true;
                    true
                }
                _ => false,
            };
            if newly_visited {
                for enemy in self.enemies.values_mut() {
                    if enemy.room_id == room_id && enemy.hidden {
                        enemy.hidden = false;
                    }
                }
            }
        }
    }

    fn update_enemies(&mut self, delta: f32) -> Vec<(u64, EnemyDecision)> {
        // Alive players grouped by room, the only thing enemy AI can see
        let mut by_room: HashMap<u32, Vec<(u64, [f32; 2])>> = HashMap::new();
        for player in self.players.values() {
            if player.alive {
                by_room
                    .entry(player.room_id)
                    .or_default()
                    .push((player.id, player.position));
            }
        }

        let mut decisions = Vec::new();
        for enemy in self.enemies.values_mut() {
            let players = by_room
                .get(&enemy.room_id)
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            let decision = enemy.update(delta, players);
            if decision.attack.is_some() || !decision.mechanics.is_empty() {
                decisions.push((enemy.id, decision));
            }
        }
        decisions
    }

    fn update_pets(&mut self, delta: f32) -> Vec<(u64, u64)> {
        let owners: HashMap<u64, ([f32; 2], Option<(u64, [f32; 2])>)> = self
            .players
            .iter()
            .map(|(id, p)| {
                let target = p
                    .target
                    .and_then(|t| self.enemies.get(&t))
                    .filter(|e| !e.is_dead() && !e.hidden)
                    .map(|e| (e.id, e.position));
                (*id, (p.position, target))
            })
            .collect();

        let mut attacks = Vec::new();
        for pet in self.pets.values_mut() {
            if let Some((owner_pos, owner_target)) = owners.get(&pet.owner_id) {
                if let Some(target) = pet.update(delta, *owner_pos, *owner_target) {
                    attacks.push((pet.id, target));
                }
            } else {
                // Orphaned pet: burn out on the spot
                pet.remaining = 0.0;
            }
        }
        attacks
    }

    fn reap_pets(&mut self) {
        let gone: Vec<u64> = self
            .pets
            .values()
            .filter(|p| p.is_dead() || p.expired())
            .map(|p| p.id)
            .collect();
        for id in gone {
            self.pets.remove(&id);
            self.clear_target_references(id);
        }
    }

    fn update_ground_effects(
        &mut self,
        delta: f32,
        rng: &mut impl Rng,
        out: &mut Vec<Outgoing>,
    ) {
        let mut pulses: Vec<(u64, [f32; 2], f32, u32, bool)> = Vec::new();

        for effect in self.ground_effects.values_mut() {
            effect.remaining -= delta;
            effect.radius += effect.growth * delta;
            effect.tick_timer -= delta;
            if effect.tick_timer <= 0.0 {
                effect.tick_timer += effect.interval;
                pulses.push((
                    effect.source_id,
                    effect.position,
                    effect.radius,
                    effect.damage_per_tick,
                    effect.hostile,
                ));
            }
        }
        self.ground_effects.retain(|_, e| e.remaining > 0.0);

        for (source_id, position, radius, damage, hostile) in pulses {
            self.apply_ground_pulse(source_id, position, radius, damage, hostile, rng, out);
        }
    }

    fn update_traps(&mut self, rng: &mut impl Rng, out: &mut Vec<Outgoing>) {
        let mut firings: Vec<(u64, u64, u32)> = Vec::new();
        for trap in self.traps.values() {
            if trap.triggered {
                continue;
            }
            let victim = self
                .players
                .values()
                .find(|p| p.alive && distance(p.position, trap.position) <= TRAP_RADIUS);
            if let Some(player) = victim {
                firings.push((trap.id, player.id, trap.damage));
            }
        }

        for (trap_id, player_id, damage) in firings {
            if let Some(trap) = self.traps.get_mut(&trap_id) {
                trap.triggered = true;
            }
            self.apply_direct_damage_to_player(trap_id, player_id, damage, false, rng, out);
        }
    }

    fn execute_mechanic(&mut self, boss_id: u64, effect: MechanicEffect, rng: &mut impl Rng) {
        let (boss_pos, boss_room) = match self.enemies.get(&boss_id) {
            Some(b) => (b.position, b.room_id),
            None => return,
        };

        match effect {
            MechanicEffect::SummonAdds { count } => {
                let (party_health, party_damage) = self.current_party_scaling();
                for i in 0..count {
                    let id = self.alloc_id();
                    let offset = [(i as f32 - 0.5) * 2.0, 1.5];
                    let add = ServerEnemy::new(
                        id,
                        boss_room,
                        delve_shared::EnemyArchetype::Melee,
                        self.floor,
                        [boss_pos[0] + offset[0], boss_pos[1] + offset[1]],
                        party_health,
                        party_damage,
                        false,
                        false,
                        false,
                        false,
                        rng,
                    );
                    self.enemies.insert(id, add);
                }
            }
            MechanicEffect::FlameNova => {
                let id = self.alloc_id();
                self.ground_effects.insert(
                    id,
                    GroundEffect {
                        id,
                        position: boss_pos,
                        radius: 1.5,
                        growth: 0.6,
                        damage_per_tick: (8.0 * progression::floor_damage_mult(self.floor)) as u32,
                        interval: 1.0,
                        tick_timer: 0.5,
                        remaining: 5.0,
                        source_id: boss_id,
                        hostile: true,
                    },
                );
            }
            MechanicEffect::Enrage => {
                if let Some(boss) = self.enemies.get_mut(&boss_id) {
                    boss.add_effect(&delve_shared::StatusSpec {
                        id: 900,
                        name: "Enraged".into(),
                        mods: delve_shared::StatMods {
                            attack_power: (boss.stats.attack_power / 2) as i32,
                            spell_power: (boss.stats.spell_power / 2) as i32,
                            haste: 0.3,
                            ..Default::default()
                        },
                        duration: 60.0,
                        max_stacks: 1,
                        is_debuff: false,
                        stuns: false,
                        blinds: false,
                    });
                }
            }
        }
    }

    pub(crate) fn current_party_scaling(&self) -> (f32, f32) {
        let extra = (self.players.len() as u32).saturating_sub(1);
        let avg_power = if self.players.is_empty() {
            0.0
        } else {
            self.players
                .values()
                .map(|p| p.equipment.average_power())
                .sum::<f32>()
                / self.players.len() as f32
        };
        party_scaling(extra, avg_power, self.floor)
    }

    /// A room clears once no live enemies remain inside it; clearing
    /// unlocks its chests.
    pub(crate) fn check_room_cleared(&mut self, room_id: u32) {
        let any_alive = self
            .enemies
            .values()
            .any(|e| e.room_id == room_id && !e.is_dead());
        if any_alive {
            return;
        }
        if let Some(room) = self.rooms.get_mut(&room_id) {
            if !room.cleared {
                room.cleared = true;
                info!("run {}: room {} cleared", self.id, room_id);
            }
        }
        for chest in self.chests.values_mut() {
            if chest.room_id == room_id {
                chest.locked = false;
            }
        }
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// Immutable full-state view for broadcast. Hidden enemies are
    /// filtered out until revealed.
    pub fn snapshot(&self) -> WorldSnapshot {
        let mut rooms: Vec<_> = self.rooms.values().map(|r| r.view()).collect();
        rooms.sort_by_key(|r| r.id);

        let mut players: Vec<_> = self.players.values().map(|p| p.view()).collect();
        players.sort_by_key(|p| p.id);

        let mut enemies: Vec<_> = self
            .enemies
            .values()
            .filter(|e| !e.hidden)
            .map(|e| e.view())
            .collect();
        enemies.sort_by_key(|e| e.id);

        let mut pets: Vec<_> = self.pets.values().map(|p| p.view()).collect();
        pets.sort_by_key(|p| p.id);

        let mut ground_items: Vec<_> = self
            .ground_items
            .values()
            .map(|i| GroundItemView {
                id: i.id,
                position: i.position,
                entry: i.entry.clone(),
            })
            .collect();
        ground_items.sort_by_key(|i| i.id);

        let mut traps: Vec<_> = self
            .traps
            .values()
            .map(|t| TrapView {
                id: t.id,
                position: t.position,
                triggered: t.triggered,
            })
            .collect();
        traps.sort_by_key(|t| t.id);

        let mut chests: Vec<_> = self
            .chests
            .values()
            .map(|c| ChestView {
                id: c.id,
                position: c.position,
                locked: c.locked,
                opened: c.opened,
                tier: c.tier,
            })
            .collect();
        chests.sort_by_key(|c| c.id);

        let mut vendors: Vec<_> = self
            .vendors
            .values()
            .map(|v| VendorView {
                id: v.id,
                position: v.position,
                room_id: v.room_id,
            })
            .collect();
        vendors.sort_by_key(|v| v.id);

        let mut ground_effects: Vec<_> = self
            .ground_effects
            .values()
            .map(|e| GroundEffectView {
                id: e.id,
                position: e.position,
                radius: e.radius,
                remaining: e.remaining,
            })
            .collect();
        ground_effects.sort_by_key(|e| e.id);

        WorldSnapshot {
            run_id: self.id,
            tick: self.tick_count,
            floor: self.floor,
            rooms,
            players,
            enemies,
            pets,
            ground_items,
            traps,
            chests,
            vendors,
            ground_effects,
        }
    }
}

fn scatter(position: [f32; 2], rng: &mut impl Rng) -> [f32; 2] {
    [
        position[0] + rng.gen_range(-1.0..1.0),
        position[1] + rng.gen_range(-1.0..1.0),
    ]
}

// =============================================================================
// GameWorld
// =============================================================================

/// All live runs, keyed by run id
pub struct GameWorld {
    pub runs: HashMap<u64, Run>,
}

impl GameWorld {
    pub fn new() -> Self {
        Self {
            runs: HashMap::new(),
        }
    }

    /// Mint a run for a player, fresh or resumed, and return its id.
    pub fn create_run(&mut self, player: ServerPlayer, rng: &mut impl Rng) -> u64 {
        let run_id = loop {
            let candidate: u64 = rng.gen();
            if candidate != 0 && !self.runs.contains_key(&candidate) {
                break candidate;
            }
        };
        let floor = player.highest_floor.max(1).min(FINAL_FLOOR);
        let mut run = Run::new(run_id, floor);
        run.players.insert(player.id, player);
        run.load_floor(floor, rng);
        info!("created run {} on floor {}", run_id, floor);
        self.runs.insert(run_id, run);
        run_id
    }

    pub fn run_mut(&mut self, run_id: u64) -> Option<&mut Run> {
        self.runs.get_mut(&run_id)
    }

    pub fn run(&self, run_id: u64) -> Option<&Run> {
        self.runs.get(&run_id)
    }

    pub fn remove_run(&mut self, run_id: u64) -> Option<Run> {
        self.runs.remove(&run_id)
    }

    /// Tick every run; ended or emptied runs are reaped by the caller.
    pub fn tick(&mut self, delta: f32, rng: &mut impl Rng) -> Vec<(u64, Vec<Outgoing>)> {
        let mut results = Vec::with_capacity(self.runs.len());
        for (id, run) in self.runs.iter_mut() {
            results.push((*id, run.tick(delta, &mut *rng)));
        }
        results
    }
}

impl Default for GameWorld {
    fn default() -> Self {
        Self::new()
    }
}
