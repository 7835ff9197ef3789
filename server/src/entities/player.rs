//! Server-side player entity.

use delve_shared::{
    AbilitySlot, BackpackEntry, ClassId, EffectView, Equipment, EquipSlot, PlayerView, PotionKind,
    SaveData, Stats, StatusEffect, StatusSpec, BACKPACK_CAP, MAX_LIVES, SAVE_VERSION,
};

use crate::progression::xp_for_level;

/// Movement speed in world units per second
pub const PLAYER_SPEED: f32 = 5.0;

/// Server-side player state
#[derive(Debug, Clone)]
pub struct ServerPlayer {
    pub id: u64,
    pub name: String,
    pub class: ClassId,
    pub position: [f32; 2],
    pub room_id: u32,
    /// Last movement intent; applied every tick until replaced
    pub move_dir: [f32; 2],
    pub level: u32,
    pub xp: u64,
    pub xp_to_next_level: u64,
    pub gold: u64,
    pub reroll_tokens: u32,
    pub lives: u8,
    pub alive: bool,
    pub health: u32,
    pub mana: u32,
    /// Level-scaled stats before equipment and status effects
    pub base_stats: Stats,
    pub equipment: Equipment,
    pub backpack: Vec<BackpackEntry>,
    pub abilities: Vec<AbilitySlot>,
    pub effects: Vec<StatusEffect>,
    pub target: Option<u64>,
    /// Counts down to the next basic attack; haste-scaled
    pub attack_timer: f32,
    pub highest_floor: u32,
    /// False while the owning session is detached (reconnect grace)
    pub connected: bool,
}

impl ServerPlayer {
    /// Fresh level-1 character
    pub fn new_character(id: u64, name: String, class: ClassId) -> Self {
        let base_stats = class.base_stats();
        Self {
            id,
            name,
            class,
            position: [0.0, 0.0],
            room_id: 0,
            move_dir: [0.0, 0.0],
            level: 1,
            xp: 0,
            xp_to_next_level: xp_for_level(2),
            gold: 0,
            reroll_tokens: 0,
            lives: MAX_LIVES,
            alive: true,
            health: base_stats.max_health,
            mana: base_stats.max_mana,
            base_stats,
            equipment: Equipment::default(),
            backpack: Vec::new(),
            abilities: delve_shared::default_loadout(class)
                .into_iter()
                .map(AbilitySlot::new)
                .collect(),
            effects: Vec::new(),
            target: None,
            attack_timer: 0.0,
            highest_floor: 1,
            connected: true,
        }
    }

    /// Reconstruct a player from a save record
    pub fn from_save(id: u64, save: SaveData) -> Self {
        let mut player = Self {
            id,
            name: save.player_name,
            class: save.class,
            position: [0.0, 0.0],
            room_id: 0,
            move_dir: [0.0, 0.0],
            level: save.level,
            xp: save.xp,
            xp_to_next_level: save.xp_to_next_level.max(1),
            gold: save.gold,
            reroll_tokens: save.reroll_tokens,
            lives: save.lives.min(MAX_LIVES),
            alive: true,
            health: 0,
            mana: 0,
            base_stats: save.base_stats,
            equipment: save.equipment,
            backpack: save.backpack,
            abilities: save.abilities,
            effects: Vec::new(),
            target: None,
            attack_timer: 0.0,
            highest_floor: save.highest_floor.max(1),
            connected: true,
        };
        // Cooldowns are transient; runs start rested
        for slot in &mut player.abilities {
            slot.cooldown = 0.0;
        }
        let derived = player.derived_stats();
        player.health = derived.max_health;
        player.mana = derived.max_mana;
        player
    }

    /// Produce the persisted record for this player
    pub fn to_save(&self, timestamp: i64) -> SaveData {
        let mut abilities = self.abilities.clone();
        for slot in &mut abilities {
            slot.cooldown = 0.0;
        }
        SaveData {
            version: SAVE_VERSION,
            timestamp,
            player_name: self.name.clone(),
            class: self.class,
            level: self.level,
            xp: self.xp,
            xp_to_next_level: self.xp_to_next_level,
            gold: self.gold,
            reroll_tokens: self.reroll_tokens,
            base_stats: self.base_stats,
            equipment: self.equipment.clone(),
            abilities,
            backpack: self.backpack.clone(),
            highest_floor: self.highest_floor,
            lives: self.lives,
        }
    }

    /// Stats after equipment, set bonuses and status effects
    pub fn derived_stats(&self) -> Stats {
        let mut gear = self.equipment.set_bonuses();
        for item in self.equipment.iter() {
            gear.add(&item.bonuses);
        }

        let mut stats = self.base_stats;
        stats.max_health += gear.max_health;
        stats.max_mana += gear.max_mana;
        stats.attack_power += gear.attack_power;
        stats.spell_power += gear.spell_power;
        stats.armor += gear.armor;
        stats.resist += gear.resist;
        stats.crit_chance += gear.crit_chance;
        stats.haste += gear.haste;
        stats.lifesteal += gear.lifesteal;

        for effect in &self.effects {
            let s = effect.stacks as i32;
            stats.attack_power =
                (stats.attack_power as i32 + effect.mods.attack_power * s).max(0) as u32;
            stats.spell_power =
                (stats.spell_power as i32 + effect.mods.spell_power * s).max(0) as u32;
            stats.armor = (stats.armor as i32 + effect.mods.armor * s).max(0) as u32;
            stats.resist = (stats.resist as i32 + effect.mods.resist * s).max(0) as u32;
            stats.crit_chance += effect.mods.crit_chance * effect.stacks as f32;
            stats.haste += effect.mods.haste * effect.stacks as f32;
        }

        stats.crit_chance = stats.crit_chance.clamp(0.0, 0.95);
        stats.haste = stats.haste.max(0.1);
        stats
    }

    pub fn is_dead(&self) -> bool {
        !self.alive || self.health == 0
    }

    pub fn is_stunned(&self) -> bool {
        self.effects.iter().any(|e| e.stuns)
    }

    pub fn is_blinded(&self) -> bool {
        self.effects.iter().any(|e| e.blinds)
    }

    /// Apply a status effect, refreshing/stacking when already present
    pub fn add_effect(&mut self, spec: &StatusSpec) {
        if let Some(existing) = self.effects.iter_mut().find(|e| e.id == spec.id) {
            existing.reapply();
            return;
        }
        self.effects.push(StatusEffect {
            id: spec.id,
            name: spec.name.clone(),
            mods: spec.mods,
            duration: spec.duration,
            max_duration: spec.duration,
            stacks: 1,
            max_stacks: spec.max_stacks,
            is_debuff: spec.is_debuff,
            stuns: spec.stuns,
            blinds: spec.blinds,
        });
    }

    /// Advance cooldowns and effect timers by one tick
    pub fn tick_timers(&mut self, delta: f32) {
        for slot in &mut self.abilities {
            slot.cooldown = (slot.cooldown - delta).max(0.0);
        }
        for effect in &mut self.effects {
            effect.duration -= delta;
        }
        self.effects.retain(|e| !e.expired());
        self.attack_timer = (self.attack_timer - delta * self.derived_stats().haste).max(0.0);
    }

    /// Apply already-mitigated damage. Returns the amount actually taken.
    pub fn take_damage(&mut self, damage: u32) -> u32 {
        let taken = damage.min(self.health);
        self.health -= taken;
        if self.health == 0 {
            self.alive = false;
        }
        taken
    }

    /// Heal up to the derived maximum. Returns the amount actually healed.
    pub fn heal(&mut self, amount: u32) -> u32 {
        let max = self.derived_stats().max_health;
        let healed = amount.min(max.saturating_sub(self.health));
        self.health += healed;
        healed
    }

    /// Restore health and mana to the derived maxima
    pub fn restore_fully(&mut self) {
        let derived = self.derived_stats();
        self.health = derived.max_health;
        self.mana = derived.max_mana;
    }

    /// Keep pools within the derived maxima after equipment changes
    pub fn clamp_pools(&mut self) {
        let derived = self.derived_stats();
        self.health = self.health.min(derived.max_health);
        self.mana = self.mana.min(derived.max_mana);
    }

    pub fn ability_slot(&self, ability_id: u32) -> Option<&AbilitySlot> {
        self.abilities.iter().find(|a| a.ability_id == ability_id)
    }

    pub fn ability_slot_mut(&mut self, ability_id: u32) -> Option<&mut AbilitySlot> {
        self.abilities.iter_mut().find(|a| a.ability_id == ability_id)
    }

    /// Add an entry to the backpack; fails when full
    pub fn add_to_backpack(&mut self, entry: BackpackEntry) -> bool {
        if self.backpack.len() >= BACKPACK_CAP {
            return false;
        }
        self.backpack.push(entry);
        true
    }

    /// Drink a potion from the backpack
    pub fn use_item(&mut self, slot: u8) -> Option<()> {
        let idx = slot as usize;
        match self.backpack.get(idx)? {
            BackpackEntry::Potion(potion) => {
                match potion.kind {
                    PotionKind::Healing(amount) => {
                        self.heal(amount);
                    }
                    PotionKind::Mana(amount) => {
                        let max = self.derived_stats().max_mana;
                        self.mana = (self.mana + amount).min(max);
                    }
                }
                self.backpack.remove(idx);
                Some(())
            }
            BackpackEntry::Item(_) => None,
        }
    }

    /// Equip an item out of the backpack, swapping with the worn piece
    pub fn equip_from_backpack(&mut self, slot: u8) -> Result<(), &'static str> {
        let idx = slot as usize;
        match self.backpack.get(idx) {
            Some(BackpackEntry::Item(_)) => {}
            Some(BackpackEntry::Potion(_)) => return Err("not equippable"),
            None => return Err("empty slot"),
        }
        let item = match self.backpack.remove(idx) {
            BackpackEntry::Item(item) => item,
            BackpackEntry::Potion(_) => unreachable!(),
        };
        if let Some(displaced) = self.equipment.replace(item) {
            self.backpack.push(BackpackEntry::Item(displaced));
        }
        self.clamp_pools();
        Ok(())
    }

    /// Unequip a worn item back into the backpack
    pub fn unequip(&mut self, slot: EquipSlot) -> Result<(), &'static str> {
        if self.equipment.get(slot).is_none() {
            return Err("slot empty");
        }
        if self.backpack.len() >= BACKPACK_CAP {
            return Err("backpack full");
        }
        let item = self.equipment.take(slot).expect("checked above");
        self.backpack.push(BackpackEntry::Item(item));
        self.clamp_pools();
        Ok(())
    }

    /// Snapshot view of this player
    pub fn view(&self) -> PlayerView {
        let derived = self.derived_stats();
        PlayerView {
            id: self.id,
            name: self.name.clone(),
            class: self.class,
            position: self.position,
            room_id: self.room_id,
            level: self.level,
            xp: self.xp,
            xp_to_next_level: self.xp_to_next_level,
            gold: self.gold,
            reroll_tokens: self.reroll_tokens,
            lives: self.lives,
            alive: self.alive,
            health: self.health,
            max_health: derived.max_health,
            mana: self.mana,
            max_mana: derived.max_mana,
            target: self.target,
            equipment: self.equipment.clone(),
            backpack: self.backpack.clone(),
            abilities: self.abilities.clone(),
            effects: self
                .effects
                .iter()
                .map(|e| EffectView {
                    id: e.id,
                    stacks: e.stacks,
                    remaining: e.duration,
                    is_debuff: e.is_debuff,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_shared::{Item, ItemRarity, StatBonuses, StatMods};

    fn helm(id: u64, max_health: u32) -> Item {
        Item {
            id,
            name: "Test Helm".into(),
            slot: EquipSlot::Helm,
            rarity: ItemRarity::Common,
            item_level: 1,
            bonuses: StatBonuses {
                max_health,
                ..Default::default()
            },
            set_id: None,
        }
    }

    #[test]
    fn save_roundtrip_preserves_progression() {
        let mut player = ServerPlayer::new_character(1, "Bram".into(), ClassId::Mage);
        player.gold = 250;
        player.reroll_tokens = 2;
        player.lives = 3;
        player.highest_floor = 4;
        player.abilities[0].cooldown = 9.0;

        let save = player.to_save(1_700_000_000);
        assert_eq!(save.timestamp, 1_700_000_000);
        assert!(save.abilities.iter().all(|a| a.cooldown == 0.0));

        let restored = ServerPlayer::from_save(2, save);
        assert_eq!(restored.gold, 250);
        assert_eq!(restored.reroll_tokens, 2);
        assert_eq!(restored.lives, 3);
        assert_eq!(restored.highest_floor, 4);
        assert_eq!(restored.health, restored.derived_stats().max_health);
    }

    #[test]
    fn unequip_into_full_backpack_is_rejected() {
        let mut player = ServerPlayer::new_character(1, "Bram".into(), ClassId::Warrior);
        player.equipment.replace(helm(1, 10));
        for i in 0..BACKPACK_CAP {
            assert!(player.add_to_backpack(BackpackEntry::Item(helm(10 + i as u64, 1))));
        }
        assert_eq!(player.unequip(EquipSlot::Helm), Err("backpack full"));
        assert!(player.equipment.get(EquipSlot::Helm).is_some());
    }

    #[test]
    fn equipping_swaps_with_worn_piece() {
        let mut player = ServerPlayer::new_character(1, "Bram".into(), ClassId::Warrior);
        player.equipment.replace(helm(1, 10));
        player.add_to_backpack(BackpackEntry::Item(helm(2, 30)));

        player.equip_from_backpack(0).unwrap();
        assert_eq!(player.equipment.get(EquipSlot::Helm).unwrap().id, 2);
        assert!(player
            .backpack
            .iter()
            .any(|e| matches!(e, BackpackEntry::Item(i) if i.id == 1)));
    }

    #[test]
    fn health_never_exceeds_derived_max_after_unequip() {
        let mut player = ServerPlayer::new_character(1, "Bram".into(), ClassId::Warrior);
        player.equipment.replace(helm(1, 100));
        player.restore_fully();
        let boosted = player.health;

        player.unequip(EquipSlot::Helm).unwrap();
        assert!(player.health < boosted);
        assert_eq!(player.health, player.derived_stats().max_health);
    }

    #[test]
    fn stun_flag_comes_from_active_effects() {
        let mut player = ServerPlayer::new_character(1, "Bram".into(), ClassId::Warrior);
        assert!(!player.is_stunned());
        player.add_effect(&StatusSpec {
            id: 102,
            name: "Concussed".into(),
            mods: StatMods::default(),
            duration: 1.5,
            max_stacks: 1,
            is_debuff: true,
            stuns: true,
            blinds: false,
        });
        assert!(player.is_stunned());

        player.tick_timers(2.0);
        assert!(!player.is_stunned(), "expired effects are removed");
    }
}
