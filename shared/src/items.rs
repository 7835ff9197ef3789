//! Item, potion and equipment definitions shared between client and server.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entities::EquipSlot;

/// Maximum backpack entries per player
pub const BACKPACK_CAP: usize = 24;

/// Item rarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemRarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl ItemRarity {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Common => "Common",
            Self::Uncommon => "Uncommon",
            Self::Rare => "Rare",
            Self::Epic => "Epic",
            Self::Legendary => "Legendary",
        }
    }

    /// Multiplier applied to an item's stat budget
    pub fn budget_mult(&self) -> f32 {
        match self {
            Self::Common => 1.0,
            Self::Uncommon => 1.35,
            Self::Rare => 1.8,
            Self::Epic => 2.4,
            Self::Legendary => 3.2,
        }
    }
}

/// Flat bonuses an item (or set threshold) grants on top of base stats
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatBonuses {
    pub max_health: u32,
    pub max_mana: u32,
    pub attack_power: u32,
    pub spell_power: u32,
    pub armor: u32,
    pub resist: u32,
    pub crit_chance: f32,
    pub haste: f32,
    pub lifesteal: f32,
}

impl StatBonuses {
    /// Accumulate another bonus block into this one
    pub fn add(&mut self, other: &StatBonuses) {
        self.max_health += other.max_health;
        self.max_mana += other.max_mana;
        self.attack_power += other.attack_power;
        self.spell_power += other.spell_power;
        self.armor += other.armor;
        self.resist += other.resist;
        self.crit_chance += other.crit_chance;
        self.haste += other.haste;
        self.lifesteal += other.lifesteal;
    }

    /// Scalar "item power" used for party gear scaling and vendor pricing
    pub fn power(&self) -> u32 {
        self.max_health / 4
            + self.max_mana / 4
            + self.attack_power
            + self.spell_power
            + self.armor
            + self.resist
            + (self.crit_chance * 100.0) as u32
            + (self.haste * 50.0) as u32
            + (self.lifesteal * 100.0) as u32
    }
}

/// A piece of equipment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub name: String,
    pub slot: EquipSlot,
    pub rarity: ItemRarity,
    /// Floor the item dropped on; drives its stat budget
    pub item_level: u32,
    pub bonuses: StatBonuses,
    /// Items sharing a set id unlock cumulative set bonuses when equipped together
    pub set_id: Option<u32>,
}

impl Item {
    pub fn power(&self) -> u32 {
        self.bonuses.power()
    }
}

/// Consumable potion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PotionKind {
    Healing(u32),
    Mana(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Potion {
    pub id: u64,
    pub kind: PotionKind,
}

impl Potion {
    pub fn name(&self) -> &'static str {
        match self.kind {
            PotionKind::Healing(_) => "Healing Potion",
            PotionKind::Mana(_) => "Mana Potion",
        }
    }
}

/// One backpack entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackpackEntry {
    Item(Item),
    Potion(Potion),
}

/// One item per slot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    pub weapon: Option<Item>,
    pub helm: Option<Item>,
    pub chest: Option<Item>,
    pub boots: Option<Item>,
    pub ring: Option<Item>,
    pub amulet: Option<Item>,
}

impl Equipment {
    pub fn get(&self, slot: EquipSlot) -> Option<&Item> {
        match slot {
            EquipSlot::Weapon => self.weapon.as_ref(),
            EquipSlot::Helm => self.helm.as_ref(),
            EquipSlot::Chest => self.chest.as_ref(),
            EquipSlot::Boots => self.boots.as_ref(),
            EquipSlot::Ring => self.ring.as_ref(),
            EquipSlot::Amulet => self.amulet.as_ref(),
        }
    }

    pub fn get_mut(&mut self, slot: EquipSlot) -> Option<&mut Item> {
        match slot {
            EquipSlot::Weapon => self.weapon.as_mut(),
            EquipSlot::Helm => self.helm.as_mut(),
            EquipSlot::Chest => self.chest.as_mut(),
            EquipSlot::Boots => self.boots.as_mut(),
            EquipSlot::Ring => self.ring.as_mut(),
            EquipSlot::Amulet => self.amulet.as_mut(),
        }
    }

    /// Put an item into its slot, returning whatever was there before
    pub fn replace(&mut self, item: Item) -> Option<Item> {
        let dest = match item.slot {
            EquipSlot::Weapon => &mut self.weapon,
            EquipSlot::Helm => &mut self.helm,
            EquipSlot::Chest => &mut self.chest,
            EquipSlot::Boots => &mut self.boots,
            EquipSlot::Ring => &mut self.ring,
            EquipSlot::Amulet => &mut self.amulet,
        };
        dest.replace(item)
    }

    /// Remove the item in a slot
    pub fn take(&mut self, slot: EquipSlot) -> Option<Item> {
        match slot {
            EquipSlot::Weapon => self.weapon.take(),
            EquipSlot::Helm => self.helm.take(),
            EquipSlot::Chest => self.chest.take(),
            EquipSlot::Boots => self.boots.take(),
            EquipSlot::Ring => self.ring.take(),
            EquipSlot::Amulet => self.amulet.take(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        EquipSlot::ALL.iter().filter_map(|s| self.get(*s))
    }

    /// Number of equipped pieces per set id
    pub fn set_piece_counts(&self) -> HashMap<u32, u32> {
        let mut counts = HashMap::new();
        for item in self.iter() {
            if let Some(set_id) = item.set_id {
                *counts.entry(set_id).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Average power across equipped items (0 when nothing is equipped)
    pub fn average_power(&self) -> f32 {
        let mut total = 0u32;
        let mut count = 0u32;
        for item in self.iter() {
            total += item.power();
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            total as f32 / count as f32
        }
    }

    /// Cumulative set bonuses from all equipped set pieces
    pub fn set_bonuses(&self) -> StatBonuses {
        let mut total = StatBonuses::default();
        for (set_id, count) in self.set_piece_counts() {
            total.add(&set_bonuses_for(set_id, count));
        }
        total
    }
}

// =============================================================================
// Item sets
// =============================================================================

/// Known set ids
pub const SET_GRAVEWARDEN: u32 = 1;
pub const SET_EMBERWEAVE: u32 = 2;
pub const SET_THORNHIDE: u32 = 3;

pub fn set_name(set_id: u32) -> &'static str {
    match set_id {
        SET_GRAVEWARDEN => "Gravewarden",
        SET_EMBERWEAVE => "Emberweave",
        SET_THORNHIDE => "Thornhide",
        _ => "Unknown Set",
    }
}

/// Cumulative bonuses unlocked by equipping `count` pieces of a set.
///
/// Thresholds at 2/3/4/5 pieces; each unlocked threshold stacks onto the
/// previous ones.
pub fn set_bonuses_for(set_id: u32, count: u32) -> StatBonuses {
    let mut total = StatBonuses::default();
    let thresholds: [(u32, StatBonuses); 4] = match set_id {
        SET_GRAVEWARDEN => [
            (2, StatBonuses { armor: 6, ..Default::default() }),
            (3, StatBonuses { max_health: 40, ..Default::default() }),
            (4, StatBonuses { resist: 10, ..Default::default() }),
            (5, StatBonuses { armor: 12, max_health: 60, ..Default::default() }),
        ],
        SET_EMBERWEAVE => [
            (2, StatBonuses { spell_power: 8, ..Default::default() }),
            (3, StatBonuses { crit_chance: 0.04, ..Default::default() }),
            (4, StatBonuses { max_mana: 50, ..Default::default() }),
            (5, StatBonuses { spell_power: 18, crit_chance: 0.05, ..Default::default() }),
        ],
        SET_THORNHIDE => [
            (2, StatBonuses { attack_power: 6, ..Default::default() }),
            (3, StatBonuses { lifesteal: 0.03, ..Default::default() }),
            (4, StatBonuses { haste: 0.08, ..Default::default() }),
            (5, StatBonuses { attack_power: 14, lifesteal: 0.04, ..Default::default() }),
        ],
        _ => return total,
    };

    for (needed, bonus) in thresholds.iter() {
        if count >= *needed {
            total.add(bonus);
        }
    }
    total
}
