//! Shared entity definitions.

use serde::{Deserialize, Serialize};

/// Character class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ClassId {
    Warrior = 0,
    Ranger = 1,
    Mage = 2,
    Cleric = 3,
}

impl ClassId {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Warrior),
            1 => Some(Self::Ranger),
            2 => Some(Self::Mage),
            3 => Some(Self::Cleric),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Warrior => "Warrior",
            Self::Ranger => "Ranger",
            Self::Mage => "Mage",
            Self::Cleric => "Cleric",
        }
    }

    /// Whether this class swings in melee reach (others attack at range)
    pub fn is_melee(&self) -> bool {
        matches!(self, Self::Warrior)
    }

    /// Whether basic attacks scale from spell power instead of attack power
    pub fn is_caster(&self) -> bool {
        matches!(self, Self::Mage | Self::Cleric)
    }

    /// Level-1 stat block for this class
    pub fn base_stats(&self) -> Stats {
        match self {
            Self::Warrior => Stats {
                max_health: 140,
                max_mana: 40,
                attack_power: 14,
                spell_power: 2,
                armor: 12,
                resist: 4,
                crit_chance: 0.05,
                haste: 1.0,
                lifesteal: 0.0,
            },
            Self::Ranger => Stats {
                max_health: 110,
                max_mana: 50,
                attack_power: 12,
                spell_power: 4,
                armor: 7,
                resist: 5,
                crit_chance: 0.10,
                haste: 1.15,
                lifesteal: 0.0,
            },
            Self::Mage => Stats {
                max_health: 90,
                max_mana: 90,
                attack_power: 4,
                spell_power: 16,
                armor: 4,
                resist: 10,
                crit_chance: 0.08,
                haste: 1.0,
                lifesteal: 0.0,
            },
            Self::Cleric => Stats {
                max_health: 105,
                max_mana: 80,
                attack_power: 6,
                spell_power: 12,
                armor: 8,
                resist: 9,
                crit_chance: 0.05,
                haste: 0.95,
                lifesteal: 0.02,
            },
        }
    }

    /// Fixed stat deltas applied on each level-up
    pub fn level_gains(&self) -> LevelGains {
        match self {
            Self::Warrior => LevelGains {
                max_health: 16,
                max_mana: 3,
                attack_power: 3,
                spell_power: 0,
                armor: 2,
                resist: 1,
            },
            Self::Ranger => LevelGains {
                max_health: 11,
                max_mana: 4,
                attack_power: 3,
                spell_power: 1,
                armor: 1,
                resist: 1,
            },
            Self::Mage => LevelGains {
                max_health: 8,
                max_mana: 9,
                attack_power: 1,
                spell_power: 3,
                armor: 1,
                resist: 2,
            },
            Self::Cleric => LevelGains {
                max_health: 10,
                max_mana: 7,
                attack_power: 1,
                spell_power: 3,
                armor: 1,
                resist: 2,
            },
        }
    }
}

/// Per-level stat deltas (see `ClassId::level_gains`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LevelGains {
    pub max_health: u32,
    pub max_mana: u32,
    pub attack_power: u32,
    pub spell_power: u32,
    pub armor: u32,
    pub resist: u32,
}

/// Core stat block shared by players, enemies and pets.
///
/// Current health/mana live on the owning entity; this block holds the
/// maxima and offensive/defensive numbers that scaling and equipment act on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub max_health: u32,
    pub max_mana: u32,
    pub attack_power: u32,
    pub spell_power: u32,
    pub armor: u32,
    pub resist: u32,
    /// Chance for any hit to crit, 0.0 - 1.0
    pub crit_chance: f32,
    /// Attack-speed multiplier, 1.0 = one swing per base interval
    pub haste: f32,
    /// Fraction of dealt damage returned as healing
    pub lifesteal: f32,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            max_health: 100,
            max_mana: 50,
            attack_power: 10,
            spell_power: 10,
            armor: 5,
            resist: 5,
            crit_chance: 0.05,
            haste: 1.0,
            lifesteal: 0.0,
        }
    }
}

/// Additive stat modifiers carried by buffs and debuffs
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatMods {
    pub attack_power: i32,
    pub spell_power: i32,
    pub armor: i32,
    pub resist: i32,
    pub crit_chance: f32,
    pub haste: f32,
}

/// A timed stat modifier attached to a combatant.
///
/// Duration counts down each tick; at zero the effect is removed.
/// Re-applying the same effect id refreshes the duration and adds a stack
/// up to `max_stacks`. Modifiers scale linearly with the stack count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEffect {
    pub id: u32,
    pub name: String,
    pub mods: StatMods,
    pub duration: f32,
    pub max_duration: f32,
    pub stacks: u32,
    pub max_stacks: u32,
    pub is_debuff: bool,
    /// Target cannot act at all while this holds
    pub stuns: bool,
    /// Target cannot attack or cast while this holds
    pub blinds: bool,
}

impl StatusEffect {
    /// Refresh the timer and add a stack, respecting the stack cap
    pub fn reapply(&mut self) {
        self.duration = self.max_duration;
        self.stacks = (self.stacks + 1).min(self.max_stacks);
    }

    pub fn expired(&self) -> bool {
        self.duration <= 0.0
    }
}

/// One entry in a combatant's ability loadout
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbilitySlot {
    pub ability_id: u32,
    /// Upgrade tier, 1..=10, gated by floor progress
    pub rank: u8,
    /// Remaining cooldown in seconds; ticks down to 0, never below
    pub cooldown: f32,
}

impl AbilitySlot {
    pub fn new(ability_id: u32) -> Self {
        Self {
            ability_id,
            rank: 1,
            cooldown: 0.0,
        }
    }

    pub fn ready(&self) -> bool {
        self.cooldown <= 0.0
    }
}

/// Equipment slots, one item each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquipSlot {
    Weapon,
    Helm,
    Chest,
    Boots,
    Ring,
    Amulet,
}

impl EquipSlot {
    pub const ALL: [EquipSlot; 6] = [
        EquipSlot::Weapon,
        EquipSlot::Helm,
        EquipSlot::Chest,
        EquipSlot::Boots,
        EquipSlot::Ring,
        EquipSlot::Amulet,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Weapon => "Weapon",
            Self::Helm => "Helm",
            Self::Chest => "Chest",
            Self::Boots => "Boots",
            Self::Ring => "Ring",
            Self::Amulet => "Amulet",
        }
    }
}

/// Enemy combat archetype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnemyArchetype {
    Melee,
    Ranged,
    Caster,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reapply_caps_stacks_and_refreshes_duration() {
        let mut effect = StatusEffect {
            id: 7,
            name: "Sunder".into(),
            mods: StatMods {
                armor: -3,
                ..Default::default()
            },
            duration: 1.0,
            max_duration: 8.0,
            stacks: 1,
            max_stacks: 3,
            is_debuff: true,
            stuns: false,
            blinds: false,
        };

        effect.reapply();
        assert_eq!(effect.stacks, 2);
        assert_eq!(effect.duration, 8.0);

        effect.reapply();
        effect.reapply();
        assert_eq!(effect.stacks, 3, "stacks must not exceed the cap");
    }

    #[test]
    fn every_class_roundtrips_through_u8() {
        for raw in 0..4u8 {
            let class = ClassId::from_u8(raw).unwrap();
            assert_eq!(class.as_u8(), raw);
        }
        assert!(ClassId::from_u8(4).is_none());
    }
}
