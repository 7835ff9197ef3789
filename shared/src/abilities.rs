//! Ability definitions shared between client and server.

use serde::{Deserialize, Serialize};

use crate::entities::{ClassId, StatMods};

// =============================================================================
// Ability Types
// =============================================================================

/// Target type for abilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    /// Targets self only
    SelfOnly,
    /// Targets a single enemy
    Enemy,
    /// Targets a single ally (including self)
    Ally,
    /// No target needed (placed at the caster's position)
    None,
}

/// Which attacker stat a damaging effect scales from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DamageSchool {
    /// Scales from attack power, mitigated by armor
    Physical,
    /// Scales from spell power, mitigated by resist
    Magical,
}

/// Blueprint for a status effect an ability applies.
///
/// The combat resolver turns this into a live `StatusEffect` on the target,
/// following the refresh-and-stack rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSpec {
    pub id: u32,
    pub name: String,
    pub mods: StatMods,
    pub duration: f32,
    pub max_stacks: u32,
    pub is_debuff: bool,
    pub stuns: bool,
    pub blinds: bool,
}

/// Effect types that abilities can apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AbilityEffect {
    /// Direct damage: `base + weight * power`, power chosen by school
    Damage { base: u32, weight: f32, school: DamageSchool },
    /// Direct heal: `base + weight * spell_power`
    Heal { base: u32, weight: f32 },
    /// Apply a status effect to the target
    ApplyToTarget(StatusSpec),
    /// Apply a status effect to the caster
    ApplyToSelf(StatusSpec),
    /// Leave a damaging zone on the ground at the target (or caster) position
    SpawnGroundEffect {
        radius: f32,
        /// Radius growth per second (expanding zones)
        growth: f32,
        damage_per_tick: u32,
        interval: f32,
        duration: f32,
    },
    /// Summon a pet that fights alongside the caster
    SummonPet { lifetime: f32 },
}

/// Ability definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityDef {
    /// Unique ability ID
    pub id: u32,
    /// Display name
    pub name: String,
    /// Description for tooltip
    pub description: String,
    /// Mana cost to use
    pub mana_cost: u32,
    /// Cooldown in seconds
    pub cooldown: f32,
    /// Range in world units (0 = melee/self)
    pub range: f32,
    /// Target type
    pub target: TargetKind,
    /// Class restriction (None = all classes)
    pub class_restriction: Option<ClassId>,
    /// Effects applied when the ability lands
    pub effects: Vec<AbilityEffect>,
}

// =============================================================================
// Ability Definitions
// =============================================================================

/// Get all ability definitions
pub fn get_ability_definitions() -> Vec<AbilityDef> {
    vec![
        // =====================================================================
        // Universal Abilities (ID 1-10)
        // =====================================================================
        AbilityDef {
            id: 1,
            name: "Second Wind".into(),
            description: "Catch your breath, restoring a burst of health.".into(),
            mana_cost: 15,
            cooldown: 20.0,
            range: 0.0,
            target: TargetKind::SelfOnly,
            class_restriction: None,
            effects: vec![AbilityEffect::Heal { base: 25, weight: 0.8 }],
        },
        // =====================================================================
        // Warrior Abilities (ID 11-20)
        // =====================================================================
        AbilityDef {
            id: 11,
            name: "Cleave".into(),
            description: "A heavy swing dealing bonus weapon damage.".into(),
            mana_cost: 10,
            cooldown: 6.0,
            range: 2.0,
            target: TargetKind::Enemy,
            class_restriction: Some(ClassId::Warrior),
            effects: vec![AbilityEffect::Damage {
                base: 8,
                weight: 1.5,
                school: DamageSchool::Physical,
            }],
        },
        AbilityDef {
            id: 12,
            name: "Shield Wall".into(),
            description: "Brace behind your shield, greatly increasing armor.".into(),
            mana_cost: 15,
            cooldown: 25.0,
            range: 0.0,
            target: TargetKind::SelfOnly,
            class_restriction: Some(ClassId::Warrior),
            effects: vec![AbilityEffect::ApplyToSelf(StatusSpec {
                id: 101,
                name: "Shield Wall".into(),
                mods: StatMods {
                    armor: 20,
                    ..Default::default()
                },
                duration: 8.0,
                max_stacks: 1,
                is_debuff: false,
                stuns: false,
                blinds: false,
            })],
        },
        AbilityDef {
            id: 13,
            name: "Concussive Blow".into(),
            description: "A skull-rattling strike that stuns the target.".into(),
            mana_cost: 20,
            cooldown: 14.0,
            range: 2.0,
            target: TargetKind::Enemy,
            class_restriction: Some(ClassId::Warrior),
            effects: vec![
                AbilityEffect::Damage {
                    base: 5,
                    weight: 0.8,
                    school: DamageSchool::Physical,
                },
                AbilityEffect::ApplyToTarget(StatusSpec {
                    id: 102,
                    name: "Concussed".into(),
                    mods: StatMods::default(),
                    duration: 1.5,
                    max_stacks: 1,
                    is_debuff: true,
                    stuns: true,
                    blinds: false,
                }),
            ],
        },
        // =====================================================================
        // Ranger Abilities (ID 21-30)
        // =====================================================================
        AbilityDef {
            id: 21,
            name: "Piercing Shot".into(),
            description: "A precise arrow that punches through armor.".into(),
            mana_cost: 10,
            cooldown: 7.0,
            range: 8.0,
            target: TargetKind::Enemy,
            class_restriction: Some(ClassId::Ranger),
            effects: vec![
                AbilityEffect::Damage {
                    base: 10,
                    weight: 1.4,
                    school: DamageSchool::Physical,
                },
                AbilityEffect::ApplyToTarget(StatusSpec {
                    id: 103,
                    name: "Rent Armor".into(),
                    mods: StatMods {
                        armor: -4,
                        ..Default::default()
                    },
                    duration: 10.0,
                    max_stacks: 3,
                    is_debuff: true,
                    stuns: false,
                    blinds: false,
                }),
            ],
        },
        AbilityDef {
            id: 22,
            name: "Summon Wolf".into(),
            description: "Call a wolf companion to fight at your side.".into(),
            mana_cost: 30,
            cooldown: 45.0,
            range: 0.0,
            target: TargetKind::None,
            class_restriction: Some(ClassId::Ranger),
            effects: vec![AbilityEffect::SummonPet { lifetime: 30.0 }],
        },
        AbilityDef {
            id: 23,
            name: "Smoke Bomb".into(),
            description: "Blind the target in a cloud of choking smoke.".into(),
            mana_cost: 20,
            cooldown: 18.0,
            range: 6.0,
            target: TargetKind::Enemy,
            class_restriction: Some(ClassId::Ranger),
            effects: vec![AbilityEffect::ApplyToTarget(StatusSpec {
                id: 104,
                name: "Blinded".into(),
                mods: StatMods::default(),
                duration: 3.0,
                max_stacks: 1,
                is_debuff: true,
                stuns: false,
                blinds: true,
            })],
        },
        // =====================================================================
        // Mage Abilities (ID 31-40)
        // =====================================================================
        AbilityDef {
            id: 31,
            name: "Firebolt".into(),
            description: "Hurl a bolt of fire at the target.".into(),
            mana_cost: 12,
            cooldown: 4.0,
            range: 9.0,
            target: TargetKind::Enemy,
            class_restriction: Some(ClassId::Mage),
            effects: vec![AbilityEffect::Damage {
                base: 12,
                weight: 1.3,
                school: DamageSchool::Magical,
            }],
        },
        AbilityDef {
            id: 32,
            name: "Flame Pool".into(),
            description: "Ignite the ground, leaving a spreading pool of fire.".into(),
            mana_cost: 25,
            cooldown: 16.0,
            range: 7.0,
            target: TargetKind::Enemy,
            class_restriction: Some(ClassId::Mage),
            effects: vec![AbilityEffect::SpawnGroundEffect {
                radius: 1.5,
                growth: 0.25,
                damage_per_tick: 6,
                interval: 1.0,
                duration: 6.0,
            }],
        },
        AbilityDef {
            id: 33,
            name: "Arcane Veil".into(),
            description: "Wrap yourself in wards against hostile magic.".into(),
            mana_cost: 18,
            cooldown: 30.0,
            range: 0.0,
            target: TargetKind::SelfOnly,
            class_restriction: Some(ClassId::Mage),
            effects: vec![AbilityEffect::ApplyToSelf(StatusSpec {
                id: 105,
                name: "Arcane Veil".into(),
                mods: StatMods {
                    resist: 15,
                    ..Default::default()
                },
                duration: 12.0,
                max_stacks: 1,
                is_debuff: false,
                stuns: false,
                blinds: false,
            })],
        },
        // =====================================================================
        // Cleric Abilities (ID 41-50)
        // =====================================================================
        AbilityDef {
            id: 41,
            name: "Smite".into(),
            description: "Strike the target with holy wrath.".into(),
            mana_cost: 10,
            cooldown: 5.0,
            range: 8.0,
            target: TargetKind::Enemy,
            class_restriction: Some(ClassId::Cleric),
            effects: vec![AbilityEffect::Damage {
                base: 10,
                weight: 1.1,
                school: DamageSchool::Magical,
            }],
        },
        AbilityDef {
            id: 42,
            name: "Renew".into(),
            description: "Mend an ally's wounds and bolster their vigor.".into(),
            mana_cost: 20,
            cooldown: 8.0,
            range: 8.0,
            target: TargetKind::Ally,
            class_restriction: Some(ClassId::Cleric),
            effects: vec![
                AbilityEffect::Heal { base: 20, weight: 1.2 },
                AbilityEffect::ApplyToTarget(StatusSpec {
                    id: 106,
                    name: "Renewed".into(),
                    mods: StatMods {
                        haste: 0.1,
                        ..Default::default()
                    },
                    duration: 10.0,
                    max_stacks: 1,
                    is_debuff: false,
                    stuns: false,
                    blinds: false,
                }),
            ],
        },
    ]
}

/// Get ability by ID
pub fn get_ability(id: u32) -> Option<AbilityDef> {
    get_ability_definitions().into_iter().find(|a| a.id == id)
}

/// Starting loadout ability IDs for a class
pub fn default_loadout(class: ClassId) -> Vec<u32> {
    let class_abilities: &[u32] = match class {
        ClassId::Warrior => &[11, 12, 13],
        ClassId::Ranger => &[21, 22, 23],
        ClassId::Mage => &[31, 32, 33],
        ClassId::Cleric => &[41, 42],
    };

    let mut loadout = vec![1];
    loadout.extend_from_slice(class_abilities);
    loadout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ability_ids_are_unique() {
        let defs = get_ability_definitions();
        for (i, a) in defs.iter().enumerate() {
            for b in defs.iter().skip(i + 1) {
                assert_ne!(a.id, b.id, "duplicate ability id {}", a.id);
            }
        }
    }

    #[test]
    fn default_loadouts_respect_class_restrictions() {
        for class in [ClassId::Warrior, ClassId::Ranger, ClassId::Mage, ClassId::Cleric] {
            for ability_id in default_loadout(class) {
                let def = get_ability(ability_id).expect("loadout references a known ability");
                assert!(
                    def.class_restriction.is_none() || def.class_restriction == Some(class),
                    "{} cannot use {}",
                    class.name(),
                    def.name
                );
            }
        }
    }

    #[test]
    fn enemy_target_abilities_have_range() {
        for def in get_ability_definitions() {
            if def.target == TargetKind::Enemy {
                assert!(def.range > 0.0, "{} targets enemies but has no range", def.name);
            }
        }
    }
}
