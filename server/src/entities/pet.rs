//! Summoned pet entity.

use delve_shared::{PetView, Stats};

use super::{distance, step_towards, MELEE_RANGE};
use crate::progression::floor_damage_mult;

const PET_SPEED: f32 = 4.5;
const PET_ATTACK_COOLDOWN: f32 = 1.5;

/// Distance a pet tries to keep from its idle owner
const HEEL_DISTANCE: f32 = 1.5;

/// Server-side pet state. Pets mirror their owner's target and despawn
/// when the lifetime runs out.
#[derive(Debug, Clone)]
pub struct ServerPet {
    pub id: u64,
    pub owner_id: u64,
    pub room_id: u32,
    pub position: [f32; 2],
    pub health: u32,
    pub stats: Stats,
    pub remaining: f32,
    pub attack_cooldown: f32,
}

impl ServerPet {
    pub fn new(id: u64, owner_id: u64, room_id: u32, position: [f32; 2], floor: u32, lifetime: f32) -> Self {
        let damage_mult = floor_damage_mult(floor);
        let max_health = 40 + floor * 10;
        Self {
            id,
            owner_id,
            room_id,
            position,
            health: max_health,
            stats: Stats {
                max_health,
                max_mana: 0,
                attack_power: (8.0 * damage_mult) as u32,
                spell_power: 0,
                armor: 2 + floor / 2,
                resist: 1,
                crit_chance: 0.05,
                haste: 1.0,
                lifesteal: 0.0,
            },
            remaining: lifetime,
            attack_cooldown: 0.0,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.health == 0
    }

    pub fn expired(&self) -> bool {
        self.remaining <= 0.0
    }

    pub fn take_damage(&mut self, damage: u32) -> u32 {
        let taken = damage.min(self.health);
        self.health -= taken;
        taken
    }

    /// Advance one tick: burn lifetime, chase the owner's target or heel.
    /// Returns the enemy to attack, if a swing lands this tick.
    pub fn update(
        &mut self,
        delta: f32,
        owner_position: [f32; 2],
        owner_target: Option<(u64, [f32; 2])>,
    ) -> Option<u64> {
        self.remaining -= delta;
        if self.attack_cooldown > 0.0 {
            self.attack_cooldown = (self.attack_cooldown - delta).max(0.0);
        }
        if self.is_dead() || self.expired() {
            return None;
        }

        match owner_target {
            Some((target_id, target_pos)) => {
                let dist = distance(self.position, target_pos);
                if dist <= MELEE_RANGE {
                    if self.attack_cooldown <= 0.0 {
                        self.attack_cooldown = PET_ATTACK_COOLDOWN;
                        return Some(target_id);
                    }
                } else {
                    self.position = step_towards(self.position, target_pos, PET_SPEED, delta);
                }
            }
            None => {
                if distance(self.position, owner_position) > HEEL_DISTANCE {
                    self.position = step_towards(self.position, owner_position, PET_SPEED, delta);
                }
            }
        }
        None
    }

    pub fn view(&self) -> PetView {
        PetView {
            id: self.id,
            owner_id: self.owner_id,
            position: self.position,
            health: self.health,
            max_health: self.stats.max_health,
            remaining: self.remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pet_heels_to_owner_without_a_target() {
        let mut pet = ServerPet::new(30_000, 1, 1, [0.0, 0.0], 1, 30.0);
        pet.update(0.5, [10.0, 0.0], None);
        assert!(pet.position[0] > 0.0, "pet moves toward its owner");
    }

    #[test]
    fn pet_attacks_owner_target_in_reach() {
        let mut pet = ServerPet::new(30_000, 1, 1, [0.0, 0.0], 1, 30.0);
        let hit = pet.update(0.05, [0.0, 0.0], Some((10_000, [1.0, 0.0])));
        assert_eq!(hit, Some(10_000));

        let gated = pet.update(0.05, [0.0, 0.0], Some((10_000, [1.0, 0.0])));
        assert!(gated.is_none(), "cooldown gates the next bite");
    }

    #[test]
    fn pet_expires_after_lifetime() {
        let mut pet = ServerPet::new(30_000, 1, 1, [0.0, 0.0], 1, 1.0);
        pet.update(1.1, [0.0, 0.0], None);
        assert!(pet.expired());
    }
}
