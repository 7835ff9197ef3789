//! Server-side enemy entity with basic AI and boss mechanics.

use rand::Rng;

use delve_shared::{EffectView, EnemyArchetype, EnemyView, Stats, StatusEffect, StatusSpec};

use super::{distance, step_towards, MELEE_RANGE};
use crate::progression::{floor_damage_mult, floor_health_mult};

/// Enemy aggro range (within the same room)
const AGGRO_RANGE: f32 = 8.0;

/// Enemy attack cooldown in seconds
const ATTACK_COOLDOWN: f32 = 2.0;

/// Enemy movement speed
const ENEMY_SPEED: f32 = 3.0;

/// What fires a boss mechanic
#[derive(Debug, Clone)]
pub enum MechanicTrigger {
    /// Fires once when health drops below this fraction
    HealthBelow(f32),
    /// Fires repeatedly on this interval (seconds)
    Every(f32),
}

/// What a fired mechanic does; executed by the world, which owns the
/// entity maps the effect touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MechanicEffect {
    SummonAdds { count: u32 },
    FlameNova,
    Enrage,
}

#[derive(Debug, Clone)]
pub struct BossMechanic {
    pub trigger: MechanicTrigger,
    pub effect: MechanicEffect,
    /// HealthBelow fires once; Every reuses this as its countdown
    fired: bool,
    timer: f32,
}

impl BossMechanic {
    pub fn new(trigger: MechanicTrigger, effect: MechanicEffect) -> Self {
        let timer = match trigger {
            MechanicTrigger::Every(interval) => interval,
            MechanicTrigger::HealthBelow(_) => 0.0,
        };
        Self {
            trigger,
            effect,
            fired: false,
            timer,
        }
    }
}

/// Actions an enemy decided on this tick; resolved by the world
#[derive(Debug, Default)]
pub struct EnemyDecision {
    pub attack: Option<u64>,
    pub mechanics: Vec<MechanicEffect>,
}

/// Server-side enemy state
#[derive(Debug, Clone)]
pub struct ServerEnemy {
    pub id: u64,
    pub archetype: EnemyArchetype,
    pub is_boss: bool,
    pub is_rare: bool,
    pub is_elite: bool,
    /// Ambush rooms spawn enemies hidden; hidden enemies are absent from
    /// snapshots and cannot be targeted until revealed
    pub hidden: bool,
    /// Set for enemies that spawned hidden; their first swing after the
    /// reveal counts as a stealth attack
    pub ambusher: bool,
    pub room_id: u32,
    pub position: [f32; 2],
    pub level: u32,
    pub health: u32,
    pub stats: Stats,
    pub effects: Vec<StatusEffect>,
    pub target: Option<u64>,
    pub attack_cooldown: f32,
    pub mechanics: Vec<BossMechanic>,
    pub xp_reward: u64,
}

impl ServerEnemy {
    /// Spawn an enemy scaled for the floor and party.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        room_id: u32,
        archetype: EnemyArchetype,
        floor: u32,
        position: [f32; 2],
        party_health_mult: f32,
        party_damage_mult: f32,
        is_boss: bool,
        is_rare: bool,
        is_elite: bool,
        hidden: bool,
        rng: &mut impl Rng,
    ) -> Self {
        let (base_health, base_attack, base_spell) = match archetype {
            EnemyArchetype::Melee => (60, 10, 0),
            EnemyArchetype::Ranged => (45, 12, 0),
            EnemyArchetype::Caster => (40, 0, 14),
        };

        let flag_mult = if is_boss {
            6.0
        } else if is_rare {
            2.5
        } else if is_elite {
            1.6
        } else {
            1.0
        };

        let health_mult = floor_health_mult(floor) * party_health_mult * flag_mult;
        let damage_mult = floor_damage_mult(floor) * party_damage_mult;
        let level = floor + rng.gen_range(0..2);

        let max_health = (base_health as f32 * health_mult) as u32;
        let stats = Stats {
            max_health,
            max_mana: 50,
            attack_power: (base_attack as f32 * damage_mult * flag_mult.sqrt()) as u32,
            spell_power: (base_spell as f32 * damage_mult * flag_mult.sqrt()) as u32,
            armor: 2 + floor,
            resist: 1 + floor,
            crit_chance: 0.05,
            haste: 1.0,
            lifesteal: 0.0,
        };

        let mechanics = if is_boss {
            vec![
                BossMechanic::new(
                    MechanicTrigger::HealthBelow(0.6),
                    MechanicEffect::SummonAdds { count: 2 },
                ),
                BossMechanic::new(MechanicTrigger::HealthBelow(0.25), MechanicEffect::Enrage),
                BossMechanic::new(MechanicTrigger::Every(12.0), MechanicEffect::FlameNova),
            ]
        } else {
            Vec::new()
        };

        Self {
            id,
            archetype,
            is_boss,
            is_rare,
            is_elite,
            hidden,
            ambusher: hidden,
            room_id,
            position,
            level,
            health: max_health,
            stats,
            effects: Vec::new(),
            target: None,
            attack_cooldown: 0.0,
            mechanics,
            xp_reward: (25.0 * floor as f64 * flag_mult as f64) as u64,
        }
    }

    /// Attack reach by archetype
    pub fn attack_range(&self) -> f32 {
        match self.archetype {
            EnemyArchetype::Melee => MELEE_RANGE,
            EnemyArchetype::Ranged => 6.0,
            EnemyArchetype::Caster => 7.0,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.health == 0
    }

    pub fn is_stunned(&self) -> bool {
        self.effects.iter().any(|e| e.stuns)
    }

    pub fn is_blinded(&self) -> bool {
        self.effects.iter().any(|e| e.blinds)
    }

    /// Stats after status effects
    pub fn derived_stats(&self) -> Stats {
        let mut stats = self.stats;
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

    pub fn tick_timers(&mut self, delta: f32) {
        if self.attack_cooldown > 0.0 {
            self.attack_cooldown = (self.attack_cooldown - delta).max(0.0);
        }
        for effect in &mut self.effects {
            effect.duration -= delta;
        }
        self.effects.retain(|e| !e.expired());
    }

    /// Apply already-mitigated damage
    pub fn take_damage(&mut self, damage: u32) -> u32 {
        let taken = damage.min(self.health);
        self.health -= taken;
        taken
    }

    /// Advance AI by one tick against the alive players in this room.
    ///
    /// Chooses/chases the closest player in aggro range and decides whether
    /// to attack; boss mechanics that fire this tick ride along in the
    /// decision. Hidden or stunned enemies stay put.
    pub fn update(&mut self, delta: f32, players: &[(u64, [f32; 2])]) -> EnemyDecision {
        let mut decision = EnemyDecision::default();

        if self.is_dead() || self.hidden {
            return decision;
        }

        decision.mechanics = self.poll_mechanics(delta);

        if self.is_stunned() {
            return decision;
        }

        // Dropped targets (dead or gone) are cleared by the world; here we
        // just pick the closest candidate in aggro range
        let mut closest: Option<(u64, [f32; 2], f32)> = None;
        for (player_id, pos) in players {
            let dist = distance(self.position, *pos);
            if dist <= AGGRO_RANGE && closest.map_or(true, |(_, _, best)| dist < best) {
                closest = Some((*player_id, *pos, dist));
            }
        }

        match closest {
            Some((player_id, player_pos, dist)) => {
                self.target = Some(player_id);
                if dist <= self.attack_range() {
                    if self.attack_cooldown <= 0.0 && !self.is_blinded() {
                        self.attack_cooldown = ATTACK_COOLDOWN;
                        decision.attack = Some(player_id);
                    }
                } else {
                    self.position =
                        step_towards(self.position, player_pos, ENEMY_SPEED, delta);
                }
            }
            None => {
                self.target = None;
            }
        }

        decision
    }

    /// Collect mechanics due this tick
    fn poll_mechanics(&mut self, delta: f32) -> Vec<MechanicEffect> {
        let health_frac = self.health as f32 / self.stats.max_health.max(1) as f32;
        let mut fired = Vec::new();
        for mechanic in &mut self.mechanics {
            match mechanic.trigger {
                MechanicTrigger::HealthBelow(threshold) => {
                    if !mechanic.fired && health_frac < threshold {
                        mechanic.fired = true;
                        fired.push(mechanic.effect);
                    }
                }
                MechanicTrigger::Every(interval) => {
                    mechanic.timer -= delta;
                    if mechanic.timer <= 0.0 {
                        mechanic.timer = interval;
                        fired.push(mechanic.effect);
                    }
                }
            }
        }
        fired
    }

    /// Snapshot view; callers filter hidden enemies out before this
    pub fn view(&self) -> EnemyView {
        EnemyView {
            id: self.id,
            archetype: self.archetype,
            is_boss: self.is_boss,
            is_rare: self.is_rare,
            is_elite: self.is_elite,
            position: self.position,
            room_id: self.room_id,
            level: self.level,
            health: self.health,
            max_health: self.stats.max_health,
            target: self.target,
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
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn enemy(floor: u32, rng: &mut ChaCha8Rng) -> ServerEnemy {
        ServerEnemy::new(
            10_000,
            1,
            EnemyArchetype::Melee,
            floor,
            [0.0, 0.0],
            1.0,
            1.0,
            false,
            false,
            false,
            false,
            rng,
        )
    }

    #[test]
    fn floor_scaling_applies_to_health_exactly() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let base = enemy(1, &mut rng).stats.max_health;
        let scaled = enemy(4, &mut rng).stats.max_health;
        let expected = (base as f32 * 1.15f32.powi(3)) as u32;
        assert!(
            scaled.abs_diff(expected) <= 1,
            "expected ~{expected}, got {scaled}"
        );
    }

    #[test]
    fn hidden_enemies_do_not_act() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut e = enemy(1, &mut rng);
        e.hidden = true;
        let decision = e.update(0.05, &[(1, [1.0, 0.0])]);
        assert!(decision.attack.is_none());
        assert!(e.target.is_none());
    }

    #[test]
    fn attack_respects_cooldown() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut e = enemy(1, &mut rng);
        let players = [(1u64, [1.0f32, 0.0f32])];

        let first = e.update(0.05, &players);
        assert_eq!(first.attack, Some(1));

        let second = e.update(0.05, &players);
        assert!(second.attack.is_none(), "cooldown must gate the next swing");

        e.tick_timers(ATTACK_COOLDOWN);
        let third = e.update(0.05, &players);
        assert_eq!(third.attack, Some(1));
    }

    #[test]
    fn health_threshold_mechanics_fire_once() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut boss = ServerEnemy::new(
            10_001,
            2,
            EnemyArchetype::Melee,
            1,
            [0.0, 0.0],
            1.0,
            1.0,
            true,
            false,
            false,
            false,
            &mut rng,
        );
        boss.health = boss.stats.max_health / 2;

        let fired = boss.poll_mechanics(0.05);
        assert!(fired.contains(&MechanicEffect::SummonAdds { count: 2 }));

        let again = boss.poll_mechanics(0.05);
        assert!(
            !again.contains(&MechanicEffect::SummonAdds { count: 2 }),
            "health triggers fire once"
        );
    }
}
