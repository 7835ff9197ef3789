//! Combat resolution.
//!
//! One call resolves one attack or ability use into damage, healing,
//! mitigation, crit, status application and on-kill consequences. A
//! rejected attempt mutates nothing and emits nothing, so client retries
//! stay cheap.

use log::debug;
use rand::Rng;

use delve_shared::{
    get_ability, AbilityEffect, CombatEvent, DamageSchool, ServerMessage, Stats, StatusSpec,
    TargetKind,
};

use crate::entities::{distance, ServerPet, MELEE_RANGE, RANGED_ATTACK_RANGE, BASE_ATTACK_INTERVAL};
use crate::loot;
use crate::progression::award_xp;
use crate::world::{now_unix, Outgoing, Run};

/// Crit multiplier applied to damage and healing
pub const CRIT_MULT: f32 = 1.5;

/// Additive rank scaling: +15% per rank above 1
pub fn rank_mult(rank: u8) -> f32 {
    1.0 + 0.15 * (rank.saturating_sub(1)) as f32
}

/// Diminishing-returns mitigation, floored at 1 damage on a landing hit
pub fn mitigate(raw: u32, mitigation: u32) -> u32 {
    if raw == 0 {
        return 0;
    }
    let reduced = raw as f32 * 100.0 / (100.0 + mitigation as f32);
    (reduced as u32).max(1)
}

/// What kind of combatant an id refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Player,
    Enemy,
    Pet,
}

/// Read-only view of a combatant taken before any mutation
struct CombatantView {
    kind: Kind,
    position: [f32; 2],
    alive: bool,
    stunned: bool,
    blinded: bool,
    hidden: bool,
    stats: Stats,
    mana: u32,
}

impl Run {
    fn combatant(&self, id: u64) -> Option<CombatantView> {
        if let Some(p) = self.players.get(&id) {
            return Some(CombatantView {
                kind: Kind::Player,
                position: p.position,
                alive: p.alive,
                stunned: p.is_stunned(),
                blinded: p.is_blinded(),
                hidden: false,
                stats: p.derived_stats(),
                mana: p.mana,
            });
        }
        if let Some(e) = self.enemies.get(&id) {
            return Some(CombatantView {
                kind: Kind::Enemy,
                position: e.position,
                alive: !e.is_dead(),
                stunned: e.is_stunned(),
                blinded: e.is_blinded(),
                hidden: e.hidden,
                stats: e.derived_stats(),
                mana: 0,
            });
        }
        if let Some(p) = self.pets.get(&id) {
            return Some(CombatantView {
                kind: Kind::Pet,
                position: p.position,
                alive: !p.is_dead() && !p.expired(),
                stunned: false,
                blinded: false,
                hidden: false,
                stats: p.stats,
                mana: 0,
            });
        }
        None
    }

    /// Resolve one attack or ability use.
    ///
    /// `ability_id == None` is a basic attack. Every gate is checked before
    /// the first mutation; any failure is a silent rejection. On success
    /// the combat event is pushed to `out` and returned.
    pub fn resolve(
        &mut self,
        source_id: u64,
        target_id: u64,
        ability_id: Option<u32>,
        rng: &mut impl Rng,
        out: &mut Vec<Outgoing>,
    ) -> Option<CombatEvent> {
        // 1. Source must exist, live, and be free to act
        let source = self.combatant(source_id)?;
        if !source.alive || source.stunned || source.blinded {
            return None;
        }

        // 2. Ability gating: known, off cooldown, affordable
        let ability = match ability_id {
            Some(id) => {
                if source.kind != Kind::Player {
                    return None;
                }
                let def = get_ability(id)?;
                let player = self.players.get(&source_id)?;
                if def.class_restriction.is_some() && def.class_restriction != Some(player.class) {
                    return None;
                }
                let slot = player.ability_slot(id)?;
                if !slot.ready() || source.mana < def.mana_cost {
                    debug!("player {} ability {} gated", source_id, id);
                    return None;
                }
                Some((def, slot.rank))
            }
            None => None,
        };

        // 3. Target legality and range
        let target_kind = ability
            .as_ref()
            .map(|(def, _)| def.target)
            .unwrap_or(TargetKind::Enemy);
        let effective_target_id = match target_kind {
            TargetKind::SelfOnly | TargetKind::None => source_id,
            TargetKind::Enemy | TargetKind::Ally => target_id,
        };
        let target = self.combatant(effective_target_id)?;
        if !target.alive {
            return None;
        }

        match target_kind {
            TargetKind::Enemy => {
                let legal = match source.kind {
                    // Players and pets fight enemies; enemies fight the party
                    Kind::Player | Kind::Pet => target.kind == Kind::Enemy && !target.hidden,
                    Kind::Enemy => target.kind != Kind::Enemy,
                };
                if !legal {
                    return None;
                }
            }
            TargetKind::Ally => {
                if source.kind != Kind::Player || target.kind == Kind::Enemy {
                    return None;
                }
            }
            TargetKind::SelfOnly | TargetKind::None => {}
        }

        let range = match &ability {
            Some((def, _)) => {
                if def.range > 0.0 {
                    def.range
                } else {
                    f32::MAX // self-targeted
                }
            }
            None => match source.kind {
                Kind::Player => {
                    let player = self.players.get(&source_id)?;
                    if player.class.is_melee() {
                        MELEE_RANGE
                    } else {
                        RANGED_ATTACK_RANGE
                    }
                }
                Kind::Enemy => self.enemies.get(&source_id)?.attack_range(),
                Kind::Pet => MELEE_RANGE,
            },
        };
        if effective_target_id != source_id
            && distance(source.position, target.position) > range + 0.25
        {
            return None;
        }

        // All gates passed; from here on we mutate.

        // 4. Pay costs
        let rank = ability.as_ref().map(|(_, rank)| *rank).unwrap_or(1);
        if let Some((def, _)) = &ability {
            let player = self.players.get_mut(&source_id).expect("validated above");
            player.mana -= def.mana_cost;
            if let Some(slot) = player.ability_slot_mut(def.id) {
                slot.cooldown = def.cooldown;
            }
        }

        // 5. One crit roll covers the whole resolution
        let is_crit = rng.gen_bool(source.stats.crit_chance.clamp(0.0, 0.95) as f64);
        let crit_mult = if is_crit { CRIT_MULT } else { 1.0 };

        // An ambusher's first swing after reveal is a stealth attack
        let is_stealth_attack = if source.kind == Kind::Enemy {
            self.enemies
                .get_mut(&source_id)
                .map(|e| std::mem::take(&mut e.ambusher))
                .unwrap_or(false)
        } else {
            false
        };

        let effects: Vec<AbilityEffect> = match &ability {
            Some((def, _)) => def.effects.clone(),
            None => {
                let (base, weight, school) = basic_attack_profile(&source, self, source_id);
                vec![AbilityEffect::Damage { base, weight, school }]
            }
        };

        // 6-8. Apply each effect
        let mut total_damage: Option<u32> = None;
        let mut total_heal: Option<u32> = None;
        let mut killed = false;

        for effect in effects {
            match effect {
                AbilityEffect::Damage { base, weight, school } => {
                    let power = match school {
                        DamageSchool::Physical => source.stats.attack_power,
                        DamageSchool::Magical => source.stats.spell_power,
                    };
                    let raw = ((base as f32 + weight * power as f32)
                        * rank_mult(rank)
                        * crit_mult) as u32;
                    let mitigation = match school {
                        DamageSchool::Physical => target.stats.armor,
                        DamageSchool::Magical => target.stats.resist,
                    };
                    let final_damage = mitigate(raw, mitigation);
                    let (dealt, died) =
                        self.deal_damage(source_id, effective_target_id, final_damage, rng, out);
                    total_damage = Some(total_damage.unwrap_or(0) + dealt);
                    if died {
                        killed = true;
                    }

                    // Lifesteal heals the attacker out of damage dealt
                    if source.stats.lifesteal > 0.0 && dealt > 0 {
                        let heal = (dealt as f32 * source.stats.lifesteal) as u32;
                        if heal > 0 {
                            self.heal_combatant(source_id, heal);
                        }
                    }
                }
                AbilityEffect::Heal { base, weight } => {
                    let raw = ((base as f32 + weight * source.stats.spell_power as f32)
                        * rank_mult(rank)
                        * crit_mult) as u32;
                    let healed = self.heal_combatant(effective_target_id, raw);
                    total_heal = Some(total_heal.unwrap_or(0) + healed);
                }
                AbilityEffect::ApplyToTarget(spec) => {
                    self.apply_status(effective_target_id, &spec);
                }
                AbilityEffect::ApplyToSelf(spec) => {
                    self.apply_status(source_id, &spec);
                }
                AbilityEffect::SpawnGroundEffect {
                    radius,
                    growth,
                    damage_per_tick,
                    interval,
                    duration,
                } => {
                    let position = if effective_target_id == source_id {
                        source.position
                    } else {
                        target.position
                    };
                    let id = self.alloc_id();
                    let scaled = (damage_per_tick as f32 * rank_mult(rank)) as u32;
                    self.ground_effects.insert(
                        id,
                        crate::world::GroundEffect {
                            id,
                            position,
                            radius,
                            growth,
                            damage_per_tick: scaled,
                            interval,
                            tick_timer: interval,
                            remaining: duration,
                            source_id,
                            hostile: source.kind == Kind::Enemy,
                        },
                    );
                }
                AbilityEffect::SummonPet { lifetime } => {
                    if source.kind == Kind::Player {
                        let room_id = self
                            .players
                            .get(&source_id)
                            .map(|p| p.room_id)
                            .unwrap_or_default();
                        let id = self.alloc_id();
                        let pet = ServerPet::new(
                            id,
                            source_id,
                            room_id,
                            [source.position[0] + 1.0, source.position[1]],
                            self.floor,
                            lifetime,
                        );
                        self.pets.insert(id, pet);
                    }
                }
            }
        }

        let target_health = match self.combatant(effective_target_id) {
            Some(t) if t.kind == Kind::Player => {
                self.players.get(&effective_target_id).map(|p| p.health).unwrap_or(0)
            }
            Some(t) if t.kind == Kind::Enemy => {
                self.enemies.get(&effective_target_id).map(|e| e.health).unwrap_or(0)
            }
            Some(_) => self.pets.get(&effective_target_id).map(|p| p.health).unwrap_or(0),
            None => 0,
        };

        // 9. One event per resolved attack
        let event = CombatEvent {
            source_id,
            target_id: effective_target_id,
            ability_id: ability.as_ref().map(|(def, _)| def.id),
            damage: total_damage,
            heal: total_heal,
            is_crit,
            is_stealth_attack,
            killed,
            target_health,
        };
        out.push(Outgoing::Broadcast(ServerMessage::Combat(event.clone())));
        Some(event)
    }

    /// Apply post-mitigation damage to any combatant, handling death.
    /// Returns the damage actually dealt and whether this hit killed.
    fn deal_damage(
        &mut self,
        source_id: u64,
        target_id: u64,
        damage: u32,
        rng: &mut impl Rng,
        out: &mut Vec<Outgoing>,
    ) -> (u32, bool) {
        if let Some(enemy) = self.enemies.get_mut(&target_id) {
            let dealt = enemy.take_damage(damage);
            let died = enemy.is_dead();
            if died {
                let credited = self.credited_player(source_id);
                self.on_enemy_killed(target_id, credited, rng, out);
            }
            return (dealt, died);
        }
        if let Some(player) = self.players.get_mut(&target_id) {
            let dealt = player.take_damage(damage);
            let died = player.is_dead();
            if died {
                // The death pass may respawn the player; `died` still
                // records that this hit killed
                self.process_player_death(target_id, out);
            }
            return (dealt, died);
        }
        if let Some(pet) = self.pets.get_mut(&target_id) {
            let dealt = pet.take_damage(damage);
            return (dealt, pet.is_dead());
        }
        (0, false)
    }

    fn heal_combatant(&mut self, id: u64, amount: u32) -> u32 {
        if let Some(player) = self.players.get_mut(&id) {
            return player.heal(amount);
        }
        if let Some(pet) = self.pets.get_mut(&id) {
            let healed = amount.min(pet.stats.max_health.saturating_sub(pet.health));
            pet.health += healed;
            return healed;
        }
        if let Some(enemy) = self.enemies.get_mut(&id) {
            let healed = amount.min(enemy.stats.max_health.saturating_sub(enemy.health));
            enemy.health += healed;
            return healed;
        }
        0
    }

    fn apply_status(&mut self, id: u64, spec: &StatusSpec) {
        if let Some(player) = self.players.get_mut(&id) {
            player.add_effect(spec);
        } else if let Some(enemy) = self.enemies.get_mut(&id) {
            enemy.add_effect(spec);
        }
    }

    /// The player credited with a kill: the attacker itself, or a pet's owner
    fn credited_player(&self, source_id: u64) -> Option<u64> {
        if self.players.contains_key(&source_id) {
            return Some(source_id);
        }
        self.pets.get(&source_id).map(|p| p.owner_id)
    }

    /// XP, loot, removal and room-clear bookkeeping for a dead enemy.
    pub(crate) fn on_enemy_killed(
        &mut self,
        enemy_id: u64,
        credited: Option<u64>,
        rng: &mut impl Rng,
        out: &mut Vec<Outgoing>,
    ) {
        let enemy = match self.enemies.remove(&enemy_id) {
            Some(e) => e,
            None => return,
        };
        self.clear_target_references(enemy_id);

        if let Some(player_id) = credited {
            if let Some(player) = self.players.get_mut(&player_id) {
                let levels = award_xp(player, enemy.xp_reward);
                if levels > 0 {
                    debug!("player {} reached level {}", player_id, player.level);
                }
            }

            // Blessed rooms roll at the rare tier
            let blessed = self
                .rooms
                .get(&enemy.room_id)
                .map(|r| r.modifier == Some(delve_shared::RoomModifier::Blessed))
                .unwrap_or(false);

            let loadout = self
                .players
                .get(&player_id)
                .map(|p| p.abilities.clone())
                .unwrap_or_default();
            let mut next_item_id = self.loot_id_cursor();
            let awards = loot::roll(
                self.floor,
                enemy.is_boss,
                enemy.is_rare || blessed,
                &loadout,
                &mut next_item_id,
                rng,
            );
            self.advance_loot_ids(next_item_id);
            self.apply_awards(player_id, enemy_id, enemy.position, awards, rng, out);
        }

        self.check_room_cleared(enemy.room_id);
    }

    /// Life loss, respawn or final removal for a dead player.
    pub(crate) fn process_player_death(&mut self, player_id: u64, out: &mut Vec<Outgoing>) {
        let start_room = self.start_room_id();
        let start = self
            .rooms
            .get(&start_room)
            .map(|r| r.center())
            .unwrap_or([0.0, 0.0]);

        let exhausted = {
            let player = match self.players.get_mut(&player_id) {
                Some(p) => p,
                None => return,
            };
            player.lives = player.lives.saturating_sub(1);
            player.effects.clear();
            player.target = None;
            player.move_dir = [0.0, 0.0];

            if player.lives > 0 {
                // A death costs a life and sends the player back to the
                // entrance at full strength
                player.alive = true;
                player.position = start;
                player.room_id = start_room;
                player.restore_fully();
                out.push(Outgoing::To(
                    player_id,
                    ServerMessage::SavePoint {
                        save: player.to_save(now_unix()),
                    },
                ));
                false
            } else {
                true
            }
        };
        self.clear_target_references(player_id);

        if exhausted {
            out.push(Outgoing::Broadcast(ServerMessage::CharacterExhausted {
                player_id,
            }));
            self.remove_player(player_id);
            out.push(Outgoing::Broadcast(ServerMessage::PlayerLeft { player_id }));
            if self.players.is_empty() {
                self.ended = true;
                out.push(Outgoing::Broadcast(ServerMessage::RunEnded { victory: false }));
            }
        }
    }

    // =========================================================================
    // Scheduled combat (auto-attacks, ground pulses, traps)
    // =========================================================================

    /// Swing basic attacks for every player whose timer is due.
    pub(crate) fn run_auto_attacks(&mut self, rng: &mut impl Rng, out: &mut Vec<Outgoing>) {
        let due: Vec<(u64, u64)> = self
            .players
            .values()
            .filter(|p| p.alive && p.attack_timer <= 0.0)
            .filter_map(|p| p.target.map(|t| (p.id, t)))
            .collect();

        for (player_id, target_id) in due {
            if self.resolve(player_id, target_id, None, rng, out).is_some() {
                if let Some(player) = self.players.get_mut(&player_id) {
                    player.attack_timer = BASE_ATTACK_INTERVAL;
                }
            }
        }
    }

    /// One damage pulse from a ground effect.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn apply_ground_pulse(
        &mut self,
        source_id: u64,
        position: [f32; 2],
        radius: f32,
        damage: u32,
        hostile: bool,
        rng: &mut impl Rng,
        out: &mut Vec<Outgoing>,
    ) {
        if hostile {
            let victims: Vec<u64> = self
                .players
                .values()
                .filter(|p| p.alive && distance(p.position, position) <= radius)
                .map(|p| p.id)
                .collect();
            for player_id in victims {
                self.apply_direct_damage_to_player(source_id, player_id, damage, true, rng, out);
            }
        } else {
            let victims: Vec<u64> = self
                .enemies
                .values()
                .filter(|e| !e.is_dead() && !e.hidden && distance(e.position, position) <= radius)
                .map(|e| e.id)
                .collect();
            for enemy_id in victims {
                let mitigation = self
                    .enemies
                    .get(&enemy_id)
                    .map(|e| e.derived_stats().resist)
                    .unwrap_or(0);
                let final_damage = mitigate(damage, mitigation);
                let target_health = {
                    let enemy = match self.enemies.get_mut(&enemy_id) {
                        Some(e) => e,
                        None => continue,
                    };
                    enemy.take_damage(final_damage);
                    enemy.health
                };
                out.push(Outgoing::Broadcast(ServerMessage::Combat(CombatEvent {
                    source_id,
                    target_id: enemy_id,
                    ability_id: None,
                    damage: Some(final_damage),
                    heal: None,
                    is_crit: false,
                    is_stealth_attack: false,
                    killed: target_health == 0,
                    target_health,
                })));
                if target_health == 0 {
                    let credited = self.credited_player(source_id);
                    self.on_enemy_killed(enemy_id, credited, rng, out);
                }
            }
        }
    }

    /// Environment damage (traps, hostile ground effects) against a player.
    pub(crate) fn apply_direct_damage_to_player(
        &mut self,
        source_id: u64,
        player_id: u64,
        raw: u32,
        magical: bool,
        _rng: &mut impl Rng,
        out: &mut Vec<Outgoing>,
    ) {
        let mitigation = match self.players.get(&player_id) {
            Some(p) if p.alive => {
                let stats = p.derived_stats();
                if magical {
                    stats.resist
                } else {
                    stats.armor
                }
            }
            _ => return,
        };
        let final_damage = mitigate(raw, mitigation);

        let (dealt, health, dead) = {
            let player = self.players.get_mut(&player_id).expect("checked above");
            let dealt = player.take_damage(final_damage);
            (dealt, player.health, player.is_dead())
        };

        out.push(Outgoing::Broadcast(ServerMessage::Combat(CombatEvent {
            source_id,
            target_id: player_id,
            ability_id: None,
            damage: Some(dealt),
            heal: None,
            is_crit: false,
            is_stealth_attack: false,
            killed: dead,
            target_health: health,
        })));

        if dead {
            self.process_player_death(player_id, out);
        }
    }
}

/// Basic-attack numbers for a combatant: small base plus full power weight
fn basic_attack_profile(
    source: &CombatantView,
    run: &Run,
    source_id: u64,
) -> (u32, f32, DamageSchool) {
    match source.kind {
        Kind::Player => {
            let caster = run
                .players
                .get(&source_id)
                .map(|p| p.class.is_caster())
                .unwrap_or(false);
            if caster {
                (2, 1.0, DamageSchool::Magical)
            } else {
                (2, 1.0, DamageSchool::Physical)
            }
        }
        Kind::Enemy => {
            let caster = run
                .enemies
                .get(&source_id)
                .map(|e| e.archetype == delve_shared::EnemyArchetype::Caster)
                .unwrap_or(false);
            if caster {
                (2, 1.0, DamageSchool::Magical)
            } else {
                (2, 1.0, DamageSchool::Physical)
            }
        }
        Kind::Pet => (2, 1.0, DamageSchool::Physical),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mitigation_is_diminishing_and_floored() {
        assert_eq!(mitigate(100, 0), 100);
        assert_eq!(mitigate(100, 100), 50);
        assert_eq!(mitigate(100, 300), 25);
        assert_eq!(mitigate(2, 10_000), 1, "a landing hit deals at least 1");
        assert_eq!(mitigate(0, 50), 0);

        // Monotonic in the mitigation stat
        let mut prev = u32::MAX;
        for armor in [0u32, 10, 50, 100, 250, 1000] {
            let reduced = mitigate(500, armor);
            assert!(reduced <= prev);
            prev = reduced;
        }
    }

    #[test]
    fn rank_scaling_is_additive_not_compounding() {
        assert_eq!(rank_mult(1), 1.0);
        assert!((rank_mult(2) - 1.15).abs() < 1e-6);
        assert!((rank_mult(5) - 1.6).abs() < 1e-6);
        assert!((rank_mult(10) - 2.35).abs() < 1e-6);
    }
}
