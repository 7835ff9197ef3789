//! XP, leveling and difficulty scaling formulas.

use rand::Rng;

use crate::entities::ServerPlayer;

/// XP required to go from level `n-1` to level `n`... more precisely, the
/// threshold stored as `xp_to_next_level` while sitting at level `n-1`.
pub fn xp_for_level(level: u32) -> u64 {
    (100.0 * (level as f64).powf(1.5)).floor() as u64
}

/// Add XP to a player, looping over as many level-ups as the award spans.
///
/// Each level applies the class's fixed stat gains, fully restores health
/// and mana, and recomputes the next threshold. Returns the number of
/// levels gained.
pub fn award_xp(player: &mut ServerPlayer, amount: u64) -> u32 {
    player.xp += amount;

    let mut levels_gained = 0;
    while player.xp >= player.xp_to_next_level {
        player.xp -= player.xp_to_next_level;
        player.level += 1;
        levels_gained += 1;

        let gains = player.class.level_gains();
        player.base_stats.max_health += gains.max_health;
        player.base_stats.max_mana += gains.max_mana;
        player.base_stats.attack_power += gains.attack_power;
        player.base_stats.spell_power += gains.spell_power;
        player.base_stats.armor += gains.armor;
        player.base_stats.resist += gains.resist;

        // Level-up restores the full (derived) pools
        let derived = player.derived_stats();
        player.health = derived.max_health;
        player.mana = derived.max_mana;

        player.xp_to_next_level = xp_for_level(player.level + 1);
    }

    levels_gained
}

// =============================================================================
// Difficulty scaling
// =============================================================================

/// Enemy health multiplier on a floor
pub fn floor_health_mult(floor: u32) -> f32 {
    1.15f32.powi(floor as i32 - 1)
}

/// Enemy damage multiplier on a floor
pub fn floor_damage_mult(floor: u32) -> f32 {
    1.08f32.powi(floor as i32 - 1)
}

/// Loot quantity multiplier on a floor
pub fn floor_loot_mult(floor: u32) -> f32 {
    1.12f32.powi(floor as i32 - 1)
}

/// Expected average item power on a floor, used to normalize the gear
/// contribution to party scaling.
fn expected_item_power(floor: u32) -> f32 {
    20.0 * floor as f32
}

/// Party-size scaling multipliers for enemy stats.
///
/// `extra_players` is the party size beyond one. Gear contributes a capped
/// bonus proportional to the party's average equipped item power relative
/// to what the floor expects.
pub fn party_scaling(extra_players: u32, avg_item_power: f32, floor: u32) -> (f32, f32) {
    let gear_ratio = (avg_item_power / expected_item_power(floor)).clamp(0.0, 1.0);
    let health = 1.0 + extra_players as f32 * 0.5 + gear_ratio * 0.5;
    let damage = 1.0 + extra_players as f32 * 0.3 + gear_ratio * 0.25;
    (health, damage)
}

// =============================================================================
// Ability rank gating
// =============================================================================

/// Maximum ability rank
pub const MAX_RANK: u8 = 10;

/// An ability at rank `r` may only be upgraded once the party has reached
/// floor `r + 1`.
pub fn can_upgrade(rank: u8, floor: u32) -> bool {
    rank < MAX_RANK && floor >= rank as u32 + 1
}

/// Consolation payout when a rank-up is blocked by the floor gate:
/// scaled gold plus a 25% shot at a reroll token.
pub fn rank_up_fallback(floor: u32, rng: &mut impl Rng) -> (u64, bool) {
    const BASE_GOLD: f64 = 40.0;
    let gold = (BASE_GOLD * 1.1f64.powi(floor as i32 - 1)).floor() as u64;
    let token = rng.gen_bool(0.25);
    (gold, token)
}
