//! Vendor services: healing, potions, ability rank-ups and equipment
//! rerolls.

use log::debug;
use rand::Rng;

use delve_shared::{
    BackpackEntry, Potion, PotionKind, ServerMessage, ServiceQuote, VendorService,
};

use crate::entities::distance;
use crate::loot;
use crate::progression::{can_upgrade, rank_up_fallback, MAX_RANK};
use crate::world::{Outgoing, Run};

/// Interaction reach, matching chests
const VENDOR_RANGE: f32 = 2.5;

fn heal_cost(floor: u32) -> u64 {
    25 * floor as u64
}

fn potion_cost(floor: u32) -> u64 {
    (30.0 * 1.1f64.powi(floor as i32 - 1)) as u64
}

fn rank_up_cost(floor: u32, rank: u8) -> u64 {
    (50.0 * 1.1f64.powi(floor as i32 - 1)) as u64 * rank as u64
}

impl Run {
    fn vendor_reachable(&self, player_id: u64, vendor_id: u64) -> bool {
        let player = match self.players.get(&player_id) {
            Some(p) if p.alive => p,
            _ => return false,
        };
        self.vendors
            .get(&vendor_id)
            .map(|v| distance(player.position, v.position) <= VENDOR_RANGE)
            .unwrap_or(false)
    }

    /// Quote the services this vendor offers the asking player.
    pub(crate) fn handle_interact_vendor(
        &mut self,
        player_id: u64,
        vendor_id: u64,
        out: &mut Vec<Outgoing>,
    ) {
        if !self.vendor_reachable(player_id, vendor_id) {
            return;
        }
        let player = match self.players.get(&player_id) {
            Some(p) => p,
            None => return,
        };

        let mut services = vec![
            ServiceQuote {
                service: VendorService::Heal,
                gold_cost: heal_cost(self.floor),
                token_cost: 0,
            },
            ServiceQuote {
                service: VendorService::BuyPotion,
                gold_cost: potion_cost(self.floor),
                token_cost: 0,
            },
        ];
        for slot in &player.abilities {
            if slot.rank < MAX_RANK {
                services.push(ServiceQuote {
                    service: VendorService::RankUpAbility {
                        ability_id: slot.ability_id,
                    },
                    gold_cost: rank_up_cost(self.floor, slot.rank),
                    token_cost: 0,
                });
            }
        }
        for slot in delve_shared::EquipSlot::ALL {
            if player.equipment.get(slot).is_some() {
                services.push(ServiceQuote {
                    service: VendorService::RerollEquipped { slot },
                    gold_cost: 0,
                    token_cost: 1,
                });
            }
        }

        out.push(Outgoing::To(
            player_id,
            ServerMessage::VendorServices {
                vendor_id,
                services,
            },
        ));
    }

    /// Execute a purchase. Unaffordable or out-of-range requests answer
    /// with a failed `PurchaseResult` rather than silence, since the client
    /// explicitly asked for a transaction.
    pub(crate) fn handle_purchase(
        &mut self,
        player_id: u64,
        vendor_id: u64,
        service: VendorService,
        rng: &mut impl Rng,
        out: &mut Vec<Outgoing>,
    ) {
        if !self.vendor_reachable(player_id, vendor_id) {
            return;
        }

        let floor = self.floor;
        let result = match service {
            VendorService::Heal => {
                let player = self.players.get_mut(&player_id).expect("reachable implies present");
                let cost = heal_cost(floor);
                if player.gold < cost {
                    Err("not enough gold")
                } else {
                    player.gold -= cost;
                    player.restore_fully();
                    Ok("restored".to_string())
                }
            }
            VendorService::BuyPotion => {
                let cost = potion_cost(floor);
                let affordable = self
                    .players
                    .get(&player_id)
                    .map(|p| p.gold >= cost)
                    .unwrap_or(false);
                if !affordable {
                    Err("not enough gold")
                } else {
                    let id = self.alloc_id();
                    let player =
                        self.players.get_mut(&player_id).expect("reachable implies present");
                    let potion = Potion {
                        id,
                        kind: PotionKind::Healing(40 + floor * 10),
                    };
                    if !player.add_to_backpack(BackpackEntry::Potion(potion)) {
                        Err("backpack full")
                    } else {
                        player.gold -= cost;
                        Ok("potion bought".to_string())
                    }
                }
            }
            VendorService::RankUpAbility { ability_id } => {
                self.purchase_rank_up(player_id, ability_id, rng)
            }
            VendorService::RerollEquipped { slot } => {
                let player = self.players.get_mut(&player_id).expect("reachable implies present");
                if player.reroll_tokens == 0 {
                    Err("no reroll tokens")
                } else {
                    match player.equipment.get_mut(slot) {
                        Some(item) => {
                            // Identity survives a reroll; only the bonuses move
                            item.bonuses =
                                loot::roll_bonuses(slot, item.item_level, item.rarity, rng);
                            let name = item.name.clone();
                            player.reroll_tokens -= 1;
                            player.clamp_pools();
                            Ok(format!("rerolled {}", name))
                        }
                        None => Err("nothing equipped there"),
                    }
                }
            }
        };

        let (success, message) = match result {
            Ok(message) => (true, message),
            Err(reason) => {
                debug!("player {} purchase rejected: {}", player_id, reason);
                (false, reason.to_string())
            }
        };
        out.push(Outgoing::To(
            player_id,
            ServerMessage::PurchaseResult { success, message },
        ));
    }

    /// Rank up through the floor gate; a blocked upgrade still charges
    /// nothing and converts into the fallback payout.
    fn purchase_rank_up(
        &mut self,
        player_id: u64,
        ability_id: u32,
        rng: &mut impl Rng,
    ) -> Result<String, &'static str> {
        let floor = self.floor;
        let player = self.players.get_mut(&player_id).expect("reachable implies present");
        let rank = match player.ability_slot(ability_id) {
            Some(slot) => slot.rank,
            None => return Err("unknown ability"),
        };
        if rank >= MAX_RANK {
            return Err("already at max rank");
        }
        let cost = rank_up_cost(floor, rank);
        if player.gold < cost {
            return Err("not enough gold");
        }
        player.gold -= cost;

        if can_upgrade(rank, floor) {
            let slot = player.ability_slot_mut(ability_id).expect("checked above");
            slot.rank += 1;
            Ok(format!("rank {}", rank + 1))
        } else {
            // Floor gate unmet: deterministic consolation instead
            let (gold, token) = rank_up_fallback(floor, rng);
            player.gold += gold;
            if token {
                player.reroll_tokens += 1;
            }
            Ok("rank locked by floor; consolation paid".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::ServerPlayer;
    use delve_shared::{ClassId, EquipSlot, ItemRarity};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn run_with_vendor() -> (Run, u64, u64) {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let mut run = Run::new(1, 1);
        run.load_floor(1, &mut rng);
        let player = ServerPlayer::new_character(1, "Vena".into(), ClassId::Mage);
        run.add_player(player);

        // Park the player on top of a vendor
        let vendor_id = *run.vendors.keys().next().expect("floor has a vendor");
        let vendor_pos = run.vendors[&vendor_id].position;
        let vendor_room = run.vendors[&vendor_id].room_id;
        let player = run.players.get_mut(&1).unwrap();
        player.position = vendor_pos;
        player.room_id = vendor_room;
        (run, 1, vendor_id)
    }

    #[test]
    fn services_are_quoted_to_the_asking_player() {
        let (mut run, player_id, vendor_id) = run_with_vendor();
        let mut out = Vec::new();
        run.handle_interact_vendor(player_id, vendor_id, &mut out);

        let quoted = out.iter().any(|o| {
            matches!(
                o,
                Outgoing::To(id, ServerMessage::VendorServices { services, .. })
                    if *id == player_id && !services.is_empty()
            )
        });
        assert!(quoted);
    }

    #[test]
    fn heal_purchase_charges_gold_and_restores() {
        let (mut run, player_id, vendor_id) = run_with_vendor();
        let mut rng = ChaCha8Rng::seed_from_u64(22);
        {
            let player = run.players.get_mut(&player_id).unwrap();
            player.gold = 100;
            player.health = 1;
        }

        let mut out = Vec::new();
        run.handle_purchase(player_id, vendor_id, VendorService::Heal, &mut rng, &mut out);

        let player = &run.players[&player_id];
        assert_eq!(player.gold, 100 - heal_cost(1));
        assert_eq!(player.health, player.derived_stats().max_health);
    }

    #[test]
    fn purchases_without_gold_fail_cleanly() {
        let (mut run, player_id, vendor_id) = run_with_vendor();
        let mut rng = ChaCha8Rng::seed_from_u64(23);

        let mut out = Vec::new();
        run.handle_purchase(player_id, vendor_id, VendorService::Heal, &mut rng, &mut out);

        let failed = out.iter().any(|o| {
            matches!(
                o,
                Outgoing::To(_, ServerMessage::PurchaseResult { success: false, .. })
            )
        });
        assert!(failed);
        assert_eq!(run.players[&player_id].health, run.players[&player_id].derived_stats().max_health);
    }

    #[test]
    fn gated_rank_up_pays_fallback_instead() {
        let (mut run, player_id, vendor_id) = run_with_vendor();
        let mut rng = ChaCha8Rng::seed_from_u64(24);
        run.players.get_mut(&player_id).unwrap().gold = 1_000;

        // Floor 1 gates every rank-up (rank 1 needs floor 2)
        let ability_id = run.players[&player_id].abilities[0].ability_id;
        let mut out = Vec::new();
        run.handle_purchase(
            player_id,
            vendor_id,
            VendorService::RankUpAbility { ability_id },
            &mut rng,
            &mut out,
        );

        let player = &run.players[&player_id];
        assert_eq!(player.abilities[0].rank, 1, "gate must hold on floor 1");
        // Cost charged, consolation gold paid back
        assert_ne!(player.gold, 1_000);
    }

    #[test]
    fn reroll_preserves_item_identity() {
        let (mut run, player_id, vendor_id) = run_with_vendor();
        let mut rng = ChaCha8Rng::seed_from_u64(25);
        {
            let player = run.players.get_mut(&player_id).unwrap();
            player.reroll_tokens = 1;
            let mut item_rng = ChaCha8Rng::seed_from_u64(99);
            let mut next_id = 5_000;
            let mut item = loot::generate_item(3, ItemRarity::Rare, &mut next_id, &mut item_rng);
            item.slot = EquipSlot::Weapon;
            player.equipment.replace(item);
        }
        let before = run.players[&player_id].equipment.get(EquipSlot::Weapon).unwrap().clone();

        let mut out = Vec::new();
        run.handle_purchase(
            player_id,
            vendor_id,
            VendorService::RerollEquipped { slot: EquipSlot::Weapon },
            &mut rng,
            &mut out,
        );

        let after = run.players[&player_id].equipment.get(EquipSlot::Weapon).unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.rarity, before.rarity);
        assert_eq!(after.item_level, before.item_level);
        assert_eq!(run.players[&player_id].reroll_tokens, 0);
    }
}
