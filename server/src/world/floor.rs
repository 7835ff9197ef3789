//! Rooms and the floor-plan boundary.
//!
//! Layout generation proper is an external collaborator: the world only
//! consumes a `FloorPlan` (room rects, id adjacency, spawn markers).
//! `plan_floor` is the built-in stand-in for that collaborator.

use rand::Rng;

use delve_shared::{EnemyArchetype, ItemRarity, RoomKind, RoomModifier, RoomView};

/// Standard room dimensions used by the stand-in planner
const ROOM_W: f32 = 16.0;
const ROOM_H: f32 = 12.0;

/// A live room in the arena. Adjacency is by id only, so the graph can be
/// serialized and torn down without cycle tracking.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: u32,
    /// x, y, width, height
    pub rect: [f32; 4],
    pub kind: RoomKind,
    pub modifier: Option<RoomModifier>,
    pub cleared: bool,
    /// Set once any player has stepped inside (reveals ambushes)
    pub visited: bool,
    pub neighbors: Vec<u32>,
}

impl Room {
    pub fn contains(&self, pos: [f32; 2]) -> bool {
        pos[0] >= self.rect[0]
            && pos[0] <= self.rect[0] + self.rect[2]
            && pos[1] >= self.rect[1]
            && pos[1] <= self.rect[1] + self.rect[3]
    }

    pub fn center(&self) -> [f32; 2] {
        [
            self.rect[0] + self.rect[2] / 2.0,
            self.rect[1] + self.rect[3] / 2.0,
        ]
    }

    /// Clamp a position into this room's rect
    pub fn clamp(&self, pos: [f32; 2]) -> [f32; 2] {
        [
            pos[0].clamp(self.rect[0], self.rect[0] + self.rect[2]),
            pos[1].clamp(self.rect[1], self.rect[1] + self.rect[3]),
        ]
    }

    pub fn view(&self) -> RoomView {
        RoomView {
            id: self.id,
            rect: self.rect,
            kind: self.kind,
            modifier: self.modifier,
            cleared: self.cleared,
            neighbors: self.neighbors.clone(),
        }
    }
}

// =============================================================================
// Floor plan (collaborator boundary)
// =============================================================================

/// Enemy spawn marker inside a planned room
#[derive(Debug, Clone)]
pub struct EnemySpawn {
    pub archetype: EnemyArchetype,
    pub offset: [f32; 2],
    pub is_boss: bool,
    pub is_rare: bool,
    pub is_elite: bool,
}

/// One planned room
#[derive(Debug, Clone)]
pub struct PlannedRoom {
    pub id: u32,
    pub rect: [f32; 4],
    pub kind: RoomKind,
    pub modifier: Option<RoomModifier>,
    pub neighbors: Vec<u32>,
    pub enemies: Vec<EnemySpawn>,
    pub trap_offsets: Vec<[f32; 2]>,
    /// (offset, tier, locked-until-room-cleared)
    pub chests: Vec<([f32; 2], ItemRarity, bool)>,
    pub has_vendor: bool,
}

/// What the layout collaborator hands the world for one floor
#[derive(Debug, Clone)]
pub struct FloorPlan {
    pub rooms: Vec<PlannedRoom>,
}

const ARCHETYPES: [EnemyArchetype; 3] = [
    EnemyArchetype::Melee,
    EnemyArchetype::Ranged,
    EnemyArchetype::Caster,
];

/// Stand-in planner: a chain of rooms from start to boss, touching edge to
/// edge so movement can cross between them, with one rare room somewhere in
/// the middle hosting a vendor and a chest.
pub fn plan_floor(floor: u32, rng: &mut impl Rng) -> FloorPlan {
    let room_count = 4 + (floor as usize / 2).min(3) + rng.gen_range(0..2);
    let rare_index = rng.gen_range(1..room_count - 1);
    let mut rooms = Vec::with_capacity(room_count);

    for i in 0..room_count {
        let id = i as u32;
        let kind = if i == 0 {
            RoomKind::Start
        } else if i == room_count - 1 {
            RoomKind::Boss
        } else if i == rare_index {
            RoomKind::Rare
        } else {
            RoomKind::Normal
        };

        let modifier = match kind {
            RoomKind::Start => None,
            _ => match rng.gen_range(0..10) {
                0 => Some(RoomModifier::Cursed),
                1 => Some(RoomModifier::Blessed),
                2 => Some(RoomModifier::Burning),
                3 => Some(RoomModifier::Dark),
                _ => None,
            },
        };

        let mut neighbors = Vec::new();
        if i > 0 {
            neighbors.push(id - 1);
        }
        if i < room_count - 1 {
            neighbors.push(id + 1);
        }

        let mut enemies = Vec::new();
        match kind {
            RoomKind::Start => {}
            RoomKind::Boss => {
                enemies.push(EnemySpawn {
                    archetype: EnemyArchetype::Melee,
                    offset: [ROOM_W / 2.0, ROOM_H / 2.0],
                    is_boss: true,
                    is_rare: false,
                    is_elite: false,
                });
                for side in 0..2 {
                    enemies.push(EnemySpawn {
                        archetype: ARCHETYPES[rng.gen_range(0..ARCHETYPES.len())],
                        offset: [ROOM_W / 2.0 + (side as f32 - 0.5) * 6.0, ROOM_H / 4.0],
                        is_boss: false,
                        is_rare: false,
                        is_elite: true,
                    });
                }
            }
            RoomKind::Rare | RoomKind::Normal => {
                let count = rng.gen_range(2..=4);
                for _ in 0..count {
                    enemies.push(EnemySpawn {
                        archetype: ARCHETYPES[rng.gen_range(0..ARCHETYPES.len())],
                        offset: [
                            rng.gen_range(2.0..ROOM_W - 2.0),
                            rng.gen_range(2.0..ROOM_H - 2.0),
                        ],
                        is_boss: false,
                        is_rare: kind == RoomKind::Rare && rng.gen_bool(0.4),
                        is_elite: rng.gen_bool(0.15),
                    });
                }
            }
        }

        let trap_offsets = if kind != RoomKind::Start && rng.gen_bool(0.3) {
            vec![[rng.gen_range(2.0..ROOM_W - 2.0), rng.gen_range(2.0..ROOM_H - 2.0)]]
        } else {
            Vec::new()
        };

        let chests = match kind {
            RoomKind::Rare => vec![([ROOM_W - 2.0, 2.0], ItemRarity::Rare, true)],
            RoomKind::Boss => vec![([ROOM_W / 2.0, ROOM_H - 2.0], ItemRarity::Epic, true)],
            _ => Vec::new(),
        };

        rooms.push(PlannedRoom {
            id,
            rect: [i as f32 * ROOM_W, 0.0, ROOM_W, ROOM_H],
            kind,
            modifier,
            neighbors,
            enemies,
            trap_offsets,
            chests,
            has_vendor: kind == RoomKind::Rare,
        });
    }

    FloorPlan { rooms }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn plans_start_with_start_and_end_with_boss() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for floor in 1..=10 {
            let plan = plan_floor(floor, &mut rng);
            assert_eq!(plan.rooms.first().unwrap().kind, RoomKind::Start);
            assert_eq!(plan.rooms.last().unwrap().kind, RoomKind::Boss);
            assert!(plan.rooms.iter().filter(|r| r.kind == RoomKind::Boss).count() == 1);
        }
    }

    #[test]
    fn adjacency_is_symmetric_and_by_id() {
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        let plan = plan_floor(3, &mut rng);
        for room in &plan.rooms {
            for neighbor_id in &room.neighbors {
                let neighbor = plan
                    .rooms
                    .iter()
                    .find(|r| r.id == *neighbor_id)
                    .expect("neighbor ids resolve");
                assert!(neighbor.neighbors.contains(&room.id));
            }
        }
    }

    #[test]
    fn adjacent_rooms_share_an_edge() {
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let plan = plan_floor(2, &mut rng);
        for pair in plan.rooms.windows(2) {
            let left_edge = pair[0].rect[0] + pair[0].rect[2];
            assert!((left_edge - pair[1].rect[0]).abs() < 1e-6);
        }
    }

    #[test]
    fn room_clamp_keeps_positions_inside() {
        let room = Room {
            id: 0,
            rect: [0.0, 0.0, 16.0, 12.0],
            kind: RoomKind::Start,
            modifier: None,
            cleared: false,
            visited: false,
            neighbors: vec![],
        };
        let clamped = room.clamp([-5.0, 20.0]);
        assert!(room.contains(clamped));
    }
}
