//! Loot: weighted drop rolls for enemies killed this tick.

use protocol::{ItemState, Vec2};

use crate::config::ItemEffect;
use crate::game::scene::{Scene, clamp_to_map, next_rng, next_rng_unit_float};
use crate::game::{EngineConfigs, sync};

/// The drop table: healing items with a positive weight.
fn build_drop_candidates(configs: &EngineConfigs) -> (Vec<(u32, u32)>, u32) {
    let mut candidates = Vec::with_capacity(configs.items.items.len());
    let mut total_weight = 0;
    for (&type_id, item) in &configs.items.items {
        if ItemEffect::parse(&item.effect) != ItemEffect::Heal || item.drop_weight == 0 {
            continue;
        }
        candidates.push((type_id, item.drop_weight));
        total_weight += item.drop_weight;
    }
    // Sorted so the weighted walk is deterministic for a given roll.
    candidates.sort_unstable();
    (candidates, total_weight)
}

fn pick_drop_type_id(
    rng_state: &mut u32,
    candidates: &[(u32, u32)],
    total_weight: u32,
) -> u32 {
    if candidates.is_empty() || total_weight == 0 {
        return 0;
    }
    let mut roll = next_rng(rng_state) % total_weight;
    for &(type_id, weight) in candidates {
        if roll < weight {
            return type_id;
        }
        roll -= weight;
    }
    candidates[candidates.len() - 1].0
}

/// Spawns one item at the corpse, bounded by `max_items_alive`.
fn spawn_drop_item(
    configs: &EngineConfigs,
    scene: &mut Scene,
    type_id: u32,
    x: f32,
    y: f32,
    max_items_alive: usize,
    dropped_items: &mut Vec<ItemState>,
    has_dirty: &mut bool,
) {
    if scene.items.len() >= max_items_alive {
        return;
    }
    let item_type = configs.items.resolve(type_id);
    let effect = ItemEffect::parse(&item_type.effect);
    if effect == ItemEffect::None
        && item_type.effect != "none"
        && !item_type.effect.is_empty()
        && !scene.unknown_item_type_warned
    {
        scene.unknown_item_type_warned = true;
        tracing::warn!(
            type_id = item_type.type_id,
            effect = %item_type.effect,
            "unrecognized item effect, treating as none"
        );
    }

    let (x, y) = clamp_to_map(&scene.config, x, y);
    let item_id = scene.next_item_id;
    scene.next_item_id += 1;

    let mut runtime = scene.item_pool.pop().unwrap_or_default();
    runtime.item_id = item_id;
    runtime.type_id = item_type.type_id;
    runtime.effect = effect;
    runtime.x = x;
    runtime.y = y;
    runtime.is_picked = false;
    runtime.force_sync_left = 1;
    runtime.dirty = false;
    runtime.dirty_queued = false;
    runtime.last_sync_x = x;
    runtime.last_sync_y = y;
    runtime.last_sync_is_picked = false;
    runtime.last_sync_type_id = item_type.type_id;

    sync::mark_item_dirty(&mut scene.dirty_item_ids, item_id, &mut runtime);
    scene.items.insert(item_id, runtime);

    dropped_items.push(ItemState {
        item_id,
        type_id: item_type.type_id,
        position: Vec2 { x, y },
        is_picked: false,
    });
    *has_dirty = true;
}

/// Rolls the table once per kill of this tick.
pub fn process_enemy_drop_stage(
    configs: &EngineConfigs,
    scene: &mut Scene,
    killed_enemy_ids: &[u32],
    dropped_items: &mut Vec<ItemState>,
    has_dirty: &mut bool,
) {
    if killed_enemy_ids.is_empty() {
        return;
    }

    let max_items_alive = if configs.items.max_items_alive > 0 {
        configs.items.max_items_alive as usize
    } else {
        64
    };
    let (candidates, total_weight) = build_drop_candidates(configs);
    if total_weight == 0 {
        return;
    }

    for &enemy_id in killed_enemy_ids {
        let Some((chance, x, y)) = scene.enemies.get(&enemy_id).and_then(|enemy| {
            if enemy.state.is_alive {
                return None;
            }
            let enemy_type = configs.enemy_types.resolve(enemy.state.type_id);
            Some((
                enemy_type.drop_chance.min(100),
                enemy.state.position.x,
                enemy.state.position.y,
            ))
        }) else {
            continue;
        };
        if chance == 0 {
            continue;
        }
        let roll = next_rng_unit_float(&mut scene.rng_state) * 100.0;
        if roll >= chance as f32 {
            continue;
        }
        let type_id = pick_drop_type_id(&mut scene.rng_state, &candidates, total_weight);
        if type_id == 0 {
            continue;
        }
        spawn_drop_item(
            configs,
            scene,
            type_id,
            x,
            y,
            max_items_alive,
            dropped_items,
            has_dirty,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ItemTypeConfig;
    use crate::game::test_support::{engine_configs, scene_with_players};

    fn kill_enemy(scene: &mut Scene, enemy_id: u32) {
        let enemy = scene.enemies.get_mut(&enemy_id).unwrap();
        enemy.state.is_alive = false;
        enemy.state.health = 0;
    }

    #[test]
    fn guaranteed_drop_spawns_an_item_at_the_corpse() {
        let mut configs = engine_configs();
        configs.enemy_types.enemies.get_mut(&1).unwrap().drop_chance = 100;
        let mut scene = scene_with_players(&configs, &[1]);
        let enemy_id = *scene.enemies.keys().next().unwrap();
        kill_enemy(&mut scene, enemy_id);
        let corpse = scene.enemies.get(&enemy_id).unwrap().state.position;

        let mut dropped = Vec::new();
        let mut has_dirty = false;
        process_enemy_drop_stage(&configs, &mut scene, &[enemy_id], &mut dropped, &mut has_dirty);

        assert_eq!(dropped.len(), 1);
        assert!(has_dirty);
        assert_eq!(scene.items.len(), 1);
        let item = scene.items.values().next().unwrap();
        assert_eq!(item.effect, ItemEffect::Heal);
        assert_eq!(item.force_sync_left, 1);
        assert!(item.dirty_queued);
        assert_eq!((item.x, item.y), (corpse.x, corpse.y));
    }

    #[test]
    fn zero_chance_types_never_drop() {
        let mut configs = engine_configs();
        configs.enemy_types.enemies.get_mut(&1).unwrap().drop_chance = 0;
        let mut scene = scene_with_players(&configs, &[1]);
        let enemy_id = *scene.enemies.keys().next().unwrap();
        kill_enemy(&mut scene, enemy_id);

        let mut dropped = Vec::new();
        let mut has_dirty = false;
        process_enemy_drop_stage(&configs, &mut scene, &[enemy_id], &mut dropped, &mut has_dirty);
        assert!(dropped.is_empty());
        assert!(scene.items.is_empty());
    }

    #[test]
    fn item_cap_bounds_the_field() {
        let mut configs = engine_configs();
        configs.enemy_types.enemies.get_mut(&1).unwrap().drop_chance = 100;
        configs.items.max_items_alive = 1;
        let mut scene = scene_with_players(&configs, &[1, 2]);
        let ids: Vec<u32> = scene.enemies.keys().take(2).copied().collect();
        for &id in &ids {
            kill_enemy(&mut scene, id);
        }

        let mut dropped = Vec::new();
        let mut has_dirty = false;
        process_enemy_drop_stage(&configs, &mut scene, &ids, &mut dropped, &mut has_dirty);
        assert_eq!(scene.items.len(), 1);
        assert_eq!(dropped.len(), 1);
    }

    #[test]
    fn only_heal_items_with_weight_are_candidates() {
        let mut configs = engine_configs();
        configs.items.items.insert(
            2,
            ItemTypeConfig {
                type_id: 2,
                name: "xp orb".into(),
                effect: "exp".into(),
                value: 5,
                drop_weight: 1000,
            },
        );
        configs.items.items.insert(
            3,
            ItemTypeConfig {
                type_id: 3,
                name: "unlisted kit".into(),
                effect: "heal".into(),
                value: 10,
                drop_weight: 0,
            },
        );
        let (candidates, total_weight) = build_drop_candidates(&configs);
        assert_eq!(candidates, vec![(1, 100)]);
        assert_eq!(total_weight, 100);
    }

    #[test]
    fn weighted_pick_walks_the_table() {
        let candidates = vec![(1, 10), (2, 90)];
        let mut ones = 0;
        let mut rng = 7;
        for _ in 0..1000 {
            match pick_drop_type_id(&mut rng, &candidates, 100) {
                1 => ones += 1,
                2 => {}
                other => panic!("unexpected type {other}"),
            }
        }
        // Roughly one in ten; generous bounds keep this robust.
        assert!((50..200).contains(&ones), "ones = {ones}");
    }
}
