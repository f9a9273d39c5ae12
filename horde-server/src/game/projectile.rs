//! Projectile flight and continuous hit detection. Movement is integrated
//! per tick and collisions run against the swept segment, so fast shots
//! cannot tunnel through an enemy between two ticks.

use std::collections::BTreeMap;

use protocol::{
    EnemyAttackStateDelta, EnemyDied, PlayerLevelUp, ProjectileDespawn, Vec2,
};

use crate::game::combat::{self, CombatTickParams, ENEMY_COLLISION_RADIUS};
use crate::game::scene::{ENEMY_SPAWN_FORCE_SYNC_COUNT, EnemyRuntime, NAV_CELL_SIZE, Scene};
use crate::game::{EngineConfigs, enemy, sync};

/// Grid bucketing only pays off with enough enemies on the field.
const HIT_GRID_MIN_ENEMIES: usize = 16;

/// Uniform bucket grid over alive enemies, rebuilt per projectile stage.
struct EnemyHitGrid {
    enabled: bool,
    cells_x: i32,
    cells_y: i32,
    cell_size: f32,
    cells: Vec<Vec<u32>>,
}

fn build_enemy_hit_grid(scene: &Scene) -> EnemyHitGrid {
    let enabled = scene.enemies.len() >= HIT_GRID_MIN_ENEMIES && !scene.projectiles.is_empty();
    if !enabled {
        return EnemyHitGrid {
            enabled: false,
            cells_x: 0,
            cells_y: 0,
            cell_size: 0.0,
            cells: Vec::new(),
        };
    }

    let cell_size = NAV_CELL_SIZE as f32;
    let cells_x = ((scene.config.width as f32 / cell_size).ceil() as i32).max(1);
    let cells_y = ((scene.config.height as f32 / cell_size).ceil() as i32).max(1);
    let mut cells = vec![Vec::new(); (cells_x * cells_y) as usize];
    for (&enemy_id, enemy) in &scene.enemies {
        if !enemy.state.is_alive {
            continue;
        }
        let cx = ((enemy.state.position.x / cell_size).floor() as i32).clamp(0, cells_x - 1);
        let cy = ((enemy.state.position.y / cell_size).floor() as i32).clamp(0, cells_y - 1);
        cells[(cy * cells_x + cx) as usize].push(enemy_id);
    }
    EnemyHitGrid {
        enabled,
        cells_x,
        cells_y,
        cell_size,
        cells,
    }
}

/// Closest approach of the segment a->b to the circle center; returns the
/// segment parameter when they touch.
fn segment_circle_overlap(
    ax: f32,
    ay: f32,
    bx: f32,
    by: f32,
    cx: f32,
    cy: f32,
    radius: f32,
) -> Option<f32> {
    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;
    let mut t = 0.0;
    if len_sq > 1e-6 {
        t = (((cx - ax) * dx + (cy - ay) * dy) / len_sq).clamp(0.0, 1.0);
    }
    let closest_x = ax + dx * t;
    let closest_y = ay + dy * t;
    let dist_x = closest_x - cx;
    let dist_y = closest_y - cy;
    (dist_x * dist_x + dist_y * dist_y <= radius * radius).then_some(t)
}

/// Finds the first (smallest-t) alive enemy on the swept segment.
fn find_hit_enemy(
    enemies: &BTreeMap<u32, EnemyRuntime>,
    grid: &EnemyHitGrid,
    params: &CombatTickParams,
    prev_x: f32,
    prev_y: f32,
    next_x: f32,
    next_y: f32,
) -> Option<(u32, f32)> {
    let combined_radius = params.projectile_radius + ENEMY_COLLISION_RADIUS;
    let mut best: Option<(u32, f32)> = None;
    let mut test_enemy = |enemy_id: u32, enemy: &EnemyRuntime| {
        if !enemy.state.is_alive {
            return;
        }
        let Some(hit_t) = segment_circle_overlap(
            prev_x,
            prev_y,
            next_x,
            next_y,
            enemy.state.position.x,
            enemy.state.position.y,
            combined_radius,
        ) else {
            return;
        };
        if best.is_none_or(|(_, best_t)| hit_t < best_t) {
            best = Some((enemy_id, hit_t));
        }
    };

    if grid.enabled {
        // Only the cells the swept segment (plus radius) can touch.
        let min_x = prev_x.min(next_x) - combined_radius;
        let max_x = prev_x.max(next_x) + combined_radius;
        let min_y = prev_y.min(next_y) - combined_radius;
        let max_y = prev_y.max(next_y) + combined_radius;
        let min_cx = ((min_x / grid.cell_size).floor() as i32).clamp(0, grid.cells_x - 1);
        let max_cx = ((max_x / grid.cell_size).floor() as i32).clamp(0, grid.cells_x - 1);
        let min_cy = ((min_y / grid.cell_size).floor() as i32).clamp(0, grid.cells_y - 1);
        let max_cy = ((max_y / grid.cell_size).floor() as i32).clamp(0, grid.cells_y - 1);
        for cy in min_cy..=max_cy {
            for cx in min_cx..=max_cx {
                for &enemy_id in &grid.cells[(cy * grid.cells_x + cx) as usize] {
                    if let Some(enemy) = enemies.get(&enemy_id) {
                        test_enemy(enemy_id, enemy);
                    }
                }
            }
        }
    } else {
        for (&enemy_id, enemy) in enemies.iter() {
            test_enemy(enemy_id, enemy);
        }
    }
    best
}

/// Advances every projectile, resolves hits and removals. Expiry wins over
/// hits, hits over leaving the map.
#[allow(clippy::too_many_arguments)]
pub fn process_projectile_hit_stage(
    configs: &EngineConfigs,
    scene: &mut Scene,
    dt_seconds: f64,
    params: &CombatTickParams,
    enemy_dieds: &mut Vec<EnemyDied>,
    enemy_attack_states: &mut Vec<EnemyAttackStateDelta>,
    level_ups: &mut Vec<PlayerLevelUp>,
    projectile_despawns: &mut Vec<ProjectileDespawn>,
    killed_enemy_ids: &mut Vec<u32>,
    has_dirty: &mut bool,
) {
    let grid = build_enemy_hit_grid(scene);
    let map_w = scene.config.width as f32;
    let map_h = scene.config.height as f32;

    let Scene {
        players,
        enemies,
        projectiles,
        projectile_pool,
        dirty_player_ids,
        dirty_enemy_ids,
        unknown_enemy_type_warned,
        ..
    } = scene;

    let projectile_ids: Vec<u32> = projectiles.keys().copied().collect();
    for projectile_id in projectile_ids {
        let Some(proj) = projectiles.get_mut(&projectile_id) else {
            continue;
        };

        proj.remaining_seconds -= dt_seconds;
        let prev_x = proj.x;
        let prev_y = proj.y;
        let step = proj.speed * dt_seconds.max(0.0) as f32;
        let next_x = prev_x + proj.dir_x * step;
        let next_y = prev_y + proj.dir_y * step;
        proj.x = next_x;
        proj.y = next_y;

        let mut despawn_reason = None;
        let mut hit_enemy_id = 0;
        if proj.remaining_seconds <= 0.0 {
            despawn_reason = Some(protocol::PROJECTILE_DESPAWN_EXPIRED);
        } else if let Some((enemy_id, hit_t)) =
            find_hit_enemy(enemies, &grid, params, prev_x, prev_y, next_x, next_y)
        {
            // Park the projectile on the impact point for the despawn event.
            proj.x = prev_x + (next_x - prev_x) * hit_t;
            proj.y = prev_y + (next_y - prev_y) * hit_t;
            hit_enemy_id = enemy_id;
            despawn_reason = Some(protocol::PROJECTILE_DESPAWN_HIT);

            let damage = proj.damage;
            let owner_player_id = proj.owner_player_id;
            if let Some(enemy) = enemies.get_mut(&enemy_id) {
                apply_projectile_hit(
                    configs,
                    players,
                    dirty_player_ids,
                    dirty_enemy_ids,
                    enemy_id,
                    enemy,
                    owner_player_id,
                    damage,
                    enemy_dieds,
                    enemy_attack_states,
                    level_ups,
                    killed_enemy_ids,
                    unknown_enemy_type_warned,
                );
                *has_dirty = true;
            }
        } else if proj.x < 0.0 || proj.y < 0.0 || proj.x > map_w || proj.y > map_h {
            despawn_reason = Some(protocol::PROJECTILE_DESPAWN_OUT_OF_BOUNDS);
        }

        if let Some(reason) = despawn_reason {
            combat::despawn_projectile(proj, reason, hit_enemy_id, projectile_despawns);
            if let Some(spent) = projectiles.remove(&projectile_id) {
                projectile_pool.push(spent);
            }
        }
    }
}

/// Damage, attribution and the kill path: attack state reset, death event,
/// forced resync and experience for the killer.
#[allow(clippy::too_many_arguments)]
fn apply_projectile_hit(
    configs: &EngineConfigs,
    players: &mut BTreeMap<u32, crate::game::scene::PlayerRuntime>,
    dirty_player_ids: &mut Vec<u32>,
    dirty_enemy_ids: &mut Vec<u32>,
    enemy_id: u32,
    enemy: &mut EnemyRuntime,
    owner_player_id: u32,
    damage: i32,
    enemy_dieds: &mut Vec<EnemyDied>,
    enemy_attack_states: &mut Vec<EnemyAttackStateDelta>,
    level_ups: &mut Vec<PlayerLevelUp>,
    killed_enemy_ids: &mut Vec<u32>,
    unknown_enemy_type_warned: &mut bool,
) {
    let prev_hp = enemy.state.health;
    let dealt = damage.min(prev_hp.max(0));
    enemy.state.health = (prev_hp - damage).max(0);
    sync::mark_enemy_dirty(dirty_enemy_ids, enemy_id, enemy);

    if let Some(owner) = players.get_mut(&owner_player_id) {
        owner.damage_dealt += dealt.max(0) as u32;
    }

    if enemy.state.health > 0 {
        return;
    }

    enemy.state.is_alive = false;
    if enemy.is_attacking || enemy.attack_target_player_id != 0 {
        enemy.is_attacking = false;
        enemy.attack_target_player_id = 0;
        enemy_attack_states.push(EnemyAttackStateDelta {
            enemy_id,
            is_attacking: false,
            target_player_id: 0,
        });
    }
    enemy.dead_elapsed_seconds = 0.0;
    enemy.force_sync_left = enemy.force_sync_left.max(ENEMY_SPAWN_FORCE_SYNC_COUNT);
    sync::mark_enemy_dirty(dirty_enemy_ids, enemy_id, enemy);
    killed_enemy_ids.push(enemy_id);

    enemy_dieds.push(EnemyDied {
        enemy_id,
        killer_player_id: owner_player_id,
        wave_id: enemy.state.wave_id,
        position: Vec2 {
            x: enemy.state.position.x,
            y: enemy.state.position.y,
        },
    });

    if let Some(owner) = players.get_mut(&owner_player_id) {
        owner.kill_count += 1;
        let exp_reward = enemy::resolve_enemy_type(
            configs,
            enemy.state.type_id,
            unknown_enemy_type_warned,
        )
        .exp_reward
        .max(0) as u32;
        combat::grant_exp(dirty_player_ids, owner, exp_reward, level_ups);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combat::build_combat_tick_params;
    use crate::game::test_support::{engine_configs, scene_with_players};
    use crate::game::scene::ProjectileRuntime;

    /// Parks every seeded enemy except `enemy_id` far out of the flight
    /// paths the tests use.
    fn isolate_enemy(scene: &mut Scene, enemy_id: u32, x: f32, y: f32) {
        let ids: Vec<u32> = scene.enemies.keys().copied().collect();
        for id in ids {
            let enemy = scene.enemies.get_mut(&id).unwrap();
            enemy.state.position = if id == enemy_id {
                Vec2 { x, y }
            } else {
                Vec2 { x: 0.0, y: 0.0 }
            };
        }
    }

    fn shoot(scene: &mut Scene, x: f32, y: f32, dir_x: f32, dir_y: f32, damage: i32) -> u32 {
        let projectile_id = scene.next_projectile_id;
        scene.next_projectile_id += 1;
        scene.projectiles.insert(
            projectile_id,
            ProjectileRuntime {
                projectile_id,
                owner_player_id: 1,
                x,
                y,
                dir_x,
                dir_y,
                rotation: 0.0,
                speed: 420.0,
                damage,
                has_buff: false,
                buff_id: 0,
                is_friendly: true,
                remaining_seconds: 2.5,
            },
        );
        projectile_id
    }

    #[test]
    fn swept_hit_connects_even_when_the_step_overshoots() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        let enemy_id = *scene.enemies.keys().next().unwrap();
        // Enemy sits 10 units ahead; one 60 Hz step at speed 420 covers 7
        // units, so sweep a faster shot across it.
        isolate_enemy(&mut scene, enemy_id, 510.0, 500.0);
        let projectile_id = shoot(&mut scene, 500.0, 500.0, 1.0, 0.0, 5);
        scene.projectiles.get_mut(&projectile_id).unwrap().speed = 4200.0;

        let params = build_combat_tick_params(&configs, &scene, 1.0 / 60.0);
        let mut dieds = Vec::new();
        let mut attack_states = Vec::new();
        let mut level_ups = Vec::new();
        let mut despawns = Vec::new();
        let mut killed = Vec::new();
        let mut has_dirty = false;
        process_projectile_hit_stage(
            &configs,
            &mut scene,
            1.0 / 60.0,
            &params,
            &mut dieds,
            &mut attack_states,
            &mut level_ups,
            &mut despawns,
            &mut killed,
            &mut has_dirty,
        );

        assert_eq!(despawns.len(), 1);
        assert_eq!(despawns[0].reason, protocol::PROJECTILE_DESPAWN_HIT);
        assert_eq!(despawns[0].hit_enemy_id, enemy_id);
        assert!(!scene.projectiles.contains_key(&projectile_id));
        assert!(has_dirty);
        let enemy = scene.enemies.get(&enemy_id).unwrap();
        assert_eq!(enemy.state.health, enemy.state.max_health - 5);
        assert!(enemy.state.is_alive);
        assert!(dieds.is_empty());
    }

    #[test]
    fn lethal_hit_kills_rewards_and_raises_force_sync() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        let enemy_id = *scene.enemies.keys().next().unwrap();
        isolate_enemy(&mut scene, enemy_id, 505.0, 500.0);
        {
            let enemy = scene.enemies.get_mut(&enemy_id).unwrap();
            enemy.state.health = 3;
            enemy.force_sync_left = 0;
            enemy.is_attacking = true;
            enemy.attack_target_player_id = 1;
        }
        shoot(&mut scene, 500.0, 500.0, 1.0, 0.0, 10);

        let params = build_combat_tick_params(&configs, &scene, 1.0 / 60.0);
        let mut dieds = Vec::new();
        let mut attack_states = Vec::new();
        let mut level_ups = Vec::new();
        let mut despawns = Vec::new();
        let mut killed = Vec::new();
        let mut has_dirty = false;
        process_projectile_hit_stage(
            &configs,
            &mut scene,
            1.0 / 60.0,
            &params,
            &mut dieds,
            &mut attack_states,
            &mut level_ups,
            &mut despawns,
            &mut killed,
            &mut has_dirty,
        );

        assert_eq!(killed, vec![enemy_id]);
        assert_eq!(dieds.len(), 1);
        assert_eq!(dieds[0].killer_player_id, 1);
        // The melee state reset went out with the death.
        assert_eq!(attack_states.len(), 1);
        assert!(!attack_states[0].is_attacking);

        let enemy = scene.enemies.get(&enemy_id).unwrap();
        assert!(!enemy.state.is_alive);
        assert_eq!(enemy.state.health, 0);
        assert_eq!(enemy.force_sync_left, ENEMY_SPAWN_FORCE_SYNC_COUNT);

        let player = scene.players.get(&1).unwrap();
        assert_eq!(player.kill_count, 1);
        // Only the 3 hp that existed count as dealt damage.
        assert_eq!(player.damage_dealt, 3);
        assert_eq!(player.state.exp, 10);
    }

    #[test]
    fn expiry_beats_hits_and_bounds() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        let projectile_id = shoot(&mut scene, 500.0, 500.0, 1.0, 0.0, 5);
        scene
            .projectiles
            .get_mut(&projectile_id)
            .unwrap()
            .remaining_seconds = 0.001;

        let params = build_combat_tick_params(&configs, &scene, 1.0 / 60.0);
        let mut despawns = Vec::new();
        let mut has_dirty = false;
        process_projectile_hit_stage(
            &configs,
            &mut scene,
            1.0 / 60.0,
            &params,
            &mut Vec::new(),
            &mut Vec::new(),
            &mut Vec::new(),
            &mut despawns,
            &mut Vec::new(),
            &mut has_dirty,
        );
        assert_eq!(despawns.len(), 1);
        assert_eq!(despawns[0].reason, protocol::PROJECTILE_DESPAWN_EXPIRED);
    }

    #[test]
    fn out_of_bounds_projectiles_despawn() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        // Clear seeded enemies out of the flight path.
        let ids: Vec<u32> = scene.enemies.keys().copied().collect();
        for id in ids {
            scene.enemies.get_mut(&id).unwrap().state.is_alive = false;
        }
        let projectile_id = shoot(&mut scene, 1999.0, 1000.0, 1.0, 0.0, 5);
        scene.projectiles.get_mut(&projectile_id).unwrap().speed = 400.0;

        let params = build_combat_tick_params(&configs, &scene, 1.0 / 60.0);
        let mut despawns = Vec::new();
        let mut has_dirty = false;
        process_projectile_hit_stage(
            &configs,
            &mut scene,
            1.0 / 60.0,
            &params,
            &mut Vec::new(),
            &mut Vec::new(),
            &mut Vec::new(),
            &mut despawns,
            &mut Vec::new(),
            &mut has_dirty,
        );
        assert_eq!(despawns.len(), 1);
        assert_eq!(despawns[0].reason, protocol::PROJECTILE_DESPAWN_OUT_OF_BOUNDS);
    }

    #[test]
    fn segment_test_picks_the_earliest_overlap() {
        // Circle centered halfway along the segment.
        let t = segment_circle_overlap(0.0, 0.0, 100.0, 0.0, 50.0, 10.0, 16.0).unwrap();
        assert!((t - 0.5).abs() < 1e-3);
        // Too far off-axis: no hit.
        assert!(segment_circle_overlap(0.0, 0.0, 100.0, 0.0, 50.0, 40.0, 16.0).is_none());
        // Degenerate zero-length segment still tests the endpoint.
        assert!(segment_circle_overlap(5.0, 5.0, 5.0, 5.0, 6.0, 5.0, 2.0).is_some());
    }
}
