//! Enemy lifecycle and AI: wave bookkeeping, corpse reaping, edge spawning
//! and the per-tick pursuit over A* waypoints.

use protocol::{EnemyState, Vec2};

use crate::config::EnemyTypeConfig;
use crate::game::nav::{self, NavGrid};
use crate::game::scene::{
    ENEMY_SPAWN_FORCE_SYNC_COUNT, ENEMY_SPAWN_INSET, NAV_CELL_SIZE, Scene, clamp_to_map, next_rng,
    next_rng_unit_float,
};
use crate::game::{EngineConfigs, sync};

/// Paths are recomputed on target change or after this long at the latest.
pub const ENEMY_REPLAN_INTERVAL_SECONDS: f64 = 0.25;
/// A waypoint closer than this counts as reached.
pub const ENEMY_WAYPOINT_REACH_RADIUS: f32 = 12.0;
/// Dead enemies linger this long so clients can play the death.
pub const ENEMY_DESPAWN_DELAY_SECONDS: f64 = 3.0;
/// Waypoints an enemy may advance past in a single tick.
const MAX_WAYPOINT_ADVANCES_PER_TICK: usize = 4;

/// Type lookup with fallback; an unknown id is logged once per scene so a
/// broken config cannot flood the journal.
pub fn resolve_enemy_type<'a>(
    configs: &'a EngineConfigs,
    type_id: u32,
    unknown_warned: &mut bool,
) -> &'a EnemyTypeConfig {
    if type_id != 0 && !configs.enemy_types.enemies.contains_key(&type_id) && !*unknown_warned {
        *unknown_warned = true;
        tracing::debug!(type_id, "unknown enemy type, falling back to default");
    }
    configs.enemy_types.resolve(type_id)
}

/// Uniform pick out of the sorted spawn candidates.
pub fn pick_spawn_enemy_type_id(configs: &EngineConfigs, rng_state: &mut u32) -> u32 {
    let ids = &configs.enemy_types.spawn_type_ids;
    if ids.is_empty() {
        return configs.enemy_types.resolve(0).type_id;
    }
    ids[next_rng(rng_state) as usize % ids.len()]
}

/// Places one enemy on a uniformly chosen map edge. Returns false when the
/// scene is at its enemy cap.
pub fn spawn_enemy_on_edge(configs: &EngineConfigs, scene: &mut Scene, type_id: u32) -> bool {
    let max_enemies_alive = if configs.server.max_enemies_alive > 0 {
        configs.server.max_enemies_alive as usize
    } else {
        256
    };
    if scene.enemies.len() >= max_enemies_alive {
        return false;
    }

    let enemy_type = resolve_enemy_type(configs, type_id, &mut scene.unknown_enemy_type_warned);
    let map_w = scene.config.width as f32;
    let map_h = scene.config.height as f32;
    let t = next_rng_unit_float(&mut scene.rng_state);
    let edge = next_rng(&mut scene.rng_state) % 4;
    let (x, y) = match edge {
        0 => (ENEMY_SPAWN_INSET, t * map_h),
        1 => ((map_w - ENEMY_SPAWN_INSET).max(0.0), t * map_h),
        2 => (t * map_w, ENEMY_SPAWN_INSET),
        _ => (t * map_w, (map_h - ENEMY_SPAWN_INSET).max(0.0)),
    };
    let (x, y) = clamp_to_map(&scene.config, x, y);

    let enemy_id = scene.next_enemy_id;
    scene.next_enemy_id += 1;

    // Recycle a pooled runtime if one is available; the path keeps its
    // allocation.
    let mut runtime = scene.enemy_pool.pop().unwrap_or_default();
    runtime.state = EnemyState {
        enemy_id,
        type_id: enemy_type.type_id,
        position: Vec2 { x, y },
        health: enemy_type.max_health,
        max_health: enemy_type.max_health,
        is_alive: true,
        wave_id: scene.wave_id,
        is_friendly: false,
    };
    runtime.target_player_id = 0;
    runtime.replan_elapsed = 0.0;
    runtime.path.clear();
    runtime.path_index = 0;
    runtime.is_attacking = false;
    runtime.attack_target_player_id = 0;
    runtime.attack_cooldown_seconds = 0.0;
    runtime.force_sync_left = ENEMY_SPAWN_FORCE_SYNC_COUNT;
    runtime.dead_elapsed_seconds = 0.0;
    runtime.dirty = false;
    runtime.dirty_queued = false;
    runtime.last_sync_position = runtime.state.position;
    runtime.last_sync_health = runtime.state.health;
    runtime.last_sync_is_alive = true;

    sync::mark_enemy_dirty(&mut scene.dirty_enemy_ids, enemy_id, &mut runtime);
    scene.enemies.insert(enemy_id, runtime);
    true
}

/// Wave bookkeeping, corpse reaping, spawn pacing and pursuit. Runs once per
/// active tick before the combat stages.
pub fn process_enemies(
    configs: &EngineConfigs,
    scene: &mut Scene,
    dt_seconds: f64,
    has_dirty: &mut bool,
) {
    let wave_interval = if configs.server.wave_interval_seconds > 0.0 {
        configs.server.wave_interval_seconds as f64
    } else {
        15.0
    };
    scene.wave_id = (1 + (scene.elapsed / wave_interval) as u32).max(1);

    let alive_players = scene.alive_player_count();

    // Reap corpses that both finished their stay and drained their forced
    // resyncs.
    let mut reaped: Vec<u32> = Vec::new();
    for (&enemy_id, enemy) in scene.enemies.iter_mut() {
        if enemy.state.is_alive {
            continue;
        }
        enemy.dead_elapsed_seconds += dt_seconds;
        if enemy.force_sync_left == 0 && enemy.dead_elapsed_seconds >= ENEMY_DESPAWN_DELAY_SECONDS {
            reaped.push(enemy_id);
        }
    }
    for enemy_id in reaped {
        if let Some(enemy) = scene.enemies.remove(&enemy_id) {
            scene.enemy_pool.push(enemy);
        }
    }

    let mut alive_enemies = scene
        .enemies
        .values()
        .filter(|enemy| enemy.state.is_alive)
        .count();
    let max_enemies_alive = if configs.server.max_enemies_alive > 0 {
        configs.server.max_enemies_alive as usize
    } else {
        256
    };
    let max_spawn_per_tick = if configs.server.max_enemy_spawn_per_tick > 0 {
        configs.server.max_enemy_spawn_per_tick as usize
    } else {
        4
    };

    if alive_players > 0 {
        let base = configs.server.enemy_spawn_base_per_second.max(0.0) as f64;
        let per_player = configs.server.enemy_spawn_per_player_per_second.max(0.0) as f64;
        let wave_growth = configs.server.enemy_spawn_wave_growth_per_second.max(0.0) as f64;
        let wave_boost = scene.wave_id.saturating_sub(1) as f64;
        let spawn_rate =
            (base + per_player * alive_players as f64 + wave_growth * wave_boost).clamp(0.0, 30.0);
        let spawn_interval = if spawn_rate > 1e-6 {
            1.0 / spawn_rate
        } else {
            0.0
        };

        scene.spawn_elapsed += dt_seconds;
        let mut spawned = 0usize;
        while spawn_interval > 0.0
            && scene.spawn_elapsed >= spawn_interval
            && alive_enemies < max_enemies_alive
            && spawned < max_spawn_per_tick
        {
            scene.spawn_elapsed -= spawn_interval;
            let type_id = pick_spawn_enemy_type_id(configs, &mut scene.rng_state);
            if spawn_enemy_on_edge(configs, scene, type_id) {
                alive_enemies += 1;
                spawned += 1;
                *has_dirty = true;
            } else {
                break;
            }
        }
    }

    pursue_players(configs, scene, dt_seconds, has_dirty);
}

/// Every living enemy chases its nearest living player along A* waypoints.
fn pursue_players(
    configs: &EngineConfigs,
    scene: &mut Scene,
    dt_seconds: f64,
    has_dirty: &mut bool,
) {
    let Scene {
        config,
        players,
        enemies,
        dirty_enemy_ids,
        nav_came_from,
        nav_g_score,
        nav_closed,
        nav_cells_x,
        nav_cells_y,
        unknown_enemy_type_warned,
        ..
    } = scene;

    let grid = NavGrid {
        cells_x: *nav_cells_x,
        cells_y: *nav_cells_y,
        cell_size: NAV_CELL_SIZE,
    };
    let reach_sq = ENEMY_WAYPOINT_REACH_RADIUS * ENEMY_WAYPOINT_REACH_RADIUS;

    let nearest_player = |x: f32, y: f32| -> u32 {
        let mut best_id = 0;
        let mut best_dist_sq = f32::INFINITY;
        for (&player_id, player) in players.iter() {
            if !player.state.is_alive {
                continue;
            }
            let dx = player.state.position.x - x;
            let dy = player.state.position.y - y;
            let dist_sq = dx * dx + dy * dy;
            if dist_sq < best_dist_sq {
                best_dist_sq = dist_sq;
                best_id = player_id;
            }
        }
        best_id
    };

    for (&enemy_id, enemy) in enemies.iter_mut() {
        if !enemy.state.is_alive {
            continue;
        }

        enemy.attack_cooldown_seconds = (enemy.attack_cooldown_seconds - dt_seconds).max(0.0);

        let prev_x = enemy.state.position.x;
        let prev_y = enemy.state.position.y;

        let target_id = nearest_player(prev_x, prev_y);
        if target_id == 0 {
            continue;
        }
        let Some(target) = players.get(&target_id) else {
            continue;
        };
        let target_x = target.state.position.x;
        let target_y = target.state.position.y;

        let target_changed = enemy.target_player_id != target_id;
        enemy.replan_elapsed += dt_seconds;
        if target_changed || enemy.replan_elapsed >= ENEMY_REPLAN_INTERVAL_SECONDS {
            enemy.target_player_id = target_id;
            enemy.replan_elapsed = 0.0;

            let start_cell = grid.world_to_cell(prev_x, prev_y);
            let goal_cell = grid.world_to_cell(target_x, target_y);
            let mut path = std::mem::take(&mut enemy.path);
            let found = start_cell != goal_cell
                && nav::find_path(
                    &grid, start_cell, goal_cell, &mut path, nav_came_from, nav_g_score,
                    nav_closed,
                );
            if !found {
                path.clear();
            }
            enemy.path = path;
            enemy.path_index = 0;
        }

        // Advance past waypoints already within reach, then steer at the
        // next one (or straight at the target once the path is spent).
        let select_goal = |path: &[(i32, i32)], index: usize| -> (f32, f32) {
            if let Some(&(cx, cy)) = path.get(index) {
                let (wx, wy) = grid.cell_center_world(cx, cy);
                clamp_to_map(config, wx, wy)
            } else {
                (target_x, target_y)
            }
        };
        let mut goal = select_goal(&enemy.path, enemy.path_index);
        for _ in 0..MAX_WAYPOINT_ADVANCES_PER_TICK {
            let dx = goal.0 - prev_x;
            let dy = goal.1 - prev_y;
            if enemy.path_index < enemy.path.len() && dx * dx + dy * dy <= reach_sq {
                enemy.path_index += 1;
                goal = select_goal(&enemy.path, enemy.path_index);
                continue;
            }
            break;
        }

        let dx = goal.0 - prev_x;
        let dy = goal.1 - prev_y;
        let dist_sq = dx * dx + dy * dy;
        if dist_sq > 1e-6 {
            let inv_len = 1.0 / dist_sq.sqrt();
            let enemy_type =
                resolve_enemy_type(configs, enemy.state.type_id, unknown_enemy_type_warned);
            let speed = if enemy_type.move_speed > 0.0 {
                enemy_type.move_speed
            } else {
                60.0
            };
            let (new_x, new_y) = clamp_to_map(
                config,
                prev_x + dx * inv_len * speed * dt_seconds as f32,
                prev_y + dy * inv_len * speed * dt_seconds as f32,
            );
            if (new_x - prev_x).abs() > 1e-4 || (new_y - prev_y).abs() > 1e-4 {
                enemy.state.position = Vec2 { x: new_x, y: new_y };
                sync::mark_enemy_dirty(dirty_enemy_ids, enemy_id, enemy);
            }
        }

        if enemy.dirty || enemy.force_sync_left > 0 {
            *has_dirty = true;
        }
    }
}
