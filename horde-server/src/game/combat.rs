//! The combat pipeline: player fire, projectile flight, drops, melee and the
//! game-over check, in that order every active tick.

use protocol::{
    EnemyDied, EnemyAttackStateDelta, GameOver, PlayerHurt, PlayerLevelUp, PlayerScore,
    ProjectileDespawn, ProjectileState, Vec2,
};

use crate::game::scene::{
    PlayerRuntime, ProjectileRuntime, Scene, degrees_from_direction, next_rng_unit_float,
};
use crate::game::{EngineConfigs, drops, melee, projectile, sync};

/// Player body radius for melee range defaults.
pub const PLAYER_COLLISION_RADIUS: f32 = 18.0;
/// Enemy body radius for projectile and melee contact.
pub const ENEMY_COLLISION_RADIUS: f32 = 16.0;

/// Locked fire targets are re-evaluated at this cadence.
const PLAYER_TARGET_REFRESH_INTERVAL_SECONDS: f64 = 0.2;
/// Stride for the rate limited fire-direction fallback logs.
const ATTACK_DIR_FALLBACK_LOG_STRIDE_TICKS: u64 = 60;
/// Stride for the rate limited projectile spawn logs.
const PROJECTILE_SPAWN_LOG_STRIDE_TICKS: u64 = 60;

// Muzzle offset from the player center; the side flips with the fire
// direction.
const PROJECTILE_MOUTH_OFFSET_UP: f32 = 18.0;
const PROJECTILE_MOUTH_OFFSET_SIDE: f32 = 36.0;

/// Fire interval clamp fallbacks when the config does not set its own.
const MIN_ATTACK_INTERVAL_SECONDS: f64 = 0.05;
const MAX_ATTACK_INTERVAL_SECONDS: f64 = 2.0;

/// Per-tick combat constants derived from the config, clamped to sane
/// ranges once instead of at every use.
pub struct CombatTickParams {
    pub projectile_speed: f32,
    pub projectile_radius: f32,
    pub projectile_ttl_seconds: f64,
    pub projectile_ttl_ms: u32,
    pub max_shots_per_tick: u32,
    pub attack_min_interval: f64,
    pub attack_max_interval: f64,
    /// Catch-up shots are only allowed on mild hitches; a huge dt fires one.
    pub allow_catchup: bool,
}

pub fn build_combat_tick_params(
    configs: &EngineConfigs,
    scene: &Scene,
    dt_seconds: f64,
) -> CombatTickParams {
    let server = &configs.server;
    let projectile_speed = if server.projectile_speed > 0.0 {
        server.projectile_speed
    } else {
        420.0
    }
    .clamp(1.0, 5000.0);
    let projectile_radius = if server.projectile_radius > 0.0 {
        server.projectile_radius
    } else {
        6.0
    }
    .clamp(0.5, 128.0);
    let projectile_ttl_seconds = if server.projectile_ttl_seconds > 0.0 {
        server.projectile_ttl_seconds as f64
    } else {
        2.5
    }
    .clamp(0.05, 30.0);
    let attack_min_interval = if server.projectile_attack_min_interval_seconds > 0.0 {
        server.projectile_attack_min_interval_seconds as f64
    } else {
        MIN_ATTACK_INTERVAL_SECONDS
    }
    .max(1e-3);
    let attack_max_interval = if server.projectile_attack_max_interval_seconds > 0.0 {
        server.projectile_attack_max_interval_seconds as f64
    } else {
        MAX_ATTACK_INTERVAL_SECONDS
    }
    .max(attack_min_interval);

    let tick_interval = if scene.tick_interval > 0.0 {
        scene.tick_interval
    } else if server.tick_rate > 0 {
        1.0 / server.tick_rate as f64
    } else {
        1.0 / 60.0
    };

    CombatTickParams {
        projectile_speed,
        projectile_radius,
        projectile_ttl_seconds,
        projectile_ttl_ms: ((projectile_ttl_seconds * 1000.0).round() as i64).clamp(1, 30_000)
            as u32,
        max_shots_per_tick: if server.projectile_max_shots_per_tick > 0 {
            server.projectile_max_shots_per_tick
        } else {
            4
        }
        .clamp(1, 64),
        attack_min_interval,
        attack_max_interval,
        allow_catchup: dt_seconds <= tick_interval * 1.5,
    }
}

/// Shots per second into a cooldown interval, clamped at both ends.
/// `attack_speed` 0 behaves like 1.
pub fn player_attack_interval_seconds(
    attack_speed: u32,
    min_interval: f64,
    max_interval: f64,
) -> f64 {
    if attack_speed == 0 {
        return 1.0_f64.clamp(min_interval, max_interval);
    }
    (1.0 / attack_speed as f64).clamp(min_interval, max_interval)
}

/// Runs all combat stages and collects their events.
#[allow(clippy::too_many_arguments)]
pub fn process_combat_and_projectiles(
    configs: &EngineConfigs,
    scene: &mut Scene,
    dt_seconds: f64,
    player_hurts: &mut Vec<PlayerHurt>,
    enemy_dieds: &mut Vec<EnemyDied>,
    enemy_attack_states: &mut Vec<EnemyAttackStateDelta>,
    level_ups: &mut Vec<PlayerLevelUp>,
    game_over: &mut Option<GameOver>,
    projectile_spawns: &mut Vec<ProjectileState>,
    projectile_despawns: &mut Vec<ProjectileDespawn>,
    dropped_items: &mut Vec<protocol::ItemState>,
    has_dirty: &mut bool,
) {
    let params = build_combat_tick_params(configs, scene, dt_seconds);
    let mut killed_enemy_ids = Vec::with_capacity(scene.enemies.len());

    process_player_fire_stage(scene, dt_seconds, &params, projectile_spawns);
    projectile::process_projectile_hit_stage(
        configs,
        scene,
        dt_seconds,
        &params,
        enemy_dieds,
        enemy_attack_states,
        level_ups,
        projectile_despawns,
        &mut killed_enemy_ids,
        has_dirty,
    );
    drops::process_enemy_drop_stage(configs, scene, &killed_enemy_ids, dropped_items, has_dirty);
    melee::process_enemy_melee_stage(configs, scene, player_hurts, enemy_attack_states, has_dirty);
    update_game_over(scene, game_over);
}

pub fn rotation_dir(rotation_deg: f32) -> (f32, f32) {
    let rad = rotation_deg.to_radians();
    (rad.cos(), rad.sin())
}

/// Experience award plus the level-up loop; one kill can carry a player over
/// several levels.
pub fn grant_exp(
    dirty_player_ids: &mut Vec<u32>,
    player: &mut PlayerRuntime,
    exp_reward: u32,
    level_ups: &mut Vec<PlayerLevelUp>,
) {
    if exp_reward == 0 {
        return;
    }
    player.state.exp += exp_reward;
    let player_id = player.state.player_id;
    sync::mark_player_dirty(dirty_player_ids, player_id, player, true);

    while player.state.exp_to_next > 0 && player.state.exp >= player.state.exp_to_next {
        player.state.exp -= player.state.exp_to_next;
        player.state.level += 1;
        let next_exp = (player.state.exp_to_next as f64 * 1.25).round() as u32 + 25;
        player.state.exp_to_next = next_exp.max(1);
        player.pending_upgrade_count += 1;

        level_ups.push(PlayerLevelUp {
            player_id,
            new_level: player.state.level,
            exp_to_next: player.state.exp_to_next,
        });
    }
}

fn compute_projectile_origin(player: &PlayerRuntime, facing_dir_x: f32) -> (f32, f32) {
    let side = if facing_dir_x >= 0.0 {
        PROJECTILE_MOUTH_OFFSET_SIDE
    } else {
        -PROJECTILE_MOUTH_OFFSET_SIDE
    };
    (
        player.state.position.x + side,
        player.state.position.y + PROJECTILE_MOUTH_OFFSET_UP,
    )
}

/// Damage roll: base attack, the buff multiplier, then the permil crit
/// chance doubling the result.
fn compute_projectile_damage(rng_state: &mut u32, player: &PlayerRuntime) -> i32 {
    let mut damage = (player.state.attack as i32).max(1);
    if player.state.has_buff {
        damage = (damage as f64 * 1.2).round() as i32;
    }
    if player.state.critical_hit_rate > 0 {
        let chance = (player.state.critical_hit_rate as f32 / 1000.0).clamp(0.0, 1.0);
        if next_rng_unit_float(rng_state) < chance {
            damage *= 2;
        }
    }
    damage
}

fn process_player_fire_stage(
    scene: &mut Scene,
    dt_seconds: f64,
    params: &CombatTickParams,
    projectile_spawns: &mut Vec<ProjectileState>,
) {
    let Scene {
        players,
        enemies,
        projectiles,
        projectile_pool,
        next_projectile_id,
        rng_state,
        tick,
        ..
    } = scene;
    let tick = *tick;

    for (&player_id, player) in players.iter_mut() {
        if !player.state.is_alive || !player.wants_attacking {
            player.locked_target_enemy_id = 0;
            player.target_refresh_elapsed = 0.0;
            continue;
        }

        // Target selection: keep the lock while it lives, refresh to the
        // nearest enemy on a timer.
        player.target_refresh_elapsed += dt_seconds.max(0.0);
        let mut target_id = player.locked_target_enemy_id;
        if target_id != 0
            && !enemies
                .get(&target_id)
                .is_some_and(|enemy| enemy.state.is_alive)
        {
            target_id = 0;
        }
        if target_id == 0 || player.target_refresh_elapsed >= PLAYER_TARGET_REFRESH_INTERVAL_SECONDS
        {
            let mut best_dist_sq = f32::INFINITY;
            let mut nearest_id = 0;
            for (&enemy_id, enemy) in enemies.iter() {
                if !enemy.state.is_alive {
                    continue;
                }
                let dx = enemy.state.position.x - player.state.position.x;
                let dy = enemy.state.position.y - player.state.position.y;
                let dist_sq = dx * dx + dy * dy;
                if dist_sq < best_dist_sq {
                    best_dist_sq = dist_sq;
                    nearest_id = enemy_id;
                }
            }
            target_id = nearest_id;
            player.target_refresh_elapsed = 0.0;
        }
        player.locked_target_enemy_id = target_id;
        let Some(target) = enemies.get(&target_id) else {
            player.attack_cooldown_seconds = player.attack_cooldown_seconds.max(0.0);
            continue;
        };

        // Facing: at the target, with the cached direction and then the
        // player rotation as fallbacks when the target sits on top of us.
        let px = player.state.position.x;
        let py = player.state.position.y;
        let mut facing_x = target.state.position.x - px;
        let mut facing_y = target.state.position.y - py;
        let facing_len_sq = facing_x * facing_x + facing_y * facing_y;
        if facing_len_sq <= 1e-6 {
            if player.has_attack_dir {
                facing_x = player.last_attack_dir_x;
                facing_y = player.last_attack_dir_y;
                if tick >= player.last_attack_dir_log_tick + ATTACK_DIR_FALLBACK_LOG_STRIDE_TICKS {
                    player.last_attack_dir_log_tick = tick;
                    tracing::debug!(player_id, target_id, "fire dir fallback: cached direction");
                }
            } else {
                let (fx, fy) = rotation_dir(player.state.rotation);
                facing_x = fx;
                facing_y = fy;
                if tick >= player.last_attack_dir_log_tick + ATTACK_DIR_FALLBACK_LOG_STRIDE_TICKS {
                    player.last_attack_dir_log_tick = tick;
                    tracing::debug!(player_id, target_id, "fire dir fallback: player rotation");
                }
            }
        } else {
            let inv_len = 1.0 / facing_len_sq.sqrt();
            facing_x *= inv_len;
            facing_y *= inv_len;
        }

        let (origin_x, origin_y) = compute_projectile_origin(player, facing_x);
        let mut dir_x = target.state.position.x - origin_x;
        let mut dir_y = target.state.position.y - origin_y;
        let len_sq = dir_x * dir_x + dir_y * dir_y;
        if len_sq <= 1e-6 {
            dir_x = facing_x;
            dir_y = facing_y;
        } else {
            let inv_len = 1.0 / len_sq.sqrt();
            dir_x *= inv_len;
            dir_y *= inv_len;
        }
        let rotation = degrees_from_direction(dir_x, dir_y);
        player.has_attack_dir = true;
        player.last_attack_dir_x = dir_x;
        player.last_attack_dir_y = dir_y;
        player.last_attack_rotation = rotation;

        let interval = player_attack_interval_seconds(
            player.state.attack_speed,
            params.attack_min_interval,
            params.attack_max_interval,
        );
        let max_shots_this_tick = if params.allow_catchup {
            params.max_shots_per_tick.min(2)
        } else {
            1
        };

        let mut fired = 0;
        while player.attack_cooldown_seconds <= 1e-6 && fired < max_shots_this_tick {
            player.attack_cooldown_seconds += interval;
            fired += 1;

            let damage = compute_projectile_damage(rng_state, player);
            if damage <= 0 {
                continue;
            }

            let projectile_id = *next_projectile_id;
            *next_projectile_id += 1;

            let mut proj = projectile_pool.pop().unwrap_or_default();
            proj.projectile_id = projectile_id;
            proj.owner_player_id = player_id;
            proj.x = origin_x;
            proj.y = origin_y;
            proj.dir_x = dir_x;
            proj.dir_y = dir_y;
            proj.rotation = rotation;
            proj.speed = params.projectile_speed;
            proj.damage = damage;
            proj.has_buff = player.state.has_buff;
            proj.buff_id = player.state.buff_id;
            proj.is_friendly = true;
            proj.remaining_seconds = params.projectile_ttl_seconds;

            if tick >= player.last_projectile_spawn_log_tick + PROJECTILE_SPAWN_LOG_STRIDE_TICKS {
                player.last_projectile_spawn_log_tick = tick;
                tracing::debug!(
                    tick,
                    player_id,
                    projectile_id,
                    target_id,
                    dir_x,
                    dir_y,
                    "projectile spawned"
                );
            }

            projectile_spawns.push(ProjectileState {
                projectile_id,
                owner_player_id: player_id,
                position: Vec2 {
                    x: origin_x,
                    y: origin_y,
                },
                rotation,
                ttl_ms: params.projectile_ttl_ms,
                speed: proj.speed.max(0.0) as u32,
                damage: damage.max(0) as u32,
                has_buff: proj.has_buff,
                buff_id: proj.buff_id,
                is_friendly: true,
            });
            projectiles.insert(projectile_id, proj);
        }
    }
}

/// Everyone down (and someone existed) ends the match.
pub fn update_game_over(scene: &mut Scene, game_over: &mut Option<GameOver>) {
    if scene.players.is_empty() || scene.alive_player_count() != 0 {
        return;
    }
    scene.game_over = true;
    let mut over = GameOver {
        victory: false,
        survive_time: scene.elapsed.max(0.0) as u32,
        scores: Vec::with_capacity(scene.players.len()),
    };
    for (&player_id, player) in &scene.players {
        over.scores.push(PlayerScore {
            player_id,
            player_name: player.player_name.clone(),
            final_level: player.state.level as i32,
            kill_count: player.kill_count,
            damage_dealt: player.damage_dealt,
        });
    }
    *game_over = Some(over);
}

pub(crate) fn despawn_projectile(
    proj: &ProjectileRuntime,
    reason: u32,
    hit_enemy_id: u32,
    projectile_despawns: &mut Vec<ProjectileDespawn>,
) {
    projectile_despawns.push(ProjectileDespawn {
        projectile_id: proj.projectile_id,
        reason,
        hit_enemy_id,
        position: Vec2 {
            x: proj.x,
            y: proj.y,
        },
    });
}
