//! Enemy melee: hysteresis targeting over per-type enter/exit radii and
//! cooldown gated damage.

use protocol::{EnemyAttackStateDelta, PlayerHurt};

use crate::config::EnemyTypeConfig;
use crate::game::combat::{ENEMY_COLLISION_RADIUS, PLAYER_COLLISION_RADIUS};
use crate::game::scene::{EnemyRuntime, Scene};
use crate::game::{EngineConfigs, enemy, sync};

const DEFAULT_ATTACK_INTERVAL_SECONDS: f64 = 0.8;
const MIN_ATTACK_INTERVAL_SECONDS: f64 = 0.05;
const MAX_ATTACK_INTERVAL_SECONDS: f64 = 10.0;

/// Enter/exit radii with body-contact defaults; exit never undercuts enter,
/// that is what makes the hysteresis stick.
fn resolve_attack_radii(enemy_type: &EnemyTypeConfig) -> (f32, f32) {
    let mut enter = enemy_type.attack_enter_radius;
    if enter <= 0.0 {
        enter = PLAYER_COLLISION_RADIUS + ENEMY_COLLISION_RADIUS;
    }
    let mut exit = enemy_type.attack_exit_radius;
    if exit <= 0.0 {
        exit = enter;
    }
    (enter, exit.max(enter))
}

fn distance_sq(ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = ax - bx;
    let dy = ay - by;
    dx * dx + dy * dy
}

/// Records a state flip; a no-op when nothing changed.
fn push_attack_state(
    enemy_id: u32,
    enemy: &mut EnemyRuntime,
    attacking: bool,
    target_player_id: u32,
    enemy_attack_states: &mut Vec<EnemyAttackStateDelta>,
) {
    if enemy.is_attacking == attacking && enemy.attack_target_player_id == target_player_id {
        return;
    }
    enemy.is_attacking = attacking;
    enemy.attack_target_player_id = target_player_id;
    enemy_attack_states.push(EnemyAttackStateDelta {
        enemy_id,
        is_attacking: attacking,
        target_player_id,
    });
}

pub fn process_enemy_melee_stage(
    configs: &EngineConfigs,
    scene: &mut Scene,
    player_hurts: &mut Vec<PlayerHurt>,
    enemy_attack_states: &mut Vec<EnemyAttackStateDelta>,
    has_dirty: &mut bool,
) {
    let Scene {
        players,
        enemies,
        dirty_player_ids,
        unknown_enemy_type_warned,
        ..
    } = scene;

    for (&enemy_id, enemy) in enemies.iter_mut() {
        if !enemy.state.is_alive {
            continue;
        }

        let enemy_type =
            enemy::resolve_enemy_type(configs, enemy.state.type_id, unknown_enemy_type_warned);
        let (enter_radius, exit_radius) = resolve_attack_radii(enemy_type);
        let enter_sq = enter_radius * enter_radius;
        let exit_sq = exit_radius * exit_radius;
        let ex = enemy.state.position.x;
        let ey = enemy.state.position.y;

        // Hysteresis: a held target survives out to the exit radius, a new
        // one has to come inside the enter radius.
        let mut target_player_id = 0;
        if enemy.is_attacking && enemy.attack_target_player_id != 0 {
            if let Some(held) = players.get(&enemy.attack_target_player_id)
                && held.state.is_alive
            {
                let dist_sq =
                    distance_sq(held.state.position.x, held.state.position.y, ex, ey);
                if dist_sq <= exit_sq {
                    target_player_id = enemy.attack_target_player_id;
                }
            }
        }
        if target_player_id == 0 {
            let mut best_dist_sq = f32::INFINITY;
            for (&player_id, player) in players.iter() {
                if !player.state.is_alive {
                    continue;
                }
                let dist_sq =
                    distance_sq(player.state.position.x, player.state.position.y, ex, ey);
                if dist_sq <= enter_sq && dist_sq < best_dist_sq {
                    best_dist_sq = dist_sq;
                    target_player_id = player_id;
                }
            }
        }

        if target_player_id == 0 {
            push_attack_state(enemy_id, enemy, false, 0, enemy_attack_states);
            continue;
        }
        push_attack_state(enemy_id, enemy, true, target_player_id, enemy_attack_states);

        // In range but still cooling down: the state above is all that
        // happens this tick.
        if enemy.attack_cooldown_seconds > 1e-6 {
            continue;
        }

        let Some(player) = players.get_mut(&target_player_id) else {
            continue;
        };
        if !player.state.is_alive {
            continue;
        }

        let damage = enemy_type.damage.max(0);
        enemy.attack_cooldown_seconds = if enemy_type.attack_interval_seconds > 0.0 {
            enemy_type.attack_interval_seconds as f64
        } else {
            DEFAULT_ATTACK_INTERVAL_SECONDS
        }
        .clamp(MIN_ATTACK_INTERVAL_SECONDS, MAX_ATTACK_INTERVAL_SECONDS);

        // Zero damage keeps the attack animation but never reports a hurt.
        if damage <= 0 {
            continue;
        }

        let prev_hp = player.state.health;
        let dealt = damage.min(prev_hp.max(0));
        player.state.health = (prev_hp - damage).max(0);
        sync::mark_player_dirty(dirty_player_ids, target_player_id, player, true);

        player_hurts.push(PlayerHurt {
            player_id: target_player_id,
            damage: dealt.max(0) as u32,
            remaining_health: player.state.health,
            source_id: enemy_id,
        });

        if player.state.health <= 0 {
            player.state.is_alive = false;
            player.wants_attacking = false;
            sync::mark_player_dirty(dirty_player_ids, target_player_id, player, true);
        }
        *has_dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::test_support::{engine_configs, scene_with_players};
    use protocol::Vec2;

    fn setup(configs: &EngineConfigs) -> (Scene, u32) {
        let mut scene = scene_with_players(configs, &[1]);
        let enemy_id = *scene.enemies.keys().next().unwrap();
        // Push all other enemies far away.
        let ids: Vec<u32> = scene.enemies.keys().copied().collect();
        for id in ids {
            if id != enemy_id {
                scene.enemies.get_mut(&id).unwrap().state.position = Vec2 { x: 0.0, y: 0.0 };
            }
        }
        let player_pos = scene.players.get(&1).unwrap().state.position;
        scene.enemies.get_mut(&enemy_id).unwrap().state.position = player_pos;
        (scene, enemy_id)
    }

    fn run(scene: &mut Scene, configs: &EngineConfigs) -> (Vec<PlayerHurt>, Vec<EnemyAttackStateDelta>) {
        let mut hurts = Vec::new();
        let mut states = Vec::new();
        let mut has_dirty = false;
        process_enemy_melee_stage(configs, scene, &mut hurts, &mut states, &mut has_dirty);
        (hurts, states)
    }

    #[test]
    fn contact_attack_damages_on_cooldown_only() {
        let mut configs = engine_configs();
        let enemy_type = configs.enemy_types.enemies.get_mut(&1).unwrap();
        enemy_type.damage = 7;
        let (mut scene, enemy_id) = setup(&configs);

        let (hurts, states) = run(&mut scene, &configs);
        assert_eq!(states.len(), 1);
        assert!(states[0].is_attacking);
        assert_eq!(hurts.len(), 1);
        assert_eq!(hurts[0].damage, 7);
        assert_eq!(hurts[0].source_id, enemy_id);

        // Cooldown armed: no second hurt, no state spam.
        let (hurts, states) = run(&mut scene, &configs);
        assert!(hurts.is_empty());
        assert!(states.is_empty());
    }

    #[test]
    fn zero_damage_types_flip_state_but_never_hurt() {
        let configs = engine_configs();
        // Default walker damage is 0.
        let (mut scene, _) = setup(&configs);
        let (hurts, states) = run(&mut scene, &configs);
        assert!(!states.is_empty());
        assert!(hurts.is_empty());
        assert_eq!(scene.players.get(&1).unwrap().state.health, 100);
    }

    #[test]
    fn hysteresis_keeps_the_target_between_enter_and_exit() {
        let mut configs = engine_configs();
        {
            let enemy_type = configs.enemy_types.enemies.get_mut(&1).unwrap();
            enemy_type.attack_enter_radius = 30.0;
            enemy_type.attack_exit_radius = 60.0;
        }
        let (mut scene, enemy_id) = setup(&configs);
        let (_, states) = run(&mut scene, &configs);
        assert!(states[0].is_attacking);

        // Between enter and exit: the held target sticks.
        let player_pos = scene.players.get(&1).unwrap().state.position;
        scene.enemies.get_mut(&enemy_id).unwrap().state.position = Vec2 {
            x: player_pos.x + 45.0,
            y: player_pos.y,
        };
        let (_, states) = run(&mut scene, &configs);
        assert!(states.is_empty(), "target dropped inside the exit radius");
        assert!(scene.enemies.get(&enemy_id).unwrap().is_attacking);

        // Past the exit radius the enemy lets go.
        scene.enemies.get_mut(&enemy_id).unwrap().state.position = Vec2 {
            x: player_pos.x + 80.0,
            y: player_pos.y,
        };
        let (_, states) = run(&mut scene, &configs);
        assert_eq!(states.len(), 1);
        assert!(!states[0].is_attacking);
    }

    #[test]
    fn lethal_melee_downs_the_player_and_stops_their_fire() {
        let mut configs = engine_configs();
        configs.enemy_types.enemies.get_mut(&1).unwrap().damage = 1000;
        let (mut scene, _) = setup(&configs);
        scene.players.get_mut(&1).unwrap().wants_attacking = true;

        let (hurts, _) = run(&mut scene, &configs);
        assert_eq!(hurts.len(), 1);
        // Only the hp that existed counts.
        assert_eq!(hurts[0].damage, 100);
        assert_eq!(hurts[0].remaining_health, 0);
        let player = scene.players.get(&1).unwrap();
        assert!(!player.state.is_alive);
        assert!(!player.wants_attacking);
        assert_eq!(player.state.health, 0);
    }
}
