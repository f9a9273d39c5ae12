//! Priority events: the discrete, reliability-critical outcomes of a tick.
//! They are bundled per type, stamped with the tick's sync time, and sent
//! over the reliable channel to every live session of the room.

use std::collections::HashSet;
use std::sync::Arc;

use protocol::{
    DroppedItemEvent, EnemyAttackStateSync, GameOver, MSG_S2C_DROPPED_ITEM,
    MSG_S2C_ENEMY_ATTACK_STATE_SYNC, MSG_S2C_ENEMY_DIED, MSG_S2C_GAME_OVER,
    MSG_S2C_PLAYER_HURT, MSG_S2C_PLAYER_LEVEL_UP, MSG_S2C_PROJECTILE_DESPAWN,
    MSG_S2C_PROJECTILE_SPAWN, MSG_S2C_UPGRADE_REQUEST, ProjectileDespawn, ProjectileDespawnEvent,
    ProjectileSpawnEvent, ProjectileState, SyncTime,
};

use crate::game::tick::TickOutputs;
use crate::state::{AppState, now_ms};

/// Drops repeated projectile ids, keeping the first occurrence.
pub fn dedup_projectile_spawns(spawns: &mut Vec<ProjectileState>) {
    if spawns.len() < 2 {
        return;
    }
    let mut seen = HashSet::with_capacity(spawns.len());
    spawns.retain(|spawn| seen.insert(spawn.projectile_id));
}

pub fn dedup_projectile_despawns(despawns: &mut Vec<ProjectileDespawn>) {
    if despawns.len() < 2 {
        return;
    }
    let mut seen = HashSet::with_capacity(despawns.len());
    despawns.retain(|despawn| seen.insert(despawn.projectile_id));
}

fn log_game_over_summary(room_id: u32, game_over: &Option<GameOver>) {
    let Some(over) = game_over else {
        return;
    };
    tracing::info!(
        room_id,
        victory = over.victory,
        survive_time = over.survive_time,
        scores = over.scores.len(),
        "game over"
    );
    for score in &over.scores {
        tracing::info!(
            room_id,
            player_id = score.player_id,
            name = %score.player_name,
            level = score.final_level,
            kills = score.kill_count,
            damage = score.damage_dealt,
            "final score"
        );
    }
}

/// Sends every event of the tick to every live session, in a stable order.
pub async fn dispatch_tick_events(state: &Arc<AppState>, room_id: u32, outputs: &TickOutputs) {
    let has_events = !outputs.projectile_spawns.is_empty()
        || !outputs.projectile_despawns.is_empty()
        || !outputs.dropped_items.is_empty()
        || !outputs.enemy_attack_states.is_empty()
        || !outputs.player_hurts.is_empty()
        || !outputs.enemy_dieds.is_empty()
        || !outputs.level_ups.is_empty()
        || outputs.game_over.is_some()
        || outputs.upgrade_request.is_some();

    log_game_over_summary(room_id, &outputs.game_over);
    if !has_events {
        return;
    }

    let sync_time = SyncTime {
        server_time: now_ms(),
        tick: outputs.event_tick as u32,
    };

    let projectile_spawn_msg = (!outputs.projectile_spawns.is_empty()).then(|| {
        ProjectileSpawnEvent {
            room_id,
            sync_time,
            projectiles: outputs.projectile_spawns.clone(),
        }
    });
    let projectile_despawn_msg = (!outputs.projectile_despawns.is_empty()).then(|| {
        ProjectileDespawnEvent {
            room_id,
            sync_time,
            projectiles: outputs.projectile_despawns.clone(),
        }
    });
    let dropped_item_msg = (!outputs.dropped_items.is_empty()).then(|| DroppedItemEvent {
        room_id,
        sync_time,
        source_enemy_id: 0,
        wave_id: outputs.event_wave_id,
        items: outputs.dropped_items.clone(),
    });
    let enemy_attack_state_msg =
        (!outputs.enemy_attack_states.is_empty()).then(|| EnemyAttackStateSync {
            room_id,
            sync_time,
            enemies: outputs.enemy_attack_states.clone(),
        });

    let sessions = state.rooms.room_sessions(room_id).await;
    for weak_session in &sessions {
        let Some(session) = weak_session.upgrade() else {
            continue;
        };
        if let Some(msg) = &projectile_spawn_msg {
            session.send(MSG_S2C_PROJECTILE_SPAWN, msg);
        }
        if let Some(msg) = &projectile_despawn_msg {
            session.send(MSG_S2C_PROJECTILE_DESPAWN, msg);
        }
        if let Some(msg) = &dropped_item_msg {
            session.send(MSG_S2C_DROPPED_ITEM, msg);
        }
        if let Some(msg) = &enemy_attack_state_msg {
            session.send(MSG_S2C_ENEMY_ATTACK_STATE_SYNC, msg);
        }
        for hurt in &outputs.player_hurts {
            session.send(MSG_S2C_PLAYER_HURT, hurt);
        }
        for died in &outputs.enemy_dieds {
            session.send(MSG_S2C_ENEMY_DIED, died);
        }
        for level_up in &outputs.level_ups {
            session.send(MSG_S2C_PLAYER_LEVEL_UP, level_up);
        }
        if let Some(request) = &outputs.upgrade_request {
            session.send(MSG_S2C_UPGRADE_REQUEST, request);
        }
        if let Some(over) = &outputs.game_over {
            session.send(MSG_S2C_GAME_OVER, over);
        }
    }
}
