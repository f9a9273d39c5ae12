//! The sync builder: dirty tracking, per-entity change masks, forced
//! resyncs and the dynamic pacing that decides when anything is sent at all.

use protocol::{
    EnemyDelta, GameStateDeltaSync, GameStateSync, ItemDelta, ItemState, PlayerDelta, PlayerState,
    SyncTime, Vec2,
};

use crate::game::EngineConfigs;
use crate::game::scene::{EnemyRuntime, ItemRuntime, PlayerRuntime, Scene};
use crate::state::now_ms;

/// Positions and rotations have to move at least this far to count as
/// changed.
pub const DELTA_POSITION_EPSILON: f32 = 1e-4;

/// Flags a player as changed. `low_freq` escalates to a full player state in
/// the snapshot channel (stat changes, health, level ups). The queued flag
/// keeps every id in the dirty list at most once.
pub fn mark_player_dirty(
    dirty_player_ids: &mut Vec<u32>,
    player_id: u32,
    runtime: &mut PlayerRuntime,
    low_freq: bool,
) {
    if low_freq {
        runtime.low_freq_dirty = true;
    }
    runtime.dirty = true;
    if !runtime.dirty_queued {
        dirty_player_ids.push(player_id);
        runtime.dirty_queued = true;
    }
}

pub fn mark_enemy_dirty(dirty_enemy_ids: &mut Vec<u32>, enemy_id: u32, runtime: &mut EnemyRuntime) {
    runtime.dirty = true;
    if !runtime.dirty_queued {
        dirty_enemy_ids.push(enemy_id);
        runtime.dirty_queued = true;
    }
}

pub fn mark_item_dirty(dirty_item_ids: &mut Vec<u32>, item_id: u32, runtime: &mut ItemRuntime) {
    runtime.dirty = true;
    if !runtime.dirty_queued {
        dirty_item_ids.push(item_id);
        runtime.dirty_queued = true;
    }
}

fn position_changed(current: Vec2, last: Vec2) -> bool {
    (current.x - last.x).abs() > DELTA_POSITION_EPSILON
        || (current.y - last.y).abs() > DELTA_POSITION_EPSILON
}

fn sync_timing(tick: u64) -> SyncTime {
    SyncTime {
        server_time: now_ms(),
        tick: tick as u32,
    }
}

/// High frequency subset: identity, pose, aliveness and the input ack.
fn fill_player_high_freq(runtime: &PlayerRuntime) -> PlayerState {
    PlayerState {
        player_id: runtime.state.player_id,
        position: runtime.state.position,
        rotation: runtime.state.rotation,
        is_alive: runtime.state.is_alive,
        last_processed_input_seq: runtime.last_input_seq,
        ..PlayerState::default()
    }
}

/// Full state when low-freq stats changed, the high-freq subset otherwise.
fn fill_player_for_sync(runtime: &PlayerRuntime) -> PlayerState {
    if runtime.low_freq_dirty {
        let mut state = runtime.state.clone();
        state.last_processed_input_seq = runtime.last_input_seq;
        state
    } else {
        fill_player_high_freq(runtime)
    }
}

fn item_state(item: &ItemRuntime) -> ItemState {
    ItemState {
        item_id: item.item_id,
        type_id: item.type_id,
        position: Vec2 {
            x: item.x,
            y: item.y,
        },
        is_picked: item.is_picked,
    }
}

fn update_player_last_sync(runtime: &mut PlayerRuntime) {
    runtime.last_sync_position = runtime.state.position;
    runtime.last_sync_rotation = runtime.state.rotation;
    runtime.last_sync_is_alive = runtime.state.is_alive;
    runtime.last_sync_input_seq = runtime.last_input_seq;
}

fn update_enemy_last_sync(runtime: &mut EnemyRuntime) {
    runtime.last_sync_position = runtime.state.position;
    runtime.last_sync_health = runtime.state.health;
    runtime.last_sync_is_alive = runtime.state.is_alive;
}

fn update_item_last_sync(runtime: &mut ItemRuntime) {
    runtime.last_sync_x = runtime.x;
    runtime.last_sync_y = runtime.y;
    runtime.last_sync_is_picked = runtime.is_picked;
    runtime.last_sync_type_id = runtime.type_id;
}

/// Read-only full snapshot, as sent on game start, reconnect and after an
/// upgrade. Does not touch the dirty machinery.
pub fn build_full_state(room_id: u32, scene: &Scene) -> GameStateSync {
    let mut sync = GameStateSync {
        room_id,
        sync_time: sync_timing(scene.tick),
        is_full_snapshot: true,
        players: Vec::with_capacity(scene.players.len()),
        enemies: Vec::with_capacity(scene.enemies.len()),
        items: Vec::with_capacity(scene.items.len()),
    };
    for runtime in scene.players.values() {
        let mut state = runtime.state.clone();
        state.last_processed_input_seq = runtime.last_input_seq;
        sync.players.push(state);
    }
    for runtime in scene.enemies.values() {
        sync.enemies.push(runtime.state.clone());
    }
    for item in scene.items.values() {
        if item.is_picked {
            continue;
        }
        sync.items.push(item_state(item));
    }
    sync
}

/// What one emission pass produced.
#[derive(Default)]
pub struct SyncBuildResult {
    pub built_sync: bool,
    pub built_delta: bool,
    pub delta_items: u32,
    pub sync_items: u32,
}

/// Turns the dirty lists into wire payloads and advances the per-entity
/// sync baselines. The forced-full path rewrites everything; the delta path
/// walks only the queued ids.
pub fn build_sync_payloads(
    room_id: u32,
    scene: &mut Scene,
    force_full_sync: bool,
    sync: &mut GameStateSync,
    delta: &mut GameStateDeltaSync,
) -> SyncBuildResult {
    let mut result = SyncBuildResult::default();
    let mut items_to_remove: Vec<u32> = Vec::new();

    if force_full_sync {
        sync.room_id = room_id;
        sync.sync_time = sync_timing(scene.tick);
        sync.is_full_snapshot = true;
        sync.players.reserve(scene.players.len());
        sync.enemies.reserve(scene.enemies.len());
        sync.items.reserve(scene.items.len());

        for runtime in scene.players.values_mut() {
            sync.players.push(fill_player_for_sync(runtime));
            update_player_last_sync(runtime);
            runtime.dirty = false;
            runtime.low_freq_dirty = false;
            runtime.dirty_queued = false;
        }
        for runtime in scene.enemies.values_mut() {
            sync.enemies.push(runtime.state.clone());
            update_enemy_last_sync(runtime);
            runtime.dirty = false;
            runtime.dirty_queued = false;
            if runtime.force_sync_left > 0 {
                runtime.force_sync_left -= 1;
            }
        }
        for item in scene.items.values_mut() {
            if item.is_picked {
                item.dirty_queued = false;
                items_to_remove.push(item.item_id);
                continue;
            }
            sync.items.push(item_state(item));
            update_item_last_sync(item);
            item.dirty = false;
            item.dirty_queued = false;
            item.force_sync_left = 0;
        }
        result.sync_items = sync.items.len() as u32;
        result.built_sync = true;
        scene.full_sync_elapsed = 0.0;
        scene.dirty_player_ids.clear();
        scene.dirty_enemy_ids.clear();
        scene.dirty_item_ids.clear();
    } else {
        let mut sync_inited = false;
        let mut delta_inited = false;
        delta.players.reserve(scene.players.len());
        delta.enemies.reserve(scene.enemies.len());
        delta.items.reserve(scene.items.len());

        let dirty_player_ids = std::mem::take(&mut scene.dirty_player_ids);
        for &player_id in &dirty_player_ids {
            let Some(runtime) = scene.players.get_mut(&player_id) else {
                continue;
            };
            runtime.dirty_queued = false;
            if !runtime.dirty && !runtime.low_freq_dirty {
                continue;
            }
            if runtime.low_freq_dirty {
                // Stat changes ride the snapshot channel as full states.
                if !sync_inited {
                    sync.room_id = room_id;
                    sync.sync_time = sync_timing(scene.tick);
                    sync.is_full_snapshot = false;
                    sync_inited = true;
                }
                sync.players.push(fill_player_for_sync(runtime));
                result.built_sync = true;
                update_player_last_sync(runtime);
                runtime.dirty = false;
                runtime.low_freq_dirty = false;
                continue;
            }

            let mut changed_mask = 0;
            if position_changed(runtime.state.position, runtime.last_sync_position) {
                changed_mask |= protocol::PLAYER_DELTA_POSITION;
            }
            if (runtime.state.rotation - runtime.last_sync_rotation).abs() > DELTA_POSITION_EPSILON
            {
                changed_mask |= protocol::PLAYER_DELTA_ROTATION;
            }
            if runtime.state.is_alive != runtime.last_sync_is_alive {
                changed_mask |= protocol::PLAYER_DELTA_IS_ALIVE;
            }
            if runtime.last_input_seq != runtime.last_sync_input_seq {
                changed_mask |= protocol::PLAYER_DELTA_LAST_PROCESSED_INPUT_SEQ;
            }
            if changed_mask == 0 {
                runtime.dirty = false;
                continue;
            }
            if !delta_inited {
                delta.room_id = room_id;
                delta.sync_time = sync_timing(scene.tick);
                delta_inited = true;
            }
            delta.players.push(PlayerDelta {
                player_id,
                changed_mask,
                position: runtime.state.position,
                rotation: runtime.state.rotation,
                is_alive: runtime.state.is_alive,
                last_processed_input_seq: runtime.last_input_seq,
            });
            result.built_delta = true;
            update_player_last_sync(runtime);
            runtime.dirty = false;
        }
        let mut dirty_player_ids = dirty_player_ids;
        dirty_player_ids.clear();
        scene.dirty_player_ids = dirty_player_ids;

        let dirty_enemy_ids = std::mem::take(&mut scene.dirty_enemy_ids);
        let mut next_dirty_enemy_ids: Vec<u32> = Vec::with_capacity(dirty_enemy_ids.len());
        for &enemy_id in &dirty_enemy_ids {
            let Some(runtime) = scene.enemies.get_mut(&enemy_id) else {
                continue;
            };
            runtime.dirty_queued = false;
            if !runtime.dirty && runtime.force_sync_left == 0 {
                continue;
            }
            if runtime.force_sync_left > 0 {
                // Forced resync: the whole enemy state, re-queued until the
                // counter drains.
                if !sync_inited {
                    sync.room_id = room_id;
                    sync.sync_time = sync_timing(scene.tick);
                    sync.is_full_snapshot = false;
                    sync_inited = true;
                }
                sync.enemies.push(runtime.state.clone());
                result.built_sync = true;
                update_enemy_last_sync(runtime);
                runtime.dirty = false;
                runtime.force_sync_left -= 1;
                if runtime.force_sync_left > 0 {
                    next_dirty_enemy_ids.push(enemy_id);
                    runtime.dirty_queued = true;
                }
                continue;
            }

            let mut changed_mask = 0;
            if position_changed(runtime.state.position, runtime.last_sync_position) {
                changed_mask |= protocol::ENEMY_DELTA_POSITION;
            }
            if runtime.state.health != runtime.last_sync_health {
                changed_mask |= protocol::ENEMY_DELTA_HEALTH;
            }
            if runtime.state.is_alive != runtime.last_sync_is_alive {
                changed_mask |= protocol::ENEMY_DELTA_IS_ALIVE;
            }
            if changed_mask == 0 {
                runtime.dirty = false;
                continue;
            }
            if !delta_inited {
                delta.room_id = room_id;
                delta.sync_time = sync_timing(scene.tick);
                delta_inited = true;
            }
            delta.enemies.push(EnemyDelta {
                enemy_id,
                changed_mask,
                position: runtime.state.position,
                health: runtime.state.health,
                is_alive: runtime.state.is_alive,
            });
            result.built_delta = true;
            update_enemy_last_sync(runtime);
            runtime.dirty = false;
        }
        scene.dirty_enemy_ids = next_dirty_enemy_ids;

        let dirty_item_ids = std::mem::take(&mut scene.dirty_item_ids);
        for &item_id in &dirty_item_ids {
            let Some(item) = scene.items.get_mut(&item_id) else {
                continue;
            };
            item.dirty_queued = false;
            if !item.dirty {
                continue;
            }
            let mut changed_mask = 0;
            if item.force_sync_left > 0 {
                changed_mask = protocol::ITEM_DELTA_POSITION
                    | protocol::ITEM_DELTA_IS_PICKED
                    | protocol::ITEM_DELTA_TYPE;
            } else {
                if position_changed(
                    Vec2 {
                        x: item.x,
                        y: item.y,
                    },
                    Vec2 {
                        x: item.last_sync_x,
                        y: item.last_sync_y,
                    },
                ) {
                    changed_mask |= protocol::ITEM_DELTA_POSITION;
                }
                if item.is_picked != item.last_sync_is_picked {
                    changed_mask |= protocol::ITEM_DELTA_IS_PICKED;
                }
                if item.type_id != item.last_sync_type_id {
                    changed_mask |= protocol::ITEM_DELTA_TYPE;
                }
            }
            if changed_mask == 0 {
                item.dirty = false;
                continue;
            }
            if !delta_inited {
                delta.room_id = room_id;
                delta.sync_time = sync_timing(scene.tick);
                delta_inited = true;
            }
            delta.items.push(ItemDelta {
                item_id,
                changed_mask,
                position: Vec2 {
                    x: item.x,
                    y: item.y,
                },
                is_picked: item.is_picked,
                type_id: item.type_id,
            });
            result.built_delta = true;
            update_item_last_sync(item);
            item.dirty = false;
            if item.force_sync_left > 0 {
                item.force_sync_left -= 1;
            }
            if item.is_picked {
                // One terminal delta with is_picked, then the item is gone.
                items_to_remove.push(item_id);
            }
        }
        let mut dirty_item_ids = dirty_item_ids;
        dirty_item_ids.clear();
        scene.dirty_item_ids = dirty_item_ids;

        if delta_inited {
            result.delta_items = delta.items.len() as u32;
        }
    }

    for item_id in items_to_remove {
        if let Some(mut item) = scene.items.remove(&item_id) {
            item.dirty_queued = false;
            scene.item_pool.push(item);
        }
    }
    result
}

/// Advances the pacing accumulators and decides whether this tick emits a
/// delta, a forced full snapshot, or nothing. An idle scene stretches its
/// own interval so spectating costs little bandwidth.
#[allow(clippy::too_many_arguments)]
pub fn update_sync_scheduling(
    configs: &EngineConfigs,
    scene: &mut Scene,
    dt_seconds: f64,
    tick_interval_seconds: f64,
    has_priority_events: bool,
    has_dirty_players: bool,
    has_dirty_enemies: bool,
    has_dirty_items: bool,
    should_sync: &mut bool,
    force_full_sync: &mut bool,
) {
    scene.sync_accumulator += dt_seconds;
    scene.full_sync_elapsed += dt_seconds;

    let base_sync_interval = if scene.sync_interval > 0.0 {
        scene.sync_interval
    } else {
        tick_interval_seconds
    };
    let idle_light = configs.server.sync_idle_light_seconds.max(0.0) as f64;
    let idle_heavy = (configs.server.sync_idle_heavy_seconds as f64).max(idle_light);
    let scale_light = configs.server.sync_scale_light.max(1.0) as f64;
    let scale_medium = (configs.server.sync_scale_medium as f64).max(scale_light);
    let scale_idle = (configs.server.sync_scale_idle as f64).max(scale_medium);

    if has_priority_events || has_dirty_players {
        scene.sync_idle_elapsed = 0.0;
        scene.dynamic_sync_interval = base_sync_interval;
    } else {
        scene.sync_idle_elapsed += dt_seconds;
        let scale = if has_dirty_enemies || has_dirty_items {
            if scene.sync_idle_elapsed >= idle_light {
                scale_medium
            } else {
                scale_light
            }
        } else if scene.sync_idle_elapsed >= idle_heavy {
            scale_idle
        } else {
            scale_medium
        };
        scene.dynamic_sync_interval = base_sync_interval * scale;
    }

    let sync_interval = if scene.dynamic_sync_interval > 0.0 {
        scene.dynamic_sync_interval
    } else {
        base_sync_interval
    };
    while scene.sync_accumulator >= sync_interval {
        scene.sync_accumulator -= sync_interval;
        *should_sync = true;
    }

    let full_sync_interval = if scene.full_sync_interval > 0.0 {
        scene.full_sync_interval
    } else {
        tick_interval_seconds * crate::game::tick::FULL_SYNC_INTERVAL_TICKS as f64
    };
    *force_full_sync = full_sync_interval > 0.0 && scene.full_sync_elapsed >= full_sync_interval;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::test_support::{engine_configs, scene_with_players};
    use protocol::PlayerInput;

    fn drain_initial_force_syncs(scene: &mut Scene) {
        // Seed enemies carry forced resyncs; drain them so the tests below
        // see a quiet baseline.
        for _ in 0..=crate::game::scene::ENEMY_SPAWN_FORCE_SYNC_COUNT {
            let mut sync = GameStateSync::default();
            let mut delta = GameStateDeltaSync::default();
            build_sync_payloads(1, scene, false, &mut sync, &mut delta);
        }
        assert!(scene.dirty_enemy_ids.is_empty());
    }

    #[test]
    fn dirty_ids_are_queued_once() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        let mut dirty = std::mem::take(&mut scene.dirty_player_ids);
        let runtime = scene.players.get_mut(&1).unwrap();
        mark_player_dirty(&mut dirty, 1, runtime, false);
        mark_player_dirty(&mut dirty, 1, runtime, true);
        mark_player_dirty(&mut dirty, 1, runtime, false);
        assert_eq!(dirty, vec![1]);
        assert!(runtime.low_freq_dirty);
    }

    #[test]
    fn movement_produces_a_masked_delta_that_rebuilds_the_snapshot_view() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        drain_initial_force_syncs(&mut scene);

        // Take the baseline the client would hold.
        let baseline = build_full_state(1, &scene);

        // Move and rotate the player.
        {
            let mut dirty = std::mem::take(&mut scene.dirty_player_ids);
            let runtime = scene.players.get_mut(&1).unwrap();
            runtime.state.position.x += 25.0;
            runtime.state.rotation += 90.0;
            runtime.last_input_seq = 17;
            mark_player_dirty(&mut dirty, 1, runtime, false);
            scene.dirty_player_ids = dirty;
        }

        let mut sync = GameStateSync::default();
        let mut delta = GameStateDeltaSync::default();
        let result = build_sync_payloads(1, &mut scene, false, &mut sync, &mut delta);
        assert!(result.built_delta);
        assert!(!result.built_sync);
        assert_eq!(delta.players.len(), 1);

        let player_delta = &delta.players[0];
        assert_ne!(player_delta.changed_mask & protocol::PLAYER_DELTA_POSITION, 0);
        assert_ne!(player_delta.changed_mask & protocol::PLAYER_DELTA_ROTATION, 0);
        assert_ne!(
            player_delta.changed_mask & protocol::PLAYER_DELTA_LAST_PROCESSED_INPUT_SEQ,
            0
        );
        assert_eq!(player_delta.changed_mask & protocol::PLAYER_DELTA_IS_ALIVE, 0);

        // Applying the delta on top of the baseline reproduces the server
        // view of the synchronized fields.
        let mut client_view = baseline.players[0].clone();
        if player_delta.changed_mask & protocol::PLAYER_DELTA_POSITION != 0 {
            client_view.position = player_delta.position;
        }
        if player_delta.changed_mask & protocol::PLAYER_DELTA_ROTATION != 0 {
            client_view.rotation = player_delta.rotation;
        }
        if player_delta.changed_mask & protocol::PLAYER_DELTA_LAST_PROCESSED_INPUT_SEQ != 0 {
            client_view.last_processed_input_seq = player_delta.last_processed_input_seq;
        }
        let server_view = build_full_state(1, &scene);
        assert_eq!(client_view, server_view.players[0]);
    }

    #[test]
    fn unchanged_dirty_entities_emit_nothing() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        drain_initial_force_syncs(&mut scene);

        let mut dirty = std::mem::take(&mut scene.dirty_player_ids);
        let runtime = scene.players.get_mut(&1).unwrap();
        mark_player_dirty(&mut dirty, 1, runtime, false);
        scene.dirty_player_ids = dirty;

        let mut sync = GameStateSync::default();
        let mut delta = GameStateDeltaSync::default();
        let result = build_sync_payloads(1, &mut scene, false, &mut sync, &mut delta);
        assert!(!result.built_delta);
        assert!(!result.built_sync);
        assert!(!scene.players.get(&1).unwrap().dirty);
    }

    #[test]
    fn low_freq_changes_ride_the_snapshot_channel() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        drain_initial_force_syncs(&mut scene);

        let mut dirty = std::mem::take(&mut scene.dirty_player_ids);
        let runtime = scene.players.get_mut(&1).unwrap();
        runtime.state.max_health = 150;
        mark_player_dirty(&mut dirty, 1, runtime, true);
        scene.dirty_player_ids = dirty;

        let mut sync = GameStateSync::default();
        let mut delta = GameStateDeltaSync::default();
        let result = build_sync_payloads(1, &mut scene, false, &mut sync, &mut delta);
        assert!(result.built_sync);
        assert!(!result.built_delta);
        assert!(!sync.is_full_snapshot);
        assert_eq!(sync.players.len(), 1);
        assert_eq!(sync.players[0].max_health, 150);
    }

    #[test]
    fn force_sync_counter_drains_one_per_send_and_requeues() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        let enemy_id = scene.dirty_enemy_ids[0];
        let initial = scene
            .enemies
            .get(&enemy_id)
            .unwrap()
            .force_sync_left;
        assert_eq!(initial, crate::game::scene::ENEMY_SPAWN_FORCE_SYNC_COUNT);

        for expected_left in (0..initial).rev() {
            let mut sync = GameStateSync::default();
            let mut delta = GameStateDeltaSync::default();
            let result = build_sync_payloads(1, &mut scene, false, &mut sync, &mut delta);
            assert!(result.built_sync);
            assert!(sync.enemies.iter().any(|enemy| enemy.enemy_id == enemy_id));
            let enemy = scene.enemies.get(&enemy_id).unwrap();
            assert_eq!(enemy.force_sync_left, expected_left);
            assert_eq!(enemy.dirty_queued, expected_left > 0);
        }
        assert!(scene.dirty_enemy_ids.is_empty());
    }

    #[test]
    fn picked_items_emit_one_terminal_delta_and_vanish() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        drain_initial_force_syncs(&mut scene);

        // Plant an item via a guaranteed drop and note its id.
        let mut dropped = Vec::new();
        let mut has_dirty = false;
        let enemy_id = *scene.enemies.keys().next().unwrap();
        scene.enemies.get_mut(&enemy_id).unwrap().state.is_alive = false;
        let mut drop_configs = engine_configs();
        drop_configs
            .enemy_types
            .enemies
            .get_mut(&1)
            .unwrap()
            .drop_chance = 100;
        crate::game::drops::process_enemy_drop_stage(
            &drop_configs,
            &mut scene,
            &[enemy_id],
            &mut dropped,
            &mut has_dirty,
        );
        assert_eq!(dropped.len(), 1);
        let item_id = dropped[0].item_id;

        // First send covers the forced sync of the fresh item.
        let mut sync = GameStateSync::default();
        let mut delta = GameStateDeltaSync::default();
        build_sync_payloads(1, &mut scene, false, &mut sync, &mut delta);
        assert!(scene.items.contains_key(&item_id));

        // Pick it up and watch the terminal delta.
        {
            let mut dirty = std::mem::take(&mut scene.dirty_item_ids);
            let item = scene.items.get_mut(&item_id).unwrap();
            item.is_picked = true;
            mark_item_dirty(&mut dirty, item_id, item);
            scene.dirty_item_ids = dirty;
        }
        let mut sync = GameStateSync::default();
        let mut delta = GameStateDeltaSync::default();
        let result = build_sync_payloads(1, &mut scene, false, &mut sync, &mut delta);
        assert!(result.built_delta);
        let item_delta = delta
            .items
            .iter()
            .find(|item| item.item_id == item_id)
            .expect("terminal item delta");
        assert!(item_delta.is_picked);
        assert_ne!(item_delta.changed_mask & protocol::ITEM_DELTA_IS_PICKED, 0);
        assert!(!scene.items.contains_key(&item_id));
        // Recycled into the pool.
        assert!(!scene.item_pool.is_empty());
    }

    #[test]
    fn forced_full_snapshot_resets_the_dirty_machinery() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1, 2]);
        {
            let mut dirty = std::mem::take(&mut scene.dirty_player_ids);
            let runtime = scene.players.get_mut(&1).unwrap();
            runtime.state.position.x += 10.0;
            mark_player_dirty(&mut dirty, 1, runtime, false);
            scene.dirty_player_ids = dirty;
        }
        scene.full_sync_elapsed = 100.0;

        let mut sync = GameStateSync::default();
        let mut delta = GameStateDeltaSync::default();
        let result = build_sync_payloads(1, &mut scene, true, &mut sync, &mut delta);
        assert!(result.built_sync);
        assert!(sync.is_full_snapshot);
        assert_eq!(sync.players.len(), 2);
        assert_eq!(sync.enemies.len(), scene.enemies.len());
        assert!(scene.dirty_player_ids.is_empty());
        assert!(scene.dirty_enemy_ids.is_empty());
        assert_eq!(scene.full_sync_elapsed, 0.0);
        for enemy in scene.enemies.values() {
            assert!(!enemy.dirty_queued);
        }
    }

    #[test]
    fn idle_scenes_stretch_their_sync_interval() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        let base = scene.sync_interval;
        let tick_interval = scene.tick_interval;

        let mut should_sync = false;
        let mut force_full = false;
        // Busy: priority events keep the base interval.
        update_sync_scheduling(
            &configs, &mut scene, tick_interval, tick_interval, true, true, false, false,
            &mut should_sync, &mut force_full,
        );
        assert_eq!(scene.dynamic_sync_interval, base);

        // Only enemy churn: light scale first.
        update_sync_scheduling(
            &configs, &mut scene, tick_interval, tick_interval, false, false, true, false,
            &mut should_sync, &mut force_full,
        );
        assert_eq!(
            scene.dynamic_sync_interval,
            base * configs.server.sync_scale_light as f64
        );

        // Nothing at all for a long stretch: idle scale.
        scene.sync_idle_elapsed = configs.server.sync_idle_heavy_seconds as f64 + 1.0;
        update_sync_scheduling(
            &configs, &mut scene, tick_interval, tick_interval, false, false, false, false,
            &mut should_sync, &mut force_full,
        );
        assert_eq!(
            scene.dynamic_sync_interval,
            base * configs.server.sync_scale_idle as f64
        );
    }

    #[test]
    fn full_sync_fires_on_its_interval() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        let tick_interval = scene.tick_interval;
        let mut should_sync = false;
        let mut force_full = false;

        scene.full_sync_elapsed = scene.full_sync_interval - tick_interval * 0.5;
        update_sync_scheduling(
            &configs, &mut scene, tick_interval, tick_interval, false, true, false, false,
            &mut should_sync, &mut force_full,
        );
        assert!(force_full);
    }

    #[tokio::test]
    async fn paused_input_ack_still_flows() {
        // A paused scene acknowledges sequences through the dirty path so
        // clients can drain their prediction queues.
        let engine = crate::game::SceneEngine::new(engine_configs());
        let snapshot = crate::game::test_support::room_snapshot(&[1]);
        engine.create_scene(&snapshot).await;
        {
            let mut inner = engine.inner.lock().await;
            inner.scenes.get_mut(&1).unwrap().is_paused = true;
        }
        let input = PlayerInput {
            player_id: 1,
            input_seq: 9,
            ..PlayerInput::default()
        };
        assert!(engine.handle_player_input(1, input).await);

        let mut inner = engine.inner.lock().await;
        let scene = inner.scenes.get_mut(&1).unwrap();
        let player = scene.players.get(&1).unwrap();
        assert_eq!(player.last_input_seq, 9);
        assert!(player.pending_inputs.is_empty());
        assert!(!player.wants_attacking);
        assert!(scene.dirty_player_ids.contains(&1));
    }
}
