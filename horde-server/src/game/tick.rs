//! The fixed-rate tick loop: one task per playing room. Each firing locks
//! the scene, runs the whole pipeline, releases the lock and only then fans
//! the outputs out to the network.

use std::sync::Arc;
use std::sync::Weak;
use std::time::{Duration, Instant};

use protocol::{
    EnemyAttackStateDelta, EnemyDied, GameOver, GameStateDeltaSync, GameStateSync, ItemState,
    MSG_S2C_GAME_STATE_DELTA_SYNC, MSG_S2C_GAME_STATE_SYNC, PlayerHurt, PlayerLevelUp,
    ProjectileDespawn, ProjectileState, UpgradeRequest,
};

use crate::config::ItemEffect;
use crate::game::scene::{PlayerRuntime, Scene, SceneConfig, clamp_to_map, degrees_from_direction};
use crate::game::{
    DIRECTION_EPSILON_SQ, EngineConfigs, MAX_DIRECTION_LENGTH_SQ, combat, enemy, events, metrics,
    sync, upgrade,
};
use crate::session::{SessionHandle, broadcast_to_sessions};
use crate::state::AppState;

/// A forced full snapshot goes out every this many ticks.
pub const FULL_SYNC_INTERVAL_TICKS: u32 = 180;
/// Hard cap on one tick's simulated time; extreme hitches are skipped, not
/// caught up.
const MAX_TICK_DELTA_SECONDS: f64 = 0.1;
/// Cap on the wall time one input sample may claim.
const MAX_INPUT_DELTA_SECONDS: f64 = 0.1;
/// Cadence of the periodic item sync log line.
const ITEM_LOG_INTERVAL_SECONDS: u64 = 2;

/// Everything one tick produced, carried out of the scene lock.
#[derive(Default)]
pub struct TickOutputs {
    pub player_hurts: Vec<PlayerHurt>,
    pub enemy_dieds: Vec<EnemyDied>,
    pub enemy_attack_states: Vec<EnemyAttackStateDelta>,
    pub level_ups: Vec<PlayerLevelUp>,
    pub projectile_spawns: Vec<ProjectileState>,
    pub projectile_despawns: Vec<ProjectileDespawn>,
    pub dropped_items: Vec<ItemState>,
    pub game_over: Option<GameOver>,
    pub upgrade_request: Option<UpgradeRequest>,
    pub should_sync: bool,
    pub force_full_sync: bool,
    pub built_sync: bool,
    pub built_delta: bool,
    pub sync: GameStateSync,
    pub delta: GameStateDeltaSync,
    pub event_tick: u64,
    pub event_wave_id: u32,
    pub perf_report: Option<metrics::PerfReport>,
}

/// Spawns the loop task for a freshly created scene.
pub fn start_game_loop(state: Arc<AppState>, room_id: u32) {
    tokio::spawn(run_game_loop(state, room_id));
}

async fn run_game_loop(state: Arc<AppState>, room_id: u32) {
    // Arm the scene's counters under the lock and claim a generation; an
    // older loop task for the same room stops once it sees the bump.
    let (generation, tick_interval_seconds) = {
        let mut inner = state.engine.inner.lock().await;
        let Some(scene) = inner.scenes.get_mut(&room_id) else {
            tracing::warn!(room_id, "no scene to run a loop for");
            return;
        };
        scene.loop_generation += 1;
        scene.tick = 0;
        scene.sync_accumulator = 0.0;
        scene.sync_idle_elapsed = 0.0;
        scene.full_sync_elapsed = 0.0;
        scene.dynamic_sync_interval = scene.sync_interval;
        scene.last_tick_at = None;
        scene.perf.reset();
        (scene.loop_generation, scene.tick_interval)
    };

    tracing::debug!(room_id, tick_interval_seconds, "game loop started");
    let mut interval = tokio::time::interval(Duration::from_secs_f64(tick_interval_seconds));
    loop {
        interval.tick().await;
        if !process_scene_tick(&state, room_id, generation, tick_interval_seconds).await {
            break;
        }
    }
    tracing::debug!(room_id, "game loop stopped");
}

/// One loop firing. Returns false once the scene is gone, over, or replaced.
async fn process_scene_tick(
    state: &Arc<AppState>,
    room_id: u32,
    generation: u64,
    tick_interval_seconds: f64,
) -> bool {
    let mut outputs = TickOutputs::default();
    let mut expired_players: Vec<u32> = Vec::new();
    let mut paused_only = false;

    {
        let mut inner = state.engine.inner.lock().await;
        let Some(scene) = inner.scenes.get_mut(&room_id) else {
            return false;
        };
        if scene.loop_generation != generation || scene.game_over {
            return false;
        }
        let configs = &state.engine.configs;

        let perf_start = Instant::now();
        let dt_seconds = compute_tick_delta(scene, tick_interval_seconds);

        let grace_seconds = configs.server.reconnect_grace_seconds as f64;
        collect_expired_players(scene, grace_seconds, &mut expired_players);

        if scene.is_paused {
            // Ingress keeps draining, the world stands still.
            scene.tick += 1;
            let perf_ms = perf_start.elapsed().as_secs_f64() * 1000.0;
            metrics::record_perf_sample(configs, scene, perf_ms, dt_seconds, true, 0, 0);
            paused_only = true;
        } else {
            process_active_tick(
                configs,
                scene,
                room_id,
                dt_seconds,
                tick_interval_seconds,
                perf_start,
                &mut outputs,
            );
        }
    }

    finalize_scene_tick(state, room_id, expired_players, paused_only, outputs).await;
    true
}

/// Measured dt against the steady clock, clamped so a stalled host does not
/// fast-forward the world.
fn compute_tick_delta(scene: &mut Scene, tick_interval_seconds: f64) -> f64 {
    let now = Instant::now();
    let elapsed = match scene.last_tick_at {
        Some(previous) => now.duration_since(previous).as_secs_f64(),
        None => scene.tick_interval,
    };
    scene.last_tick_at = Some(now);
    let clamped = elapsed.clamp(0.0, MAX_TICK_DELTA_SECONDS);
    if clamped > 0.0 {
        clamped
    } else {
        tick_interval_seconds
    }
}

fn collect_expired_players(scene: &Scene, grace_seconds: f64, out: &mut Vec<u32>) {
    let now = Instant::now();
    for (&player_id, runtime) in &scene.players {
        if runtime.is_connected {
            continue;
        }
        let Some(disconnected_at) = runtime.disconnected_at else {
            continue;
        };
        if now.duration_since(disconnected_at).as_secs_f64() >= grace_seconds {
            out.push(player_id);
        }
    }
}

/// The ordered pipeline of an unpaused tick.
fn process_active_tick(
    configs: &EngineConfigs,
    scene: &mut Scene,
    room_id: u32,
    dt_seconds: f64,
    tick_interval_seconds: f64,
    perf_start: Instant,
    outputs: &mut TickOutputs,
) {
    let mut has_dirty = false;

    process_player_inputs(configs, scene, tick_interval_seconds, dt_seconds, &mut has_dirty);
    scene.elapsed += dt_seconds;
    enemy::process_enemies(configs, scene, dt_seconds, &mut has_dirty);
    process_items(configs, scene, &mut has_dirty);
    combat::process_combat_and_projectiles(
        configs,
        scene,
        dt_seconds,
        &mut outputs.player_hurts,
        &mut outputs.enemy_dieds,
        &mut outputs.enemy_attack_states,
        &mut outputs.level_ups,
        &mut outputs.game_over,
        &mut outputs.projectile_spawns,
        &mut outputs.projectile_despawns,
        &mut outputs.dropped_items,
        &mut has_dirty,
    );
    upgrade::try_begin_pending_upgrade(scene, room_id, &mut outputs.upgrade_request);
    record_player_history(configs, scene);

    let has_dirty_players = !scene.dirty_player_ids.is_empty();
    let has_dirty_enemies = !scene.dirty_enemy_ids.is_empty();
    let has_dirty_items = !scene.dirty_item_ids.is_empty();
    let has_priority_events = !outputs.projectile_spawns.is_empty()
        || !outputs.projectile_despawns.is_empty()
        || !outputs.dropped_items.is_empty()
        || !outputs.player_hurts.is_empty()
        || !outputs.enemy_attack_states.is_empty()
        || !outputs.enemy_dieds.is_empty()
        || !outputs.level_ups.is_empty()
        || outputs.game_over.is_some()
        || outputs.upgrade_request.is_some();

    scene.tick += 1;
    sync::update_sync_scheduling(
        configs,
        scene,
        dt_seconds,
        tick_interval_seconds,
        has_priority_events,
        has_dirty_players,
        has_dirty_enemies,
        has_dirty_items,
        &mut outputs.should_sync,
        &mut outputs.force_full_sync,
    );

    let has_dirty_any = has_dirty_players || has_dirty_enemies || has_dirty_items;
    let want_sync = outputs.should_sync || outputs.force_full_sync;
    let mut delta_items = 0;
    let mut sync_items = 0;
    if want_sync && (outputs.force_full_sync || has_dirty_any) {
        let result = sync::build_sync_payloads(
            room_id,
            scene,
            outputs.force_full_sync,
            &mut outputs.sync,
            &mut outputs.delta,
        );
        outputs.built_sync = result.built_sync;
        outputs.built_delta = result.built_delta;
        delta_items = result.delta_items;
        sync_items = result.sync_items;
    }

    let perf_ms = perf_start.elapsed().as_secs_f64() * 1000.0;
    metrics::record_perf_sample(
        configs, scene, perf_ms, dt_seconds, false, delta_items, sync_items,
    );

    if outputs.game_over.is_some() {
        outputs.perf_report = Some(metrics::capture_report(configs, scene));
    }
    outputs.event_tick = scene.tick;
    outputs.event_wave_id = scene.wave_id;

    maybe_log_item_sync(room_id, scene, outputs, delta_items, sync_items);
}

/// Post-lock half of a tick: grace expiry cleanup, event dispatch, room
/// reset on game over, metrics persistence and the state broadcasts.
async fn finalize_scene_tick(
    state: &Arc<AppState>,
    room_id: u32,
    expired_players: Vec<u32>,
    paused_only: bool,
    mut outputs: TickOutputs,
) {
    for player_id in expired_players {
        tracing::info!(player_id, "reconnect grace expired, removing player");
        state.rooms.remove_player(player_id).await;
        state.engine.remove_player(player_id).await;
        state.tokens.revoke(player_id).await;
    }

    if paused_only {
        return;
    }

    events::dedup_projectile_spawns(&mut outputs.projectile_spawns);
    events::dedup_projectile_despawns(&mut outputs.projectile_despawns);
    events::dispatch_tick_events(state, room_id, &outputs).await;

    if outputs.game_over.is_some() {
        // The room resets only after the clients saw the game over message.
        if !state.rooms.finish_game(room_id).await {
            tracing::warn!(room_id, "room missing, game state not reset");
        }
    }

    if let Some(report) = outputs.perf_report.take() {
        metrics::save_report(room_id, report);
    }

    dispatch_state_sync_payloads(state, room_id, &outputs).await;
}

/// Deltas ride the datagram channel with a reliable fallback; full
/// snapshots prefer the reliable channel, and never ride the datagram
/// channel in a tick that already sent a delta there.
async fn dispatch_state_sync_payloads(state: &Arc<AppState>, room_id: u32, outputs: &TickOutputs) {
    let has_sync_payload = outputs.built_sync
        && (!outputs.sync.players.is_empty()
            || !outputs.sync.enemies.is_empty()
            || !outputs.sync.items.is_empty());
    let has_delta_payload = outputs.built_delta
        && (!outputs.delta.players.is_empty()
            || !outputs.delta.enemies.is_empty()
            || !outputs.delta.items.is_empty());
    if !has_sync_payload && !has_delta_payload {
        return;
    }

    let mut cached_sessions: Option<Vec<Weak<SessionHandle>>> = None;

    if has_delta_payload {
        let mut sent_udp = false;
        if let Some(udp) = state.udp() {
            sent_udp = udp.broadcast_delta_state(room_id, &outputs.delta).await > 0;
        }
        if !sent_udp {
            let sessions = room_sessions(state, room_id, &mut cached_sessions).await;
            if sessions.is_empty() {
                tracing::debug!(room_id, "no sessions for delta fallback");
            } else {
                broadcast_to_sessions(sessions, MSG_S2C_GAME_STATE_DELTA_SYNC, &outputs.delta);
            }
        }
    }

    if has_sync_payload {
        let allow_udp_sync = !outputs.force_full_sync && !has_delta_payload;
        let mut sent_udp = false;
        if allow_udp_sync && let Some(udp) = state.udp() {
            sent_udp = udp.broadcast_state(room_id, &outputs.sync).await > 0;
        }
        if !sent_udp {
            let sessions = room_sessions(state, room_id, &mut cached_sessions).await;
            if sessions.is_empty() {
                tracing::debug!(room_id, "no sessions for snapshot fallback");
            } else {
                broadcast_to_sessions(sessions, MSG_S2C_GAME_STATE_SYNC, &outputs.sync);
            }
        }
    }
}

async fn room_sessions<'a>(
    state: &Arc<AppState>,
    room_id: u32,
    cache: &'a mut Option<Vec<Weak<SessionHandle>>>,
) -> &'a [Weak<SessionHandle>] {
    if cache.is_none() {
        *cache = Some(state.rooms.room_sessions(room_id).await);
    }
    cache.as_deref().unwrap_or(&[])
}

/// Drains queued inputs for every connected player, splitting samples that
/// claim more time than one tick may simulate.
fn process_player_inputs(
    configs: &EngineConfigs,
    scene: &mut Scene,
    tick_interval_seconds: f64,
    dt_seconds: f64,
    has_dirty: &mut bool,
) {
    let Scene {
        config,
        players,
        dirty_player_ids,
        ..
    } = scene;

    for (&player_id, runtime) in players.iter_mut() {
        runtime.attack_cooldown_seconds -= dt_seconds;
        if !runtime.is_connected {
            runtime.pending_inputs.clear();
            runtime.wants_attacking = false;
            runtime.has_attack_dir = false;
            continue;
        }
        let mut moved = false;
        let mut consumed_input = false;
        consume_player_input_queue(
            config,
            configs,
            runtime,
            tick_interval_seconds,
            &mut moved,
            &mut consumed_input,
        );

        if moved || consumed_input || runtime.low_freq_dirty {
            sync::mark_player_dirty(dirty_player_ids, player_id, runtime, false);
            *has_dirty = true;
        }
    }
}

fn consume_player_input_queue(
    config: &SceneConfig,
    configs: &EngineConfigs,
    runtime: &mut PlayerRuntime,
    tick_interval_seconds: f64,
    moved: &mut bool,
    consumed_input: &mut bool,
) {
    let mut processed_seconds = 0.0;
    while processed_seconds < MAX_TICK_DELTA_SECONDS {
        let Some(input) = runtime.pending_inputs.front_mut() else {
            break;
        };
        let dx_raw = input.move_direction.x;
        let dy_raw = input.move_direction.y;
        let len_sq = dx_raw * dx_raw + dy_raw * dy_raw;

        let reported_dt = if input.delta_ms > 0 {
            (input.delta_ms as f64 / 1000.0).clamp(0.0, MAX_INPUT_DELTA_SECONDS)
        } else {
            tick_interval_seconds
        };
        let remaining_budget = MAX_TICK_DELTA_SECONDS - processed_seconds;
        let input_dt = reported_dt.min(remaining_budget);

        let can_move = runtime.state.is_alive;
        if (DIRECTION_EPSILON_SQ..=MAX_DIRECTION_LENGTH_SQ).contains(&len_sq)
            && input_dt > 0.0
            && can_move
        {
            let len = len_sq.sqrt();
            let dx = dx_raw / len;
            let dy = dy_raw / len;
            let speed = if runtime.state.move_speed > 0.0 {
                runtime.state.move_speed
            } else {
                configs.server.move_speed
            };

            let (new_x, new_y) = clamp_to_map(
                config,
                runtime.state.position.x + dx * speed * input_dt as f32,
                runtime.state.position.y + dy * speed * input_dt as f32,
            );
            if (new_x - runtime.state.position.x).abs() > 1e-4
                || (new_y - runtime.state.position.y).abs() > 1e-4
            {
                *moved = true;
            }
            runtime.state.position.x = new_x;
            runtime.state.position.y = new_y;
            runtime.state.rotation = degrees_from_direction(dx, dy);
            processed_seconds += input_dt;
            *consumed_input = true;
        } else {
            // Invalid direction still burns its time slice, otherwise a bad
            // sample would wedge the queue.
            processed_seconds += input_dt;
            *consumed_input = true;
        }

        // The sequence advances even for a partially consumed sample.
        if input.input_seq > runtime.last_input_seq {
            runtime.last_input_seq = input.input_seq;
        }

        let remaining_dt = reported_dt - input_dt;
        if remaining_dt > 1e-5 {
            // Keep the unconsumed remainder at the queue front for the next
            // tick.
            let remaining_ms = ((remaining_dt * 1000.0).round() as i64)
                .clamp(1, (MAX_INPUT_DELTA_SECONDS * 1000.0) as i64);
            input.delta_ms = remaining_ms as u32;
            break;
        }
        runtime.pending_inputs.pop_front();
    }
}

/// First alive player in range wins the item; heal effects clamp to max
/// health, the other effects stay reserved.
fn process_items(configs: &EngineConfigs, scene: &mut Scene, has_dirty: &mut bool) {
    if scene.alive_player_count() == 0 {
        return;
    }
    let pick_radius = if configs.items.pick_radius > 0.0 {
        configs.items.pick_radius
    } else {
        24.0
    };
    let pick_radius_sq = pick_radius * pick_radius;

    let Scene {
        players,
        items,
        dirty_item_ids,
        dirty_player_ids,
        ..
    } = scene;

    for (&item_id, item) in items.iter_mut() {
        if item.is_picked {
            continue;
        }
        for (&player_id, player) in players.iter_mut() {
            if !player.state.is_alive {
                continue;
            }
            let dx = player.state.position.x - item.x;
            let dy = player.state.position.y - item.y;
            if dx * dx + dy * dy > pick_radius_sq {
                continue;
            }

            item.is_picked = true;
            sync::mark_item_dirty(dirty_item_ids, item_id, item);
            *has_dirty = true;

            if item.effect == ItemEffect::Heal {
                let heal_value = configs.items.resolve(item.type_id).value.max(0);
                if heal_value > 0 {
                    let prev_hp = player.state.health;
                    let next_hp = (prev_hp + heal_value).min(player.state.max_health);
                    if next_hp != prev_hp {
                        player.state.health = next_hp;
                        sync::mark_player_dirty(dirty_player_ids, player_id, player, true);
                    }
                }
            }
            break;
        }
    }
}

/// Appends this tick's pose to each player's bounded reconciliation ring.
fn record_player_history(configs: &EngineConfigs, scene: &mut Scene) {
    let limit = scene.prediction_history_limit(&configs.server);
    let tick = scene.tick;
    for runtime in scene.players.values_mut() {
        runtime.history.push_back(crate::game::scene::HistoryEntry {
            tick,
            position: runtime.state.position,
            rotation: runtime.state.rotation,
            health: runtime.state.health,
            is_alive: runtime.state.is_alive,
            last_processed_input_seq: runtime.last_input_seq,
        });
        while runtime.history.len() > limit {
            runtime.history.pop_front();
        }
    }
}

fn maybe_log_item_sync(
    room_id: u32,
    scene: &mut Scene,
    outputs: &TickOutputs,
    delta_items: u32,
    sync_items: u32,
) {
    let log_interval_ticks = (scene.config.tick_rate as u64 * ITEM_LOG_INTERVAL_SECONDS).max(1);
    if scene.tick < scene.last_item_log_tick + log_interval_ticks {
        return;
    }
    scene.last_item_log_tick = scene.tick;
    tracing::info!(
        room_id,
        tick = scene.tick,
        items = scene.items.len(),
        dirty_items = scene.dirty_item_ids.len(),
        dropped_events = outputs.dropped_items.len(),
        built_sync = outputs.built_sync,
        built_delta = outputs.built_delta,
        delta_items,
        sync_items,
        "item sync snapshot"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::scene::ItemRuntime;
    use crate::game::test_support::{engine_configs, scene_with_players};
    use protocol::{PlayerInput, Vec2};

    fn input(seq: u32, dx: f32, dy: f32, delta_ms: u32) -> PlayerInput {
        PlayerInput {
            player_id: 1,
            input_seq: seq,
            move_direction: Vec2 { x: dx, y: dy },
            delta_ms,
            ..PlayerInput::default()
        }
    }

    #[test]
    fn input_moves_and_rotates_the_player() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        let start_x = scene.players.get(&1).unwrap().state.position.x;
        scene
            .players
            .get_mut(&1)
            .unwrap()
            .pending_inputs
            .push_back(input(1, 1.0, 0.0, 16));

        let mut has_dirty = false;
        process_player_inputs(&configs, &mut scene, 1.0 / 60.0, 1.0 / 60.0, &mut has_dirty);

        let player = scene.players.get(&1).unwrap();
        // 200 u/s for 16 ms.
        assert!((player.state.position.x - start_x - 3.2).abs() < 1e-3);
        assert_eq!(player.state.rotation, 0.0);
        assert_eq!(player.last_input_seq, 1);
        assert!(player.pending_inputs.is_empty());
        assert!(has_dirty);
        assert!(scene.dirty_player_ids.contains(&1));
    }

    #[test]
    fn oversized_sample_is_split_across_ticks() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        // 100 ms cap is hit while the queue claims 100 ms + 60 ms.
        {
            let player = scene.players.get_mut(&1).unwrap();
            player.pending_inputs.push_back(input(1, 1.0, 0.0, 100));
            player.pending_inputs.push_back(input(2, 1.0, 0.0, 60));
        }
        let mut has_dirty = false;
        process_player_inputs(&configs, &mut scene, 1.0 / 60.0, 1.0 / 60.0, &mut has_dirty);
        {
            let player = scene.players.get(&1).unwrap();
            // The first sample exhausted the budget, the second waits whole.
            assert_eq!(player.pending_inputs.len(), 1);
            assert_eq!(player.last_input_seq, 1);
        }
        process_player_inputs(&configs, &mut scene, 1.0 / 60.0, 1.0 / 60.0, &mut has_dirty);
        let player = scene.players.get(&1).unwrap();
        assert!(player.pending_inputs.is_empty());
        assert_eq!(player.last_input_seq, 2);
    }

    #[test]
    fn invalid_directions_consume_time_but_never_move() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        let start = scene.players.get(&1).unwrap().state.position;
        {
            let player = scene.players.get_mut(&1).unwrap();
            // Below the epsilon and above the cap, right at both edges.
            player.pending_inputs.push_back(input(1, 5e-4, 0.0, 16));
            player.pending_inputs.push_back(input(2, 1.2, 0.0, 16));
        }
        let mut has_dirty = false;
        process_player_inputs(&configs, &mut scene, 1.0 / 60.0, 1.0 / 60.0, &mut has_dirty);

        let player = scene.players.get(&1).unwrap();
        assert_eq!(player.state.position, start);
        // Bookkeeping still advanced.
        assert_eq!(player.last_input_seq, 2);
        assert!(player.pending_inputs.is_empty());
    }

    #[test]
    fn boundary_direction_magnitudes_behave_per_contract() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        let start = scene.players.get(&1).unwrap().state.position;
        {
            let player = scene.players.get_mut(&1).unwrap();
            // len_sq exactly 1.21 is still legal; just above is not.
            player.pending_inputs.push_back(input(1, 1.1, 0.0, 16));
            player.pending_inputs.push_back(input(2, 1.11, 0.0, 16));
        }
        let mut has_dirty = false;
        process_player_inputs(&configs, &mut scene, 1.0 / 60.0, 1.0 / 60.0, &mut has_dirty);
        let player = scene.players.get(&1).unwrap();
        // Exactly one of the two samples moved the player.
        assert!((player.state.position.x - start.x - 3.2).abs() < 1e-2);
    }

    #[test]
    fn disconnected_players_drop_their_queue() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        {
            let player = scene.players.get_mut(&1).unwrap();
            player.pending_inputs.push_back(input(1, 1.0, 0.0, 16));
            player.is_connected = false;
            player.wants_attacking = true;
        }
        let mut has_dirty = false;
        process_player_inputs(&configs, &mut scene, 1.0 / 60.0, 1.0 / 60.0, &mut has_dirty);
        let player = scene.players.get(&1).unwrap();
        assert!(player.pending_inputs.is_empty());
        assert!(!player.wants_attacking);
    }

    #[test]
    fn pickup_heals_up_to_the_cap() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        let player_pos = {
            let player = scene.players.get_mut(&1).unwrap();
            player.state.health = 90;
            player.state.position
        };
        scene.items.insert(
            1,
            ItemRuntime {
                item_id: 1,
                type_id: 1,
                effect: ItemEffect::Heal,
                x: player_pos.x + 5.0,
                y: player_pos.y,
                ..ItemRuntime::default()
            },
        );

        let mut has_dirty = false;
        process_items(&configs, &mut scene, &mut has_dirty);

        let player = scene.players.get(&1).unwrap();
        // Default medkit heals 20, clamped to max health 100.
        assert_eq!(player.state.health, 100);
        assert!(player.low_freq_dirty);
        let item = scene.items.get(&1).unwrap();
        assert!(item.is_picked);
        assert!(item.dirty_queued);
        assert!(has_dirty);
    }

    #[test]
    fn distant_items_stay_on_the_ground() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        let player_pos = scene.players.get(&1).unwrap().state.position;
        scene.items.insert(
            1,
            ItemRuntime {
                item_id: 1,
                type_id: 1,
                effect: ItemEffect::Heal,
                x: player_pos.x + 500.0,
                y: player_pos.y,
                ..ItemRuntime::default()
            },
        );
        let mut has_dirty = false;
        process_items(&configs, &mut scene, &mut has_dirty);
        assert!(!scene.items.get(&1).unwrap().is_picked);
        assert!(!has_dirty);
    }

    #[test]
    fn history_ring_is_bounded() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        let limit = scene.prediction_history_limit(&configs.server);
        for tick in 0..(limit as u64 + 50) {
            scene.tick = tick;
            record_player_history(&configs, &mut scene);
        }
        let player = scene.players.get(&1).unwrap();
        assert_eq!(player.history.len(), limit);
        // Newest entry is the last tick recorded.
        assert_eq!(
            player.history.back().unwrap().tick,
            limit as u64 + 49
        );
    }

    #[test]
    fn dt_clamp_caps_catchup() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1]);
        scene.last_tick_at = Some(Instant::now() - Duration::from_secs(5));
        let dt = compute_tick_delta(&mut scene, 1.0 / 60.0);
        assert!(dt <= MAX_TICK_DELTA_SECONDS + 1e-9);
        // First tick without a previous stamp uses the nominal interval.
        scene.last_tick_at = None;
        let dt = compute_tick_delta(&mut scene, 1.0 / 60.0);
        assert!((dt - scene.tick_interval).abs() < 1e-9);
    }

    #[test]
    fn grace_expiry_collects_only_overdue_players() {
        let configs = engine_configs();
        let mut scene = scene_with_players(&configs, &[1, 2]);
        {
            let player = scene.players.get_mut(&1).unwrap();
            player.is_connected = false;
            player.disconnected_at = Some(Instant::now() - Duration::from_secs(120));
        }
        {
            let player = scene.players.get_mut(&2).unwrap();
            player.is_connected = false;
            player.disconnected_at = Some(Instant::now());
        }
        let mut expired = Vec::new();
        collect_expired_players(&scene, configs.server.reconnect_grace_seconds as f64, &mut expired);
        assert_eq!(expired, vec![1]);
    }
}
