//! The authoritative scene engine: one fixed-tick simulation per playing
//! room. The engine owns all runtime entities; the network side only ever
//! feeds inputs in and carries outputs away.

pub mod combat;
pub mod drops;
pub mod enemy;
pub mod events;
pub mod melee;
pub mod metrics;
pub mod nav;
pub mod projectile;
pub mod scene;
pub mod sync;
pub mod tick;
pub mod upgrade;

#[cfg(test)]
pub(crate) mod test_support;

use std::collections::HashMap;

use protocol::{GameStateSync, PlayerInput, SceneInfo};
use tokio::sync::Mutex;

use crate::config::{
    EnemyTypesConfig, ItemsConfig, PlayerRolesConfig, ServerConfig, UpgradeConfig,
};
use crate::rooms::RoomSnapshot;
use scene::Scene;

/// Cap on buffered inputs per player; the oldest sample is dropped beyond it.
const MAX_PENDING_INPUTS: usize = 64;
/// Direction vectors shorter than this (squared) count as "no movement".
pub(crate) const DIRECTION_EPSILON_SQ: f32 = 1e-6;
/// Direction vectors longer than this (squared) are rejected as forged.
pub(crate) const MAX_DIRECTION_LENGTH_SQ: f32 = 1.21;

/// Immutable configuration snapshot the engine works against.
pub struct EngineConfigs {
    pub server: ServerConfig,
    pub roles: PlayerRolesConfig,
    pub enemy_types: EnemyTypesConfig,
    pub items: ItemsConfig,
    pub upgrades: UpgradeConfig,
}

#[derive(Default)]
pub(crate) struct EngineInner {
    pub(crate) scenes: HashMap<u32, Scene>,
    /// Reverse index player -> room, shared by both ingress channels.
    pub(crate) player_scene: HashMap<u32, u32>,
}

pub struct SceneEngine {
    pub(crate) configs: EngineConfigs,
    pub(crate) inner: Mutex<EngineInner>,
}

/// What a reconnecting client needs to resume.
pub struct ReconnectSnapshot {
    pub room_id: u32,
    pub server_tick: u64,
    pub is_paused: bool,
    pub player_name: String,
}

impl SceneEngine {
    pub fn new(configs: EngineConfigs) -> Self {
        Self {
            configs,
            inner: Mutex::new(EngineInner::default()),
        }
    }

    /// Builds a fresh scene for the room, replacing any stale one left over
    /// from a previous round. The stale loop task stops on its own once it
    /// sees the generation mismatch.
    pub async fn create_scene(&self, snapshot: &RoomSnapshot) -> SceneInfo {
        let mut inner = self.inner.lock().await;

        if let Some(stale) = inner.scenes.remove(&snapshot.room_id) {
            for player_id in stale.players.keys() {
                inner.player_scene.remove(player_id);
            }
        }

        let scene = Scene::new(&self.configs, snapshot);
        for player_id in scene.players.keys() {
            inner.player_scene.insert(*player_id, snapshot.room_id);
        }

        let info = SceneInfo {
            scene_id: snapshot.room_id,
            width: scene.config.width,
            height: scene.config.height,
            tick_rate: scene.config.tick_rate,
            state_sync_rate: scene.config.state_sync_rate,
        };
        inner.scenes.insert(snapshot.room_id, scene);
        tracing::info!(
            room_id = snapshot.room_id,
            players = snapshot.players.len(),
            "scene created"
        );
        info
    }

    /// Complete description of every synchronized entity, used for game
    /// start, reconnects and the post-upgrade normalization.
    pub async fn build_full_state(&self, room_id: u32) -> Option<GameStateSync> {
        let mut inner = self.inner.lock().await;
        let scene = inner.scenes.get_mut(&room_id)?;
        Some(sync::build_full_state(room_id, scene))
    }

    /// Validates and queues one input sample. Simulation happens on the next
    /// tick; here we only gate and bookkeep.
    pub async fn handle_player_input(&self, player_id: u32, input: PlayerInput) -> bool {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let Some(&room_id) = inner.player_scene.get(&player_id) else {
            tracing::debug!(player_id, "input from player without scene");
            return false;
        };
        let Some(scene) = inner.scenes.get_mut(&room_id) else {
            inner.player_scene.remove(&player_id);
            tracing::debug!(player_id, room_id, "scene gone, mapping evicted");
            return false;
        };
        let history_limit = scene.prediction_history_limit(&self.configs.server);
        let is_paused = scene.is_paused;
        let scene_tick = scene.tick;
        let Some(runtime) = scene.players.get_mut(&player_id) else {
            inner.player_scene.remove(&player_id);
            tracing::debug!(player_id, "player missing from scene, mapping evicted");
            return false;
        };

        // Inputs older than the prediction window are useless for
        // reconciliation; reject them outright.
        let input_tick = input.input_time.tick as u64;
        if input_tick > 0 && scene_tick > input_tick && (scene_tick - input_tick) > history_limit as u64
        {
            tracing::debug!(player_id, input_tick, scene_tick, "stale input rejected");
            return false;
        }

        let seq = input.input_seq;
        if seq != 0 && seq <= runtime.last_input_seq {
            tracing::debug!(
                player_id,
                seq,
                last = runtime.last_input_seq,
                "input sequence went backwards"
            );
            return false;
        }

        if is_paused {
            // Paused scenes still acknowledge sequences so client prediction
            // queues drain, but never simulate.
            let prev_seq = runtime.last_input_seq;
            runtime.last_input_seq = runtime.last_input_seq.max(seq);
            if runtime.last_input_seq != prev_seq {
                sync::mark_player_dirty(&mut scene.dirty_player_ids, player_id, runtime, false);
            }
            runtime.wants_attacking = false;
            runtime.pending_inputs.clear();
            return true;
        }

        // Attack intent is level-triggered, independent of movement.
        runtime.wants_attacking = input.is_attacking;

        let len_sq = input.move_direction.x * input.move_direction.x
            + input.move_direction.y * input.move_direction.y;
        if len_sq < DIRECTION_EPSILON_SQ {
            let prev_seq = runtime.last_input_seq;
            runtime.last_input_seq = runtime.last_input_seq.max(seq);
            if runtime.last_input_seq != prev_seq {
                sync::mark_player_dirty(&mut scene.dirty_player_ids, player_id, runtime, false);
            }
            return true;
        }
        if len_sq > MAX_DIRECTION_LENGTH_SQ {
            tracing::debug!(player_id, len_sq, "oversized direction rejected");
            return false;
        }

        if runtime.pending_inputs.len() >= MAX_PENDING_INPUTS {
            runtime.pending_inputs.pop_front();
        }
        runtime.pending_inputs.push_back(input);
        true
    }

    /// Flips the player to disconnected and starts the grace window.
    pub async fn mark_player_disconnected(&self, player_id: u32) -> bool {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let Some(&room_id) = inner.player_scene.get(&player_id) else {
            return false;
        };
        let Some(scene) = inner.scenes.get_mut(&room_id) else {
            inner.player_scene.remove(&player_id);
            return false;
        };
        let Some(runtime) = scene.players.get_mut(&player_id) else {
            inner.player_scene.remove(&player_id);
            return false;
        };
        if !runtime.is_connected {
            return true;
        }
        runtime.is_connected = false;
        runtime.disconnected_at = Some(std::time::Instant::now());
        runtime.pending_inputs.clear();
        runtime.wants_attacking = false;
        runtime.has_attack_dir = false;
        runtime.attack_cooldown_seconds = 0.0;
        tracing::info!(player_id, "player disconnected, grace window started");
        true
    }

    /// Restores a player inside the grace window and rebases the input
    /// sequence line on what the client last saw.
    pub async fn try_reconnect_player(
        &self,
        player_id: u32,
        room_id: u32,
        last_input_seq: u32,
        last_server_tick: u32,
    ) -> Option<ReconnectSnapshot> {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let &mapped_room_id = inner.player_scene.get(&player_id)?;
        if room_id != 0 && mapped_room_id != room_id {
            return None;
        }
        let scene = inner.scenes.get_mut(&mapped_room_id)?;
        let server_tick = scene.tick;
        let is_paused = scene.is_paused;
        let runtime = scene.players.get_mut(&player_id)?;

        runtime.is_connected = true;
        runtime.disconnected_at = None;
        runtime.pending_inputs.clear();
        runtime.wants_attacking = false;
        runtime.has_attack_dir = false;
        runtime.attack_cooldown_seconds = 0.0;
        runtime.last_input_seq = last_input_seq;
        runtime.last_sync_input_seq = last_input_seq;

        tracing::info!(
            player_id,
            room_id = mapped_room_id,
            last_input_seq,
            last_server_tick,
            server_tick,
            "player reconnected"
        );
        Some(ReconnectSnapshot {
            room_id: mapped_room_id,
            server_tick,
            is_paused,
            player_name: runtime.player_name.clone(),
        })
    }

    /// Drops the player's runtime; the scene itself goes with the last
    /// player, which also stops its loop task.
    pub async fn remove_player(&self, player_id: u32) {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let Some(&room_id) = inner.player_scene.get(&player_id) else {
            return;
        };
        inner.player_scene.remove(&player_id);
        let Some(scene) = inner.scenes.get_mut(&room_id) else {
            return;
        };
        scene.players.remove(&player_id);
        scene.dirty_player_ids.retain(|&id| id != player_id);
        if scene.players.is_empty() {
            inner.scenes.remove(&room_id);
            tracing::info!(room_id, "last player gone, scene dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::test_support::{engine_configs, room_snapshot};

    async fn engine_with_scene(players: &[u32]) -> SceneEngine {
        let engine = SceneEngine::new(engine_configs());
        engine.create_scene(&room_snapshot(players)).await;
        engine
    }

    fn input(seq: u32, dx: f32) -> PlayerInput {
        PlayerInput {
            player_id: 1,
            input_seq: seq,
            move_direction: protocol::Vec2 { x: dx, y: 0.0 },
            delta_ms: 16,
            ..PlayerInput::default()
        }
    }

    #[tokio::test]
    async fn input_sequences_must_advance() {
        let engine = engine_with_scene(&[1]).await;
        assert!(engine.handle_player_input(1, input(5, 1.0)).await);
        // Replays and regressions are rejected.
        assert!(!engine.handle_player_input(1, input(5, 1.0)).await);
        assert!(!engine.handle_player_input(1, input(4, 1.0)).await);
        assert!(engine.handle_player_input(1, input(6, 1.0)).await);
    }

    #[tokio::test]
    async fn stale_input_ticks_are_rejected() {
        let engine = engine_with_scene(&[1]).await;
        {
            let mut inner = engine.inner.lock().await;
            inner.scenes.get_mut(&1).unwrap().tick = 1000;
        }
        let mut sample = input(1, 1.0);
        sample.input_time.tick = 10;
        assert!(!engine.handle_player_input(1, sample).await);
        // A tick inside the prediction window is fine.
        let mut sample = input(2, 1.0);
        sample.input_time.tick = 990;
        assert!(engine.handle_player_input(1, sample).await);
    }

    #[tokio::test]
    async fn input_queue_drops_the_oldest_past_the_cap() {
        let engine = engine_with_scene(&[1]).await;
        for seq in 1..=(MAX_PENDING_INPUTS as u32 + 10) {
            engine.handle_player_input(1, input(seq, 1.0)).await;
        }
        let mut inner = engine.inner.lock().await;
        let player = inner
            .scenes
            .get_mut(&1)
            .unwrap()
            .players
            .get(&1)
            .unwrap();
        assert_eq!(player.pending_inputs.len(), MAX_PENDING_INPUTS);
        assert_eq!(player.pending_inputs.front().unwrap().input_seq, 11);
    }

    #[tokio::test]
    async fn reconnect_inside_the_grace_window_restores_the_player() {
        let engine = engine_with_scene(&[1, 2]).await;
        assert!(engine.mark_player_disconnected(1).await);
        {
            let mut inner = engine.inner.lock().await;
            let player = inner.scenes.get_mut(&1).unwrap().players.get(&1).unwrap();
            assert!(!player.is_connected);
            assert!(player.disconnected_at.is_some());
        }

        let snapshot = engine.try_reconnect_player(1, 1, 42, 0).await.unwrap();
        assert_eq!(snapshot.room_id, 1);
        assert!(!snapshot.is_paused);

        let mut inner = engine.inner.lock().await;
        let player = inner.scenes.get_mut(&1).unwrap().players.get(&1).unwrap();
        assert!(player.is_connected);
        assert!(player.disconnected_at.is_none());
        // The sequence line restarts at what the client last saw.
        assert_eq!(player.last_input_seq, 42);
        assert_eq!(player.last_sync_input_seq, 42);
    }

    #[tokio::test]
    async fn reconnect_after_removal_fails() {
        let engine = engine_with_scene(&[1, 2]).await;
        engine.mark_player_disconnected(1).await;
        // The grace window expired and the cleanup removed the runtime.
        engine.remove_player(1).await;
        assert!(engine.try_reconnect_player(1, 1, 42, 0).await.is_none());
        // The other player is untouched.
        assert!(engine.try_reconnect_player(2, 1, 0, 0).await.is_some());
    }

    #[tokio::test]
    async fn reconnect_rejects_a_room_mismatch() {
        let engine = engine_with_scene(&[1]).await;
        assert!(engine.try_reconnect_player(1, 99, 0, 0).await.is_none());
        // Zero means "whatever room the player is in".
        assert!(engine.try_reconnect_player(1, 0, 0, 0).await.is_some());
    }

    #[tokio::test]
    async fn last_player_removal_drops_the_scene() {
        let engine = engine_with_scene(&[1]).await;
        engine.remove_player(1).await;
        let inner = engine.inner.lock().await;
        assert!(inner.scenes.is_empty());
        assert!(inner.player_scene.is_empty());
    }

    #[tokio::test]
    async fn full_state_covers_all_living_entities() {
        let engine = engine_with_scene(&[1, 2]).await;
        let sync = engine.build_full_state(1).await.unwrap();
        assert!(sync.is_full_snapshot);
        assert_eq!(sync.players.len(), 2);
        assert_eq!(sync.enemies.len(), 4);
        assert!(sync.items.is_empty());
        assert!(engine.build_full_state(99).await.is_none());
    }
}
