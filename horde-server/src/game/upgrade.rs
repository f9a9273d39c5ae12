//! The upgrade dialogue: a closed stage machine per scene that pauses the
//! world while one player picks a stat boost.
//!
//! `None -> RequestSent -> OptionsSent -> WaitingSelect -> (RequestSent|None)`
//!
//! Every client transition validates both the stage and the designated
//! player; anything else is ignored with a debug log.

use protocol::{
    UpgradeEffect, UpgradeOption, UpgradeOptions, UpgradeRequest, UpgradeSelectAck,
};

use crate::config::UpgradeEffectConfig;
use crate::game::scene::{PlayerRuntime, Scene, UpgradeStage, next_rng};
use crate::game::{EngineConfigs, SceneEngine, sync};

/// Cards offered per roll; the loader pins the config to this as well.
const UPGRADE_OPTION_COUNT: usize = 3;

/// Entered from the tick loop when someone has a pending upgrade and no
/// dialogue is running. Pauses the scene and flushes all inputs.
pub fn try_begin_pending_upgrade(
    scene: &mut Scene,
    room_id: u32,
    upgrade_request: &mut Option<UpgradeRequest>,
) -> bool {
    if scene.upgrade_stage != UpgradeStage::None {
        return false;
    }
    let Some(candidate_player_id) = scene
        .players
        .iter()
        .find(|(_, runtime)| runtime.pending_upgrade_count > 0)
        .map(|(&player_id, _)| player_id)
    else {
        return false;
    };
    *upgrade_request = Some(begin_upgrade(
        scene,
        room_id,
        candidate_player_id,
        protocol::UPGRADE_REASON_LEVEL_UP,
    ));
    true
}

fn begin_upgrade(scene: &mut Scene, room_id: u32, player_id: u32, reason: u32) -> UpgradeRequest {
    scene.is_paused = true;
    scene.upgrade_player_id = player_id;
    scene.upgrade_stage = UpgradeStage::RequestSent;
    scene.upgrade_reason = reason;
    scene.upgrade_options.clear();
    for runtime in scene.players.values_mut() {
        runtime.pending_inputs.clear();
        runtime.wants_attacking = false;
    }
    UpgradeRequest {
        room_id,
        player_id,
        reason,
    }
}

fn reset_upgrade(scene: &mut Scene) {
    scene.is_paused = false;
    scene.upgrade_player_id = 0;
    scene.upgrade_stage = UpgradeStage::None;
    scene.upgrade_reason = protocol::UPGRADE_REASON_UNKNOWN;
    scene.upgrade_options.clear();
}

/// Weighted sample of three distinct effects; the candidate pool refills
/// when the table is smaller than the offer.
fn build_upgrade_options(configs: &EngineConfigs, scene: &mut Scene) {
    scene.upgrade_options.clear();
    let effects = &configs.upgrades.effects;
    if effects.is_empty() {
        return;
    }

    let mut candidates: Vec<usize> = (0..effects.len()).collect();
    for _ in 0..UPGRADE_OPTION_COUNT {
        if candidates.is_empty() {
            candidates.extend(0..effects.len());
        }
        let total_weight: u64 = candidates
            .iter()
            .map(|&index| effects[index].weight.max(1) as u64)
            .sum();
        if total_weight == 0 {
            break;
        }

        let mut roll = next_rng(&mut scene.rng_state) as u64 % total_weight;
        let mut chosen_pos = 0;
        for (position, &index) in candidates.iter().enumerate() {
            let weight = effects[index].weight.max(1) as u64;
            if roll < weight {
                chosen_pos = position;
                break;
            }
            roll -= weight;
        }

        scene
            .upgrade_options
            .push(effects[candidates[chosen_pos]].clone());
        candidates.remove(chosen_pos);
    }
}

/// Applies one effect to the player, clamped per stat.
fn apply_upgrade_effect(runtime: &mut PlayerRuntime, effect: &UpgradeEffectConfig) {
    let delta = effect.value.round() as i64;
    match effect.effect_type {
        protocol::UPGRADE_TYPE_MOVE_SPEED => {
            runtime.state.move_speed =
                (runtime.state.move_speed + delta as f32).clamp(0.0, 5000.0);
        }
        protocol::UPGRADE_TYPE_ATTACK => {
            let next = (runtime.state.attack as i64 + delta).clamp(0, 100_000);
            runtime.state.attack = next as u32;
        }
        protocol::UPGRADE_TYPE_ATTACK_SPEED => {
            let next = (runtime.state.attack_speed as i64 + delta).clamp(1, 1_000);
            runtime.state.attack_speed = next as u32;
        }
        protocol::UPGRADE_TYPE_MAX_HEALTH => {
            let next = (runtime.state.max_health as i64 + delta).clamp(1, 100_000) as i32;
            runtime.state.max_health = next;
            if runtime.state.health > next {
                runtime.state.health = next;
            }
        }
        protocol::UPGRADE_TYPE_CRITICAL_RATE => {
            let next = (runtime.state.critical_hit_rate as i64 + delta).clamp(0, 10_000);
            runtime.state.critical_hit_rate = next as u32;
        }
        _ => {}
    }
}

/// Result of a select: what the session layer has to broadcast.
pub struct UpgradeSelectOutcome {
    pub room_id: u32,
    pub ack: UpgradeSelectAck,
    /// Set when the player has more pending upgrades and the dialogue
    /// reopens right away.
    pub next_request: Option<UpgradeRequest>,
    /// Set when the scene unpaused; clients get a normalizing full snapshot.
    pub resumed: bool,
}

impl SceneEngine {
    /// `RequestSent -> OptionsSent`: roll the options and hand them out.
    pub async fn handle_upgrade_request_ack(&self, player_id: u32) -> Option<(u32, UpgradeOptions)> {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let &room_id = inner.player_scene.get(&player_id)?;
        let Some(scene) = inner.scenes.get_mut(&room_id) else {
            tracing::debug!(player_id, room_id, "upgrade request ack without scene");
            return None;
        };
        if scene.upgrade_stage != UpgradeStage::RequestSent || scene.upgrade_player_id != player_id
        {
            tracing::debug!(player_id, room_id, "upgrade request ack in wrong stage");
            return None;
        }
        let refresh_remaining = scene.players.get(&player_id)?.refresh_remaining;

        build_upgrade_options(&self.configs, scene);
        if scene.upgrade_options.is_empty() {
            tracing::warn!(room_id, "no upgrade options available, cancelling dialogue");
            reset_upgrade(scene);
            return None;
        }
        scene.upgrade_stage = UpgradeStage::OptionsSent;

        let mut options = UpgradeOptions {
            room_id,
            player_id,
            reason: scene.upgrade_reason,
            refresh_remaining,
            options: Vec::with_capacity(scene.upgrade_options.len()),
        };
        for (index, effect) in scene.upgrade_options.iter().enumerate() {
            options.options.push(UpgradeOption {
                option_index: index as u32,
                effects: vec![UpgradeEffect {
                    effect_type: effect.effect_type,
                    level: effect.level,
                    value: effect.value.round() as i32,
                }],
            });
        }
        Some((room_id, options))
    }

    /// `OptionsSent -> WaitingSelect`.
    pub async fn handle_upgrade_options_ack(&self, player_id: u32) -> bool {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let Some(&room_id) = inner.player_scene.get(&player_id) else {
            return false;
        };
        let Some(scene) = inner.scenes.get_mut(&room_id) else {
            return false;
        };
        if scene.upgrade_stage != UpgradeStage::OptionsSent || scene.upgrade_player_id != player_id
        {
            tracing::debug!(player_id, room_id, "upgrade options ack in wrong stage");
            return false;
        }
        scene.upgrade_stage = UpgradeStage::WaitingSelect;
        true
    }

    /// `WaitingSelect -> (RequestSent | None)`: apply the pick, then either
    /// reopen for the next pending upgrade or unpause.
    pub async fn handle_upgrade_select(
        &self,
        player_id: u32,
        option_index: u32,
    ) -> Option<UpgradeSelectOutcome> {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let &room_id = inner.player_scene.get(&player_id)?;
        let scene = inner.scenes.get_mut(&room_id)?;
        if scene.upgrade_stage != UpgradeStage::WaitingSelect
            || scene.upgrade_player_id != player_id
        {
            tracing::debug!(player_id, room_id, "upgrade select in wrong stage");
            return None;
        }
        if scene.upgrade_options.is_empty() {
            tracing::warn!(room_id, "upgrade select with empty options");
            return None;
        }
        if option_index as usize >= scene.upgrade_options.len() {
            tracing::warn!(room_id, option_index, "upgrade select index out of range");
            return None;
        }

        let effect = scene.upgrade_options[option_index as usize].clone();
        let runtime = scene.players.get_mut(&player_id)?;
        apply_upgrade_effect(runtime, &effect);
        sync::mark_player_dirty(&mut scene.dirty_player_ids, player_id, runtime, true);
        if runtime.pending_upgrade_count > 0 {
            runtime.pending_upgrade_count -= 1;
        }
        let more_pending = runtime.pending_upgrade_count > 0;

        let ack = UpgradeSelectAck {
            room_id,
            player_id,
            option_index,
        };
        let mut outcome = UpgradeSelectOutcome {
            room_id,
            ack,
            next_request: None,
            resumed: false,
        };
        if more_pending {
            outcome.next_request = Some(begin_upgrade(
                scene,
                room_id,
                player_id,
                protocol::UPGRADE_REASON_LEVEL_UP,
            ));
        } else {
            reset_upgrade(scene);
            outcome.resumed = true;
        }
        Some(outcome)
    }

    /// Burns one refresh and reopens the dialogue from `RequestSent`. Legal
    /// in any non-idle stage for the designated player.
    pub async fn handle_upgrade_refresh(&self, player_id: u32) -> Option<(u32, UpgradeRequest)> {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let &room_id = inner.player_scene.get(&player_id)?;
        let scene = inner.scenes.get_mut(&room_id)?;
        if scene.upgrade_stage == UpgradeStage::None || scene.upgrade_player_id != player_id {
            tracing::debug!(player_id, room_id, "upgrade refresh in wrong stage");
            return None;
        }
        let runtime = scene.players.get_mut(&player_id)?;
        if runtime.refresh_remaining == 0 {
            tracing::debug!(player_id, room_id, "refresh budget exhausted");
            return None;
        }
        runtime.refresh_remaining -= 1;

        let request = begin_upgrade(scene, room_id, player_id, protocol::UPGRADE_REASON_REFRESH);
        Some((room_id, request))
    }
}
