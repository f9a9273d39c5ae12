//! Shared fixtures for the engine tests.

use crate::config::{
    EnemyTypesConfig, ItemsConfig, PlayerRolesConfig, ServerConfig, UpgradeConfig,
};
use crate::game::EngineConfigs;
use crate::game::scene::Scene;
use crate::rooms::{RoomPlayerSnapshot, RoomSnapshot};

pub(crate) fn engine_configs() -> EngineConfigs {
    EngineConfigs {
        server: ServerConfig::default(),
        roles: PlayerRolesConfig::default(),
        enemy_types: EnemyTypesConfig::default(),
        items: ItemsConfig::default(),
        upgrades: UpgradeConfig::default(),
    }
}

pub(crate) fn room_snapshot(players: &[u32]) -> RoomSnapshot {
    RoomSnapshot {
        room_id: 1,
        players: players
            .iter()
            .map(|&player_id| RoomPlayerSnapshot {
                player_id,
                player_name: format!("p{player_id}"),
                is_host: Some(&player_id) == players.first(),
            })
            .collect(),
    }
}

pub(crate) fn scene_with_players(configs: &EngineConfigs, players: &[u32]) -> Scene {
    Scene::new(configs, &room_snapshot(players))
}
