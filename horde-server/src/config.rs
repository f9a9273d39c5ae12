//! JSON configuration loaders. Every file is optional: a missing or broken
//! file logs a warning and falls back to the in-code defaults, unknown fields
//! are ignored. Each file is searched in three well known locations relative
//! to the working directory.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Server wide tuning knobs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub tcp_port: u16,
    pub udp_port: u16,
    pub max_players_per_room: u32,
    pub tick_rate: u32,
    pub state_sync_rate: u32,
    pub map_width: u32,
    pub map_height: u32,
    /// Fallback player speed when a role does not set one.
    pub move_speed: f32,
    pub wave_interval_seconds: f32,
    pub enemy_spawn_base_per_second: f32,
    pub enemy_spawn_per_player_per_second: f32,
    pub enemy_spawn_wave_growth_per_second: f32,
    pub max_enemies_alive: u32,
    pub max_enemy_spawn_per_tick: u32,
    pub reconnect_grace_seconds: u32,
    pub prediction_history_seconds: f32,
    pub projectile_speed: f32,
    pub projectile_radius: f32,
    pub projectile_ttl_seconds: f32,
    pub projectile_max_shots_per_tick: u32,
    pub projectile_attack_min_interval_seconds: f32,
    pub projectile_attack_max_interval_seconds: f32,
    pub sync_idle_light_seconds: f32,
    pub sync_idle_heavy_seconds: f32,
    pub sync_scale_light: f32,
    pub sync_scale_medium: f32,
    pub sync_scale_idle: f32,
    /// Keep every n-th metrics sample row; aggregates always cover all ticks.
    pub perf_sample_stride: u32,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_port: 7777,
            udp_port: 7778,
            max_players_per_room: 4,
            tick_rate: 60,
            state_sync_rate: 30,
            map_width: 2000,
            map_height: 2000,
            move_speed: 200.0,
            wave_interval_seconds: 15.0,
            enemy_spawn_base_per_second: 1.0,
            enemy_spawn_per_player_per_second: 0.75,
            enemy_spawn_wave_growth_per_second: 0.2,
            max_enemies_alive: 256,
            max_enemy_spawn_per_tick: 4,
            reconnect_grace_seconds: 60,
            prediction_history_seconds: 1.0,
            projectile_speed: 420.0,
            projectile_radius: 6.0,
            projectile_ttl_seconds: 2.5,
            projectile_max_shots_per_tick: 4,
            projectile_attack_min_interval_seconds: 0.05,
            projectile_attack_max_interval_seconds: 2.0,
            sync_idle_light_seconds: 1.0,
            sync_idle_heavy_seconds: 5.0,
            sync_scale_light: 1.5,
            sync_scale_medium: 2.0,
            sync_scale_idle: 4.0,
            perf_sample_stride: 10,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn load() -> Self {
        let Some(content) = read_first(&[
            "config/server_config.json",
            "../config/server_config.json",
            "server/config/server_config.json",
        ]) else {
            tracing::warn!("server_config.json not found, using defaults");
            return Self::default();
        };
        match Self::from_json(&content) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(%err, "server_config.json unreadable, using defaults");
                Self::default()
            }
        }
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let mut config: Self = serde_json::from_str(content)?;
        // The grace window is bounded so stale runtimes cannot pile up.
        config.reconnect_grace_seconds = config.reconnect_grace_seconds.min(600);
        Ok(config)
    }
}

/// Starting stats for one player role.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlayerRoleConfig {
    pub role_id: u32,
    pub name: String,
    pub max_health: i32,
    pub attack: u32,
    pub attack_speed: u32,
    /// <= 0 means "use the server wide move_speed".
    pub move_speed: f32,
    /// Critical hit chance in permil (0..=1000).
    pub critical_hit_rate: u32,
}

impl Default for PlayerRoleConfig {
    fn default() -> Self {
        Self {
            role_id: 0,
            name: String::new(),
            max_health: 100,
            attack: 10,
            attack_speed: 1,
            move_speed: 0.0,
            critical_hit_rate: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlayerRolesConfig {
    pub default_role_id: u32,
    pub roles: HashMap<u32, PlayerRoleConfig>,
}

impl Default for PlayerRolesConfig {
    fn default() -> Self {
        let fallback = PlayerRoleConfig {
            role_id: 1,
            name: "survivor".to_string(),
            ..PlayerRoleConfig::default()
        };
        Self {
            default_role_id: 1,
            roles: HashMap::from([(1, fallback)]),
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawPlayerRoles {
    default_role_id: u32,
    roles: Vec<PlayerRoleConfig>,
}

impl PlayerRolesConfig {
    pub fn load() -> Self {
        load_game_config("player_roles.json", Self::from_json)
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let raw: RawPlayerRoles = serde_json::from_str(content)?;
        let roles: HashMap<u32, PlayerRoleConfig> = raw
            .roles
            .into_iter()
            .filter(|role| role.role_id != 0)
            .map(|role| (role.role_id, role))
            .collect();
        if roles.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self {
            default_role_id: if raw.default_role_id > 0 {
                raw.default_role_id
            } else {
                1
            },
            roles,
        })
    }

    /// Resolves a role with fallback to the default, then to any known role.
    pub fn resolve(&self, role_id: u32) -> &PlayerRoleConfig {
        self.roles
            .get(&role_id)
            .or_else(|| self.roles.get(&self.default_role_id))
            .or_else(|| self.roles.values().min_by_key(|role| role.role_id))
            .expect("role table is never empty")
    }
}

/// Combat and movement stats for one enemy type.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EnemyTypeConfig {
    pub type_id: u32,
    pub name: String,
    pub max_health: i32,
    pub move_speed: f32,
    pub damage: i32,
    pub exp_reward: i32,
    /// Drop probability in percent (0..=100).
    pub drop_chance: u32,
    /// Distance at which the enemy enters its melee state.
    pub attack_enter_radius: f32,
    /// Distance at which it gives up again; kept >= enter for hysteresis.
    pub attack_exit_radius: f32,
    pub attack_interval_seconds: f32,
}

impl Default for EnemyTypeConfig {
    fn default() -> Self {
        Self {
            type_id: 0,
            name: String::new(),
            max_health: 30,
            move_speed: 60.0,
            damage: 0,
            exp_reward: 10,
            drop_chance: 30,
            attack_enter_radius: 34.0,
            attack_exit_radius: 40.0,
            attack_interval_seconds: 0.8,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EnemyTypesConfig {
    pub default_type_id: u32,
    pub enemies: HashMap<u32, EnemyTypeConfig>,
    /// Sorted candidate ids for random spawning, so picks are reproducible.
    pub spawn_type_ids: Vec<u32>,
}

impl Default for EnemyTypesConfig {
    fn default() -> Self {
        let fallback = EnemyTypeConfig {
            type_id: 1,
            name: "walker".to_string(),
            ..EnemyTypeConfig::default()
        };
        Self {
            default_type_id: 1,
            enemies: HashMap::from([(1, fallback)]),
            spawn_type_ids: vec![1],
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawEnemyTypes {
    default_type_id: u32,
    enemies: Vec<EnemyTypeConfig>,
}

impl EnemyTypesConfig {
    pub fn load() -> Self {
        load_game_config("enemy_types.json", Self::from_json)
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let raw: RawEnemyTypes = serde_json::from_str(content)?;
        let enemies: HashMap<u32, EnemyTypeConfig> = raw
            .enemies
            .into_iter()
            .filter(|enemy| enemy.type_id != 0)
            .map(|enemy| (enemy.type_id, enemy))
            .collect();
        if enemies.is_empty() {
            return Ok(Self::default());
        }
        let mut spawn_type_ids: Vec<u32> = enemies.keys().copied().collect();
        spawn_type_ids.sort_unstable();
        Ok(Self {
            default_type_id: if raw.default_type_id > 0 {
                raw.default_type_id
            } else {
                1
            },
            enemies,
            spawn_type_ids,
        })
    }

    pub fn resolve(&self, type_id: u32) -> &EnemyTypeConfig {
        self.enemies
            .get(&type_id)
            .or_else(|| self.enemies.get(&self.default_type_id))
            .or_else(|| self.enemies.values().min_by_key(|enemy| enemy.type_id))
            .expect("enemy type table is never empty")
    }
}

/// What picking up an item does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ItemEffect {
    #[default]
    None,
    Heal,
    Exp,
    Speed,
}

impl ItemEffect {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "heal" => Self::Heal,
            "exp" => Self::Exp,
            "speed" => Self::Speed,
            _ => Self::None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ItemTypeConfig {
    pub type_id: u32,
    pub name: String,
    /// Effect tag ("heal" | "exp" | "speed" | "none").
    pub effect: String,
    pub value: i32,
    /// 0 keeps the item out of the drop table.
    pub drop_weight: u32,
}

#[derive(Clone, Debug)]
pub struct ItemsConfig {
    pub default_type_id: u32,
    pub max_items_alive: u32,
    pub pick_radius: f32,
    pub items: HashMap<u32, ItemTypeConfig>,
}

impl Default for ItemsConfig {
    fn default() -> Self {
        let medkit = ItemTypeConfig {
            type_id: 1,
            name: "medkit".to_string(),
            effect: "heal".to_string(),
            value: 20,
            drop_weight: 100,
        };
        Self {
            default_type_id: 1,
            max_items_alive: 6,
            pick_radius: 24.0,
            items: HashMap::from([(1, medkit)]),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawItems {
    default_type_id: u32,
    max_items_alive: u32,
    pick_radius: f32,
    items: Vec<ItemTypeConfig>,
}

impl Default for RawItems {
    fn default() -> Self {
        Self {
            default_type_id: 1,
            max_items_alive: 6,
            pick_radius: 24.0,
            items: Vec::new(),
        }
    }
}

impl ItemsConfig {
    pub fn load() -> Self {
        load_game_config("items_config.json", Self::from_json)
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let raw: RawItems = serde_json::from_str(content)?;
        let items: HashMap<u32, ItemTypeConfig> = raw
            .items
            .into_iter()
            .filter(|item| item.type_id != 0)
            .map(|item| (item.type_id, item))
            .collect();
        if items.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self {
            default_type_id: if raw.default_type_id > 0 {
                raw.default_type_id
            } else {
                1
            },
            max_items_alive: raw.max_items_alive,
            pick_radius: raw.pick_radius,
            items,
        })
    }

    pub fn resolve(&self, type_id: u32) -> &ItemTypeConfig {
        self.items
            .get(&type_id)
            .or_else(|| self.items.get(&self.default_type_id))
            .or_else(|| self.items.values().min_by_key(|item| item.type_id))
            .expect("item table is never empty")
    }
}

/// One rollable upgrade effect.
#[derive(Clone, Debug)]
pub struct UpgradeEffectConfig {
    /// One of the `protocol::UPGRADE_TYPE_*` constants.
    pub effect_type: u32,
    /// One of the `protocol::UPGRADE_LEVEL_*` tiers.
    pub level: u32,
    pub value: f32,
    pub weight: u32,
}

#[derive(Clone, Debug)]
pub struct UpgradeConfig {
    /// Parsed from the file but forced to 3; the client UI shows three cards.
    pub option_count: u32,
    pub refresh_limit: u32,
    pub effects: Vec<UpgradeEffectConfig>,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        let mut effects = Vec::new();
        let table: [(u32, [f32; 3]); 5] = [
            (protocol::UPGRADE_TYPE_MOVE_SPEED, [10.0, 20.0, 35.0]),
            (protocol::UPGRADE_TYPE_ATTACK, [2.0, 4.0, 7.0]),
            (protocol::UPGRADE_TYPE_ATTACK_SPEED, [1.0, 2.0, 3.0]),
            (protocol::UPGRADE_TYPE_MAX_HEALTH, [10.0, 20.0, 35.0]),
            (protocol::UPGRADE_TYPE_CRITICAL_RATE, [10.0, 20.0, 30.0]),
        ];
        for (effect_type, values) in table {
            for (index, value) in values.into_iter().enumerate() {
                effects.push(UpgradeEffectConfig {
                    effect_type,
                    level: protocol::UPGRADE_LEVEL_LOW + index as u32,
                    value,
                    weight: [100, 60, 30][index],
                });
            }
        }
        Self {
            option_count: 3,
            refresh_limit: 1,
            effects,
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawUpgrade {
    option_count: u32,
    refresh_limit: u32,
    effects: Vec<RawUpgradeEffect>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawUpgradeEffect {
    #[serde(rename = "type")]
    effect_type: String,
    level: String,
    value: f32,
    weight: u32,
}

fn parse_upgrade_type(raw: &str) -> u32 {
    match raw.to_ascii_lowercase().as_str() {
        "move_speed" | "movespeed" => protocol::UPGRADE_TYPE_MOVE_SPEED,
        "attack" => protocol::UPGRADE_TYPE_ATTACK,
        "attack_speed" | "attackspeed" => protocol::UPGRADE_TYPE_ATTACK_SPEED,
        "max_health" | "maxhealth" => protocol::UPGRADE_TYPE_MAX_HEALTH,
        "critical_rate" | "criticalrate" => protocol::UPGRADE_TYPE_CRITICAL_RATE,
        _ => protocol::UPGRADE_TYPE_UNKNOWN,
    }
}

fn parse_upgrade_level(raw: &str) -> u32 {
    match raw.to_ascii_lowercase().as_str() {
        "low" => protocol::UPGRADE_LEVEL_LOW,
        "mid" | "medium" => protocol::UPGRADE_LEVEL_MEDIUM,
        "high" => protocol::UPGRADE_LEVEL_HIGH,
        _ => protocol::UPGRADE_LEVEL_UNKNOWN,
    }
}

impl UpgradeConfig {
    pub fn load() -> Self {
        load_game_config("upgrade_config.json", Self::from_json)
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let raw: RawUpgrade = serde_json::from_str(content)?;
        let effects: Vec<UpgradeEffectConfig> = raw
            .effects
            .into_iter()
            .filter_map(|effect| {
                let effect_type = parse_upgrade_type(&effect.effect_type);
                let level = parse_upgrade_level(&effect.level);
                if effect_type == protocol::UPGRADE_TYPE_UNKNOWN
                    || level == protocol::UPGRADE_LEVEL_UNKNOWN
                {
                    return None;
                }
                Some(UpgradeEffectConfig {
                    effect_type,
                    level,
                    value: effect.value.clamp(-100_000.0, 100_000.0),
                    weight: effect.weight.clamp(1, 100_000),
                })
            })
            .collect();
        if effects.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self {
            option_count: 3,
            refresh_limit: raw.refresh_limit.min(999),
            effects,
        })
    }
}

/// Reads the first existing file out of a path candidate list.
fn read_first(paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .map(Path::new)
        .find_map(|path| fs::read_to_string(path).ok())
}

fn load_game_config<T: Default>(
    name: &str,
    parse: impl Fn(&str) -> Result<T, serde_json::Error>,
) -> T {
    let candidates = [
        format!("game_config/{name}"),
        format!("../game_config/{name}"),
        format!("../../game_config/{name}"),
    ];
    let Some(content) = candidates
        .iter()
        .find_map(|path| fs::read_to_string(path).ok())
    else {
        tracing::warn!(name, "config not found, using defaults");
        return T::default();
    };
    match parse(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(name, %err, "config unreadable, using defaults");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_fills_missing_fields_with_defaults() {
        let config = ServerConfig::from_json(r#"{"tcp_port": 9000, "unknown_field": 1}"#).unwrap();
        assert_eq!(config.tcp_port, 9000);
        assert_eq!(config.udp_port, 7778);
        assert_eq!(config.tick_rate, 60);
    }

    #[test]
    fn reconnect_grace_is_clamped() {
        let config = ServerConfig::from_json(r#"{"reconnect_grace_seconds": 4000}"#).unwrap();
        assert_eq!(config.reconnect_grace_seconds, 600);
    }

    #[test]
    fn roles_resolve_falls_back_to_default_role() {
        let config = PlayerRolesConfig::from_json(
            r#"{"default_role_id": 2, "roles": [
                {"role_id": 2, "name": "gunner", "max_health": 120},
                {"role_id": 5, "name": "scout", "move_speed": 260.0}
            ]}"#,
        )
        .unwrap();
        assert_eq!(config.resolve(5).name, "scout");
        assert_eq!(config.resolve(99).role_id, 2);
    }

    #[test]
    fn enemy_spawn_ids_are_sorted() {
        let config = EnemyTypesConfig::from_json(
            r#"{"enemies": [
                {"type_id": 9, "name": "brute"},
                {"type_id": 2, "name": "walker"},
                {"type_id": 4, "name": "spitter"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(config.spawn_type_ids, vec![2, 4, 9]);
    }

    #[test]
    fn empty_enemy_table_falls_back() {
        let config = EnemyTypesConfig::from_json(r#"{"enemies": []}"#).unwrap();
        assert_eq!(config.resolve(0).type_id, 1);
    }

    #[test]
    fn item_effects_parse_with_none_fallback() {
        assert_eq!(ItemEffect::parse("heal"), ItemEffect::Heal);
        assert_eq!(ItemEffect::parse("exp"), ItemEffect::Exp);
        assert_eq!(ItemEffect::parse("speed"), ItemEffect::Speed);
        assert_eq!(ItemEffect::parse("mystery"), ItemEffect::None);
    }

    #[test]
    fn upgrade_option_count_is_forced_to_three() {
        let config = UpgradeConfig::from_json(
            r#"{"option_count": 5, "refresh_limit": 2, "effects": [
                {"type": "attack", "level": "low", "value": 2, "weight": 100},
                {"type": "bogus", "level": "low", "value": 1, "weight": 10}
            ]}"#,
        )
        .unwrap();
        assert_eq!(config.option_count, 3);
        assert_eq!(config.refresh_limit, 2);
        // The bogus effect type is dropped.
        assert_eq!(config.effects.len(), 1);
    }

    #[test]
    fn broken_upgrade_file_yields_default_table() {
        let config = UpgradeConfig::from_json(r#"{"effects": []}"#).unwrap();
        assert_eq!(config.effects.len(), 15);
        assert_eq!(config.option_count, 3);
    }
}
