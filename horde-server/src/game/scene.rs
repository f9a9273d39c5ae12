//! Scene state: the per-room world and every runtime entity in it, plus the
//! deterministic random source the whole simulation draws from.

use std::collections::{BTreeMap, VecDeque};
use std::f32::consts::PI;
use std::time::Instant;

use protocol::{EnemyState, PlayerState, Vec2};

use crate::config::{ItemEffect, ServerConfig};
use crate::game::metrics::PerfStats;
use crate::game::{EngineConfigs, enemy, tick};
use crate::rooms::RoomSnapshot;
use crate::state::now_ms;

/// Grid cell edge length for navigation and hit bucketing, in world units.
pub const NAV_CELL_SIZE: i32 = 100;
/// Fresh spawns and deaths stay in the snapshot channel this many sends so
/// they survive packet loss.
pub const ENEMY_SPAWN_FORCE_SYNC_COUNT: u32 = 3;
/// Offset from the map border for edge spawns.
pub const ENEMY_SPAWN_INSET: f32 = 16.0;

/// Ring radius for the initial player placement around the map center.
const PLAYER_SPAWN_RADIUS: f32 = 120.0;
/// Experience needed for the first level up.
const DEFAULT_EXP_TO_NEXT: u32 = 100;

/// Per-scene copy of the map and pacing parameters.
#[derive(Clone, Debug)]
pub struct SceneConfig {
    pub width: u32,
    pub height: u32,
    pub tick_rate: u32,
    pub state_sync_rate: u32,
    /// Fallback player speed for roles without one.
    pub move_speed: f32,
}

/// One entry of the per-player reconciliation ring.
#[derive(Clone, Copy, Debug)]
pub struct HistoryEntry {
    pub tick: u64,
    pub position: Vec2,
    pub rotation: f32,
    pub health: i32,
    pub is_alive: bool,
    pub last_processed_input_seq: u32,
}

pub struct PlayerRuntime {
    /// The synchronized state as the clients see it.
    pub state: PlayerState,
    pub player_name: String,
    pub is_connected: bool,
    pub disconnected_at: Option<Instant>,
    pub pending_inputs: VecDeque<protocol::PlayerInput>,
    /// Highest accepted input sequence; monotone per session.
    pub last_input_seq: u32,
    pub wants_attacking: bool,
    pub attack_cooldown_seconds: f64,
    pub target_refresh_elapsed: f64,
    pub locked_target_enemy_id: u32,
    pub has_attack_dir: bool,
    pub last_attack_dir_x: f32,
    pub last_attack_dir_y: f32,
    pub last_attack_rotation: f32,
    pub pending_upgrade_count: u32,
    pub refresh_remaining: u32,
    pub kill_count: u32,
    pub damage_dealt: u32,
    pub history: VecDeque<HistoryEntry>,
    pub dirty: bool,
    pub low_freq_dirty: bool,
    pub dirty_queued: bool,
    pub last_sync_position: Vec2,
    pub last_sync_rotation: f32,
    pub last_sync_is_alive: bool,
    pub last_sync_input_seq: u32,
    pub last_attack_dir_log_tick: u64,
    pub last_projectile_spawn_log_tick: u64,
}

#[derive(Default)]
pub struct EnemyRuntime {
    pub state: EnemyState,
    pub target_player_id: u32,
    pub replan_elapsed: f64,
    /// Remaining A* waypoints as grid cells, with `path_index` the cursor.
    pub path: Vec<(i32, i32)>,
    pub path_index: usize,
    pub is_attacking: bool,
    pub attack_target_player_id: u32,
    pub attack_cooldown_seconds: f64,
    /// While > 0 the enemy goes out as a full snapshot entry each send.
    pub force_sync_left: u32,
    pub dead_elapsed_seconds: f64,
    pub dirty: bool,
    pub dirty_queued: bool,
    pub last_sync_position: Vec2,
    pub last_sync_health: i32,
    pub last_sync_is_alive: bool,
}

#[derive(Default)]
pub struct ProjectileRuntime {
    pub projectile_id: u32,
    pub owner_player_id: u32,
    pub x: f32,
    pub y: f32,
    pub dir_x: f32,
    pub dir_y: f32,
    pub rotation: f32,
    pub speed: f32,
    pub damage: i32,
    pub has_buff: bool,
    pub buff_id: u32,
    pub is_friendly: bool,
    pub remaining_seconds: f64,
}

#[derive(Default)]
pub struct ItemRuntime {
    pub item_id: u32,
    pub type_id: u32,
    pub effect: ItemEffect,
    pub x: f32,
    pub y: f32,
    pub is_picked: bool,
    pub force_sync_left: u32,
    pub dirty: bool,
    pub dirty_queued: bool,
    pub last_sync_x: f32,
    pub last_sync_y: f32,
    pub last_sync_is_picked: bool,
    pub last_sync_type_id: u32,
}

/// All mutable state of one room's simulation. Entity maps are BTreeMaps so
/// iteration order is the id order, which keeps identically seeded scenes in
/// lockstep.
pub struct Scene {
    pub config: SceneConfig,
    pub tick: u64,
    pub elapsed: f64,
    pub spawn_elapsed: f64,
    pub wave_id: u32,
    pub game_over: bool,
    pub is_paused: bool,
    pub rng_state: u32,

    pub next_enemy_id: u32,
    pub next_projectile_id: u32,
    pub next_item_id: u32,

    pub players: BTreeMap<u32, PlayerRuntime>,
    pub enemies: BTreeMap<u32, EnemyRuntime>,
    pub projectiles: BTreeMap<u32, ProjectileRuntime>,
    pub items: BTreeMap<u32, ItemRuntime>,
    pub enemy_pool: Vec<EnemyRuntime>,
    pub projectile_pool: Vec<ProjectileRuntime>,
    pub item_pool: Vec<ItemRuntime>,

    pub dirty_player_ids: Vec<u32>,
    pub dirty_enemy_ids: Vec<u32>,
    pub dirty_item_ids: Vec<u32>,

    pub nav_cells_x: i32,
    pub nav_cells_y: i32,
    // A* scratch, reused across searches within the scene.
    pub nav_came_from: Vec<i32>,
    pub nav_g_score: Vec<f32>,
    pub nav_closed: Vec<u8>,

    pub upgrade_stage: UpgradeStage,
    pub upgrade_player_id: u32,
    pub upgrade_reason: u32,
    pub upgrade_options: Vec<crate::config::UpgradeEffectConfig>,

    pub tick_interval: f64,
    pub sync_interval: f64,
    pub dynamic_sync_interval: f64,
    pub full_sync_interval: f64,
    pub sync_accumulator: f64,
    pub sync_idle_elapsed: f64,
    pub full_sync_elapsed: f64,
    pub last_tick_at: Option<Instant>,
    /// Bumped whenever a loop task is (re)started; stale tasks notice and
    /// stop.
    pub loop_generation: u64,

    pub perf: PerfStats,
    pub last_item_log_tick: u64,
    pub unknown_enemy_type_warned: bool,
    pub unknown_item_type_warned: bool,
}

/// Stages of the pause-and-pick upgrade dialogue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpgradeStage {
    #[default]
    None,
    RequestSent,
    OptionsSent,
    WaitingSelect,
}

impl Scene {
    pub fn new(configs: &EngineConfigs, snapshot: &RoomSnapshot) -> Self {
        let server = &configs.server;
        let tick_rate = server.tick_rate.max(1);
        let state_sync_rate = server.state_sync_rate.max(1);
        let config = SceneConfig {
            width: server.map_width,
            height: server.map_height,
            tick_rate,
            state_sync_rate,
            move_speed: server.move_speed,
        };

        let mut rng_state = snapshot.room_id ^ now_ms() as u32;
        if rng_state == 0 {
            rng_state = 1;
        }

        let nav_cells_x = ((config.width as i32 + NAV_CELL_SIZE - 1) / NAV_CELL_SIZE).max(1);
        let nav_cells_y = ((config.height as i32 + NAV_CELL_SIZE - 1) / NAV_CELL_SIZE).max(1);
        let nav_cells = (nav_cells_x * nav_cells_y) as usize;

        let max_enemies_alive = if server.max_enemies_alive > 0 {
            server.max_enemies_alive as usize
        } else {
            256
        };
        let max_items_alive = if configs.items.max_items_alive > 0 {
            configs.items.max_items_alive as usize
        } else {
            64
        };

        let tick_interval = 1.0 / tick_rate as f64;
        let sync_interval = 1.0 / state_sync_rate as f64;

        let mut scene = Self {
            config,
            tick: 0,
            elapsed: 0.0,
            spawn_elapsed: 0.0,
            wave_id: 1,
            game_over: false,
            is_paused: false,
            rng_state,
            next_enemy_id: 1,
            next_projectile_id: 1,
            next_item_id: 1,
            players: BTreeMap::new(),
            enemies: BTreeMap::new(),
            projectiles: BTreeMap::new(),
            items: BTreeMap::new(),
            enemy_pool: Vec::with_capacity(max_enemies_alive),
            projectile_pool: Vec::with_capacity(max_enemies_alive),
            item_pool: Vec::with_capacity(max_items_alive),
            dirty_player_ids: Vec::with_capacity(snapshot.players.len()),
            dirty_enemy_ids: Vec::with_capacity(max_enemies_alive),
            dirty_item_ids: Vec::with_capacity(max_items_alive),
            nav_cells_x,
            nav_cells_y,
            nav_came_from: vec![-1; nav_cells],
            nav_g_score: vec![f32::INFINITY; nav_cells],
            nav_closed: vec![0; nav_cells],
            upgrade_stage: UpgradeStage::None,
            upgrade_player_id: 0,
            upgrade_reason: protocol::UPGRADE_REASON_UNKNOWN,
            upgrade_options: Vec::new(),
            tick_interval,
            sync_interval,
            dynamic_sync_interval: sync_interval,
            full_sync_interval: tick_interval * tick::FULL_SYNC_INTERVAL_TICKS as f64,
            sync_accumulator: 0.0,
            sync_idle_elapsed: 0.0,
            full_sync_elapsed: 0.0,
            last_tick_at: None,
            loop_generation: 0,
            perf: PerfStats::default(),
            last_item_log_tick: 0,
            unknown_enemy_type_warned: false,
            unknown_item_type_warned: false,
        };

        place_players(configs, snapshot, &mut scene);

        // A small welcome committee so the field is not empty on frame one.
        let initial_enemy_count = (snapshot.players.len() * 2).max(1).min(max_enemies_alive);
        for _ in 0..initial_enemy_count {
            let type_id = enemy::pick_spawn_enemy_type_id(configs, &mut scene.rng_state);
            enemy::spawn_enemy_on_edge(configs, &mut scene, type_id);
        }

        scene
    }

    /// How many ticks of history the reconciliation ring keeps.
    pub fn prediction_history_limit(&self, server: &ServerConfig) -> usize {
        let tick_interval = if self.tick_interval > 0.0 {
            self.tick_interval
        } else if server.tick_rate > 0 {
            1.0 / server.tick_rate as f64
        } else {
            1.0 / 60.0
        };
        let seconds = server.prediction_history_seconds.max(0.1) as f64;
        ((seconds / tick_interval).ceil() as usize).max(1)
    }

    pub fn alive_player_count(&self) -> usize {
        self.players
            .values()
            .filter(|player| player.state.is_alive)
            .count()
    }
}

fn place_players(configs: &EngineConfigs, snapshot: &RoomSnapshot, scene: &mut Scene) {
    let count = snapshot.players.len();
    if count == 0 {
        return;
    }
    let center_x = scene.config.width as f32 * 0.5;
    let center_y = scene.config.height as f32 * 0.5;
    let role = configs.roles.resolve(configs.roles.default_role_id);

    for (index, member) in snapshot.players.iter().enumerate() {
        let angle = 2.0 * PI * index as f32 / count as f32;
        let (x, y) = clamp_to_map(
            &scene.config,
            center_x + angle.cos() * PLAYER_SPAWN_RADIUS,
            center_y + angle.sin() * PLAYER_SPAWN_RADIUS,
        );

        let max_health = role.max_health.max(1);
        let move_speed = if role.move_speed > 0.0 {
            role.move_speed
        } else {
            scene.config.move_speed
        };

        let state = PlayerState {
            player_id: member.player_id,
            position: Vec2 { x, y },
            rotation: angle * 180.0 / PI,
            health: max_health,
            max_health,
            level: 1,
            exp: 0,
            exp_to_next: DEFAULT_EXP_TO_NEXT,
            is_alive: true,
            attack: role.attack,
            attack_speed: role.attack_speed.max(1),
            move_speed,
            critical_hit_rate: role.critical_hit_rate,
            has_buff: false,
            buff_id: 0,
            is_friendly: true,
            role_id: role.role_id,
            last_processed_input_seq: 0,
        };

        let runtime = PlayerRuntime {
            player_name: if member.player_name.is_empty() {
                format!("玩家{}", member.player_id)
            } else {
                member.player_name.clone()
            },
            is_connected: true,
            disconnected_at: None,
            pending_inputs: VecDeque::new(),
            last_input_seq: 0,
            wants_attacking: false,
            attack_cooldown_seconds: 0.0,
            target_refresh_elapsed: 0.0,
            locked_target_enemy_id: 0,
            has_attack_dir: false,
            last_attack_dir_x: 0.0,
            last_attack_dir_y: 0.0,
            last_attack_rotation: 0.0,
            pending_upgrade_count: 0,
            refresh_remaining: configs.upgrades.refresh_limit,
            kill_count: 0,
            damage_dealt: 0,
            history: VecDeque::new(),
            dirty: false,
            low_freq_dirty: false,
            dirty_queued: false,
            // Delta baseline starts at the spawn state.
            last_sync_position: state.position,
            last_sync_rotation: state.rotation,
            last_sync_is_alive: state.is_alive,
            last_sync_input_seq: 0,
            last_attack_dir_log_tick: 0,
            last_projectile_spawn_log_tick: 0,
            state,
        };
        scene.players.insert(member.player_id, runtime);
    }
}

/// Positions never leave the map, whatever wrote them.
pub fn clamp_to_map(config: &SceneConfig, x: f32, y: f32) -> (f32, f32) {
    (
        x.clamp(0.0, config.width as f32),
        y.clamp(0.0, config.height as f32),
    )
}

/// Linear congruential step; fast and reproducible, which is all gameplay
/// randomness needs.
pub fn next_rng(state: &mut u32) -> u32 {
    *state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
    *state
}

/// Uniform float in [0, 1) from the high 24 bits of the generator.
pub fn next_rng_unit_float(state: &mut u32) -> f32 {
    let raw = next_rng(state);
    ((raw >> 8) & 0x00FF_FFFF) as f32 * (1.0 / 16_777_216.0)
}

/// Facing angle in degrees for a movement direction; zero-ish vectors map
/// to zero.
pub fn degrees_from_direction(x: f32, y: f32) -> f32 {
    if x.abs() < DIRECTION_EPSILON && y.abs() < DIRECTION_EPSILON {
        return 0.0;
    }
    y.atan2(x) * 180.0 / PI
}

const DIRECTION_EPSILON: f32 = 1e-6;
