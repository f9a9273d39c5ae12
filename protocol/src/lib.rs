//! The message type ids and payload structures shared between the game server
//! and its clients. They are used consistent across both transport channels:
//! the reliable stream (length prefixed envelopes) and the datagram channel
//! (one bare envelope per packet).
//!
//! An envelope is always a big-endian u32 message type tag followed by the
//! serialized payload of the matching structure below.

use serde::{Deserialize, Serialize};

// Client -> Server.

/// Login with an optional display name. Payload: [`LoginRequest`].
pub const MSG_C2S_LOGIN: u32 = 1;
/// Heartbeat probe. Payload: [`HeartbeatRequest`].
pub const MSG_C2S_HEARTBEAT: u32 = 2;
/// Resume a session inside the reconnect grace window. Payload: [`ReconnectRequest`].
pub const MSG_C2S_RECONNECT_REQUEST: u32 = 3;
/// Open a new room. Payload: [`CreateRoomRequest`].
pub const MSG_C2S_CREATE_ROOM: u32 = 4;
/// List the rooms on this server. Payload: [`RoomListRequest`].
pub const MSG_C2S_GET_ROOM_LIST: u32 = 5;
/// Join an existing room. Payload: [`JoinRoomRequest`].
pub const MSG_C2S_JOIN_ROOM: u32 = 6;
/// Leave the current room. Payload: [`LeaveRoomRequest`].
pub const MSG_C2S_LEAVE_ROOM: u32 = 7;
/// Toggle the ready flag. Payload: [`SetReadyRequest`].
pub const MSG_C2S_SET_READY: u32 = 8;
/// Orderly quit; the server revokes the session token. No payload.
pub const MSG_C2S_REQUEST_QUIT: u32 = 9;
/// Host starts the game. Payload: [`StartGameRequest`].
pub const MSG_C2S_START_GAME: u32 = 10;
/// Movement/attack input sample. Payload: [`PlayerInput`]. The only message
/// type the datagram channel accepts.
pub const MSG_C2S_PLAYER_INPUT: u32 = 11;
/// Acknowledge an upgrade request. Payload: [`UpgradeRequestAck`].
pub const MSG_C2S_UPGRADE_REQUEST_ACK: u32 = 12;
/// Acknowledge received upgrade options. Payload: [`UpgradeOptionsAck`].
pub const MSG_C2S_UPGRADE_OPTIONS_ACK: u32 = 13;
/// Pick one of the offered upgrade options. Payload: [`UpgradeSelect`].
pub const MSG_C2S_UPGRADE_SELECT: u32 = 14;
/// Spend one refresh on a new set of options. Payload: [`UpgradeRefreshRequest`].
pub const MSG_C2S_UPGRADE_REFRESH_REQUEST: u32 = 15;

// Server -> Client.

/// Reply to [`MSG_C2S_LOGIN`]. Payload: [`LoginResult`].
pub const MSG_S2C_LOGIN_RESULT: u32 = 100;
/// Reply to [`MSG_C2S_HEARTBEAT`]. Payload: [`HeartbeatReply`].
pub const MSG_S2C_HEARTBEAT: u32 = 101;
/// Reply to [`MSG_C2S_RECONNECT_REQUEST`]. Payload: [`ReconnectAck`].
pub const MSG_S2C_RECONNECT_ACK: u32 = 102;
/// Reply to [`MSG_C2S_CREATE_ROOM`]. Payload: [`CreateRoomResult`].
pub const MSG_S2C_CREATE_ROOM_RESULT: u32 = 103;
/// Reply to [`MSG_C2S_GET_ROOM_LIST`]. Payload: [`RoomList`].
pub const MSG_S2C_ROOM_LIST: u32 = 104;
/// Reply to [`MSG_C2S_JOIN_ROOM`]. Payload: [`JoinRoomResult`].
pub const MSG_S2C_JOIN_ROOM_RESULT: u32 = 105;
/// Reply to [`MSG_C2S_LEAVE_ROOM`]. Payload: [`LeaveRoomResult`].
pub const MSG_S2C_LEAVE_ROOM_RESULT: u32 = 106;
/// Reply to [`MSG_C2S_SET_READY`]. Payload: [`SetReadyResult`].
pub const MSG_S2C_SET_READY_RESULT: u32 = 107;
/// Broadcast when the host starts the game. Payload: [`GameStart`].
pub const MSG_S2C_GAME_START: u32 = 108;
/// Broadcast on any membership/ready change. Payload: [`RoomUpdate`].
pub const MSG_S2C_ROOM_UPDATE: u32 = 109;
/// Full or partial snapshot of the scene. Payload: [`GameStateSync`].
pub const MSG_S2C_GAME_STATE_SYNC: u32 = 110;
/// Per-entity change masks since the last snapshot. Payload: [`GameStateDeltaSync`].
pub const MSG_S2C_GAME_STATE_DELTA_SYNC: u32 = 111;
/// Projectiles fired this tick. Payload: [`ProjectileSpawnEvent`].
pub const MSG_S2C_PROJECTILE_SPAWN: u32 = 112;
/// Projectiles removed this tick. Payload: [`ProjectileDespawnEvent`].
pub const MSG_S2C_PROJECTILE_DESPAWN: u32 = 113;
/// Items dropped by dying enemies this tick. Payload: [`DroppedItemEvent`].
pub const MSG_S2C_DROPPED_ITEM: u32 = 114;
/// Enemy melee state flips this tick. Payload: [`EnemyAttackStateSync`].
pub const MSG_S2C_ENEMY_ATTACK_STATE_SYNC: u32 = 115;
/// A player took damage. Payload: [`PlayerHurt`].
pub const MSG_S2C_PLAYER_HURT: u32 = 116;
/// An enemy died. Payload: [`EnemyDied`].
pub const MSG_S2C_ENEMY_DIED: u32 = 117;
/// A player gained a level. Payload: [`PlayerLevelUp`].
pub const MSG_S2C_PLAYER_LEVEL_UP: u32 = 118;
/// The scene paused and wants the named player to pick an upgrade. Payload: [`UpgradeRequest`].
pub const MSG_S2C_UPGRADE_REQUEST: u32 = 119;
/// The rolled upgrade options. Payload: [`UpgradeOptions`].
pub const MSG_S2C_UPGRADE_OPTIONS: u32 = 120;
/// Confirms an applied upgrade selection. Payload: [`UpgradeSelectAck`].
pub const MSG_S2C_UPGRADE_SELECT_ACK: u32 = 121;
/// End of match summary. Payload: [`GameOver`].
pub const MSG_S2C_GAME_OVER: u32 = 122;

// Change mask bits for [`PlayerDelta`].

pub const PLAYER_DELTA_POSITION: u32 = 1 << 0;
pub const PLAYER_DELTA_ROTATION: u32 = 1 << 1;
pub const PLAYER_DELTA_IS_ALIVE: u32 = 1 << 2;
pub const PLAYER_DELTA_LAST_PROCESSED_INPUT_SEQ: u32 = 1 << 3;

// Change mask bits for [`EnemyDelta`].

pub const ENEMY_DELTA_POSITION: u32 = 1 << 0;
pub const ENEMY_DELTA_HEALTH: u32 = 1 << 1;
pub const ENEMY_DELTA_IS_ALIVE: u32 = 1 << 2;

// Change mask bits for [`ItemDelta`].

pub const ITEM_DELTA_POSITION: u32 = 1 << 0;
pub const ITEM_DELTA_IS_PICKED: u32 = 1 << 1;
pub const ITEM_DELTA_TYPE: u32 = 1 << 2;

// Projectile despawn reasons.

pub const PROJECTILE_DESPAWN_UNKNOWN: u32 = 0;
pub const PROJECTILE_DESPAWN_HIT: u32 = 1;
pub const PROJECTILE_DESPAWN_EXPIRED: u32 = 2;
pub const PROJECTILE_DESPAWN_OUT_OF_BOUNDS: u32 = 3;

// Upgrade reasons.

pub const UPGRADE_REASON_UNKNOWN: u32 = 0;
pub const UPGRADE_REASON_LEVEL_UP: u32 = 1;
pub const UPGRADE_REASON_REFRESH: u32 = 2;

// Upgrade effect types.

pub const UPGRADE_TYPE_UNKNOWN: u32 = 0;
pub const UPGRADE_TYPE_MOVE_SPEED: u32 = 1;
pub const UPGRADE_TYPE_ATTACK: u32 = 2;
pub const UPGRADE_TYPE_ATTACK_SPEED: u32 = 3;
pub const UPGRADE_TYPE_MAX_HEALTH: u32 = 4;
pub const UPGRADE_TYPE_CRITICAL_RATE: u32 = 5;

// Upgrade effect tiers.

pub const UPGRADE_LEVEL_UNKNOWN: u32 = 0;
pub const UPGRADE_LEVEL_LOW: u32 = 1;
pub const UPGRADE_LEVEL_MEDIUM: u32 = 2;
pub const UPGRADE_LEVEL_HIGH: u32 = 3;

/// A 2d position or direction on the map plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

/// Server time stamp attached to every state bearing message, so the client
/// can order packets from both channels against the same tick line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncTime {
    /// Server wall clock in milliseconds.
    pub server_time: u64,
    /// The simulation tick the message describes.
    pub tick: u32,
}

/// The complete synchronized state of one player.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub player_id: u32,
    pub position: Vec2,
    /// Facing in degrees, from atan2 of the move direction.
    pub rotation: f32,
    pub health: i32,
    pub max_health: i32,
    pub level: u32,
    pub exp: u32,
    pub exp_to_next: u32,
    pub is_alive: bool,
    pub attack: u32,
    /// Shots per second; higher is faster.
    pub attack_speed: u32,
    pub move_speed: f32,
    /// Critical hit chance in permil (0..=1000).
    pub critical_hit_rate: u32,
    pub has_buff: bool,
    pub buff_id: u32,
    pub is_friendly: bool,
    pub role_id: u32,
    /// Highest input sequence the server has consumed for this player.
    pub last_processed_input_seq: u32,
}

/// The complete synchronized state of one enemy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnemyState {
    pub enemy_id: u32,
    pub type_id: u32,
    pub position: Vec2,
    pub health: i32,
    pub max_health: i32,
    pub is_alive: bool,
    /// The wave the enemy spawned in.
    pub wave_id: u32,
    /// Always false today; carried for future friendly summons.
    pub is_friendly: bool,
}

/// The synchronized state of one dropped item.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemState {
    pub item_id: u32,
    pub type_id: u32,
    pub position: Vec2,
    pub is_picked: bool,
}

/// A projectile at spawn time. Clients integrate it forward themselves, the
/// server only reports spawn and despawn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectileState {
    pub projectile_id: u32,
    pub owner_player_id: u32,
    pub position: Vec2,
    pub rotation: f32,
    pub ttl_ms: u32,
    pub speed: u32,
    pub damage: u32,
    pub has_buff: bool,
    pub buff_id: u32,
    pub is_friendly: bool,
}

/// Masked change record for one player. Only the fields named by
/// `changed_mask` carry meaning.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerDelta {
    pub player_id: u32,
    pub changed_mask: u32,
    pub position: Vec2,
    pub rotation: f32,
    pub is_alive: bool,
    pub last_processed_input_seq: u32,
}

/// Masked change record for one enemy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnemyDelta {
    pub enemy_id: u32,
    pub changed_mask: u32,
    pub position: Vec2,
    pub health: i32,
    pub is_alive: bool,
}

/// Masked change record for one item.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDelta {
    pub item_id: u32,
    pub changed_mask: u32,
    pub position: Vec2,
    pub is_picked: bool,
    pub type_id: u32,
}

/// Melee state flip of one enemy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnemyAttackStateDelta {
    pub enemy_id: u32,
    pub is_attacking: bool,
    pub target_player_id: u32,
}

/// Static scene parameters sent with [`GameStart`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneInfo {
    pub scene_id: u32,
    pub width: u32,
    pub height: u32,
    pub tick_rate: u32,
    pub state_sync_rate: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    pub player_name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoginResult {
    pub success: bool,
    pub player_id: u32,
    pub session_token: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Client wall clock, echoed for RTT probes.
    pub timestamp: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HeartbeatReply {
    pub timestamp: u64,
    pub online_players: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReconnectRequest {
    pub player_id: u32,
    pub room_id: u32,
    pub session_token: String,
    /// The last input sequence the client knows the server accepted.
    pub last_input_seq: u32,
    /// The last server tick the client applied.
    pub last_server_tick: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReconnectAck {
    pub success: bool,
    pub player_id: u32,
    pub room_id: u32,
    pub session_token: String,
    pub server_tick: u32,
    pub is_playing: bool,
    pub is_paused: bool,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub room_name: String,
    /// 0 means "use the server configured cap".
    pub max_players: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateRoomResult {
    pub success: bool,
    pub room_id: u32,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoomListRequest {}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: u32,
    pub room_name: String,
    pub current_players: u32,
    pub max_players: u32,
    pub is_playing: bool,
    pub host_name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoomList {
    pub rooms: Vec<RoomInfo>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JoinRoomRequest {
    pub room_id: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JoinRoomResult {
    pub success: bool,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LeaveRoomRequest {}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LeaveRoomResult {
    pub success: bool,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SetReadyRequest {
    pub is_ready: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SetReadyResult {
    pub success: bool,
    pub room_id: u32,
    pub is_ready: bool,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StartGameRequest {}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GameStart {
    pub success: bool,
    pub room_id: u32,
    /// Server wall clock at start, in milliseconds.
    pub start_time: u64,
    pub scene: SceneInfo,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoomPlayerInfo {
    pub player_id: u32,
    pub player_name: String,
    pub is_ready: bool,
    pub is_host: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoomUpdate {
    pub room_id: u32,
    pub players: Vec<RoomPlayerInfo>,
}

/// One input sample. On the datagram channel `player_id` and `session_token`
/// authenticate the packet; on the reliable channel the session identity wins.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlayerInput {
    pub player_id: u32,
    pub session_token: String,
    /// Client-side strictly increasing sequence number.
    pub input_seq: u32,
    /// The client tick the sample was taken at.
    pub input_time: SyncTime,
    pub move_direction: Vec2,
    pub is_attacking: bool,
    /// Wall clock covered by this sample, for server side re-integration.
    pub delta_ms: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStateSync {
    pub room_id: u32,
    pub sync_time: SyncTime,
    /// True when the message carries every synchronized entity of the scene.
    pub is_full_snapshot: bool,
    pub players: Vec<PlayerState>,
    pub enemies: Vec<EnemyState>,
    pub items: Vec<ItemState>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStateDeltaSync {
    pub room_id: u32,
    pub sync_time: SyncTime,
    pub players: Vec<PlayerDelta>,
    pub enemies: Vec<EnemyDelta>,
    pub items: Vec<ItemDelta>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProjectileSpawnEvent {
    pub room_id: u32,
    pub sync_time: SyncTime,
    pub projectiles: Vec<ProjectileState>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectileDespawn {
    pub projectile_id: u32,
    /// One of the `PROJECTILE_DESPAWN_*` constants.
    pub reason: u32,
    pub hit_enemy_id: u32,
    pub position: Vec2,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProjectileDespawnEvent {
    pub room_id: u32,
    pub sync_time: SyncTime,
    pub projectiles: Vec<ProjectileDespawn>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DroppedItemEvent {
    pub room_id: u32,
    pub sync_time: SyncTime,
    pub source_enemy_id: u32,
    pub wave_id: u32,
    pub items: Vec<ItemState>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EnemyAttackStateSync {
    pub room_id: u32,
    pub sync_time: SyncTime,
    pub enemies: Vec<EnemyAttackStateDelta>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlayerHurt {
    pub player_id: u32,
    pub damage: u32,
    pub remaining_health: i32,
    /// The enemy that dealt the damage.
    pub source_id: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EnemyDied {
    pub enemy_id: u32,
    pub killer_player_id: u32,
    pub wave_id: u32,
    pub position: Vec2,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlayerLevelUp {
    pub player_id: u32,
    pub new_level: u32,
    pub exp_to_next: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpgradeRequest {
    pub room_id: u32,
    pub player_id: u32,
    /// One of the `UPGRADE_REASON_*` constants.
    pub reason: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpgradeRequestAck {
    pub player_id: u32,
}

/// A single stat change offered by an upgrade option.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpgradeEffect {
    /// One of the `UPGRADE_TYPE_*` constants.
    pub effect_type: u32,
    /// One of the `UPGRADE_LEVEL_*` tiers.
    pub level: u32,
    pub value: i32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpgradeOption {
    pub option_index: u32,
    pub effects: Vec<UpgradeEffect>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpgradeOptions {
    pub room_id: u32,
    pub player_id: u32,
    pub reason: u32,
    pub refresh_remaining: u32,
    pub options: Vec<UpgradeOption>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpgradeOptionsAck {
    pub player_id: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpgradeSelect {
    pub player_id: u32,
    pub option_index: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpgradeSelectAck {
    pub room_id: u32,
    pub player_id: u32,
    pub option_index: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpgradeRefreshRequest {
    pub player_id: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlayerScore {
    pub player_id: u32,
    pub player_name: String,
    pub final_level: i32,
    pub kill_count: u32,
    pub damage_dealt: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GameOver {
    pub victory: bool,
    /// Whole seconds the room survived.
    pub survive_time: u32,
    pub scores: Vec<PlayerScore>,
}
