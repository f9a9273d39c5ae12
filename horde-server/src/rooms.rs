//! The room registry: membership, ready flags, host transfer and the
//! broadcasts that keep everyone's lobby view current.
//!
//! Rooms hold only weak handles to sessions, so a room can never extend a
//! connection's lifetime. Broadcasts upgrade each handle and silently skip
//! the dead ones.

use std::collections::HashMap;
use std::sync::Weak;

use protocol::{
    CreateRoomRequest, CreateRoomResult, GameStart, JoinRoomRequest, JoinRoomResult,
    LeaveRoomResult, MSG_S2C_ROOM_UPDATE, RoomInfo, RoomList, RoomPlayerInfo, RoomUpdate,
    SetReadyRequest, SetReadyResult,
};
use tokio::sync::Mutex;

use crate::session::SessionHandle;

struct RoomPlayer {
    player_id: u32,
    player_name: String,
    is_ready: bool,
    is_host: bool,
    session: Weak<SessionHandle>,
}

struct Room {
    room_id: u32,
    name: String,
    max_players: u32,
    is_playing: bool,
    players: Vec<RoomPlayer>,
    /// Stable position index so lookups stay O(1) while `players` keeps its
    /// join order for the lobby view.
    player_index_by_id: HashMap<u32, usize>,
}

/// A member at the moment the game starts, handed to the scene engine.
pub struct RoomPlayerSnapshot {
    pub player_id: u32,
    pub player_name: String,
    pub is_host: bool,
}

/// Everything scene creation needs from the room.
pub struct RoomSnapshot {
    pub room_id: u32,
    pub players: Vec<RoomPlayerSnapshot>,
}

/// A membership update plus the sessions it goes to. Built under the lock,
/// sent after it is released.
struct PendingUpdate {
    message: RoomUpdate,
    targets: Vec<Weak<SessionHandle>>,
}

impl PendingUpdate {
    fn send(self) {
        for weak_session in &self.targets {
            if let Some(session) = weak_session.upgrade() {
                session.send(MSG_S2C_ROOM_UPDATE, &self.message);
            }
        }
    }
}

#[derive(Default)]
struct Registry {
    next_room_id: u32,
    rooms: HashMap<u32, Room>,
    player_room: HashMap<u32, u32>,
}

pub struct RoomRegistry {
    configured_max_players: u32,
    inner: Mutex<Registry>,
}

fn resolve_player_name(player_id: u32, player_name: &str) -> String {
    if player_name.is_empty() {
        format!("玩家{player_id}")
    } else {
        player_name.to_string()
    }
}

impl RoomRegistry {
    pub fn new(configured_max_players: u32) -> Self {
        Self {
            configured_max_players: configured_max_players.max(1),
            inner: Mutex::new(Registry {
                next_room_id: 1,
                ..Registry::default()
            }),
        }
    }

    pub async fn create_room(
        &self,
        player_id: u32,
        player_name: &str,
        session: Weak<SessionHandle>,
        request: &CreateRoomRequest,
    ) -> CreateRoomResult {
        let mut result = CreateRoomResult::default();
        let update;
        {
            let mut registry = self.inner.lock().await;
            if registry.player_room.contains_key(&player_id) {
                result.message = "请先离开当前房间".into();
                return result;
            }

            let room_id = registry.next_room_id;
            registry.next_room_id += 1;

            let max_players = if request.max_players == 0 {
                self.configured_max_players
            } else {
                request.max_players.clamp(1, self.configured_max_players)
            };
            let mut room = Room {
                room_id,
                name: if request.room_name.is_empty() {
                    format!("房间{room_id}")
                } else {
                    request.room_name.clone()
                },
                max_players,
                is_playing: false,
                players: Vec::new(),
                player_index_by_id: HashMap::new(),
            };
            room.players.push(RoomPlayer {
                player_id,
                player_name: resolve_player_name(player_id, player_name),
                is_ready: false,
                is_host: true,
                session,
            });
            room.player_index_by_id.insert(player_id, 0);

            update = build_room_update(&room);
            registry.rooms.insert(room_id, room);
            registry.player_room.insert(player_id, room_id);

            result.success = true;
            result.room_id = room_id;
            result.message = "房间创建成功".into();
        }
        update.send();
        tracing::info!(player_id, room_id = result.room_id, "room created");
        result
    }

    pub async fn join_room(
        &self,
        player_id: u32,
        player_name: &str,
        session: Weak<SessionHandle>,
        request: &JoinRoomRequest,
    ) -> JoinRoomResult {
        let mut result = JoinRoomResult::default();
        let update;
        {
            let mut registry = self.inner.lock().await;
            if registry.player_room.contains_key(&player_id) {
                result.message = "已在房间中".into();
                return result;
            }
            let Some(room) = registry.rooms.get_mut(&request.room_id) else {
                result.message = "房间不存在".into();
                return result;
            };
            if room.is_playing {
                result.message = "房间已开始游戏".into();
                return result;
            }
            if room.max_players > 0 && room.players.len() as u32 >= room.max_players {
                result.message = "房间已满".into();
                return result;
            }

            room.players.push(RoomPlayer {
                player_id,
                player_name: resolve_player_name(player_id, player_name),
                is_ready: false,
                is_host: false,
                session,
            });
            room.player_index_by_id
                .insert(player_id, room.players.len() - 1);
            update = build_room_update(room);
            registry.player_room.insert(player_id, request.room_id);

            result.success = true;
            result.message = "加入房间成功".into();
        }
        update.send();
        tracing::info!(player_id, room_id = request.room_id, "room joined");
        result
    }

    pub async fn leave_room(&self, player_id: u32) -> LeaveRoomResult {
        let mut result = LeaveRoomResult::default();
        let (removed, update) = {
            let mut registry = self.inner.lock().await;
            detach_player(&mut registry, player_id)
        };
        if !removed {
            result.message = "玩家未在任何房间".into();
            return result;
        }
        result.success = true;
        result.message = "已离开房间".into();
        if let Some(update) = update {
            update.send();
        }
        tracing::info!(player_id, "room left");
        result
    }

    pub async fn room_list(&self) -> RoomList {
        let registry = self.inner.lock().await;
        let mut list = RoomList::default();
        for (&room_id, room) in &registry.rooms {
            let host_name = room
                .players
                .iter()
                .find(|player| player.is_host)
                .map(|player| player.player_name.clone())
                .unwrap_or_default();
            list.rooms.push(RoomInfo {
                room_id,
                room_name: room.name.clone(),
                current_players: room.players.len() as u32,
                max_players: room.max_players,
                is_playing: room.is_playing,
                host_name,
            });
        }
        list
    }

    pub async fn set_ready(&self, player_id: u32, request: &SetReadyRequest) -> SetReadyResult {
        let mut result = SetReadyResult::default();
        let update;
        {
            let mut registry = self.inner.lock().await;
            let Some(&room_id) = registry.player_room.get(&player_id) else {
                result.message = "玩家未在房间".into();
                return result;
            };
            let Some(room) = registry.rooms.get_mut(&room_id) else {
                registry.player_room.remove(&player_id);
                result.message = "房间不存在".into();
                return result;
            };
            if room.is_playing {
                result.room_id = room_id;
                result.message = "游戏中无法切换准备状态".into();
                return result;
            }
            let Some(player) = find_player_mut(room, player_id) else {
                registry.player_room.remove(&player_id);
                result.message = "玩家未在房间".into();
                return result;
            };

            player.is_ready = request.is_ready;
            result.success = true;
            result.room_id = room_id;
            result.is_ready = player.is_ready;
            result.message = if player.is_ready {
                "已准备".into()
            } else {
                "已取消准备".into()
            };
            update = build_room_update(room);
        }
        update.send();
        result
    }

    /// Host starts the game. Succeeds only if the requester is host, the room
    /// is idle and every guest is ready; flips `is_playing`, clears the ready
    /// flags and returns the snapshot scene creation consumes.
    pub async fn try_start_game(
        &self,
        player_id: u32,
        result: &mut GameStart,
    ) -> Option<RoomSnapshot> {
        let mut registry = self.inner.lock().await;
        let Some(&room_id) = registry.player_room.get(&player_id) else {
            result.message = "玩家未在房间中".into();
            return None;
        };
        let Some(room) = registry.rooms.get_mut(&room_id) else {
            registry.player_room.remove(&player_id);
            result.message = "房间不存在".into();
            return None;
        };
        result.room_id = room_id;

        let Some(requester) = find_player(room, player_id) else {
            result.message = "玩家未在房间中".into();
            return None;
        };
        if !requester.is_host {
            result.message = "只有房主可以开始游戏".into();
            return None;
        }
        if room.is_playing {
            result.message = "房间已在游戏中".into();
            return None;
        }
        let all_ready = room
            .players
            .iter()
            .all(|player| player.is_host || player.is_ready);
        if !all_ready {
            result.message = "存在未准备的玩家".into();
            return None;
        }

        room.is_playing = true;
        for player in &mut room.players {
            player.is_ready = false;
        }

        result.success = true;
        result.start_time = crate::state::now_ms();
        result.message = "游戏开始".into();

        Some(RoomSnapshot {
            room_id,
            players: room
                .players
                .iter()
                .map(|player| RoomPlayerSnapshot {
                    player_id: player.player_id,
                    player_name: player.player_name.clone(),
                    is_host: player.is_host,
                })
                .collect(),
        })
    }

    /// Idempotent end-of-match reset; broadcasts the room update when the
    /// playing flag actually flipped.
    pub async fn finish_game(&self, room_id: u32) -> bool {
        let update;
        {
            let mut registry = self.inner.lock().await;
            let Some(room) = registry.rooms.get_mut(&room_id) else {
                return false;
            };
            if !room.is_playing {
                return true;
            }
            room.is_playing = false;
            update = build_room_update(room);
        }
        update.send();
        tracing::info!(room_id, "game finished, room reset");
        true
    }

    /// Drops a player from its room without a result message (disconnect
    /// cleanup path).
    pub async fn remove_player(&self, player_id: u32) {
        let (_, update) = {
            let mut registry = self.inner.lock().await;
            detach_player(&mut registry, player_id)
        };
        if let Some(update) = update {
            update.send();
        }
    }

    /// Weak session handles of every member, for broadcasts.
    pub async fn room_sessions(&self, room_id: u32) -> Vec<Weak<SessionHandle>> {
        let registry = self.inner.lock().await;
        let Some(room) = registry.rooms.get(&room_id) else {
            return Vec::new();
        };
        room.players
            .iter()
            .map(|player| player.session.clone())
            .collect()
    }

    pub async fn player_room(&self, player_id: u32) -> Option<u32> {
        self.inner.lock().await.player_room.get(&player_id).copied()
    }

    /// Nulls out the session handle but keeps the membership for the grace
    /// window.
    pub async fn mark_player_disconnected(&self, player_id: u32) -> bool {
        let mut registry = self.inner.lock().await;
        let Some(&room_id) = registry.player_room.get(&player_id) else {
            return false;
        };
        let Some(room) = registry.rooms.get_mut(&room_id) else {
            registry.player_room.remove(&player_id);
            return false;
        };
        let Some(player) = find_player_mut(room, player_id) else {
            return false;
        };
        player.session = Weak::new();
        true
    }

    /// Rebinds a session on reconnect. Fails when the player is unknown or a
    /// non-zero `room_id` does not match the stored membership.
    pub async fn attach_session(
        &self,
        player_id: u32,
        room_id: u32,
        session: Weak<SessionHandle>,
    ) -> Option<(bool, String)> {
        let mut registry = self.inner.lock().await;
        let &stored_room_id = registry.player_room.get(&player_id)?;
        if room_id != 0 && stored_room_id != room_id {
            return None;
        }
        let Some(room) = registry.rooms.get_mut(&stored_room_id) else {
            registry.player_room.remove(&player_id);
            return None;
        };
        let is_playing = room.is_playing;
        let player = find_player_mut(room, player_id)?;
        player.session = session;
        Some((is_playing, player.player_name.clone()))
    }
}

fn find_player<'a>(room: &'a Room, player_id: u32) -> Option<&'a RoomPlayer> {
    let &index = room.player_index_by_id.get(&player_id)?;
    room.players
        .get(index)
        .filter(|player| player.player_id == player_id)
}

fn find_player_mut<'a>(room: &'a mut Room, player_id: u32) -> Option<&'a mut RoomPlayer> {
    let &index = room.player_index_by_id.get(&player_id)?;
    room.players
        .get_mut(index)
        .filter(|player| player.player_id == player_id)
}

fn build_room_update(room: &Room) -> PendingUpdate {
    let mut message = RoomUpdate {
        room_id: room.room_id,
        players: Vec::with_capacity(room.players.len()),
    };
    let mut targets = Vec::with_capacity(room.players.len());
    for player in &room.players {
        message.players.push(RoomPlayerInfo {
            player_id: player.player_id,
            player_name: player.player_name.clone(),
            is_ready: player.is_ready,
            is_host: player.is_host,
        });
        targets.push(player.session.clone());
    }
    PendingUpdate { message, targets }
}

/// Removes the player from its room, rebuilding the position index, handing
/// the host role on if needed, and erasing the room once it is empty.
/// Returns whether the player was removed plus the membership update for the
/// remaining players, if any.
fn detach_player(registry: &mut Registry, player_id: u32) -> (bool, Option<PendingUpdate>) {
    let Some(&room_id) = registry.player_room.get(&player_id) else {
        return (false, None);
    };
    let Some(room) = registry.rooms.get_mut(&room_id) else {
        registry.player_room.remove(&player_id);
        return (false, None);
    };
    let remove_index = match room.player_index_by_id.get(&player_id) {
        Some(&index) if room.players.get(index).map(|p| p.player_id) == Some(player_id) => index,
        _ => return (false, None),
    };

    room.players.remove(remove_index);
    room.player_index_by_id.remove(&player_id);
    for index in remove_index..room.players.len() {
        room.player_index_by_id
            .insert(room.players[index].player_id, index);
    }
    registry.player_room.remove(&player_id);

    if room.players.is_empty() {
        registry.rooms.remove(&room_id);
        return (true, None);
    }

    ensure_host(room);
    (true, Some(build_room_update(room)))
}

/// The first remaining member inherits the host role when the host left.
fn ensure_host(room: &mut Room) {
    let has_host = room.players.iter().any(|player| player.is_host);
    if !has_host && !room.players.is_empty() {
        room.players[0].is_host = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(4)
    }

    async fn create(registry: &RoomRegistry, player_id: u32, max_players: u32) -> CreateRoomResult {
        registry
            .create_room(
                player_id,
                "",
                Weak::new(),
                &CreateRoomRequest {
                    room_name: "room".into(),
                    max_players,
                },
            )
            .await
    }

    async fn join(registry: &RoomRegistry, player_id: u32, room_id: u32) -> JoinRoomResult {
        registry
            .join_room(player_id, "", Weak::new(), &JoinRoomRequest { room_id })
            .await
    }

    #[tokio::test]
    async fn start_requires_host_and_ready_guests() {
        let registry = registry();
        let created = create(&registry, 1, 2).await;
        assert!(created.success);
        assert!(join(&registry, 2, created.room_id).await.success);

        // The guest may not start.
        let mut result = GameStart::default();
        assert!(registry.try_start_game(2, &mut result).await.is_none());
        assert!(result.message.contains("只有房主"));

        // The host may not start while the guest is unready.
        let mut result = GameStart::default();
        assert!(registry.try_start_game(1, &mut result).await.is_none());
        assert!(result.message.contains("未准备"));

        registry
            .set_ready(2, &SetReadyRequest { is_ready: true })
            .await;
        let mut result = GameStart::default();
        let snapshot = registry.try_start_game(1, &mut result).await.unwrap();
        assert!(result.success);
        assert_eq!(snapshot.room_id, created.room_id);
        assert_eq!(snapshot.players.len(), 2);

        // Starting again fails: the room is already playing.
        let mut result = GameStart::default();
        assert!(registry.try_start_game(1, &mut result).await.is_none());
        assert!(result.message.contains("已在游戏中"));
    }

    #[tokio::test]
    async fn ready_flags_are_cleared_by_start() {
        let registry = registry();
        let created = create(&registry, 1, 2).await;
        join(&registry, 2, created.room_id).await;
        registry
            .set_ready(2, &SetReadyRequest { is_ready: true })
            .await;
        let mut result = GameStart::default();
        registry.try_start_game(1, &mut result).await.unwrap();
        registry.finish_game(created.room_id).await;

        // After the reset the guest has to ready up again.
        let mut result = GameStart::default();
        assert!(registry.try_start_game(1, &mut result).await.is_none());
        assert!(result.message.contains("未准备"));
    }

    #[tokio::test]
    async fn finish_game_is_idempotent() {
        let registry = registry();
        let created = create(&registry, 1, 2).await;
        join(&registry, 2, created.room_id).await;
        registry
            .set_ready(2, &SetReadyRequest { is_ready: true })
            .await;
        let mut result = GameStart::default();
        registry.try_start_game(1, &mut result).await.unwrap();

        assert!(registry.finish_game(created.room_id).await);
        // A second reset with is_playing already false is a no-op success.
        assert!(registry.finish_game(created.room_id).await);
        assert!(!registry.finish_game(9999).await);
    }

    #[tokio::test]
    async fn full_room_rejects_joins() {
        let registry = registry();
        let created = create(&registry, 1, 2).await;
        assert!(join(&registry, 2, created.room_id).await.success);
        let rejected = join(&registry, 3, created.room_id).await;
        assert!(!rejected.success);
        assert!(rejected.message.contains("已满"));
    }

    #[tokio::test]
    async fn host_moves_on_when_host_leaves() {
        let registry = registry();
        let created = create(&registry, 1, 3).await;
        join(&registry, 2, created.room_id).await;
        assert!(registry.leave_room(1).await.success);

        let list = registry.room_list().await;
        assert_eq!(list.rooms.len(), 1);
        assert_eq!(list.rooms[0].current_players, 1);
        // Player 2 inherited the host role.
        let mut result = GameStart::default();
        let snapshot = registry.try_start_game(2, &mut result).await.unwrap();
        assert!(snapshot.players[0].is_host);
    }

    #[tokio::test]
    async fn empty_room_is_erased() {
        let registry = registry();
        let created = create(&registry, 1, 2).await;
        registry.leave_room(1).await;
        assert!(registry.room_list().await.rooms.is_empty());
        assert!(!join(&registry, 2, created.room_id).await.success);
    }

    #[tokio::test]
    async fn attach_session_validates_room() {
        let registry = registry();
        let created = create(&registry, 1, 2).await;
        assert!(
            registry
                .attach_session(1, created.room_id, Weak::new())
                .await
                .is_some()
        );
        // Zero means "whatever room the player is in".
        assert!(registry.attach_session(1, 0, Weak::new()).await.is_some());
        assert!(
            registry
                .attach_session(1, created.room_id + 1, Weak::new())
                .await
                .is_none()
        );
        assert!(registry.attach_session(42, 0, Weak::new()).await.is_none());
    }
}
