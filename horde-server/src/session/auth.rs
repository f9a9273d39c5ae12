//! Login, heartbeat, reconnect and quit handling.

use protocol::{
    HeartbeatReply, HeartbeatRequest, LoginRequest, LoginResult, MSG_S2C_GAME_STATE_SYNC,
    MSG_S2C_HEARTBEAT, MSG_S2C_LOGIN_RESULT, MSG_S2C_RECONNECT_ACK, ReconnectAck, ReconnectRequest,
};

use super::{CloseReason, Session, parse_payload};
use crate::state::now_ms;
use crate::tokens::TokenStore;

impl Session {
    pub(crate) async fn handle_login(&mut self, payload: &[u8]) {
        let Some(login) = parse_payload::<LoginRequest>(payload, "failed to parse login payload")
        else {
            return;
        };

        if self.player_id != 0 {
            // Second login on the same stream is rejected, the session stays.
            let result = LoginResult {
                success: false,
                player_id: self.player_id,
                session_token: String::new(),
                message: "重复登录".into(),
            };
            self.handle.send(MSG_S2C_LOGIN_RESULT, &result);
            return;
        }

        self.player_id = self.state.allocate_player_id();
        self.player_name = if login.player_name.is_empty() {
            format!("玩家{}", self.player_id)
        } else {
            login.player_name
        };
        self.session_token = TokenStore::generate();
        self.state
            .tokens
            .register(self.player_id, self.session_token.clone())
            .await;

        let result = LoginResult {
            success: true,
            player_id: self.player_id,
            session_token: self.session_token.clone(),
            message: "login success".into(),
        };
        self.handle.send(MSG_S2C_LOGIN_RESULT, &result);
        tracing::info!(player_id = self.player_id, name = %self.player_name, "player logged in");
    }

    /// Answers wall time and the live session count. Never touches scenes.
    pub(crate) fn handle_heartbeat(&mut self, payload: &[u8]) {
        let Some(_heartbeat) =
            parse_payload::<HeartbeatRequest>(payload, "failed to parse heartbeat payload")
        else {
            return;
        };
        let reply = HeartbeatReply {
            timestamp: now_ms(),
            online_players: self.state.active_sessions(),
        };
        self.handle.send(MSG_S2C_HEARTBEAT, &reply);
    }

    pub(crate) async fn handle_reconnect_request(&mut self, payload: &[u8]) {
        let Some(request) =
            parse_payload::<ReconnectRequest>(payload, "failed to parse reconnect payload")
        else {
            return;
        };

        let mut ack = ReconnectAck {
            player_id: request.player_id,
            room_id: request.room_id,
            ..ReconnectAck::default()
        };
        let fail = |session: &Session, mut ack: ReconnectAck, message: &str, reason: &str| {
            ack.success = false;
            ack.message = message.into();
            session.handle.send(MSG_S2C_RECONNECT_ACK, &ack);
            tracing::info!(
                player_id = request.player_id,
                room_id = request.room_id,
                reason,
                "reconnect rejected"
            );
        };

        if self.player_id != 0 {
            fail(self, ack, "当前会话已登录", "session already logged in");
            return;
        }
        if request.player_id == 0 {
            fail(self, ack, "缺少玩家ID", "missing player id");
            return;
        }
        let Some(target_room_id) = self.state.rooms.player_room(request.player_id).await else {
            fail(self, ack, "玩家不在房间", "player not in room");
            return;
        };
        if request.room_id != 0 && request.room_id != target_room_id {
            fail(self, ack, "房间不匹配", "room mismatch");
            return;
        }
        if !request.session_token.is_empty()
            && !self
                .state
                .tokens
                .verify(request.player_id, &request.session_token)
                .await
        {
            fail(self, ack, "会话令牌无效", "invalid session token");
            return;
        }

        let weak_handle = std::sync::Arc::downgrade(&self.handle);
        let Some((is_playing, mut player_name)) = self
            .state
            .rooms
            .attach_session(request.player_id, target_room_id, weak_handle)
            .await
        else {
            fail(self, ack, "重连失败", "attach session failed");
            return;
        };

        if is_playing {
            let Some(snapshot) = self
                .state
                .engine
                .try_reconnect_player(
                    request.player_id,
                    target_room_id,
                    request.last_input_seq,
                    request.last_server_tick,
                )
                .await
            else {
                self.state
                    .rooms
                    .mark_player_disconnected(request.player_id)
                    .await;
                fail(self, ack, "场景不存在", "scene missing");
                return;
            };
            ack.server_tick = snapshot.server_tick as u32;
            ack.is_paused = snapshot.is_paused;
            if player_name.is_empty() {
                player_name = snapshot.player_name;
            }
        }

        ack.room_id = target_room_id;
        ack.is_playing = is_playing;

        let token = if request.session_token.is_empty() {
            TokenStore::generate()
        } else {
            request.session_token.clone()
        };
        self.state
            .tokens
            .register(request.player_id, token.clone())
            .await;
        self.session_token = token.clone();
        ack.session_token = token;

        self.player_id = request.player_id;
        self.player_name = if player_name.is_empty() {
            format!("玩家{}", self.player_id)
        } else {
            player_name
        };

        ack.success = true;
        ack.message = "reconnect success".into();
        self.handle.send(MSG_S2C_RECONNECT_ACK, &ack);
        tracing::info!(
            player_id = request.player_id,
            room_id = target_room_id,
            is_playing,
            "reconnect accepted"
        );

        if is_playing {
            // Bring only this session up to date; everyone else is current.
            if let Some(sync) = self.state.engine.build_full_state(target_room_id).await {
                self.handle.send(MSG_S2C_GAME_STATE_SYNC, &sync);
            }
        }
    }

    pub(crate) fn handle_request_quit(&mut self) {
        self.handle.close(CloseReason::ClientRequest);
    }
}
