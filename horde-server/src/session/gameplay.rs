//! In-game requests on the reliable channel: game start, input ingress and
//! the upgrade dialogue.

use std::sync::Arc;
use std::time::Duration;

use protocol::{
    GameStart, MSG_S2C_GAME_START, MSG_S2C_GAME_STATE_SYNC, MSG_S2C_UPGRADE_OPTIONS,
    MSG_S2C_UPGRADE_REQUEST, MSG_S2C_UPGRADE_SELECT_ACK, PlayerInput, StartGameRequest,
    UpgradeOptionsAck, UpgradeRefreshRequest, UpgradeRequestAck, UpgradeSelect,
};

use super::{Session, broadcast_to_sessions, parse_payload};
use crate::game::tick::start_game_loop;
use crate::state::AppState;

impl Session {
    pub(crate) async fn handle_start_game(&mut self, payload: &[u8]) {
        let Some(_request) =
            parse_payload::<StartGameRequest>(payload, "failed to parse start game payload")
        else {
            return;
        };

        let mut result = GameStart::default();
        let Some(snapshot) = self
            .state
            .rooms
            .try_start_game(self.player_id, &mut result)
            .await
        else {
            self.handle.send(MSG_S2C_GAME_START, &result);
            return;
        };

        let room_id = snapshot.room_id;
        result.scene = self.state.engine.create_scene(&snapshot).await;

        let sessions = self.state.rooms.room_sessions(room_id).await;
        broadcast_to_sessions(&sessions, MSG_S2C_GAME_START, &result);

        if send_full_sync_to_room(&self.state, room_id).await {
            start_game_loop(self.state.clone(), room_id);
        }
        tracing::info!(room_id, "game started");
    }

    pub(crate) async fn handle_player_input(&mut self, payload: &[u8]) {
        let Some(mut input) =
            parse_payload::<PlayerInput>(payload, "failed to parse player input")
        else {
            return;
        };
        if self.player_id == 0 {
            tracing::warn!("input from session without login");
            return;
        }
        if !input.session_token.is_empty()
            && !self
                .state
                .tokens
                .verify(self.player_id, &input.session_token)
                .await
        {
            tracing::warn!(player_id = self.player_id, "input token mismatch");
            return;
        }
        // The stream identity wins over whatever the packet claims.
        input.player_id = self.player_id;
        if !self.state.engine.handle_player_input(self.player_id, input).await {
            tracing::debug!(player_id = self.player_id, "input rejected or no scene");
        }
    }

    pub(crate) async fn handle_upgrade_request_ack(&mut self, payload: &[u8]) {
        let Some(_ack) =
            parse_payload::<UpgradeRequestAck>(payload, "failed to parse upgrade request ack")
        else {
            return;
        };
        if self.player_id == 0 {
            return;
        }
        let Some((room_id, options)) = self
            .state
            .engine
            .handle_upgrade_request_ack(self.player_id)
            .await
        else {
            tracing::debug!(player_id = self.player_id, "upgrade request ack rejected");
            return;
        };
        let sessions = self.state.rooms.room_sessions(room_id).await;
        broadcast_to_sessions(&sessions, MSG_S2C_UPGRADE_OPTIONS, &options);
    }

    pub(crate) async fn handle_upgrade_options_ack(&mut self, payload: &[u8]) {
        let Some(_ack) =
            parse_payload::<UpgradeOptionsAck>(payload, "failed to parse upgrade options ack")
        else {
            return;
        };
        if self.player_id == 0 {
            return;
        }
        if !self
            .state
            .engine
            .handle_upgrade_options_ack(self.player_id)
            .await
        {
            tracing::debug!(player_id = self.player_id, "upgrade options ack rejected");
        }
    }

    pub(crate) async fn handle_upgrade_select(&mut self, payload: &[u8]) {
        let Some(select) =
            parse_payload::<UpgradeSelect>(payload, "failed to parse upgrade select")
        else {
            return;
        };
        if self.player_id == 0 {
            return;
        }
        let Some(outcome) = self
            .state
            .engine
            .handle_upgrade_select(self.player_id, select.option_index)
            .await
        else {
            tracing::debug!(player_id = self.player_id, "upgrade select rejected");
            return;
        };

        let sessions = self.state.rooms.room_sessions(outcome.room_id).await;
        broadcast_to_sessions(&sessions, MSG_S2C_UPGRADE_SELECT_ACK, &outcome.ack);
        if let Some(next_request) = &outcome.next_request {
            broadcast_to_sessions(&sessions, MSG_S2C_UPGRADE_REQUEST, next_request);
        }
        if outcome.resumed {
            // Unpaused: hard-set every client to the post-upgrade state.
            if let Some(sync) = self.state.engine.build_full_state(outcome.room_id).await {
                broadcast_to_sessions(&sessions, MSG_S2C_GAME_STATE_SYNC, &sync);
            }
        }
    }

    pub(crate) async fn handle_upgrade_refresh_request(&mut self, payload: &[u8]) {
        let Some(_request) =
            parse_payload::<UpgradeRefreshRequest>(payload, "failed to parse upgrade refresh")
        else {
            return;
        };
        if self.player_id == 0 {
            return;
        }
        let Some((room_id, request)) = self
            .state
            .engine
            .handle_upgrade_refresh(self.player_id)
            .await
        else {
            tracing::debug!(player_id = self.player_id, "upgrade refresh rejected");
            return;
        };
        let sessions = self.state.rooms.room_sessions(room_id).await;
        broadcast_to_sessions(&sessions, MSG_S2C_UPGRADE_REQUEST, &request);
    }
}

/// Full snapshot to the whole room: datagram channel first, reliable
/// fallback while no endpoint is known yet, plus one delayed resend at the
/// sync cadence for clients whose first packet raced the game start.
pub(crate) async fn send_full_sync_to_room(state: &Arc<AppState>, room_id: u32) -> bool {
    let Some(sync) = state.engine.build_full_state(room_id).await else {
        return false;
    };

    let mut sent_udp = false;
    if let Some(udp) = state.udp() {
        sent_udp = udp.broadcast_state(room_id, &sync).await > 0;
    }
    if !sent_udp {
        let sessions = state.rooms.room_sessions(room_id).await;
        broadcast_to_sessions(&sessions, MSG_S2C_GAME_STATE_SYNC, &sync);
    }
    tracing::debug!(room_id, sent_udp, "full sync sent to room");

    let retry_state = state.clone();
    let sync_rate = state.config.state_sync_rate.max(1);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1000 / sync_rate as u64)).await;
        let Some(sync) = retry_state.engine.build_full_state(room_id).await else {
            return;
        };
        let mut sent_udp = false;
        if let Some(udp) = retry_state.udp() {
            sent_udp = udp.broadcast_state(room_id, &sync).await > 0;
        }
        if !sent_udp {
            let sessions = retry_state.rooms.room_sessions(room_id).await;
            broadcast_to_sessions(&sessions, MSG_S2C_GAME_STATE_SYNC, &sync);
        }
    });
    true
}
