//! Room membership requests. Everything here requires a login; the result
//! messages carry the rejection reason otherwise.

use std::sync::Arc;

use protocol::{
    CreateRoomRequest, CreateRoomResult, JoinRoomRequest, JoinRoomResult, LeaveRoomRequest,
    LeaveRoomResult, MSG_S2C_CREATE_ROOM_RESULT, MSG_S2C_JOIN_ROOM_RESULT,
    MSG_S2C_LEAVE_ROOM_RESULT, MSG_S2C_ROOM_LIST, MSG_S2C_SET_READY_RESULT, RoomList,
    RoomListRequest, SetReadyRequest, SetReadyResult,
};

use super::{Session, parse_payload};

const LOGIN_REQUIRED: &str = "请先登录";

impl Session {
    pub(crate) async fn handle_create_room(&mut self, payload: &[u8]) {
        let Some(request) =
            parse_payload::<CreateRoomRequest>(payload, "failed to parse create room payload")
        else {
            return;
        };
        let result = if self.player_id == 0 {
            CreateRoomResult {
                message: LOGIN_REQUIRED.into(),
                ..CreateRoomResult::default()
            }
        } else {
            self.state
                .rooms
                .create_room(
                    self.player_id,
                    &self.player_name,
                    Arc::downgrade(&self.handle),
                    &request,
                )
                .await
        };
        self.handle.send(MSG_S2C_CREATE_ROOM_RESULT, &result);
    }

    pub(crate) async fn handle_get_room_list(&mut self, payload: &[u8]) {
        let Some(_request) =
            parse_payload::<RoomListRequest>(payload, "failed to parse room list payload")
        else {
            return;
        };
        let list = if self.player_id == 0 {
            RoomList::default()
        } else {
            self.state.rooms.room_list().await
        };
        self.handle.send(MSG_S2C_ROOM_LIST, &list);
        tracing::debug!(player_id = self.player_id, "room list sent");
    }

    pub(crate) async fn handle_join_room(&mut self, payload: &[u8]) {
        let Some(request) =
            parse_payload::<JoinRoomRequest>(payload, "failed to parse join room payload")
        else {
            return;
        };
        let result = if self.player_id == 0 {
            JoinRoomResult {
                message: LOGIN_REQUIRED.into(),
                ..JoinRoomResult::default()
            }
        } else {
            self.state
                .rooms
                .join_room(
                    self.player_id,
                    &self.player_name,
                    Arc::downgrade(&self.handle),
                    &request,
                )
                .await
        };
        self.handle.send(MSG_S2C_JOIN_ROOM_RESULT, &result);
    }

    pub(crate) async fn handle_leave_room(&mut self, payload: &[u8]) {
        let Some(_request) =
            parse_payload::<LeaveRoomRequest>(payload, "failed to parse leave room payload")
        else {
            return;
        };
        let result = if self.player_id == 0 {
            LeaveRoomResult {
                message: LOGIN_REQUIRED.into(),
                ..LeaveRoomResult::default()
            }
        } else {
            self.state.rooms.leave_room(self.player_id).await
        };
        self.handle.send(MSG_S2C_LEAVE_ROOM_RESULT, &result);
    }

    pub(crate) async fn handle_set_ready(&mut self, payload: &[u8]) {
        let Some(request) =
            parse_payload::<SetReadyRequest>(payload, "failed to parse set ready payload")
        else {
            return;
        };
        let result = if self.player_id == 0 {
            SetReadyResult {
                message: LOGIN_REQUIRED.into(),
                ..SetReadyResult::default()
            }
        } else {
            self.state.rooms.set_ready(self.player_id, &request).await
        };
        self.handle.send(MSG_S2C_SET_READY_RESULT, &result);
    }
}
