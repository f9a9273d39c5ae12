//! One reliable stream per client. Every connection gets a reader loop and a
//! writer task; the writer drains a bounded queue of pre-framed packets so a
//! slow client stalls only itself. If any one side fails, the other is torn
//! down and the cleanup path runs exactly once.

mod auth;
mod gameplay;
mod room_ops;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::Notify;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::codec;
use crate::state::AppState;

/// Hard cap on queued outgoing frames per session. A client that cannot keep
/// up gets disconnected instead of growing the queue without bound.
pub const MAX_WRITE_QUEUE: usize = 1024;

/// Why a session went away. Decides whether the token survives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly quit; the token is revoked immediately.
    ClientRequest,
    /// Anything else; the token stays valid for the reconnect grace window.
    NetworkError,
}

const REASON_NETWORK_ERROR: u8 = 0;
const REASON_CLIENT_REQUEST: u8 = 1;

/// The shareable half of a session: a sender for framed packets plus the
/// close latch. Rooms and broadcast paths hold this only weakly.
pub struct SessionHandle {
    tx: mpsc::Sender<Bytes>,
    cancel: Notify,
    closing: AtomicBool,
    close_reason: AtomicU8,
}

impl SessionHandle {
    fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            tx,
            cancel: Notify::new(),
            closing: AtomicBool::new(false),
            close_reason: AtomicU8::new(REASON_NETWORK_ERROR),
        }
    }

    /// Serializes, frames and enqueues one message. Queue overflow closes the
    /// session (backpressure), a closed queue drops the message silently.
    pub fn send<T: Serialize>(&self, msg_type: u32, message: &T) {
        if self.is_closing() {
            return;
        }
        let frame = match codec::encode_frame(msg_type, message) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(%err, msg_type, "failed to encode outgoing packet");
                return;
            }
        };
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("write queue overflowed, closing session");
                self.close(CloseReason::NetworkError);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Idempotent close request. The first caller decides the reason, the
    /// session task performs the actual cleanup.
    pub fn close(&self, reason: CloseReason) {
        if !self.closing.swap(true, Ordering::SeqCst) {
            let encoded = match reason {
                CloseReason::ClientRequest => REASON_CLIENT_REQUEST,
                CloseReason::NetworkError => REASON_NETWORK_ERROR,
            };
            self.close_reason.store(encoded, Ordering::SeqCst);
            self.cancel.notify_one();
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn reason(&self) -> CloseReason {
        if self.close_reason.load(Ordering::SeqCst) == REASON_CLIENT_REQUEST {
            CloseReason::ClientRequest
        } else {
            CloseReason::NetworkError
        }
    }

    async fn cancelled(&self) {
        self.cancel.notified().await;
    }
}

/// Sends one message to every live session of a weak handle list. Dead
/// handles are skipped silently.
pub fn broadcast_to_sessions<T: Serialize>(
    sessions: &[Weak<SessionHandle>],
    msg_type: u32,
    message: &T,
) {
    for weak_session in sessions {
        if let Some(session) = weak_session.upgrade() {
            session.send(msg_type, message);
        }
    }
}

/// Session local identity, owned by the reader task.
pub(crate) struct Session {
    pub(crate) state: Arc<AppState>,
    pub(crate) handle: Arc<SessionHandle>,
    pub(crate) player_id: u32,
    pub(crate) player_name: String,
    pub(crate) session_token: String,
}

/// Accept loop for the reliable port; one task per connection.
pub async fn run_tcp_listener(listener: TcpListener, state: Arc<AppState>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    run_session(stream, peer, state).await;
                });
            }
            Err(err) => {
                tracing::warn!(%err, "accept failed");
            }
        }
    }
}

/// Drives one connection from first byte to cleanup.
async fn run_session(stream: TcpStream, peer: SocketAddr, state: Arc<AppState>) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Bytes>(MAX_WRITE_QUEUE);
    let handle = Arc::new(SessionHandle::new(tx));
    state.session_opened();
    tracing::debug!(%peer, "session opened");

    let writer_handle = handle.clone();
    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(err) = write_half.write_all(&frame).await {
                tracing::warn!(%err, "packet write failed");
                writer_handle.close(CloseReason::NetworkError);
                return;
            }
        }
    });

    let mut session = Session {
        state: state.clone(),
        handle: handle.clone(),
        player_id: 0,
        player_name: String::new(),
        session_token: String::new(),
    };

    // Whichever finishes first wins; the writer is torn down afterwards.
    tokio::select! {
        _ = handle.cancelled() => {}
        _ = session.read_loop(&mut read_half) => {}
    }
    write_task.abort();
    session.finish().await;
}

impl Session {
    /// Reading-header -> reading-body -> dispatch, until an error or an
    /// explicit close flips the session over.
    async fn read_loop(&mut self, reader: &mut OwnedReadHalf) {
        let mut length_buffer = [0u8; codec::FRAME_HEADER_LEN];
        let mut body = Vec::new();
        loop {
            if let Err(err) = reader.read_exact(&mut length_buffer).await {
                tracing::debug!(%err, "failed to read packet length");
                self.handle.close(CloseReason::NetworkError);
                return;
            }
            let body_len = u32::from_be_bytes(length_buffer) as usize;
            if body_len == 0 || body_len > codec::MAX_PACKET_SIZE {
                tracing::warn!(body_len, "invalid packet length");
                self.handle.close(CloseReason::NetworkError);
                return;
            }

            body.resize(body_len, 0);
            if let Err(err) = reader.read_exact(&mut body).await {
                tracing::warn!(%err, "failed to read packet body");
                self.handle.close(CloseReason::NetworkError);
                return;
            }

            match codec::split_envelope(&body) {
                Ok((msg_type, payload)) => self.dispatch(msg_type, payload).await,
                Err(err) => {
                    // A broken envelope costs the packet, not the session.
                    tracing::warn!(%err, "failed to parse envelope");
                }
            }
            if self.handle.is_closing() {
                return;
            }
        }
    }

    /// Closed switch over the message type tag; unknown tags log and continue.
    async fn dispatch(&mut self, msg_type: u32, payload: &[u8]) {
        use protocol::*;
        match msg_type {
            MSG_C2S_LOGIN => self.handle_login(payload).await,
            MSG_C2S_HEARTBEAT => self.handle_heartbeat(payload),
            MSG_C2S_RECONNECT_REQUEST => self.handle_reconnect_request(payload).await,
            MSG_C2S_CREATE_ROOM => self.handle_create_room(payload).await,
            MSG_C2S_GET_ROOM_LIST => self.handle_get_room_list(payload).await,
            MSG_C2S_JOIN_ROOM => self.handle_join_room(payload).await,
            MSG_C2S_LEAVE_ROOM => self.handle_leave_room(payload).await,
            MSG_C2S_SET_READY => self.handle_set_ready(payload).await,
            MSG_C2S_REQUEST_QUIT => self.handle_request_quit(),
            MSG_C2S_START_GAME => self.handle_start_game(payload).await,
            MSG_C2S_PLAYER_INPUT => self.handle_player_input(payload).await,
            MSG_C2S_UPGRADE_REQUEST_ACK => self.handle_upgrade_request_ack(payload).await,
            MSG_C2S_UPGRADE_OPTIONS_ACK => self.handle_upgrade_options_ack(payload).await,
            MSG_C2S_UPGRADE_SELECT => self.handle_upgrade_select(payload).await,
            MSG_C2S_UPGRADE_REFRESH_REQUEST => self.handle_upgrade_refresh_request(payload).await,
            _ => {
                tracing::warn!(msg_type, "unknown message type");
            }
        }
    }

    /// Single cleanup path: token rules by close reason, disconnect marks in
    /// the scene engine and the room registry, counter bookkeeping.
    async fn finish(self) {
        // Sessions that fell out of the read loop without a verdict count as
        // network errors.
        self.handle.close(CloseReason::NetworkError);
        let reason = self.handle.reason();
        tracing::info!(
            player_id = self.player_id,
            ?reason,
            "session closed"
        );

        if self.player_id != 0 {
            if reason == CloseReason::ClientRequest {
                self.state.tokens.revoke(self.player_id).await;
            }
            self.state
                .engine
                .mark_player_disconnected(self.player_id)
                .await;
            self.state
                .rooms
                .mark_player_disconnected(self.player_id)
                .await;
        }
        self.state.session_closed();
    }
}

/// Decodes a payload, logging the given warning on failure.
pub(crate) fn parse_payload<T: DeserializeOwned>(payload: &[u8], warn_message: &str) -> Option<T> {
    match codec::decode_payload(payload) {
        Ok(message) => Some(message),
        Err(err) => {
            tracing::warn!(%err, "{warn_message}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{HeartbeatReply, MSG_S2C_HEARTBEAT};

    #[tokio::test]
    async fn close_is_idempotent_and_keeps_the_first_reason() {
        let (tx, _rx) = mpsc::channel(4);
        let handle = SessionHandle::new(tx);
        assert!(!handle.is_closing());

        handle.close(CloseReason::ClientRequest);
        handle.close(CloseReason::NetworkError);
        assert!(handle.is_closing());
        assert_eq!(handle.reason(), CloseReason::ClientRequest);
        // The cancel permit from the first close is still there.
        handle.cancelled().await;
    }

    #[tokio::test]
    async fn queue_overflow_closes_the_session() {
        let (tx, _rx) = mpsc::channel(2);
        let handle = SessionHandle::new(tx);
        let reply = HeartbeatReply::default();

        handle.send(MSG_S2C_HEARTBEAT, &reply);
        handle.send(MSG_S2C_HEARTBEAT, &reply);
        assert!(!handle.is_closing());
        // Third frame exceeds the queue: backpressure close.
        handle.send(MSG_S2C_HEARTBEAT, &reply);
        assert!(handle.is_closing());
        assert_eq!(handle.reason(), CloseReason::NetworkError);
    }

    #[tokio::test]
    async fn sends_after_close_are_dropped() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = SessionHandle::new(tx);
        handle.send(MSG_S2C_HEARTBEAT, &HeartbeatReply::default());
        handle.close(CloseReason::NetworkError);
        handle.send(MSG_S2C_HEARTBEAT, &HeartbeatReply::default());

        // Only the pre-close frame made it into the queue.
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }
}
