//! The unreliable channel: high-rate input ingress and state broadcasts.
//!
//! Only player input envelopes are accepted, and only with a valid session
//! token; everything else is dropped silently. Accepted senders land in the
//! endpoint table which the broadcasts fan out over, with a TTL sweep so
//! silent clients fall out on their own.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use protocol::{
    GameStateDeltaSync, GameStateSync, MSG_C2S_PLAYER_INPUT, MSG_S2C_GAME_STATE_DELTA_SYNC,
    MSG_S2C_GAME_STATE_SYNC, PlayerInput,
};
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::codec;
use crate::state::AppState;

/// Endpoints that stayed silent this long are swept on the next broadcast.
pub const ENDPOINT_TTL: Duration = Duration::from_secs(10);

struct EndpointInfo {
    addr: SocketAddr,
    room_id: u32,
    last_seen: Instant,
}

pub struct UdpServer {
    socket: UdpSocket,
    endpoints: Mutex<HashMap<u32, EndpointInfo>>,
}

impl UdpServer {
    pub fn new(socket: UdpSocket) -> Arc<Self> {
        Arc::new(Self {
            socket,
            endpoints: Mutex::new(HashMap::new()),
        })
    }

    /// Receive loop; one envelope per datagram, parse failures cost nothing
    /// but the packet.
    pub async fn run(self: Arc<Self>, state: Arc<AppState>) {
        let mut buffer = vec![0u8; codec::MAX_PACKET_SIZE];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buffer).await {
                Ok(received) => received,
                Err(err) => {
                    tracing::warn!(%err, "udp receive failed");
                    continue;
                }
            };
            let Ok((msg_type, payload)) = codec::split_envelope(&buffer[..len]) else {
                tracing::debug!(len, "udp envelope parse failed");
                continue;
            };
            match msg_type {
                MSG_C2S_PLAYER_INPUT => self.handle_player_input(&state, payload, from).await,
                _ => {
                    tracing::debug!(msg_type, "udp message type not handled");
                }
            }
        }
    }

    async fn handle_player_input(&self, state: &Arc<AppState>, payload: &[u8], from: SocketAddr) {
        let Ok(input) = codec::decode_payload::<PlayerInput>(payload) else {
            tracing::debug!("udp input parse failed");
            return;
        };

        let player_id = input.player_id;
        if player_id == 0 {
            tracing::debug!("udp input without player id");
            return;
        }
        if input.session_token.is_empty()
            || !state.tokens.verify(player_id, &input.session_token).await
        {
            tracing::debug!(player_id, "udp input token rejected");
            return;
        }
        let Some(room_id) = state.rooms.player_room(player_id).await else {
            tracing::debug!(player_id, "udp input from player without room");
            return;
        };

        {
            let mut endpoints = self.endpoints.lock().await;
            endpoints.insert(
                player_id,
                EndpointInfo {
                    addr: from,
                    room_id,
                    last_seen: Instant::now(),
                },
            );
        }

        if !state.engine.handle_player_input(player_id, input).await {
            tracing::debug!(player_id, "udp input not accepted");
        }
    }

    /// Broadcasts a snapshot to every live endpoint of the room. Returns the
    /// recipient count so the caller can decide on a reliable fallback.
    pub async fn broadcast_state(&self, room_id: u32, sync: &GameStateSync) -> usize {
        self.broadcast(room_id, MSG_S2C_GAME_STATE_SYNC, sync).await
    }

    /// Same for delta packets.
    pub async fn broadcast_delta_state(&self, room_id: u32, delta: &GameStateDeltaSync) -> usize {
        self.broadcast(room_id, MSG_S2C_GAME_STATE_DELTA_SYNC, delta)
            .await
    }

    async fn broadcast<T: Serialize>(&self, room_id: u32, msg_type: u32, message: &T) -> usize {
        let targets = {
            let mut endpoints = self.endpoints.lock().await;
            sweep_and_collect(&mut endpoints, room_id, Instant::now())
        };
        if targets.is_empty() {
            return 0;
        }

        // Serialize once, send to everyone.
        let data = match codec::encode_envelope(msg_type, message) {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(%err, msg_type, "failed to encode udp broadcast");
                return 0;
            }
        };
        for addr in &targets {
            self.send_packet(&data, *addr).await;
        }
        targets.len()
    }

    /// Send errors are logged but never touch state.
    async fn send_packet(&self, data: &Bytes, to: SocketAddr) {
        if let Err(err) = self.socket.send_to(data, to).await {
            tracing::debug!(%err, %to, "udp send failed");
        }
    }

    #[cfg(test)]
    async fn endpoint_count(&self) -> usize {
        self.endpoints.lock().await.len()
    }
}

/// Drops expired entries and collects the addresses registered to the room.
fn sweep_and_collect(
    endpoints: &mut HashMap<u32, EndpointInfo>,
    room_id: u32,
    now: Instant,
) -> Vec<SocketAddr> {
    let mut targets = Vec::with_capacity(endpoints.len());
    endpoints.retain(|_, info| {
        if now.duration_since(info.last_seen) > ENDPOINT_TTL {
            return false;
        }
        if info.room_id == room_id {
            targets.push(info.addr);
        }
        true
    });
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(addr: &str, room_id: u32, last_seen: Instant) -> EndpointInfo {
        EndpointInfo {
            addr: addr.parse().unwrap(),
            room_id,
            last_seen,
        }
    }

    #[test]
    fn sweep_drops_expired_and_filters_by_room() {
        let now = Instant::now();
        let stale = now - (ENDPOINT_TTL + Duration::from_secs(1));
        let mut endpoints = HashMap::new();
        endpoints.insert(1, endpoint("10.0.0.1:5000", 7, now));
        endpoints.insert(2, endpoint("10.0.0.2:5000", 7, stale));
        endpoints.insert(3, endpoint("10.0.0.3:5000", 8, now));

        let targets = sweep_and_collect(&mut endpoints, 7, now);
        assert_eq!(targets, vec!["10.0.0.1:5000".parse().unwrap()]);
        // The stale entry is gone for good, the other-room entry stays.
        assert_eq!(endpoints.len(), 2);
        assert!(endpoints.contains_key(&3));
    }

    #[tokio::test]
    async fn invalid_token_never_registers_an_endpoint() {
        use crate::config::*;

        let state = crate::state::AppState::new(
            ServerConfig::default(),
            PlayerRolesConfig::default(),
            EnemyTypesConfig::default(),
            ItemsConfig::default(),
            UpgradeConfig::default(),
        );
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = UdpServer::new(socket);

        let input = PlayerInput {
            player_id: 5,
            session_token: "bogus".into(),
            ..PlayerInput::default()
        };
        let payload = postcard::to_allocvec(&input).unwrap();
        server
            .handle_player_input(&state, &payload, "127.0.0.1:9999".parse().unwrap())
            .await;
        assert_eq!(server.endpoint_count().await, 0);

        // Same with a missing player id.
        let input = PlayerInput::default();
        let payload = postcard::to_allocvec(&input).unwrap();
        server
            .handle_player_input(&state, &payload, "127.0.0.1:9999".parse().unwrap())
            .await;
        assert_eq!(server.endpoint_count().await, 0);
    }
}
