//! The shared application state handed to every task as `Arc<AppState>`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{
    EnemyTypesConfig, ItemsConfig, PlayerRolesConfig, ServerConfig, UpgradeConfig,
};
use crate::game::{EngineConfigs, SceneEngine};
use crate::rooms::RoomRegistry;
use crate::tokens::TokenStore;
use crate::udp::UdpServer;

pub struct AppState {
    pub config: ServerConfig,
    pub tokens: TokenStore,
    pub rooms: RoomRegistry,
    pub engine: SceneEngine,
    /// Set once after the datagram socket is bound.
    udp: OnceLock<Arc<UdpServer>>,
    next_player_id: AtomicU32,
    active_sessions: AtomicU32,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        roles: PlayerRolesConfig,
        enemy_types: EnemyTypesConfig,
        items: ItemsConfig,
        upgrades: UpgradeConfig,
    ) -> Arc<Self> {
        let engine = SceneEngine::new(EngineConfigs {
            server: config.clone(),
            roles,
            enemy_types,
            items,
            upgrades,
        });
        Arc::new(Self {
            rooms: RoomRegistry::new(config.max_players_per_room),
            config,
            tokens: TokenStore::default(),
            engine,
            udp: OnceLock::new(),
            next_player_id: AtomicU32::new(1),
            active_sessions: AtomicU32::new(0),
        })
    }

    pub fn set_udp(&self, udp: Arc<UdpServer>) {
        let _ = self.udp.set(udp);
    }

    pub fn udp(&self) -> Option<&Arc<UdpServer>> {
        self.udp.get()
    }

    /// Process unique, monotonically increasing player ids.
    pub fn allocate_player_id(&self) -> u32 {
        self.next_player_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_sessions(&self) -> u32 {
        self.active_sessions.load(Ordering::Relaxed)
    }
}

/// Server wall clock in milliseconds, as stamped into sync times and events.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
