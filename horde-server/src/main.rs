mod codec;
mod config;
mod game;
mod rooms;
mod session;
mod state;
mod tokens;
mod udp;

use anyhow::Context;
use tokio::net::{TcpListener, UdpSocket};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{
    EnemyTypesConfig, ItemsConfig, PlayerRolesConfig, ServerConfig, UpgradeConfig,
};
use crate::state::AppState;
use crate::udp::UdpServer;

#[tokio::main]
/// Loads the configuration, wires up tracing, binds both transport sockets
/// and hands the process over to the accept and receive loops. Only a bind
/// failure (or an unrecoverable OS error) exits non-zero.
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}={}", env!("CARGO_CRATE_NAME"), config.log_level).into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();

    let state = AppState::new(
        config.clone(),
        PlayerRolesConfig::load(),
        EnemyTypesConfig::load(),
        ItemsConfig::load(),
        UpgradeConfig::load(),
    );
    tracing::info!(
        tcp_port = config.tcp_port,
        udp_port = config.udp_port,
        tick_rate = config.tick_rate,
        state_sync_rate = config.state_sync_rate,
        "configuration loaded"
    );

    let udp_socket = UdpSocket::bind(("0.0.0.0", config.udp_port))
        .await
        .with_context(|| format!("failed to bind udp port {}", config.udp_port))?;
    let udp = UdpServer::new(udp_socket);
    state.set_udp(udp.clone());
    tokio::spawn(udp.run(state.clone()));

    let listener = TcpListener::bind(("0.0.0.0", config.tcp_port))
        .await
        .with_context(|| format!("failed to bind tcp port {}", config.tcp_port))?;
    tracing::info!(
        tcp_port = config.tcp_port,
        udp_port = config.udp_port,
        "server listening"
    );

    session::run_tcp_listener(listener, state).await;
    Ok(())
}
