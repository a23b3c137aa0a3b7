mod coordinator;
mod failover;
mod handlers;
mod jobs;
mod state;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use common::config;

use crate::failover::LeasePolicy;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("master=debug,axum=info,tower_http=info")
        .init();

    let lease = LeasePolicy::from_env();
    let state = AppState::new(config::poll_interval(), lease);

    match lease.lease {
        Some(l) => info!("lease de reduce: {:?} (máx {} intentos)", l, lease.max_attempts),
        None => info!("lease de reduce deshabilitado: se espera a cada worker sin límite"),
    }

    // router HTTP
    let app = handlers::build_router(state);

    let bind = config::master_bind();
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", bind))?;
    info!("master escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
