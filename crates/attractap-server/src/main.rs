//! Attractap reader gateway server.
//!
//! Loads [`settings::Settings`], opens the SQLite database and the
//! firmware directory, then serves reader connections over TCP until
//! interrupted.

mod services;
mod settings;
mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use attractap_gateway::{Gateway, TcpServer};
use attractap_storage::{Database, FsFirmwareCatalog};
use tracing::{error, info};

use crate::services::AppServices;
use crate::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let settings = Settings::load().context("failed to load settings")?;
    info!(?settings, "loaded settings");

    let db = if settings.database.in_memory {
        Database::in_memory().await
    } else {
        Database::new(settings.database_config()).await
    }
    .context("failed to open database")?;

    let firmware = FsFirmwareCatalog::open(&settings.firmware.directory)
        .await
        .with_context(|| {
            format!(
                "failed to open firmware directory {}",
                settings.firmware.directory
            )
        })?;

    let services = Arc::new(AppServices::new(&db, firmware));
    let gateway = Gateway::new(services, settings.gateway_config());
    let listener = gateway.spawn_event_listener();

    let server = TcpServer::bind(settings.tcp_server_config().context("invalid server address")?)
        .await
        .context("failed to bind reader server")?;
    info!(addr = %server.local_addr()?, "accepting reader connections");

    tokio::select! {
        result = server.run(gateway.clone()) => {
            if let Err(e) = &result {
                error!(error = %e, "reader server stopped");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!(connections = gateway.registry().len(), "shutting down");
        }
    }

    listener.abort();
    db.close().await;
    Ok(())
}
