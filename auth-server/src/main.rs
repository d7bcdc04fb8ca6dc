//! JWT session authentication service

use std::io::read_to_string;
use std::time::Duration;

use actix_web::{App, HttpServer};
use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::OptionExt;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use tracing_actix_web::TracingLogger;

use crate::config::{Config, LogFormat};
use crate::model::Model;
use crate::model::auth::SessionManager;
use crate::model::token::Secret;
use crate::opt::Opt;

mod config;
mod model;
mod opt;
mod query;
mod service;

/// Initializes tracing collection
fn setup_tracing(config: config::Logging) {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let fmt_layer = match config.format {
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let filter_layer = config
        .filters
        .into_iter()
        .fold(filter_layer, |layer, filter| layer.add_directive(filter));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

/// Periodically removes expired sessions
fn spawn_cleanup(model: Model, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match model.cleanup().await {
                Ok(removed) => debug!(removed, "Expired sessions cleaned up"),
                Err(err) => error!(%err, "Expired sessions cleanup failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let Opt {
        config: mut config_file,
    } = Opt::parse();

    let config = read_to_string(&mut config_file)?;
    let config: Config = toml::from_str(&config)?;

    setup_tracing(config.logging);
    color_eyre::install()?;

    info!(
        config = ?config_file.path().path(),
        "Tracing initialized, setting up a service"
    );

    let secret = Secret::from_env(&config.auth.secret_env)?;
    let ttl = config
        .auth
        .ttl()
        .ok_or_eyre("Session time-to-live out of range")?;
    let sessions = SessionManager::new(secret, ttl)?
        .with_store_verification(config.auth.verify_session_store);
    info!(
        ttl = %sessions.ttl(),
        verify_session_store = sessions.verifies_store(),
        "Session manager ready"
    );

    let model = Model::with_config(config.db, sessions).await?;

    if let Some(period) = config.auth.cleanup_period() {
        info!(?period, "Scheduling expired sessions cleanup");
        spawn_cleanup(model.clone(), period);
    }

    let service_config = service::configure(config.graphiql, model);
    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .configure(service_config.clone())
    })
    .bind(config.host)?
    .run()
    .await?;

    info!("Service stopped, tearing down");
    Ok(())
}
