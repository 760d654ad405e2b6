//! Clearing API service entry point

use actix_web::{web, App, HttpServer};
use clearing_api::{configure, AppState};
use clearing_core::{ClearingEngine, Config, HttpLedgerDispatcher};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let dispatcher = HttpLedgerDispatcher::new(&config.dispatch)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    let engine = ClearingEngine::new(config, Arc::new(dispatcher))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    let bootstrapped = engine
        .bootstrap()
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    info!("Clearing engine ready, open cycle {}", bootstrapped.sequence);

    if let Ok(nats_url) = std::env::var("NATS_URL") {
        match async_nats::connect(&nats_url).await {
            Ok(client) => {
                let consumer_engine = engine.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        clearing_api::nats_consumer::run(client, consumer_engine).await
                    {
                        error!("NATS consumer stopped: {}", e);
                    }
                });
                info!("NATS intake connected to {}", nats_url);
            }
            Err(e) => error!("NATS connection to {} failed: {}", nats_url, e),
        }
    }

    let state = web::Data::new(AppState {
        engine: engine.clone(),
    });

    let bind = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    info!("Clearing API listening on {}", bind);

    HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
        .bind(&bind)?
        .run()
        .await
}
