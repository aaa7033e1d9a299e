use std::sync::{Arc, Mutex};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relaypub::broker::{Broker, BrokerOptions};
use relaypub::config::load_config;
use relaypub::http::{router, ApiState};
use relaypub::transport::websocket::start_websocket_server;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relaypub=info")),
        )
        .init();

    let settings = match load_config() {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let options = BrokerOptions {
        queue_capacity: settings.broker.queue_capacity,
        overflow_policy: settings.broker.overflow_policy,
        replay_capacity: settings.broker.replay_capacity,
    };
    let broker = match Broker::new(options) {
        Ok(b) => Arc::new(Mutex::new(b)),
        Err(e) => {
            error!(error = %e, "invalid broker configuration");
            std::process::exit(1);
        }
    };

    let settings = Arc::new(settings);
    let http_addr = settings.server.http_addr();
    let ws_addr = settings.server.ws_addr();

    let api = router(ApiState {
        broker: Arc::clone(&broker),
        api_key: settings.server.api_key.clone(),
    });
    let http_listener = match tokio::net::TcpListener::bind(&http_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%http_addr, error = %e, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };
    info!("HTTP control plane listening on http://{http_addr}");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, api).await {
            error!(error = %e, "HTTP server exited");
        }
    });

    let ws_broker = Arc::clone(&broker);
    let ws_settings = Arc::clone(&settings);
    tokio::spawn(async move {
        start_websocket_server(&ws_addr, ws_broker, ws_settings).await;
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutting down");
    broker.lock().unwrap().shutdown();
}
