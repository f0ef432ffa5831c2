use device_hub::{app, config::HubConfig, heartbeat, state::AppState};
use hub_common::{bind_listener, init_tracing, shutdown_signal};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let _guards = init_tracing("device-hub");

    let config = HubConfig::from_env();
    let state = AppState::new(config.clone());

    // Offline device state is kept forever unless a TTL is configured.
    if let Some(ttl) = config.state_ttl {
        state.store.clone().spawn_reaper(ttl, config.reap_interval);
    }
    let _heartbeat = heartbeat::spawn(config.heartbeat.clone());

    let app = app::build_router(state.clone());
    let listener = match bind_listener(config.port).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, port = config.port, "bind listener failed");
            std::process::exit(1);
        }
    };

    info!(
        port = config.port,
        duplicate_policy = %config.duplicate_policy,
        rules = ?state.dispatch.rule_names(),
        "device hub listening"
    );

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %err, "server stopped");
    }
}
