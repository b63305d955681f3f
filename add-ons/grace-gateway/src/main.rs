//! Process entry point: boots every subsystem, then serves the HTTP/JSON surface.

use grace_gateway::{boot, build_app, config};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let core_config = grace_core::CoreConfig::load();
    let gateway_config = config::GatewayConfig::load();

    let state = boot::boot(&core_config, &gateway_config).await;
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&gateway_config.bind_addr)
        .await
        .expect("bind address is available");
    tracing::info!(target: "grace::gateway", addr = %gateway_config.bind_addr, "grace-gateway listening");

    axum::serve(listener, app).await.expect("server runs to completion");
}
