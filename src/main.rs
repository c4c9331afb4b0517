use local_chat_backend::config::AppConfig;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,local_chat_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    let addr = config.bind_addr;
    let state = local_chat_backend::build_state(config).await?;
    let app = local_chat_backend::build_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "chat backend listening");

    axum::serve(listener, app).await?;
    Ok(())
}
