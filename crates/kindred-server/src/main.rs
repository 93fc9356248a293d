mod config;

use std::sync::Arc;

use tracing::info;

use kindred_api::{AppStateInner, build_router};
use kindred_core::Services;
use kindred_core::notify::{DisabledDispatcher, ExpoDispatcher, NotificationDispatcher};
use kindred_db::Database;

use crate::config::Config;

const DEFAULT_LOG_FILTER: &str = "kindred=debug,kindred_api=debug,kindred_core=debug,\
kindred_gateway=debug,kindred_db=debug,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    let notifier: Arc<dyn NotificationDispatcher> = if config.push_enabled {
        Arc::new(ExpoDispatcher::new(
            db.clone(),
            config.expo_push_url.clone(),
            config.expo_access_token.clone(),
        ))
    } else {
        info!("Push notifications disabled");
        Arc::new(DisabledDispatcher)
    };

    let services = Services::new(db, notifier, config.settings.clone());
    let state = Arc::new(AppStateInner {
        services,
        jwt_secret: Arc::from(config.jwt_secret.as_str()),
    });
    let app = build_router(state);

    info!("Kindred server listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
