use std::net::{Ipv4Addr, SocketAddr};

use taskearn_server::config::AppConfig;
use taskearn_server::database::client::{Database, DbConfig};
use taskearn_server::init;
use taskearn_server::middleware::mw_ctx;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "taskearn_server=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().map_err(|e| {
        error!("{e}");
        e
    })?;

    let _sentry = config.sentry_project_link.as_ref().map(|dsn| {
        info!("->> sentry enabled");
        sentry::init((
            dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let db = Database::connect(DbConfig {
        url: &config.db_url,
        database: &config.db_database,
        namespace: &config.db_namespace,
        password: config.db_password.as_deref(),
        username: config.db_username.as_deref(),
    })
    .await?;

    init::run_migrations(&db).await?;

    let ctx_state = mw_ctx::create_ctx_state(db, &config);
    let routes_all = init::main_router(&ctx_state);

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.server_port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("->> LISTENING on {addr}");

    axum::serve(listener, routes_all.into_make_service()).await?;
    Ok(())
}
