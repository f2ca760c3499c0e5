//! Kindred API server binary.
//!
//! Serves the HTTP and realtime API. Uses PostgreSQL when a database URL is
//! configured and the in-memory store otherwise.

use std::sync::Arc;

use clap::Parser;
use kindred_api::config::ApiConfig;
use kindred_core::auth::delivery::LogDelivery;
use kindred_core::store::{AuthStore, MemoryAuthStore, PgAuthStore};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "kindred_api_server", about = "Kindred API server")]
struct Args {
    /// Address to listen on. Overrides `BIND_ADDR`.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3100")]
    bind: String,

    /// PostgreSQL connection URL. Without one, state lives in memory.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,kindred_api=debug,kindred_core=debug")
            }),
        )
        .init();

    let args = Args::parse();
    let config = ApiConfig {
        bind_addr: args.bind,
        database_url: args.database_url.filter(|url| !url.trim().is_empty()),
        ..ApiConfig::from_env()
    };

    info!(bind_addr = %config.bind_addr, "starting kindred_api_server");

    let store: Arc<dyn AuthStore> = match &config.database_url {
        Some(url) => {
            info!(max_connections = args.max_connections, "configuring connection pool");
            let pool = PgPoolOptions::new()
                .max_connections(args.max_connections)
                .acquire_timeout(std::time::Duration::from_secs(30))
                .connect(url)
                .await?;

            info!("running database migrations");
            kindred_api::migrate(&pool).await?;
            Arc::new(PgAuthStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory store, state is lost on exit");
            Arc::new(MemoryAuthStore::new())
        }
    };

    let state = kindred_api::AppState::new(store, Arc::new(LogDelivery), config.clone())?;
    let app = kindred_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(listener, app).await?;

    Ok(())
}
