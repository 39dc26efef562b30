//! evgate API gateway server binary.
//!
//! Wires Postgres (user directory), Redis (token store) and the route table
//! into the HTTP router, then serves until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use evgate_api::config::GatewayConfig;
use evgate_api::routing::RouteTable;
use evgate_core::store::RedisTokenStore;
use evgate_core::users::PgUserDirectory;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// CLI arguments for the gateway.
///
/// Token, CORS and collaborator settings come from the environment; see
/// `GatewayConfig::from_env`.
#[derive(Parser, Debug)]
#[command(name = "evgate_server", about = "Event manager API gateway")]
struct Args {
    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on (0 = ephemeral).
    #[arg(long, env = "PORT", default_value_t = 8081)]
    port: u16,

    /// PostgreSQL connection URL for the user directory.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Redis connection URL for the token store.
    #[arg(long, env = "REDIS_URL")]
    redis_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.log_json);

    let config = GatewayConfig::from_env()?;
    info!(port = args.port, issuer = %config.jwt_issuer, "starting evgate_server");

    let routes = match &config.routes_file {
        Some(path) => {
            info!(path = %path.display(), "loading route table");
            RouteTable::from_yaml_file(path, &config.collaborators)?
        }
        None => RouteTable::new(RouteTable::default_rules(), &config.collaborators)?,
    };

    info!(max_connections = args.max_connections, "configuring connection pool");
    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&args.database_url)
        .await?;

    info!("running database migrations");
    evgate_core::migrate::migrate(&pool).await?;

    info!("connecting to token store");
    let store = RedisTokenStore::connect(&args.redis_url, config.store_timeout).await?;

    let tokens = evgate_api::token_service(
        &config,
        Arc::new(store),
        Arc::new(PgUserDirectory::new(pool)),
    )?;
    let state = evgate_api::AppState::new(tokens, config, routes);
    let app = evgate_api::router(state);

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!(addr = %listener.local_addr()?, "API gateway listening");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for shutdown signal");
            }
            info!("shutting down");
            shutdown.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// Logs go to stderr; `RUST_LOG` overrides the default filter.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,evgate_api=debug,evgate_core=debug"));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
