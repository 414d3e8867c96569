/**
 * Lore Server
 *
 * The other side of the remote store: a stateless actix-web request
 * handler over Postgres with a pgvector column. All durable state lives
 * in the database; the only process-local state is the auth cache and
 * the rate limiter's bookkeeping, both scoped to this module's
 * `AppState` and the server process lifetime.
 */

use actix_web::{middleware, web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod rate_limit;
pub mod routes;

pub use config::ServerConfig;
pub use error::ApiError;

pub struct AppState {
    pub pool: PgPool,
    pub config: ServerConfig,
    pub auth_cache: auth::AuthCache,
    pub limiter: rate_limit::RateLimiter,
}

impl AppState {
    pub fn new(config: ServerConfig, pool: PgPool) -> Self {
        Self {
            auth_cache: auth::AuthCache::new(config.auth_cache_ttl),
            limiter: rate_limit::RateLimiter::per_minute(config.rate_limit_per_minute),
            pool,
            config,
        }
    }
}

/// Open the connection pool the workers share.
pub async fn connect(config: &ServerConfig) -> crate::error::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .map_err(Into::into)
}

/// Bind and serve until shutdown.
pub async fn run(config: ServerConfig, pool: PgPool) -> std::io::Result<()> {
    let state = web::Data::new(AppState::new(config, pool));
    let port = state.config.port;
    log::info!("lore server listening on port {}", port);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
