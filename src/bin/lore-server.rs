use anyhow::Context;

use lore::server::{self, db, ServerConfig};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = ServerConfig::from_env().context("invalid server configuration")?;
    let pool = server::connect(&config)
        .await
        .context("failed to connect to the database")?;
    db::init_schema(&pool, config.embedding_dim)
        .await
        .map_err(|e| anyhow::anyhow!("schema initialization failed: {}", e))?;

    server::run(config, pool).await.context("server terminated")
}
