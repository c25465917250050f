use anyhow::Result;
use axum::Router;
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use shoply_storeservice::{
    core::{bootstrap, config, db, swagger},
    routes,
};

/// Migrations embedded into the binary which helps with streamlining image building process
const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();
    bootstrap::init_env();

    let routes = routes::products::routes_with_openapi()
        .merge(routes::categories::routes_with_openapi())
        .merge(routes::carts::routes_with_openapi())
        .merge(routes::orders::routes_with_openapi())
        .merge(routes::payments::routes_with_openapi())
        .merge(routes::vendors::routes_with_openapi())
        .merge(routes::wishlist::routes_with_openapi())
        .merge(routes::loyalty::routes_with_openapi())
        .merge(routes::media::routes_with_openapi())
        .merge(routes::settings::routes_with_openapi());

    let mut openapi = routes.get_openapi().clone();
    openapi.info = utoipa::openapi::InfoBuilder::new()
        .title("Shoply StoreService API")
        .version("1.0.0")
        .build();
    let swagger_ui = swagger::create_swagger_ui(openapi)?;

    let app = Router::new().merge(routes).merge(swagger_ui);

    tracing::info!("Running migrations...");
    let config = config::load()?;
    let migrations_count = db::run_migrations_blocking(MIGRATIONS, &config.database.url).await?;
    tracing::info!("Run {} new migrations successfully", migrations_count);

    tracing::info!("Bootstrapping...");
    bootstrap::bootstrap("StoreService", app, &config).await?;
    Ok(())
}
