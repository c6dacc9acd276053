use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use dotenvy::dotenv;

mod api;
mod attendance;
mod auth;
mod config;
mod db;
mod error;
mod model;
mod routes;

use attendance::leave::LeaveChecker;
use attendance::photo::{FsPhotoStore, PhotoBinder};
use config::Config;
use db::TenantPools;

use tracing::info;
use tracing_appender::rolling;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env();

    // Rolling daily log
    let file_appender = rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!("Server starting...");

    let pools = TenantPools::init(&config).await?;
    // Leave tracking is optional per tenant: probe once, not per request
    let leave = LeaveChecker::probe(&pools).await;
    let fotos = FsPhotoStore::new(config.fotos_dir.clone(), config.fotos_base_url.clone());
    let binder = PhotoBinder::new(config.fotos_ruta_base.clone());

    let pools = Data::new(pools);
    let leave = Data::new(leave);
    let fotos = Data::new(fotos);
    let binder = Data::new(binder);

    let server_addr = config.server_addr.clone();
    let config_data = config.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .app_data(pools.clone())
            .app_data(leave.clone())
            .app_data(fotos.clone())
            .app_data(binder.clone())
            .app_data(Data::new(config.clone()))
            .configure(|cfg| routes::configure(cfg, config_data.clone()))
    })
    .bind(server_addr)?
    .run()
    .await?;

    Ok(())
}
