use std::{path::PathBuf, time::Duration};

use actix_web::{web, App, HttpServer};
use clap::Parser;
use log::info;
use tokio::time::{interval, MissedTickBehavior};

mod documents;
mod files;
mod payloads;
mod processing;
mod routes;
use routes::SharedCtx;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Development backend for the DocChat upload client", long_about = None)]
struct Args {
    #[arg(long, env = "DOCCHAT_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Where uploaded objects are stored
    #[arg(long, env = "DOCCHAT_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Documents older than this are deleted
    #[arg(long, env = "DOCCHAT_RETENTION_DAYS", default_value_t = 3)]
    retention_days: u64,

    #[arg(long, default_value_t = 3600)]
    cleanup_interval_secs: u64,

    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    max_object_size: u64,
}

async fn cleanup_loop(ctx: web::Data<SharedCtx>, every: Duration, max_age_ms: u64) {
    let mut timer = interval(every);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        timer.tick().await;
        let removed = ctx.cleanup_old_documents(max_age_ms).await;
        if removed > 0 {
            info!("cleanup removed {removed} old document(s)");
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    tokio::fs::create_dir_all(&args.data_dir).await?;

    let ctx = web::Data::new(SharedCtx::new(args.data_dir.clone(), args.max_object_size));
    actix_web::rt::spawn(cleanup_loop(
        ctx.clone(),
        Duration::from_secs(args.cleanup_interval_secs.max(1)),
        args.retention_days * DAY_MS,
    ));

    info!("serving {} on {}", args.data_dir.display(), args.bind);
    HttpServer::new(move || App::new().app_data(ctx.clone()).configure(routes::routes))
        .bind(&args.bind)?
        .run()
        .await
}
