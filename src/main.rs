// src/main.rs

use env_logger::Env;
use log::{error, info};

use taskline_core::app_state::AppState;
use taskline_core::config::Config;
use taskline_core::db::MongoDB;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    let mongodb = MongoDB::init(&config.mongo_uri, &config.database_name).await?;
    mongodb.ensure_indexes().await?;

    let state = AppState::with_mongo(&mongodb, config);
    let processor = state.notification_processor();

    let stop = processor.stop_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received, finishing current batch");
                stop.cancel();
            }
            Err(e) => error!("failed to listen for shutdown signal: {}", e),
        }
    });

    info!("taskline worker running against database {}", state.config.database_name);
    processor.run().await;
    info!("taskline worker exited");
    Ok(())
}
