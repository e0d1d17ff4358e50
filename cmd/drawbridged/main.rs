use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use drawbridge::config::AppConfig;
use drawbridge::engine::Engine;
use drawbridge::errors::DrawbridgeError;
use simplelog::{CombinedLogger, TermLogger};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct CmdArgs {
    /// Config file to load
    #[arg(short, long)]
    pub config_file: Option<PathBuf>,
}

#[tokio::main]
pub async fn main() -> Result<(), DrawbridgeError> {
    let args = CmdArgs::parse();
    CombinedLogger::init(vec![TermLogger::new(
        log::LevelFilter::Debug,
        simplelog::ConfigBuilder::new().build(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )])
    .unwrap();

    log::info!("drawbridge starting");

    let config = AppConfig::load(args.config_file)?;
    let engine = Arc::new(Engine::with_disabled_file_store(
        config.drawbridge.data_dir.clone(),
        &config.drawbridge,
    ));
    engine.spawn_periodic_snapshot_flush();

    drawbridge::drawbridge_rocket(config, engine).launch().await?;

    Ok(())
}
