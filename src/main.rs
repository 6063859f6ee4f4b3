//! Application entry point.

use anyhow::Context as _;
use clap::Parser;
use log::info;
use mimalloc::MiMalloc;
use std::path::PathBuf;
use traverser::config::Settings;
use traverser::drive::VixDrive;
use traverser::gui;
use traverser::workers::{self, WorkerContext};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "traverser", version, about = "Two-axis motorized stage controller")]
struct Args {
    /// Configuration file (default: ~/.traverser.ini)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run the workers without a window; useful for smoke testing
    #[arg(long)]
    headless: bool,

    /// Use the recording mock transport instead of a serial port
    #[arg(long)]
    simulate: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(Settings::default_path);
    let settings = Settings::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    info!("configuration loaded from {}", config_path.display());

    let drive = VixDrive::from_settings(&settings);
    let (ctx, ui_rx) = WorkerContext::new(drive, settings, args.simulate);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building the tokio runtime")?;
    let _workers = {
        let _guard = runtime.enter();
        workers::spawn_workers(&ctx)
    };

    if args.headless {
        info!("running headless; Ctrl-C to exit");
        runtime.block_on(async {
            workers::ui_connect(ctx.clone()).await;
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")
        })?;
        return Ok(());
    }

    gui::run(ctx, ui_rx, runtime.handle().clone(), config_path)
        .map_err(|e| anyhow::anyhow!("GUI terminated with an error: {e}"))
}
