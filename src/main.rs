mod ssv_config;
mod ssv_controllers;
mod ssv_gui;
mod ssv_map;
mod ssv_models;
mod ssv_render;
mod ssv_state;
mod ssv_timers;
mod ssv_views;

use anyhow::Context;
use clap::Parser;
use log::{error, info};
use ssv_config::{Args, Config};
use ssv_controllers::SSVControllers;
use ssv_models::SSVModels;

fn run(config: Config) -> anyhow::Result<()> {
    // Nothing to show without a complex id.
    let complex_id = SSVModels::resolve_complex_id(&config.location)
        .with_context(|| format!("Cannot open '{}'", config.location))?;
    info!("station complex {} via {}", complex_id, config.api_url);

    if config.terminal {
        SSVControllers::run_terminal(&config)
    } else {
        ssv_gui::run_gui(config).map_err(|e| anyhow::anyhow!("GUI error: {}", e))
    }
}

fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Set up panic hook for better error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n{}", "═".repeat(70));
        eprintln!("❌ STATION VIEWER PANIC");
        eprintln!("{}", "═".repeat(70));
        eprintln!("\n{}", panic_info);
        eprintln!("\n💡 Restart the viewer; report this if it keeps happening.");
        eprintln!("{}", "═".repeat(70));
    }));

    let config = Config::from_args(Args::parse());

    match std::panic::catch_unwind(move || run(config)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            std::process::exit(1);
        }
        Err(_) => {
            eprintln!("\n⚠️  Station viewer terminated unexpectedly");
            std::process::exit(1);
        }
    }
}
