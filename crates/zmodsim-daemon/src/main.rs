//! ZModSim daemon entry point.
//!
//! Parses CLI flags, assembles a validated [`SimulatorConfig`], and drives
//! a [`zmodsim_core::Supervisor`] until a shutdown signal or a fatal error.

mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::info;
use zmodsim_common::config::{parse_register_list, SimulatorConfig, SimulatorConfigFile};
use zmodsim_core::Supervisor;

use crate::signals::SignalHandler;

/// ZModSim: a Modbus TCP slave simulator.
#[derive(Parser, Debug)]
#[command(name = "zmodsim", about = "Modbus TCP slave simulator", version, long_about = None)]
struct Args {
    /// Path to a JSON configuration file.
    #[arg(long, short = 'f', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Modbus slave address (1..=247).
    #[arg(long, short = 'u', value_name = "ID")]
    unit_id: Option<u8>,

    /// TCP port to listen on.
    #[arg(long, short = 'p', value_name = "PORT")]
    port: Option<u16>,

    /// Number of coils.
    #[arg(long, value_name = "N")]
    coils: Option<u16>,

    /// Number of discrete inputs.
    #[arg(long, value_name = "N")]
    discrete: Option<u16>,

    /// Number of holding registers.
    #[arg(long, value_name = "N")]
    holding: Option<u16>,

    /// Number of input registers.
    #[arg(long, value_name = "N")]
    input: Option<u16>,

    /// Enable the holding-register auto-increment worker.
    #[arg(long)]
    holding_auto: bool,

    /// Holding-register addresses the auto-increment worker targets
    /// (`item (',' item)*`, `item := u16 | u16-u16`).
    #[arg(long, value_name = "LIST")]
    holding_regs: Option<String>,

    /// Milliseconds between holding-register auto-increment ticks.
    #[arg(long, value_name = "MS")]
    holding_interval: Option<u64>,

    /// Step applied per holding-register auto-increment tick.
    #[arg(long, value_name = "N")]
    holding_inc: Option<u16>,

    /// Wrap-to-zero threshold for holding-register auto-increment.
    #[arg(long, value_name = "N")]
    holding_max: Option<u16>,

    /// Enable the input-register auto-increment worker.
    #[arg(long)]
    input_auto: bool,

    /// Input-register addresses the auto-increment worker targets.
    #[arg(long, value_name = "LIST")]
    input_regs: Option<String>,

    /// Milliseconds between input-register auto-increment ticks.
    #[arg(long, value_name = "MS")]
    input_interval: Option<u64>,

    /// Step applied per input-register auto-increment tick.
    #[arg(long, value_name = "N")]
    input_inc: Option<u16>,

    /// Wrap-to-zero threshold for input-register auto-increment.
    #[arg(long, value_name = "N")]
    input_max: Option<u16>,

    /// Print the built-in default configuration as pretty JSON and exit.
    #[arg(long)]
    generate_config: bool,

    /// Log level (trace, debug, info, warn, error). Defaults to the config
    /// file's value, or `"info"` if neither is set.
    #[arg(long, short = 'l', value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        let json = SimulatorConfig::default()
            .to_json_pretty()
            .context("failed to serialize default configuration")?;
        println!("{json}");
        return Ok(());
    }

    let config = build_config(&args).context("failed to assemble configuration")?;

    init_logging(&config.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "starting ZModSim");
    info!(
        unit_id = config.unit_id,
        port = config.port,
        ?config.bank_sizes,
        "configuration ready"
    );

    let supervisor = Supervisor::start(&config).context("failed to start simulator")?;
    info!(addr = %supervisor.local_addr(), "listening");

    let signal_handler =
        SignalHandler::install(supervisor.run_flag()).context("failed to install signal handlers")?;
    while !signal_handler.shutdown_requested() {
        thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    supervisor.shutdown();
    Ok(())
}

fn init_logging(level: &str) {
    let filter = format!("zmodsim_daemon={level},zmodsim_core={level},zmodsim_common={level}");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

fn build_config(args: &Args) -> Result<SimulatorConfig> {
    let mut config = SimulatorConfig::default();

    if let Some(path) = &args.config {
        let file = SimulatorConfigFile::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;
        config = file.merge_into(config);
    }

    if let Some(unit_id) = args.unit_id {
        config.unit_id = unit_id;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(coils) = args.coils {
        config.bank_sizes.coils = coils;
    }
    if let Some(discrete) = args.discrete {
        config.bank_sizes.discrete = discrete;
    }
    if let Some(holding) = args.holding {
        config.bank_sizes.holding = holding;
    }
    if let Some(input) = args.input {
        config.bank_sizes.input = input;
    }

    if args.holding_auto {
        config.holding_auto.enabled = true;
    }
    if let Some(expr) = &args.holding_regs {
        config.holding_auto.addresses =
            parse_register_list(expr).context("invalid --holding-regs expression")?;
    }
    if let Some(ms) = args.holding_interval {
        config.holding_auto.interval_ms = ms;
    }
    if let Some(inc) = args.holding_inc {
        config.holding_auto.increment = inc;
    }
    if let Some(max) = args.holding_max {
        config.holding_auto.max = max;
    }

    if args.input_auto {
        config.input_auto.enabled = true;
    }
    if let Some(expr) = &args.input_regs {
        config.input_auto.addresses =
            parse_register_list(expr).context("invalid --input-regs expression")?;
    }
    if let Some(ms) = args.input_interval {
        config.input_auto.interval_ms = ms;
    }
    if let Some(inc) = args.input_inc {
        config.input_auto.increment = inc;
    }
    if let Some(max) = args.input_max {
        config.input_auto.max = max;
    }

    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config.validate().context("configuration failed validation")?;
    Ok(config)
}
