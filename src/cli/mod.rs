//! Command-line entry point.
//!
//! One positional argument: the configuration file path (defaults to
//! `config/adapter.json`). The demo runs two start/stop cycles, printing
//! every registered metric once per second; Ctrl-C stops early.

pub mod reader;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};

use crate::adapter::ModbusAdapter;
use crate::boot;
use crate::config;
use crate::context::rtu::RtuContext;
use crate::model::{InMemoryRegistry, ModelDeviceBuilder};

const DEFAULT_CONFIG_PATH: &str = "config/adapter.json";

/// The demo stops and restarts the adapter to show that bindings are
/// re-established from scratch.
const START_STOP_CYCLES: usize = 2;
const READ_CYCLES: usize = 10;

pub fn run() -> Result<()> {
    let matches = Command::new("modbus-adapter")
        .about("Modbus RTU technology adapter")
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .help("Path to the JSON bus configuration")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .get_matches();

    boot::init_logging();

    let config_path = matches
        .get_one::<String>("config")
        .expect("default is set");
    let bus_configs = config::load_config(config_path)?;

    let registry = Arc::new(InMemoryRegistry::new());
    let adapter = ModbusAdapter::new(
        bus_configs,
        RtuContext::factory(),
        Box::new(ModelDeviceBuilder::new()),
        registry.clone(),
    );

    let (shutdown_tx, shutdown_rx) = flume::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("installing the Ctrl-C handler")?;

    for _ in 0..START_STOP_CYCLES {
        println!("\nStarting\n");
        adapter.start();

        for _ in 0..READ_CYCLES {
            match shutdown_rx.recv_timeout(Duration::from_secs(1)) {
                Err(flume::RecvTimeoutError::Timeout) => {
                    reader::read_all(&registry);
                    println!();
                }
                Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => {
                    println!("\nStopping\n");
                    adapter.stop();
                    return Ok(());
                }
            }
        }

        println!("\nStopping\n");
        adapter.stop();
    }
    Ok(())
}
