//! Process-level initialization.

use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;

/// Initializes logging. Honours `RUST_LOG`; when `MODBUS_ADAPTER_LOG_FILE`
/// is set, log lines go to that file instead of stderr.
pub fn init_logging() {
    match std::env::var("MODBUS_ADAPTER_LOG_FILE").ok() {
        Some(path) => {
            if let Err(error) = init_file_logger(&path) {
                eprintln!("Failed to initialize file logger at '{path}': {error}");
                env_logger::init();
            }
        }
        None => {
            Builder::new()
                .format(|buf, record| {
                    writeln!(
                        buf,
                        "{} [{}] {}",
                        Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                        record.level(),
                        record.args()
                    )
                })
                .filter_level(LevelFilter::Info)
                .parse_default_env()
                .init();
        }
    }
}

fn init_file_logger(path: &str) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} {} [{}] - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(file)))
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .init();

    log::info!("File logger initialized at {path}");

    Ok(())
}
