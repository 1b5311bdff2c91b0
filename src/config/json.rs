//! JSON shape of the configuration and its translation into runtime types.
//!
//! The file is a top-level array of buses. Defaults: `max_retries` 3,
//! `retry_delay` 0 ms, `inter_device_delay` 0 ms.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::{BusConfig, ConfigError, Decoder, DeviceConfig, Group, Parity, Readable};
use crate::registers::{RegisterIndex, RegisterRange, RegisterSet};

#[derive(Debug, Deserialize)]
struct RawBus {
    possible_serial_ports: Vec<String>,
    baud: u32,
    parity: Parity,
    data_bits: u8,
    stop_bits: u8,
    #[serde(default)]
    inter_device_delay: u64,
    devices: Vec<RawDevice>,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    id: String,
    name: String,
    description: String,
    slave_id: u8,
    burst_size: usize,
    #[serde(default = "default_max_retries")]
    max_retries: usize,
    #[serde(default)]
    retry_delay: u64,
    holding_registers: Vec<RawRange>,
    input_registers: Vec<RawRange>,
    elements: Vec<RawElement>,
}

fn default_max_retries() -> usize {
    3
}

#[derive(Debug, Deserialize)]
struct RawRange {
    begin: RegisterIndex,
    end: RegisterIndex,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "element_type", rename_all = "lowercase")]
enum RawElement {
    Readable {
        name: String,
        description: String,
        registers: Vec<RegisterIndex>,
        decoder: RawDecoder,
    },
    Group {
        name: String,
        description: String,
        elements: Vec<RawElement>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawDecoder {
    Linear { factor: f64, offset: f64 },
    Float,
}

/// Loads and validates a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Vec<Arc<BusConfig>>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading configuration file {}", path.display()))?;
    buses_from_json(&content)
        .with_context(|| format!("parsing configuration file {}", path.display()))
}

/// Parses and validates a configuration from a JSON string.
pub fn buses_from_json(json: &str) -> Result<Vec<Arc<BusConfig>>> {
    let raw_buses: Vec<RawBus> = serde_json::from_str(json)?;
    raw_buses.into_iter().map(bus_of_raw).collect()
}

fn bus_of_raw(raw: RawBus) -> Result<Arc<BusConfig>> {
    if raw.possible_serial_ports.is_empty() {
        return Err(ConfigError("bus without candidate serial ports".into()).into());
    }
    let mut seen = HashSet::new();
    for port in &raw.possible_serial_ports {
        if !seen.insert(port.as_str()) {
            return Err(ConfigError(format!("duplicate candidate port {port}")).into());
        }
    }
    if raw.devices.is_empty() {
        return Err(ConfigError("bus without devices".into()).into());
    }

    let devices = raw
        .devices
        .into_iter()
        .map(device_of_raw)
        .collect::<Result<Vec<_>>>()?;

    Ok(Arc::new(BusConfig {
        label: BusConfig::label_of_devices(&devices),
        possible_serial_ports: raw.possible_serial_ports,
        baud: raw.baud,
        parity: raw.parity,
        data_bits: raw.data_bits,
        stop_bits: raw.stop_bits,
        inter_device_delay: Duration::from_millis(raw.inter_device_delay),
        devices,
    }))
}

fn device_of_raw(raw: RawDevice) -> Result<Arc<DeviceConfig>> {
    if raw.burst_size == 0 {
        return Err(ConfigError(format!("device {}: burst_size must be at least 1", raw.id)).into());
    }

    let holding_registers = register_set_of_raw(&raw.holding_registers)
        .map_err(|error| ConfigError(format!("device {}: {}", raw.id, error.0)))?;
    let input_registers = register_set_of_raw(&raw.input_registers)
        .map_err(|error| ConfigError(format!("device {}: {}", raw.id, error.0)))?;
    let readable_registers = holding_registers.union(&input_registers);

    let root = Group {
        name: raw.name.clone(),
        description: raw.description.clone(),
        readables: readables_of_raw(&raw.elements)?,
        subgroups: subgroups_of_raw(&raw.elements)?,
    };

    check_group_registers(&raw.id, &root, &holding_registers, &input_registers)?;

    Ok(Arc::new(DeviceConfig {
        id: raw.id,
        name: raw.name,
        description: raw.description,
        slave_id: raw.slave_id,
        burst_size: raw.burst_size,
        max_retries: raw.max_retries,
        retry_delay: Duration::from_millis(raw.retry_delay),
        holding_registers,
        input_registers,
        readable_registers,
        root,
    }))
}

fn register_set_of_raw(ranges: &[RawRange]) -> Result<RegisterSet, ConfigError> {
    let ranges = ranges
        .iter()
        .map(|range| {
            if range.begin > range.end {
                return Err(ConfigError(format!(
                    "register range [{}, {}] is reversed",
                    range.begin, range.end
                )));
            }
            Ok(RegisterRange::new(range.begin, range.end))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RegisterSet::new(&ranges))
}

fn readables_of_raw(elements: &[RawElement]) -> Result<Vec<Readable>> {
    let mut readables = Vec::new();
    for element in elements {
        if let RawElement::Readable {
            name,
            description,
            registers,
            decoder,
        } = element
        {
            let decoder = match decoder {
                RawDecoder::Linear { factor, offset } => Decoder::Linear {
                    factor: *factor,
                    offset: *offset,
                },
                RawDecoder::Float => Decoder::Float,
            };
            decoder
                .validate(registers.len())
                .map_err(|error| ConfigError(format!("readable {name}: {}", error.0)))?;
            readables.push(Readable {
                name: name.clone(),
                description: description.clone(),
                data_type: decoder.data_type(),
                registers: registers.clone(),
                decoder,
            });
        }
    }
    Ok(readables)
}

fn subgroups_of_raw(elements: &[RawElement]) -> Result<Vec<Group>> {
    let mut subgroups = Vec::new();
    for element in elements {
        if let RawElement::Group {
            name,
            description,
            elements,
        } = element
        {
            subgroups.push(Group {
                name: name.clone(),
                description: description.clone(),
                readables: readables_of_raw(elements)?,
                subgroups: subgroups_of_raw(elements)?,
            });
        }
    }
    Ok(subgroups)
}

// Every register of every readable, transitively, must be readable on the
// device, and readable through exactly one function code so the register
// kind of a burst is never ambiguous.
fn check_group_registers(
    device_id: &str,
    group: &Group,
    holding_registers: &RegisterSet,
    input_registers: &RegisterSet,
) -> Result<()> {
    for readable in &group.readables {
        for register in &readable.registers {
            let holding = holding_registers.contains(*register);
            let input = input_registers.contains(*register);
            if !holding && !input {
                return Err(ConfigError(format!(
                    "device {device_id}: register {register} of readable {} \
                     is in neither register set",
                    readable.name
                ))
                .into());
            }
            if holding && input {
                return Err(ConfigError(format!(
                    "device {device_id}: register {register} of readable {} \
                     is in both register sets",
                    readable.name
                ))
                .into());
            }
        }
    }
    for subgroup in &group.subgroups {
        check_group_registers(device_id, subgroup, holding_registers, input_registers)?;
    }
    Ok(())
}
