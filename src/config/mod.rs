//! Configuration of the adapter: buses, devices, readables and decoders.
//!
//! The JSON shape lives in [`json`]; this module holds the validated runtime
//! types the rest of the crate works with. Everything here is immutable
//! after construction.

pub mod json;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{DataType, DataValue};
use crate::registers::{RegisterIndex, RegisterSet};

pub use json::{buses_from_json, load_config};

pub type Portname = String;

/// Raised for malformed or inconsistent configuration. Fatal at startup.
#[derive(Debug, Clone)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    Even,
    Odd,
    None,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::Even => write!(f, "even"),
            Parity::Odd => write!(f, "odd"),
            Parity::None => write!(f, "none"),
        }
    }
}

/// Turns raw register words into one typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoder {
    /// Little-endian multi-word unsigned integer mapped through
    /// `factor * x + offset`.
    Linear { factor: f64, offset: f64 },
    /// IEEE-754: two registers decode as single precision, four as double,
    /// little-endian byte order.
    Float,
}

impl Decoder {
    pub fn data_type(&self) -> DataType {
        DataType::Double
    }

    /// `words` must have the length of the readable's register list.
    pub fn decode(&self, words: &[u16]) -> Result<DataValue, ConfigError> {
        match self {
            Decoder::Linear { factor, offset } => {
                let mut raw: u64 = 0;
                for (index, word) in words.iter().enumerate() {
                    raw |= u64::from(*word) << (16 * index);
                }
                Ok(DataValue::Double(raw as f64 * factor + offset))
            }
            Decoder::Float => {
                let mut bytes = Vec::with_capacity(2 * words.len());
                for word in words {
                    bytes.push(*word as u8);
                    bytes.push((*word >> 8) as u8);
                }
                match bytes.len() {
                    4 => {
                        let value = f32::from_le_bytes(bytes.try_into().unwrap());
                        Ok(DataValue::Double(f64::from(value)))
                    }
                    8 => {
                        let value = f64::from_le_bytes(bytes.try_into().unwrap());
                        Ok(DataValue::Double(value))
                    }
                    _ => Err(ConfigError(format!(
                        "float decoder needs 2 or 4 registers, got {}",
                        words.len()
                    ))),
                }
            }
        }
    }

    /// Register-count conformance, checked at configuration load.
    pub fn validate(&self, num_registers: usize) -> Result<(), ConfigError> {
        match self {
            Decoder::Linear { .. } => {
                if num_registers == 0 || num_registers > 4 {
                    return Err(ConfigError(format!(
                        "linear decoder supports 1 to 4 registers, got {num_registers}"
                    )));
                }
            }
            Decoder::Float => {
                if num_registers != 2 && num_registers != 4 {
                    return Err(ConfigError(format!(
                        "float decoder needs 2 or 4 registers, got {num_registers}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A readable metric: decoder plus the registers it draws from.
#[derive(Debug, Clone)]
pub struct Readable {
    pub name: String,
    pub description: String,
    pub data_type: DataType,
    /// Ordered register list; order matters to the decoder, not to bursts.
    pub registers: Vec<RegisterIndex>,
    pub decoder: Decoder,
}

/// An element group with readable leaves.
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub description: String,
    pub readables: Vec<Readable>,
    pub subgroups: Vec<Group>,
}

/// One Modbus slave exposed as an information-model device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub slave_id: u8,
    /// Number of registers that may be read at once. At least one.
    pub burst_size: usize,
    /// Accepted in the configuration and carried here, but not consumed by
    /// the bus runtime: the per-burst attempt budget is fixed.
    pub max_retries: usize,
    /// Pacing between consecutive wire uses of this slave; applied by the
    /// context, never by the outer retry loop.
    pub retry_delay: Duration,
    /// Registers permitting function 0x03. Together with `input_registers`
    /// this must cover every register used by any readable, including in
    /// transitive subgroups; burst optimization may read otherwise unused
    /// registers.
    pub holding_registers: RegisterSet,
    /// Registers permitting function 0x04.
    pub input_registers: RegisterSet,
    /// Union of the two sets, precomputed for distinguishability checks.
    pub readable_registers: RegisterSet,
    pub root: Group,
}

/// One configured bus with its candidate serial ports.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub possible_serial_ports: Vec<Portname>,
    pub baud: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: u8,
    /// Pause between talking to different slaves on the same wire.
    pub inter_device_delay: Duration,
    pub devices: Vec<Arc<DeviceConfig>>,
    /// Composite of the device ids, for logging.
    pub label: String,
}

impl BusConfig {
    pub fn label_of_devices(devices: &[Arc<DeviceConfig>]) -> String {
        devices
            .iter()
            .map(|device| device.id.as_str())
            .collect::<Vec<_>>()
            .join("+")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_decoder_is_little_endian_by_word() {
        let decoder = Decoder::Linear {
            factor: 2.0,
            offset: 1.0,
        };
        match decoder.decode(&[7]).unwrap() {
            DataValue::Double(value) => assert_eq!(value, 15.0),
            other => panic!("unexpected {other:?}"),
        }
        // 0x0001_0002 = 65538
        match decoder.decode(&[2, 1]).unwrap() {
            DataValue::Double(value) => assert_eq!(value, 65538.0 * 2.0 + 1.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn float_decoder_single_precision() {
        let expected = 1.5f32;
        let bytes = expected.to_le_bytes();
        let words = [
            u16::from_le_bytes([bytes[0], bytes[1]]),
            u16::from_le_bytes([bytes[2], bytes[3]]),
        ];
        match Decoder::Float.decode(&words).unwrap() {
            DataValue::Double(value) => assert_eq!(value, f64::from(expected)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn float_decoder_double_precision() {
        let expected = -12.25f64;
        let bytes = expected.to_le_bytes();
        let words: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();
        match Decoder::Float.decode(&words).unwrap() {
            DataValue::Double(value) => assert_eq!(value, expected),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn float_decoder_rejects_odd_sizes() {
        assert!(Decoder::Float.decode(&[1, 2, 3]).is_err());
        assert!(Decoder::Float.validate(3).is_err());
        assert!(Decoder::Float.validate(2).is_ok());
        assert!(Decoder::Float.validate(4).is_ok());
    }

    #[test]
    fn linear_decoder_register_budget() {
        let decoder = Decoder::Linear {
            factor: 1.0,
            offset: 0.0,
        };
        assert!(decoder.validate(4).is_ok());
        assert!(decoder.validate(5).is_err());
        assert!(decoder.validate(0).is_err());
    }
}
