//! Abstraction over the Modbus wire transport.
//!
//! The adapter core only ever talks to a [`ModbusContext`]; the serial RTU
//! implementation lives in [`rtu`] and the test suite substitutes a virtual
//! one through the [`ContextFactory`].

pub mod rtu;

use std::fmt;
use std::sync::Arc;

use strum::Display;

use crate::config::{BusConfig, DeviceConfig};
use crate::registers::RegisterIndex;

/// The two readable register kinds (functions 0x03 and 0x04).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum RegisterKind {
    #[strum(serialize = "holding")]
    Holding,
    #[strum(serialize = "input")]
    Input,
}

/// Classified transport/protocol error codes.
///
/// The classification is coarse on purpose: the wire library cannot reliably
/// narrow down which operations emit which codes, so the only distinction
/// that matters here is whether a retry can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorCode {
    #[strum(serialize = "illegal function")]
    IllegalFunction,
    #[strum(serialize = "illegal data address")]
    IllegalDataAddress,
    #[strum(serialize = "illegal data value")]
    IllegalDataValue,
    #[strum(serialize = "slave device failure")]
    SlaveDeviceFailure,
    #[strum(serialize = "acknowledge")]
    Acknowledge,
    #[strum(serialize = "slave device busy")]
    SlaveDeviceBusy,
    #[strum(serialize = "negative acknowledge")]
    NegativeAcknowledge,
    #[strum(serialize = "memory parity error")]
    MemoryParity,
    #[strum(serialize = "CRC mismatch")]
    BadCrc,
    #[strum(serialize = "malformed frame")]
    BadData,
    #[strum(serialize = "timeout")]
    Timeout,
    #[strum(serialize = "port unavailable")]
    PortGone,
    #[strum(serialize = "unknown error")]
    Unknown,
}

impl ErrorCode {
    /// Does it make sense to retry the failing operation? `false` when in
    /// doubt.
    pub fn retry_feasible(self) -> bool {
        matches!(
            self,
            ErrorCode::SlaveDeviceBusy | ErrorCode::MemoryParity | ErrorCode::BadCrc
        )
    }
}

/// Error emitted by every context operation.
#[derive(Debug)]
pub struct ModbusError {
    code: ErrorCode,
    message: String,
}

impl ModbusError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn retry_feasible(&self) -> bool {
        self.code.retry_feasible()
    }
}

impl fmt::Display for ModbusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for ModbusError {}

/// One Modbus connection, exclusively owned by its user.
///
/// `read_registers` may read fewer registers than requested; a return value
/// of zero means the peer refused without raising an error.
pub trait ModbusContext: Send {
    fn connect(&mut self) -> Result<(), ModbusError>;

    fn close(&mut self);

    fn select_device(&mut self, device: &DeviceConfig) -> Result<(), ModbusError>;

    /// Reads up to `count` registers starting at `addr` into `dest`,
    /// returning the number actually read. Requires a prior `connect`.
    fn read_registers(
        &mut self,
        addr: RegisterIndex,
        kind: RegisterKind,
        count: usize,
        dest: &mut [u16],
    ) -> Result<usize, ModbusError>;
}

/// Produces a fresh context for a (port, bus) pairing. Injectable so tests
/// can substitute a virtual transport.
pub type ContextFactory =
    Arc<dyn Fn(&str, &BusConfig) -> Result<Box<dyn ModbusContext>, ModbusError> + Send + Sync>;
