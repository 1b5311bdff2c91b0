//! Modbus RTU technology adapter.
//!
//! The adapter discovers which physical serial port each configured Modbus
//! bus is plugged into, registers every slave as a device in an external
//! information model, and exposes each configured register group as a
//! callable metric that performs a Modbus transaction and returns a typed
//! value. Buses that fail at runtime are torn down and fed back into
//! discovery, so hot-plugged hardware re-binds without operator help.
//!
//! The crate is organized leaves-first: [`registers`] and [`burst`] handle
//! register combinatorics, [`context`] abstracts the wire, [`finder`] binds
//! buses to ports, [`bus`] runs a bound bus, and [`adapter`] coordinates
//! the whole lifecycle.

pub mod adapter;
#[doc(hidden)]
pub mod boot;
pub mod burst;
pub mod bus;
#[doc(hidden)]
pub mod cli;
pub mod config;
pub mod context;
pub mod finder;
pub mod model;
pub mod registers;
#[doc(hidden)]
pub mod utils;

pub use adapter::ModbusAdapter;
pub use bus::DeviceDeregistered;
pub use config::{buses_from_json, load_config};
pub use context::{ContextFactory, ModbusContext};
