//! Shared test harness: a scriptable virtual Modbus transport and config
//! builders.
#![allow(dead_code)]
//!
//! All virtual devices expose registers 2, 3 and 5; reads starting at 2 may
//! span up to two registers, reads at 3 or 5 a single one. Behaviour is
//! keyed by (port, device id) and adjustable while the adapter runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use modbus_adapter::config::{BusConfig, DeviceConfig, Parity};
use modbus_adapter::context::{
    ContextFactory, ErrorCode, ModbusContext, ModbusError, RegisterKind,
};
use modbus_adapter::registers::{RegisterIndex, RegisterRange, RegisterSet};

/// How a virtual device answers reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    /// Always answers.
    Perfect,
    /// Returns a zero count (refusal without error) on every read.
    Refusing,
    /// Fails every read with the given code.
    Failing(ErrorCode),
    /// Fails every other read with the given code, starting with a failure.
    Intermittent(ErrorCode),
}

#[derive(Debug, Clone)]
struct Behaviour {
    kind: RegisterKind,
    value: u16,
    quality: Quality,
}

#[derive(Default)]
struct ControlState {
    missing_ports: HashSet<String>,
    devices: HashMap<(String, String), Behaviour>,
}

/// Scripts every context produced by [`VirtualControl::factory`].
#[derive(Default)]
pub struct VirtualControl {
    state: Mutex<ControlState>,
    flips: AtomicUsize,
}

impl VirtualControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn factory(self: &Arc<Self>) -> ContextFactory {
        let control = self.clone();
        Arc::new(move |port_name, _bus| {
            Ok(Box::new(VirtualContext {
                port: port_name.to_string(),
                control: control.clone(),
                connected: false,
                selected_device: None,
            }) as Box<dyn ModbusContext>)
        })
    }

    pub fn set_port_present(&self, port: &str, present: bool) {
        let mut state = self.state.lock();
        if present {
            state.missing_ports.remove(port);
        } else {
            state.missing_ports.insert(port.to_string());
        }
    }

    /// Adds or replaces the behaviour of a device; it applies to all of the
    /// device's registers.
    pub fn set_device(&self, port: &str, device_id: &str, kind: RegisterKind, value: u16, quality: Quality) {
        self.state.lock().devices.insert(
            (port.to_string(), device_id.to_string()),
            Behaviour {
                kind,
                value,
                quality,
            },
        );
    }

    pub fn remove_device(&self, port: &str, device_id: &str) {
        self.state
            .lock()
            .devices
            .remove(&(port.to_string(), device_id.to_string()));
    }
}

struct VirtualContext {
    port: String,
    control: Arc<VirtualControl>,
    connected: bool,
    selected_device: Option<String>,
}

impl ModbusContext for VirtualContext {
    fn connect(&mut self) -> Result<(), ModbusError> {
        if self.control.state.lock().missing_ports.contains(&self.port) {
            return Err(ModbusError::new(
                ErrorCode::PortGone,
                format!("no such port {}", self.port),
            ));
        }
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) {
        self.connected = false;
    }

    fn select_device(&mut self, device: &DeviceConfig) -> Result<(), ModbusError> {
        self.selected_device = Some(device.id.clone());
        Ok(())
    }

    fn read_registers(
        &mut self,
        addr: RegisterIndex,
        kind: RegisterKind,
        count: usize,
        dest: &mut [u16],
    ) -> Result<usize, ModbusError> {
        assert!(self.connected, "read on a closed context");
        let selected = self.selected_device.clone().expect("no device selected");
        let behaviour = {
            let state = self.control.state.lock();
            state.devices.get(&(self.port.clone(), selected)).cloned()
        };
        // An absent device does not respond at all.
        let Some(behaviour) = behaviour else {
            return Err(ModbusError::new(ErrorCode::Timeout, "no response"));
        };

        if kind != behaviour.kind {
            return Err(ModbusError::new(ErrorCode::IllegalDataAddress, ""));
        }

        match behaviour.quality {
            Quality::Perfect => {}
            Quality::Refusing => return Ok(0),
            Quality::Failing(code) => return Err(ModbusError::new(code, "scripted failure")),
            Quality::Intermittent(code) => {
                if self.control.flips.fetch_add(1, Ordering::Relaxed) % 2 == 0 {
                    return Err(ModbusError::new(code, "scripted intermittent failure"));
                }
            }
        }

        match addr {
            3 | 5 => {
                if count > 1 {
                    return Err(ModbusError::new(ErrorCode::BadData, "burst too long"));
                }
            }
            2 => {
                if count > 2 {
                    return Err(ModbusError::new(ErrorCode::BadData, "burst too long"));
                }
            }
            _ => return Err(ModbusError::new(ErrorCode::IllegalDataAddress, "")),
        }

        for slot in dest.iter_mut().take(count) {
            *slot = behaviour.value;
        }
        Ok(count)
    }
}

/// Bus with one device `{id, slave, holding 2..3 and 5}` on the given
/// candidate ports, carrying the readables used across the tests:
/// `simple` (register 3, linear 2x+1) at the root and `pair`
/// (registers 2 and 5, linear 3x+4) in a subgroup.
pub fn demo_bus(ports: &[&str], device_id: &str, slave_id: u8) -> Arc<BusConfig> {
    let holding = RegisterSet::new(&[RegisterRange::new(2, 3), RegisterRange::new(5, 5)]);
    let input = RegisterSet::new(&[]);
    let device = Arc::new(DeviceConfig {
        id: device_id.to_string(),
        name: device_id.to_string(),
        description: "virtual test device".to_string(),
        slave_id,
        burst_size: 2,
        max_retries: 3,
        retry_delay: Duration::ZERO,
        readable_registers: holding.union(&input),
        holding_registers: holding,
        input_registers: input,
        root: modbus_adapter::config::Group {
            name: device_id.to_string(),
            description: String::new(),
            readables: vec![modbus_adapter::config::Readable {
                name: "simple".to_string(),
                description: String::new(),
                data_type: modbus_adapter::model::DataType::Double,
                registers: vec![3],
                decoder: modbus_adapter::config::Decoder::Linear {
                    factor: 2.0,
                    offset: 1.0,
                },
            }],
            subgroups: vec![modbus_adapter::config::Group {
                name: "inner".to_string(),
                description: String::new(),
                readables: vec![modbus_adapter::config::Readable {
                    name: "pair".to_string(),
                    description: String::new(),
                    data_type: modbus_adapter::model::DataType::Double,
                    registers: vec![2, 5],
                    decoder: modbus_adapter::config::Decoder::Linear {
                        factor: 3.0,
                        offset: 4.0,
                    },
                }],
                subgroups: Vec::new(),
            }],
        },
    });
    Arc::new(BusConfig {
        possible_serial_ports: ports.iter().map(|port| port.to_string()).collect(),
        baud: 9600,
        parity: Parity::None,
        data_bits: 8,
        stop_bits: 1,
        inter_device_delay: Duration::ZERO,
        label: BusConfig::label_of_devices(std::slice::from_ref(&device)),
        devices: vec![device],
    })
}

/// Polls `condition` for up to `timeout`, sleeping briefly in between.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
