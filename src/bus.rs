//! Per-bus runtime: model construction and serialized register reads.
//!
//! A bus exclusively owns one Modbus context behind a mutex, so the serial
//! line is never multiplexed. Metric callbacks hold a handle to the bus and
//! fail with [`DeviceDeregistered`] once it has been torn down. Any fatal
//! wire error aborts the whole bus: its devices are deregistered, the
//! context closed, and the owning adapter cancels the bus, which reopens
//! port discovery.

use std::fmt;
use std::sync::{Arc, Weak};

use anyhow::{anyhow, Result};
use parking_lot::Mutex;

use crate::adapter::AdapterCore;
use crate::burst::{Burst, BurstBuffer};
use crate::config::{BusConfig, Decoder, DeviceConfig, Group};
use crate::context::{ContextFactory, ModbusContext};
use crate::model::{DataValue, DeviceBuilder, DeviceRegistry};

/// Attempts per burst before the bus gives up. 0 would mean instant
/// failure.
const NUM_READ_ATTEMPTS: usize = 3;

/// Raised by metric reads after the bus was aborted or stopped.
#[derive(Debug, Clone)]
pub struct DeviceDeregistered {
    pub device_id: String,
}

impl fmt::Display for DeviceDeregistered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} has been deregistered", self.device_id)
    }
}

impl std::error::Error for DeviceDeregistered {}

struct Connection {
    context: Box<dyn ModbusContext>,
    connected: bool,
    // Invariant: empty unless `connected`.
    registered_devices: Vec<String>,
}

struct BusInner {
    owner: Weak<dyn AdapterCore>,
    config: Arc<BusConfig>,
    actual_port: String,
    registry: Arc<dyn DeviceRegistry>,
    connection: Mutex<Connection>,
}

#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

// Why a read fails before it reaches the decoder.
enum ReadFailure {
    Disconnected,
    Fatal(String),
    AttemptsExhausted,
}

impl Bus {
    /// The bus does not connect yet; call [`Bus::start`] next.
    pub fn new(
        owner: Weak<dyn AdapterCore>,
        config: Arc<BusConfig>,
        factory: &ContextFactory,
        actual_port: &str,
        registry: Arc<dyn DeviceRegistry>,
    ) -> Result<Self> {
        let context = factory(actual_port, &config)
            .map_err(|error| anyhow!("creating context for {actual_port}: {error}"))?;
        Ok(Self {
            inner: Arc::new(BusInner {
                owner,
                config,
                actual_port: actual_port.to_string(),
                registry,
                connection: Mutex::new(Connection {
                    context,
                    connected: false,
                    registered_devices: Vec::new(),
                }),
            }),
        })
    }

    pub fn start(&self) -> Result<()> {
        let mut connection = self.inner.connection.lock();
        match connection.context.connect() {
            Ok(()) => {
                connection.connected = true;
                Ok(())
            }
            Err(error) => {
                Self::shutdown(self.inner.registry.as_ref(), &mut connection);
                Err(anyhow!("connecting {}: {error}", self.inner.actual_port))
            }
        }
    }

    /// Deregisters the devices and closes the context. Idempotent.
    pub fn stop(&self) {
        log::trace!("Stopping bus {}", self.inner.actual_port);
        let mut connection = self.inner.connection.lock();
        Self::shutdown(self.inner.registry.as_ref(), &mut connection);
    }

    /// Builds the information-model tree for every configured device and
    /// publishes it. Any failure aborts the bus.
    ///
    /// Requires a started bus.
    pub fn build_model(&self, builder: &mut dyn DeviceBuilder) -> Result<()> {
        log::info!(
            "Registering all devices on bus {}",
            self.inner.actual_port
        );
        // The connection lock is held for the whole build so no metric of
        // an already-registered device reads before every device is in
        // place.
        let result = {
            let mut connection = self.inner.connection.lock();
            self.build_model_inner(&mut connection, builder)
        };
        if let Err(error) = result {
            return Err(self.abort(&format!(
                "deregistered all Modbus devices on bus {} after: {error:#}",
                self.inner.actual_port
            )));
        }
        Ok(())
    }

    fn build_model_inner(
        &self,
        connection: &mut Connection,
        builder: &mut dyn DeviceBuilder,
    ) -> Result<()> {
        for device in &self.inner.config.devices {
            builder.build_device_base(&device.id, &device.name, &device.description)?;
            self.build_group(builder, "", device, &device.root)?;
            let model_device = builder.get_result()?;
            if !self.inner.registry.register(model_device) {
                return Err(anyhow!("the registry refused device {}", device.id));
            }
            connection.registered_devices.push(device.id.clone());
        }
        Ok(())
    }

    // Registers the group's readables, then recurses. `group_id` is empty
    // for the device root.
    fn build_group(
        &self,
        builder: &mut dyn DeviceBuilder,
        group_id: &str,
        device: &Arc<DeviceConfig>,
        group: &Group,
    ) -> Result<()> {
        for readable in &group.readables {
            let buffer = BurstBuffer::new(
                &readable.registers,
                &device.holding_registers,
                &device.input_registers,
                device.burst_size,
            )?;
            let callback = {
                let bus = self.clone();
                let device = device.clone();
                let buffer = Arc::new(Mutex::new(buffer));
                let decoder = readable.decoder.clone();
                let label = format!("{}/{}", device.id, readable.name);
                Arc::new(move || bus.read_metric(&device, &buffer, &decoder, &label))
            };
            builder.add_readable_metric(
                group_id,
                &readable.name,
                &readable.description,
                readable.data_type,
                callback,
            )?;
        }
        for subgroup in &group.subgroups {
            let subgroup_id =
                builder.add_device_element_group(&subgroup.name, &subgroup.description)?;
            self.build_group(builder, &subgroup_id, device, subgroup)?;
        }
        Ok(())
    }

    // The read path of one metric. Holds the buffer for the whole call and
    // the connection only across the wire transaction; decoding happens
    // after the line is released.
    fn read_metric(
        &self,
        device: &Arc<DeviceConfig>,
        buffer: &Mutex<BurstBuffer>,
        decoder: &Decoder,
        label: &str,
    ) -> Result<DataValue> {
        let mut buffer = buffer.lock();
        let wire_result = {
            let mut connection = self.inner.connection.lock();
            if connection.connected {
                log::debug!("Reading {label}");
                self.read_bursts(&mut connection, device, &mut buffer, label)
            } else {
                log::debug!("Reading {label} failed because the connection was closed");
                Err(ReadFailure::Disconnected)
            }
        };

        match wire_result {
            Ok(()) => {
                buffer.gather();
                Ok(decoder.decode(&buffer.compact)?)
            }
            Err(ReadFailure::Disconnected) => {
                Err(DeviceDeregistered {
                    device_id: device.id.clone(),
                }
                .into())
            }
            Err(ReadFailure::AttemptsExhausted) => {
                Err(self.abort(&format!(
                    "deregistered {} after too many read attempts",
                    device.id
                )))
            }
            Err(ReadFailure::Fatal(reason)) => {
                Err(self.abort(&format!("deregistered {} after: {reason}", device.id)))
            }
        }
    }

    fn read_bursts(
        &self,
        connection: &mut Connection,
        device: &Arc<DeviceConfig>,
        buffer: &mut BurstBuffer,
        label: &str,
    ) -> Result<(), ReadFailure> {
        connection
            .context
            .select_device(device)
            .map_err(|error| ReadFailure::Fatal(error.to_string()))?;

        let BurstBuffer { plan, padded, .. } = buffer;
        let mut offset = 0;
        for burst in &plan.bursts {
            let dest = &mut padded[offset..offset + burst.num_registers];
            Self::read_burst(connection, burst, dest, label)?;
            offset += burst.num_registers;
        }
        Ok(())
    }

    // Reads one burst, looping over short reads. The attempt budget covers
    // the whole burst.
    fn read_burst(
        connection: &mut Connection,
        burst: &Burst,
        dest: &mut [u16],
        label: &str,
    ) -> Result<(), ReadFailure> {
        let mut first_register = burst.start_register;
        let mut offset = 0;
        let mut remaining_attempts = NUM_READ_ATTEMPTS;

        while offset < burst.num_registers {
            let num_remaining = burst.num_registers - offset;
            match connection.context.read_registers(
                first_register,
                burst.kind,
                num_remaining,
                &mut dest[offset..],
            ) {
                Ok(0) => {
                    log::debug!("Reading {label} failed");
                    remaining_attempts -= 1;
                    if remaining_attempts == 0 {
                        return Err(ReadFailure::AttemptsExhausted);
                    }
                    log::debug!("Retrying to read {label}");
                }
                Ok(num_read) => {
                    first_register += num_read as i32;
                    offset += num_read;
                }
                Err(error) if error.retry_feasible() => {
                    log::debug!("Reading {label} failed: {error}");
                    remaining_attempts -= 1;
                    if remaining_attempts == 0 {
                        return Err(ReadFailure::AttemptsExhausted);
                    }
                    log::debug!("Retrying to read {label}");
                }
                Err(error) => {
                    log::debug!("Reading {label} failed: {error}");
                    return Err(ReadFailure::Fatal(error.to_string()));
                }
            }
        }
        Ok(())
    }

    // Tears the bus down and asks the owner to cancel it. The connection
    // lock is released before the cross-layer call. Returns the error to
    // surface to the triggering caller.
    fn abort(&self, reason: &str) -> anyhow::Error {
        log::trace!("Aborting bus {}", self.inner.actual_port);
        log::error!("{reason}");
        {
            let mut connection = self.inner.connection.lock();
            Self::shutdown(self.inner.registry.as_ref(), &mut connection);
        }
        if let Some(owner) = self.inner.owner.upgrade() {
            owner.cancel_bus(&self.inner.actual_port);
        }
        anyhow!(DeviceDeregistered {
            device_id: self.inner.config.label.clone(),
        })
        .context(reason.to_string())
    }

    fn shutdown(registry: &dyn DeviceRegistry, connection: &mut Connection) {
        for device_id in connection.registered_devices.drain(..) {
            registry.deregister(&device_id);
        }
        if connection.connected {
            connection.context.close();
            connection.connected = false;
        }
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        Bus::shutdown(registry.as_ref(), self.connection.get_mut());
    }
}
