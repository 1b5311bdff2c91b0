//! The adapter coordinator: ties discovery to the bus runtimes.
//!
//! `start` feeds the configured buses to the port finder. Each confirmed
//! candidate comes back through [`AdapterCore::add_bus`], which creates the
//! bus, connects it, and builds its model under the builder lock. A bus
//! failing later calls [`AdapterCore::cancel_bus`], which drops it and
//! reopens the search for its port.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::bus::Bus;
use crate::config::BusConfig;
use crate::context::ContextFactory;
use crate::finder::PortFinder;
use crate::model::{DeviceBuilder, DeviceRegistry};

/// The owner-side interface the port finder and the buses call back into.
pub trait AdapterCore: Send + Sync {
    /// Instantiates a bus on the port it was confirmed on.
    fn add_bus(&self, config: Arc<BusConfig>, actual_port: &str) -> Result<()>;

    /// Drops the bus bound to `port` and reopens the search for it.
    fn cancel_bus(&self, port: &str);
}

pub struct ModbusAdapter {
    inner: Arc<AdapterInner>,
}

struct AdapterInner {
    bus_configs: Vec<Arc<BusConfig>>,
    factory: ContextFactory,
    registry: Arc<dyn DeviceRegistry>,
    /// Serializes every model-builder call.
    device_builder: Mutex<Box<dyn DeviceBuilder>>,
    port_finder: Arc<PortFinder>,
    buses: Mutex<HashMap<String, Bus>>,
    stopping: Mutex<bool>,
    weak_self: Weak<AdapterInner>,
}

impl ModbusAdapter {
    pub fn new(
        bus_configs: Vec<Arc<BusConfig>>,
        factory: ContextFactory,
        device_builder: Box<dyn DeviceBuilder>,
        registry: Arc<dyn DeviceRegistry>,
    ) -> Self {
        log::info!("Initializing Modbus technology adapter");
        let inner = Arc::new_cyclic(|weak_self: &Weak<AdapterInner>| {
            let owner: Weak<dyn AdapterCore> = weak_self.clone();
            AdapterInner {
                bus_configs,
                factory: factory.clone(),
                registry,
                device_builder: Mutex::new(device_builder),
                port_finder: PortFinder::new(owner, factory),
                buses: Mutex::new(HashMap::new()),
                stopping: Mutex::new(false),
                weak_self: weak_self.clone(),
            }
        });
        Self { inner }
    }

    /// Submits every configured bus to port discovery.
    pub fn start(&self) {
        self.inner
            .port_finder
            .add_buses(&self.inner.bus_configs);
    }

    /// Idempotent top-down teardown: buses first, then the port finder.
    pub fn stop(&self) {
        *self.inner.stopping.lock() = true;

        // A stopping bus may call cancel_bus, which erases from the map;
        // drain a copy instead of iterating it.
        let buses: Vec<Bus> = {
            let mut buses = self.inner.buses.lock();
            buses.drain().map(|(_, bus)| bus).collect()
        };
        for bus in buses {
            bus.stop();
        }

        self.inner.port_finder.stop();

        *self.inner.stopping.lock() = false;
    }
}

impl Drop for ModbusAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl AdapterCore for AdapterInner {
    fn add_bus(&self, config: Arc<BusConfig>, actual_port: &str) -> Result<()> {
        let stopping = self.stopping.lock();
        if *stopping {
            // Already in the process of stopping; don't add anything.
            return Ok(());
        }
        /*
          The `stopping` lock stays held: a thread that wants to enter the
          stopping stage waits until this bus is fully in place, so the
          teardown does not miss it.
        */

        log::info!("Adding bus {} on port {}", config.label, actual_port);
        let owner: Weak<dyn AdapterCore> = self.weak_self.clone();
        let bus = Bus::new(
            owner,
            config.clone(),
            &self.factory,
            actual_port,
            self.registry.clone(),
        )
        .with_context(|| format!("unable to add bus on {actual_port}"))?;

        self.buses
            .lock()
            .insert(actual_port.to_string(), bus.clone());

        let result = bus.start().and_then(|()| {
            let mut builder = self.device_builder.lock();
            bus.build_model(builder.as_mut())
        });
        if let Err(error) = result {
            // A model-build abort has already removed the entry; a connect
            // failure has not.
            self.buses.lock().remove(actual_port);
            return Err(error.context(format!("unable to add bus on {actual_port}")));
        }
        Ok(())
    }

    fn cancel_bus(&self, port: &str) {
        log::trace!("Cancelling bus {port}");
        self.buses.lock().remove(port);
        self.port_finder.unassign(port);
    }
}
