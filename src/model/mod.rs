//! The external information model consumed by the adapter.
//!
//! The adapter publishes every Modbus slave as a [`Device`]: a named tree of
//! element groups whose leaves are readable metrics. The concrete model
//! implementation is supplied from outside through the [`DeviceBuilder`] and
//! [`DeviceRegistry`] traits; [`builder`] and [`registry`] provide the
//! in-memory implementations used by the bundled binary and the tests.

pub mod builder;
pub mod registry;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use strum::Display;

pub use builder::ModelDeviceBuilder;
pub use registry::InMemoryRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DataType {
    #[strum(serialize = "double")]
    Double,
    #[strum(serialize = "integer")]
    Integer,
    #[strum(serialize = "boolean")]
    Boolean,
    #[strum(serialize = "text")]
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Double(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
}

impl DataValue {
    pub fn data_type(&self) -> DataType {
        match self {
            DataValue::Double(_) => DataType::Double,
            DataValue::Integer(_) => DataType::Integer,
            DataValue::Boolean(_) => DataType::Boolean,
            DataValue::Text(_) => DataType::Text,
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Double(value) => write!(f, "{value}"),
            DataValue::Integer(value) => write!(f, "{value}"),
            DataValue::Boolean(value) => write!(f, "{value}"),
            DataValue::Text(value) => write!(f, "{value}"),
        }
    }
}

/// Performs one acquisition and yields a typed value. Fails cleanly once the
/// owning bus has been torn down.
pub type ReadCallback = Arc<dyn Fn() -> Result<DataValue> + Send + Sync>;

#[derive(Clone)]
pub struct Metric {
    pub id: String,
    pub name: String,
    pub description: String,
    pub data_type: DataType,
    pub read: ReadCallback,
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("data_type", &self.data_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Element {
    Metric(Metric),
    Group(ElementGroup),
}

#[derive(Debug, Clone)]
pub struct ElementGroup {
    pub id: String,
    pub name: String,
    pub description: String,
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub description: String,
    pub root: ElementGroup,
}

impl Device {
    /// Depth-first enumeration of every metric in the tree.
    pub fn metrics(&self) -> Vec<&Metric> {
        fn walk<'a>(group: &'a ElementGroup, out: &mut Vec<&'a Metric>) {
            for element in &group.elements {
                match element {
                    Element::Metric(metric) => out.push(metric),
                    Element::Group(subgroup) => walk(subgroup, out),
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }
}

/// Incremental construction of one [`Device`], in registration order.
///
/// `build_device_base` starts a device; groups and metrics are attached to
/// it; `get_result` finishes the device and resets the builder.
pub trait DeviceBuilder: Send {
    fn build_device_base(&mut self, id: &str, name: &str, description: &str) -> Result<()>;

    /// Adds an element group and returns its id. The empty group id refers
    /// to the device root.
    fn add_device_element_group(&mut self, name: &str, description: &str) -> Result<String>;

    /// Adds a readable metric to the group `group_id` and returns the
    /// metric's element id.
    fn add_readable_metric(
        &mut self,
        group_id: &str,
        name: &str,
        description: &str,
        data_type: DataType,
        read: ReadCallback,
    ) -> Result<String>;

    fn get_result(&mut self) -> Result<Device>;
}

/// The registry devices are published to.
pub trait DeviceRegistry: Send + Sync {
    /// Returns false when the registry refuses the device.
    fn register(&self, device: Device) -> bool;

    /// Returns false when no such device was registered.
    fn deregister(&self, device_id: &str) -> bool;
}
