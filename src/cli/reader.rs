//! Demonstration reader: invokes every registered metric and prints the
//! results.

use crate::model::{DataValue, InMemoryRegistry};

/// Reads all metrics of all registered devices once. Failed reads are
/// printed too; a torn-down bus surfaces them as deregistration errors
/// until discovery re-registers the device.
pub fn read_all(registry: &InMemoryRegistry) {
    let devices = registry.devices();
    if devices.is_empty() {
        println!("(no devices registered)");
        return;
    }
    for device in devices {
        for metric in device.metrics() {
            match (metric.read)() {
                Ok(value) => println!("{} = {}", metric.id, format_value(&value)),
                Err(error) => println!("{} failed: {error:#}", metric.id),
            }
        }
    }
}

fn format_value(value: &DataValue) -> String {
    format!("{value} ({})", value.data_type())
}
