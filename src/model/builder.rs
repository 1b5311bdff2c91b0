//! Default in-memory [`DeviceBuilder`] implementation.

use anyhow::{bail, Result};

use super::{DataType, Device, DeviceBuilder, Element, ElementGroup, Metric, ReadCallback};

/// Assembles one device at a time. Element ids are slash-separated paths
/// rooted at the device id; duplicate sibling names are accepted as-is.
#[derive(Default)]
pub struct ModelDeviceBuilder {
    pending: Option<PendingDevice>,
}

struct PendingDevice {
    id: String,
    name: String,
    description: String,
    // Root-level entries, in registration order. Group entries index into
    // `groups` so metrics can still be attached after later siblings exist.
    root: Vec<RootEntry>,
    groups: Vec<ElementGroup>,
}

enum RootEntry {
    Metric(Metric),
    Group(usize),
}

impl ModelDeviceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending_mut(&mut self) -> Result<&mut PendingDevice> {
        match self.pending.as_mut() {
            Some(pending) => Ok(pending),
            None => bail!("no device under construction; call build_device_base first"),
        }
    }
}

impl DeviceBuilder for ModelDeviceBuilder {
    fn build_device_base(&mut self, id: &str, name: &str, description: &str) -> Result<()> {
        if self.pending.is_some() {
            bail!("device {id} started while another device is still under construction");
        }
        self.pending = Some(PendingDevice {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            root: Vec::new(),
            groups: Vec::new(),
        });
        Ok(())
    }

    fn add_device_element_group(&mut self, name: &str, description: &str) -> Result<String> {
        let pending = self.pending_mut()?;
        let group_id = format!("{}/{}", pending.id, name);
        let index = pending.groups.len();
        pending.groups.push(ElementGroup {
            id: group_id.clone(),
            name: name.to_string(),
            description: description.to_string(),
            elements: Vec::new(),
        });
        pending.root.push(RootEntry::Group(index));
        Ok(group_id)
    }

    fn add_readable_metric(
        &mut self,
        group_id: &str,
        name: &str,
        description: &str,
        data_type: DataType,
        read: ReadCallback,
    ) -> Result<String> {
        let pending = self.pending_mut()?;
        let parent = if group_id.is_empty() {
            &pending.id
        } else {
            let Some(group) = pending.groups.iter().find(|group| group.id == group_id) else {
                bail!("unknown element group {group_id}");
            };
            &group.id
        };
        let element_id = format!("{parent}/{name}");
        let metric = Metric {
            id: element_id.clone(),
            name: name.to_string(),
            description: description.to_string(),
            data_type,
            read,
        };
        if group_id.is_empty() {
            pending.root.push(RootEntry::Metric(metric));
        } else {
            let group = pending
                .groups
                .iter_mut()
                .find(|group| group.id == group_id)
                .unwrap();
            group.elements.push(Element::Metric(metric));
        }
        Ok(element_id)
    }

    fn get_result(&mut self) -> Result<Device> {
        let Some(pending) = self.pending.take() else {
            bail!("no device under construction");
        };
        let PendingDevice {
            id,
            name,
            description,
            root,
            mut groups,
        } = pending;

        // Groups are consumed back to front so indices stay valid.
        let mut elements = Vec::with_capacity(root.len());
        for entry in root.into_iter().rev() {
            elements.push(match entry {
                RootEntry::Metric(metric) => Element::Metric(metric),
                RootEntry::Group(index) => {
                    debug_assert_eq!(index, groups.len() - 1);
                    Element::Group(groups.pop().unwrap())
                }
            });
        }
        elements.reverse();

        Ok(Device {
            root: ElementGroup {
                id: id.clone(),
                name: name.clone(),
                description: description.clone(),
                elements,
            },
            id,
            name,
            description,
        })
    }
}
