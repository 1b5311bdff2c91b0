//! The combinatorial part of port detection.
//!
//! The plan tracks, for every candidate serial port, which configured buses
//! could still be bound there and which of those cannot be told apart from
//! another still-possible bus. Only feasible, unambiguous pairings are
//! handed out as [`Candidate`]s; the plan refuses to guess between layouts
//! that would answer the same probes.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{BusConfig, DeviceConfig, Portname};
use crate::utils::interner::Interner;

type BusId = usize;
type PortId = usize;

/// Device `a` is distinguishable from device `b` when a successful read
/// exists that `a` claims and `b` would not permit: the slave ids differ,
/// or `a`'s readable registers are not a subset of `b`'s.
fn device_distinguishable_from(a: &DeviceConfig, b: &DeviceConfig) -> bool {
    a.slave_id != b.slave_id || !a.readable_registers.is_subset_of(&b.readable_registers)
}

/// Bus `a` is distinguishable from bus `b` when some device of `a` is
/// distinguishable from every device of `b`.
fn bus_distinguishable_from(a: &BusConfig, b: &BusConfig) -> bool {
    a.devices.iter().any(|device_a| {
        b.devices
            .iter()
            .all(|device_b| device_distinguishable_from(device_a, device_b))
    })
}

#[derive(Default)]
struct PortState {
    /// Buses that could still be bound to this port.
    possible: Vec<BusId>,
    /// Subset of `possible` that cannot be distinguished from some other
    /// still-possible bus here.
    ambiguous: Vec<BusId>,
    assigned: Option<BusId>,
}

struct PlanState {
    buses: Vec<Arc<BusConfig>>,
    port_names: Interner<Portname>,
    ports: Vec<PortState>,
    /// Candidate ports of each bus, resolved to ids once.
    bus_ports: Vec<Vec<PortId>>,
}

impl PlanState {
    fn port(&self, id: PortId) -> &PortState {
        &self.ports[id]
    }

    fn port_mut(&mut self, id: PortId) -> &mut PortState {
        &mut self.ports[id]
    }

    /// Searching for `bus` on `port` makes sense iff the bus is possible
    /// and unambiguous there and the port is unbound.
    fn feasible(&self, bus: BusId, port: PortId) -> bool {
        let state = self.port(port);
        state.assigned.is_none()
            && state.possible.contains(&bus)
            && !state.ambiguous.contains(&bus)
    }

    fn bus_assigned_anywhere(&self, bus: BusId) -> bool {
        self.bus_ports[bus]
            .iter()
            .any(|&port| self.port(port).assigned == Some(bus))
    }

    /// `bus` is unique on `port` iff it is distinguishable from every other
    /// still-possible bus there.
    fn is_bus_unique(&self, bus: BusId, port: PortId) -> bool {
        let config = &self.buses[bus];
        self.port(port).possible.iter().all(|&candidate| {
            candidate == bus || bus_distinguishable_from(config, &self.buses[candidate])
        })
    }

    // Moves every possible-but-no-longer-unique bus of `port` into
    // `ambiguous`. Newly added buses can retire previously clear ones.
    fn retire_non_unique(&mut self, port: PortId) {
        let possible = self.port(port).possible.clone();
        for bus in possible {
            if !self.port(port).ambiguous.contains(&bus) && !self.is_bus_unique(bus, port) {
                self.port_mut(port).ambiguous.push(bus);
            }
        }
    }
}

pub struct PortFinderPlan {
    state: Mutex<PlanState>,
    // For handing out candidates that keep the plan alive.
    weak_self: std::sync::Weak<PortFinderPlan>,
}

/// A bus/port pairing worth probing.
///
/// Candidates keep the plan alive, so ones that outlive their batch stay
/// operable; they merely stop being feasible.
#[derive(Clone)]
pub struct Candidate {
    plan: Arc<PortFinderPlan>,
    bus_id: BusId,
    port_id: PortId,
    bus: Arc<BusConfig>,
    port: Portname,
}

impl Candidate {
    pub fn bus(&self) -> &Arc<BusConfig> {
        &self.bus
    }

    pub fn port_name(&self) -> &str {
        &self.port
    }

    /// To be re-checked before probing; feasibility decays as other
    /// candidates get confirmed.
    pub fn still_feasible(&self) -> bool {
        self.plan.state.lock().feasible(self.bus_id, self.port_id)
    }

    /// Binds the candidate after a successful probe. Returns the pairings
    /// that became feasible through the binding.
    pub fn confirm(&self) -> Vec<Candidate> {
        self.plan.assign(self.bus_id, self.port_id)
    }
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("bus", &self.bus.label)
            .field("port", &self.port)
            .finish()
    }
}

impl PortFinderPlan {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            state: Mutex::new(PlanState {
                buses: Vec::new(),
                port_names: Interner::new(),
                ports: Vec::new(),
                bus_ports: Vec::new(),
            }),
            weak_self: weak_self.clone(),
        })
    }

    fn candidate(&self, state: &PlanState, bus: BusId, port: PortId) -> Candidate {
        Candidate {
            // Methods are only reachable through an `Arc`, so the upgrade
            // cannot fail.
            plan: self.weak_self.upgrade().expect("plan is alive"),
            bus_id: bus,
            port_id: port,
            bus: state.buses[bus].clone(),
            port: state.port_names.resolve(port).clone(),
        }
    }

    /// Adds new buses to the plan and returns every pairing that became
    /// feasible. The buses must be new to the plan.
    pub fn add_buses(&self, new_buses: &[Arc<BusConfig>]) -> Vec<Candidate> {
        let mut state = self.state.lock();
        let first_new = state.buses.len();

        for bus in new_buses {
            let bus_id = state.buses.len();
            state.buses.push(bus.clone());
            let mut port_ids = Vec::with_capacity(bus.possible_serial_ports.len());
            for port_name in &bus.possible_serial_ports {
                let port_id = state.port_names.intern(port_name.clone());
                if state.ports.len() <= port_id {
                    state.ports.push(PortState::default());
                }
                state.ports[port_id].possible.push(bus_id);
                port_ids.push(port_id);
            }
            state.bus_ports.push(port_ids);
        }

        let mut new_candidates = Vec::new();
        for bus_id in first_new..state.buses.len() {
            for index in 0..state.bus_ports[bus_id].len() {
                let port_id = state.bus_ports[bus_id][index];
                if state.port(port_id).assigned.is_some() {
                    continue;
                }
                if state.is_bus_unique(bus_id, port_id) {
                    new_candidates.push(self.candidate(&state, bus_id, port_id));
                } else {
                    state.port_mut(port_id).ambiguous.push(bus_id);
                }
            }
        }

        // The new buses may have retired the uniqueness of existing ones.
        for port_id in 0..state.ports.len() {
            state.retire_non_unique(port_id);
        }

        new_candidates
    }

    /// Undoes the assignment of `port_name`, restoring the feasibility the
    /// confirm took away. Returns the pairings that became feasible again.
    /// A no-op for unassigned ports.
    pub fn unassign(&self, port_name: &str) -> Vec<Candidate> {
        let mut state = self.state.lock();
        let Some(port_id) = state.port_names.lookup(&port_name.to_string()) else {
            return Vec::new();
        };
        let Some(bus_id) = state.port_mut(port_id).assigned.take() else {
            return Vec::new();
        };

        // The unassigned bus left every possible list on confirm; re-add it
        // to all its candidate ports.
        for index in 0..state.bus_ports[bus_id].len() {
            let other_port = state.bus_ports[bus_id][index];
            if other_port != port_id {
                state.port_mut(other_port).possible.push(bus_id);
            }
        }

        // Confirming cleared this port's own possibility list; every
        // unbound bus that names the port as a candidate belongs back in.
        for bus in 0..state.buses.len() {
            if state.bus_ports[bus].contains(&port_id)
                && !state.port(port_id).possible.contains(&bus)
                && !state.bus_assigned_anywhere(bus)
            {
                state.port_mut(port_id).possible.push(bus);
            }
        }

        let mut new_candidates = Vec::new();

        // Classify the re-added bus on its other ports, as add_buses would.
        for index in 0..state.bus_ports[bus_id].len() {
            let other_port = state.bus_ports[bus_id][index];
            if other_port == port_id || state.port(other_port).assigned.is_some() {
                continue;
            }
            if state.is_bus_unique(bus_id, other_port) {
                new_candidates.push(self.candidate(&state, bus_id, other_port));
            } else if !state.port(other_port).ambiguous.contains(&bus_id) {
                state.port_mut(other_port).ambiguous.push(bus_id);
            }
            state.retire_non_unique(other_port);
        }

        // The unassigned port itself: everything possible here was
        // infeasible while the port was bound, so whatever is unique now is
        // newly feasible.
        for bus in state.port(port_id).possible.clone() {
            if state.port(port_id).ambiguous.contains(&bus) {
                continue;
            }
            if state.is_bus_unique(bus, port_id) {
                new_candidates.push(self.candidate(&state, bus, port_id));
            } else {
                state.port_mut(port_id).ambiguous.push(bus);
            }
        }

        new_candidates
    }

    fn assign(&self, bus_id: BusId, actual_port: PortId) -> Vec<Candidate> {
        let mut state = self.state.lock();
        let mut new_candidates = Vec::new();

        for index in 0..state.bus_ports[bus_id].len() {
            let port_id = state.bus_ports[bus_id][index];
            if port_id == actual_port {
                let port = state.port_mut(port_id);
                port.assigned = Some(bus_id);
                port.possible.clear();
                port.ambiguous.clear();
            } else {
                // Possibly already removed by an earlier assignment.
                let port = state.port_mut(port_id);
                if let Some(position) = port.possible.iter().position(|&bus| bus == bus_id) {
                    port.possible.remove(position);
                }

                // Removing a bus can make previously ambiguous ones unique.
                let ambiguous = state.port(port_id).ambiguous.clone();
                for ambiguous_bus in ambiguous {
                    if state.is_bus_unique(ambiguous_bus, port_id) {
                        state
                            .port_mut(port_id)
                            .ambiguous
                            .retain(|&bus| bus != ambiguous_bus);
                        new_candidates.push(self.candidate(&state, ambiguous_bus, port_id));
                    }
                }
            }
        }

        new_candidates
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        let state = self.state.lock();
        let mut assigned_ports_by_bus = std::collections::HashMap::new();
        for (port_id, port) in state.ports.iter().enumerate() {
            for bus in &port.ambiguous {
                assert!(
                    port.possible.contains(bus),
                    "ambiguous bus {bus} not possible on port {port_id}"
                );
            }
            if let Some(bus) = port.assigned {
                let previous = assigned_ports_by_bus.insert(bus, port_id);
                assert!(
                    previous.is_none(),
                    "bus {bus} assigned to two ports ({previous:?} and {port_id})"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Parity;
    use crate::registers::{RegisterRange, RegisterSet};
    use std::time::Duration;

    // (device id, slave id, holding ranges, input ranges)
    type DeviceSpec<'a> = (&'a str, u8, &'a [(i32, i32)], &'a [(i32, i32)]);

    fn register_set(ranges: &[(i32, i32)]) -> RegisterSet {
        let ranges: Vec<_> = ranges
            .iter()
            .map(|&(begin, end)| RegisterRange::new(begin, end))
            .collect();
        RegisterSet::new(&ranges)
    }

    fn device(spec: &DeviceSpec) -> Arc<DeviceConfig> {
        let holding = register_set(spec.2);
        let input = register_set(spec.3);
        Arc::new(DeviceConfig {
            id: spec.0.to_string(),
            name: spec.0.to_string(),
            description: String::new(),
            slave_id: spec.1,
            burst_size: 1,
            max_retries: 3,
            retry_delay: Duration::ZERO,
            readable_registers: holding.union(&input),
            holding_registers: holding,
            input_registers: input,
            root: crate::config::Group {
                name: spec.0.to_string(),
                description: String::new(),
                readables: Vec::new(),
                subgroups: Vec::new(),
            },
        })
    }

    fn bus(ports: &[&str], devices: &[DeviceSpec]) -> Arc<BusConfig> {
        let devices: Vec<_> = devices.iter().map(device).collect();
        Arc::new(BusConfig {
            possible_serial_ports: ports.iter().map(|port| port.to_string()).collect(),
            baud: 9600,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: 1,
            inter_device_delay: Duration::ZERO,
            label: BusConfig::label_of_devices(&devices),
            devices,
        })
    }

    // Candidates identified by (some device id on the bus, port name).
    fn find<'a>(candidates: &'a [Candidate], device_id: &str, port: &str) -> &'a Candidate {
        candidates
            .iter()
            .find(|candidate| {
                candidate.port_name() == port
                    && candidate
                        .bus()
                        .devices
                        .iter()
                        .any(|device| device.id == device_id)
            })
            .unwrap_or_else(|| panic!("no candidate {device_id} @ {port}"))
    }

    fn expect(candidates: &[Candidate], expected: &[(&str, &str)]) {
        assert_eq!(
            candidates.len(),
            expected.len(),
            "candidate count mismatch: {candidates:?}"
        );
        for (device_id, port) in expected {
            assert!(
                find(candidates, device_id, port).still_feasible(),
                "{device_id} @ {port} must be feasible at emission"
            );
        }
    }

    fn feasibilities(candidates: &[Candidate]) -> Vec<bool> {
        candidates.iter().map(Candidate::still_feasible).collect()
    }

    #[test]
    fn single_bus_single_port() {
        let plan = PortFinderPlan::new();
        let candidates = plan.add_buses(&[bus(&["p1"], &[("device 1", 1, &[(1, 1)], &[])])]);
        expect(&candidates, &[("device 1", "p1")]);

        let more = candidates[0].confirm();
        assert!(more.is_empty());
        assert!(!candidates[0].still_feasible());
        plan.assert_invariants();
    }

    /*
      Even though each bus alone would explain the port, there must be no
      candidate: buses are allowed to be unplugged, so nothing could prove
      which of the two is answering.
    */
    #[test]
    fn two_indistinguishable_buses_single_port() {
        let plan = PortFinderPlan::new();
        let candidates = plan.add_buses(&[
            bus(&["p1"], &[("device 1", 1, &[(1, 1)], &[])]),
            bus(&["p1"], &[("device 2", 1, &[(1, 1)], &[])]),
        ]);
        assert!(candidates.is_empty());
        plan.assert_invariants();
    }

    #[test]
    fn single_bus_multiple_ports() {
        let plan = PortFinderPlan::new();
        let candidates =
            plan.add_buses(&[bus(&["p1", "p2", "p3"], &[("device 1", 1, &[(1, 1)], &[])])]);
        expect(
            &candidates,
            &[("device 1", "p1"), ("device 1", "p2"), ("device 1", "p3")],
        );

        let more = find(&candidates, "device 1", "p2").confirm();
        assert!(more.is_empty());
        assert_eq!(feasibilities(&candidates), vec![false, false, false]);
    }

    #[test]
    fn two_buses_disjoint_ports_stay_independent() {
        let plan = PortFinderPlan::new();
        let candidates = plan.add_buses(&[
            bus(&["p1", "p2"], &[("device 1", 1, &[(1, 1)], &[])]),
            bus(&["p3", "p4"], &[("device 2", 2, &[(1, 1)], &[])]),
        ]);
        assert_eq!(candidates.len(), 4);

        find(&candidates, "device 2", "p4").confirm();
        assert!(find(&candidates, "device 1", "p1").still_feasible());
        assert!(find(&candidates, "device 1", "p2").still_feasible());
        assert!(!find(&candidates, "device 2", "p3").still_feasible());

        find(&candidates, "device 1", "p1").confirm();
        assert_eq!(feasibilities(&candidates), vec![false; 4]);
    }

    #[test]
    fn two_buses_unique_slave_id() {
        let plan = PortFinderPlan::new();
        let candidates = plan.add_buses(&[
            bus(&["p1", "p2", "p3"], &[("device 1", 1, &[(1, 1)], &[])]),
            bus(&["p1", "p2", "p3"], &[("device 2", 2, &[(1, 1)], &[])]),
        ]);
        assert_eq!(candidates.len(), 6);

        find(&candidates, "device 2", "p2").confirm();
        assert!(find(&candidates, "device 1", "p1").still_feasible());
        assert!(!find(&candidates, "device 1", "p2").still_feasible());
        assert!(find(&candidates, "device 1", "p3").still_feasible());
        assert!(!find(&candidates, "device 2", "p1").still_feasible());

        find(&candidates, "device 1", "p3").confirm();
        assert_eq!(feasibilities(&candidates), vec![false; 6]);
        plan.assert_invariants();
    }

    #[test]
    fn disjoint_register_sets_distinguish() {
        let plan = PortFinderPlan::new();
        let candidates = plan.add_buses(&[
            bus(&["p1", "p2"], &[("device 1", 1, &[(1, 1)], &[])]),
            bus(&["p1", "p2"], &[("device 2", 1, &[(2, 2)], &[])]),
        ]);
        // Same slave id, disjoint registers: mutually distinguishable.
        assert_eq!(candidates.len(), 4);
    }

    /*
      Register sets distinguish buses with equal slave ids, but only
      asymmetrically when one is a subset of the other.
    */
    #[test]
    fn sub_range_is_one_way_distinguishable() {
        let plan = PortFinderPlan::new();
        let candidates = plan.add_buses(&[
            bus(&["p1", "p2", "p3"], &[("device 1", 1, &[(1, 1)], &[])]),
            bus(&["p1", "p2", "p3"], &[("device 2", 1, &[(1, 2)], &[])]),
        ]);
        // Only the larger bus can prove it is not the smaller one.
        expect(
            &candidates,
            &[("device 2", "p1"), ("device 2", "p2"), ("device 2", "p3")],
        );

        let freed = find(&candidates, "device 2", "p2").confirm();
        expect(&freed, &[("device 1", "p1"), ("device 1", "p3")]);
        assert_eq!(feasibilities(&candidates), vec![false, false, false]);

        find(&freed, "device 1", "p1").confirm();
        assert_eq!(feasibilities(&freed), vec![false, false]);
    }

    /*
      Distinguishability works on the union of the two register sets, so a
      device whose input set mirrors another device's holding set offers no
      distinguishing read.
    */
    #[test]
    fn register_kind_does_not_distinguish() {
        let plan = PortFinderPlan::new();
        let candidates = plan.add_buses(&[
            bus(&["p1", "p2"], &[("device 1", 1, &[(1, 1)], &[])]),
            bus(&["p1", "p2"], &[("device 2", 1, &[], &[(1, 1)])]),
        ]);
        assert!(candidates.is_empty());
    }

    #[test]
    fn common_generalization() {
        let plan = PortFinderPlan::new();
        let ports = ["p1", "p2", "p3"];
        let candidates = plan.add_buses(&[
            bus(&ports, &[("base 1", 1, &[(1, 1)], &[])]),
            bus(&ports, &[("base 2", 2, &[(1, 1)], &[])]),
            bus(
                &ports,
                &[
                    ("generalization 1", 1, &[(1, 1)], &[]),
                    ("generalization 2", 2, &[(1, 1)], &[]),
                ],
            ),
        ]);
        // Only the two-device bus is unique anywhere: each base alone lacks
        // one of its devices.
        expect(
            &candidates,
            &[
                ("generalization 1", "p1"),
                ("generalization 1", "p2"),
                ("generalization 1", "p3"),
            ],
        );

        let freed = find(&candidates, "generalization 1", "p2").confirm();
        expect(
            &freed,
            &[
                ("base 1", "p1"),
                ("base 1", "p3"),
                ("base 2", "p1"),
                ("base 2", "p3"),
            ],
        );
        assert_eq!(feasibilities(&candidates), vec![false, false, false]);

        find(&freed, "base 1", "p1").confirm();
        assert!(!find(&freed, "base 2", "p1").still_feasible());
        assert!(find(&freed, "base 2", "p3").still_feasible());

        find(&freed, "base 2", "p3").confirm();
        assert_eq!(feasibilities(&freed), vec![false; 4]);
        plan.assert_invariants();
    }

    #[test]
    fn later_buses_retire_confirmed_uniqueness() {
        let plan = PortFinderPlan::new();
        let ports = ["p1", "p2", "p3"];
        let candidates_1 = plan.add_buses(&[
            bus(&ports, &[("device 1", 1, &[(1, 1)], &[])]),
            bus(&ports, &[("device 2", 1, &[(2, 2)], &[])]),
        ]);
        assert_eq!(candidates_1.len(), 6);

        find(&candidates_1, "device 2", "p2").confirm();

        // A generalization arriving late retires the remaining candidates.
        let candidates_2 = plan.add_buses(&[bus(&ports, &[("device 3", 1, &[(1, 2)], &[])])]);
        expect(&candidates_2, &[("device 3", "p1"), ("device 3", "p3")]);
        assert_eq!(feasibilities(&candidates_1), vec![false; 6]);

        let freed = find(&candidates_2, "device 3", "p3").confirm();
        expect(&freed, &[("device 1", "p1")]);
        assert!(find(&candidates_1, "device 1", "p1").still_feasible());
        plan.assert_invariants();
    }

    #[test]
    fn unassign_one_device_per_bus() {
        let plan = PortFinderPlan::new();
        let ports = ["p1", "p2", "p3"];
        let candidates = plan.add_buses(&[
            bus(&ports, &[("device 1", 1, &[(1, 1)], &[])]),
            bus(&ports, &[("device 2", 2, &[(1, 1)], &[])]),
            bus(&ports, &[("device 3", 3, &[(1, 1)], &[])]),
        ]);
        assert_eq!(candidates.len(), 9);

        find(&candidates, "device 1", "p1").confirm();
        find(&candidates, "device 2", "p2").confirm();
        find(&candidates, "device 3", "p3").confirm();
        assert_eq!(feasibilities(&candidates), vec![false; 9]);

        // Unassigning a port while the others stay bound only frees its own
        // bus.
        let freed_1 = plan.unassign("p1");
        expect(&freed_1, &[("device 1", "p1")]);

        // Unassigning another port frees its bus on every unbound port, and
        // the previously freed bus becomes feasible here too.
        let freed_2 = plan.unassign("p3");
        expect(
            &freed_2,
            &[("device 1", "p3"), ("device 3", "p1"), ("device 3", "p3")],
        );
        assert!(find(&freed_1, "device 1", "p1").still_feasible());

        // Confirm via a fresh candidate.
        find(&freed_2, "device 1", "p3").confirm();
        assert!(!find(&freed_1, "device 1", "p1").still_feasible());
        assert!(find(&freed_2, "device 3", "p1").still_feasible());
        assert!(!find(&freed_2, "device 3", "p3").still_feasible());

        // Confirm via an old candidate that was infeasible in between.
        find(&candidates, "device 3", "p1").confirm();
        assert_eq!(feasibilities(&freed_2), vec![false; 3]);
        plan.assert_invariants();
    }

    #[test]
    fn unassign_multiple_devices_per_bus() {
        let plan = PortFinderPlan::new();
        let ports = ["p1", "p2", "p3"];
        let candidates = plan.add_buses(&[
            bus(
                &ports,
                &[("device 1", 1, &[(1, 1)], &[]), ("device 2", 2, &[(1, 1)], &[])],
            ),
            bus(
                &ports,
                &[("device 3", 3, &[(1, 1)], &[]), ("device 4", 4, &[(1, 1)], &[])],
            ),
        ]);
        assert_eq!(candidates.len(), 6);

        find(&candidates, "device 1", "p1").confirm();
        find(&candidates, "device 3", "p3").confirm();
        assert_eq!(feasibilities(&candidates), vec![false; 6]);

        let freed = plan.unassign("p1");
        expect(&freed, &[("device 1", "p1"), ("device 1", "p2")]);

        find(&freed, "device 1", "p2").confirm();
        assert_eq!(feasibilities(&freed), vec![false, false]);

        let freed = plan.unassign("p3");
        expect(&freed, &[("device 3", "p1"), ("device 3", "p3")]);

        find(&candidates, "device 3", "p1").confirm();
        assert_eq!(feasibilities(&freed), vec![false, false]);
        plan.assert_invariants();
    }

    /*
      Round-trip: confirm followed by unassign restores every feasibility
      that held before, emitting fresh candidates for the pairs the confirm
      had taken away.
    */
    #[test]
    fn unassign_restores_feasibility() {
        let plan = PortFinderPlan::new();
        let candidates = plan.add_buses(&[
            bus(&["p1", "p2"], &[("device 1", 1, &[(1, 1)], &[])]),
            bus(&["p1", "p2"], &[("device 2", 2, &[(1, 1)], &[])]),
        ]);
        let before = feasibilities(&candidates);
        assert_eq!(before, vec![true; 4]);

        find(&candidates, "device 1", "p1").confirm();
        let freed = plan.unassign("p1");
        assert_eq!(feasibilities(&candidates), before);
        expect(
            &freed,
            &[("device 1", "p1"), ("device 1", "p2"), ("device 2", "p1")],
        );
        plan.assert_invariants();
    }

    #[test]
    fn unassign_unknown_or_unassigned_port_is_a_no_op() {
        let plan = PortFinderPlan::new();
        assert!(plan.unassign("nowhere").is_empty());
        plan.add_buses(&[bus(&["p1"], &[("device 1", 1, &[(1, 1)], &[])])]);
        assert!(plan.unassign("p1").is_empty());
    }

    #[test]
    fn exhaustive_confirmation_leaves_nothing_feasible() {
        let plan = PortFinderPlan::new();
        let ports = ["p1", "p2"];
        let mut pending = plan.add_buses(&[
            bus(&ports, &[("device 1", 1, &[(1, 1)], &[])]),
            bus(&ports, &[("device 2", 2, &[(1, 1)], &[])]),
        ]);
        let all: Vec<Candidate> = pending.clone();

        // Confirm feasible candidates in whatever order they surface.
        while let Some(candidate) = pending.pop() {
            if candidate.still_feasible() {
                pending.extend(candidate.confirm());
            }
        }

        assert!(all.iter().all(|candidate| !candidate.still_feasible()));
        plan.assert_invariants();
    }
}
