//! Discovery of the physical port behind each configured bus.
//!
//! The [`PortFinder`] owns the combinatorial [`plan`] and one [`port`]
//! search worker per candidate serial port. Confirmed candidates are handed
//! to the owning adapter; failed or vanished buses feed back in through
//! [`PortFinder::unassign`].

pub mod plan;
pub mod port;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::adapter::AdapterCore;
use crate::context::ContextFactory;
use plan::{Candidate, PortFinderPlan};
use port::Port;

pub struct PortFinder {
    owner: Weak<dyn AdapterCore>,
    factory: ContextFactory,
    /// Replaced wholesale on `stop`; candidates of the old plan stay valid
    /// but permanently infeasible.
    plan: Mutex<Arc<PortFinderPlan>>,
    ports: Mutex<HashMap<String, Arc<Port>>>,
    stopping: Mutex<bool>,
    // For the per-port success callbacks.
    weak_self: Weak<PortFinder>,
}

impl PortFinder {
    pub fn new(owner: Weak<dyn AdapterCore>, factory: ContextFactory) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            owner,
            factory,
            plan: Mutex::new(PortFinderPlan::new()),
            ports: Mutex::new(HashMap::new()),
            stopping: Mutex::new(false),
            weak_self: weak_self.clone(),
        })
    }

    /// Adds new buses to the search. The buses must be new to it.
    pub fn add_buses(&self, new_buses: &[Arc<crate::config::BusConfig>]) {
        log::info!("Adding {} buses to the search", new_buses.len());
        let plan = self.plan.lock().clone();
        self.add_candidates(plan.add_buses(new_buses));
    }

    /// Reopens the search for `port` after its confirmed bus failed or
    /// vanished.
    pub fn unassign(&self, port_name: &str) {
        if let Some(port) = self.ports.lock().get(port_name).cloned() {
            port.reset();
        }
        let plan = self.plan.lock().clone();
        self.add_candidates(plan.unassign(port_name));
    }

    /// Stops all search workers and resets the plan.
    pub fn stop(&self) {
        log::trace!("Stopping the port finder");
        *self.stopping.lock() = true;
        let ports: Vec<Arc<Port>> = {
            let mut ports = self.ports.lock();
            ports.drain().map(|(_, port)| port).collect()
        };
        for port in ports {
            port.stop();
        }
        *self.plan.lock() = PortFinderPlan::new();
        *self.stopping.lock() = false;
    }

    fn add_candidates(&self, candidates: Vec<Candidate>) {
        log::debug!("Adding {} candidates", candidates.len());
        if *self.stopping.lock() {
            return;
        }
        for candidate in candidates {
            let port_name = candidate.port_name().to_string();
            let port = {
                let mut ports = self.ports.lock();
                ports
                    .entry(port_name.clone())
                    .or_insert_with(|| {
                        let finder = self.weak_self.clone();
                        Arc::new(Port::new(
                            port_name,
                            self.factory.clone(),
                            Arc::new(move |candidate: &Candidate| {
                                // The callback runs on a search worker; the
                                // finder outlives every worker except
                                // during stop, where the upgrade fails.
                                if let Some(finder) = finder.upgrade() {
                                    finder.confirm_candidate(candidate);
                                }
                            }),
                        ))
                    })
                    .clone()
            };
            port.add_candidate(candidate);
        }
    }

    fn confirm_candidate(&self, candidate: &Candidate) {
        let bus = candidate.bus().clone();
        let port_name = candidate.port_name().to_string();
        log::info!("Found bus {} on port {}", bus.label, port_name);
        let new_candidates = candidate.confirm();
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        match owner.add_bus(bus.clone(), &port_name) {
            Ok(()) => self.add_candidates(new_candidates),
            Err(error) => {
                log::error!(
                    "While adding bus {} on port {}: {error:#}",
                    bus.label,
                    port_name
                );
                // Covers both failure shapes: a connect failure leaves the
                // port assigned and Found, a model-build abort has already
                // cancelled the bus and made this a no-op.
                self.unassign(&port_name);
            }
        }
    }
}
