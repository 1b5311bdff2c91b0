//! Port detection from the point of view of a single serial port.
//!
//! Each port owns at most one search worker thread. Candidates queue up and
//! the worker cycles through them until one probe succeeds, the queue
//! drains, or the port is stopped. A probe connects a fresh context and
//! issues a one-register read for every readable register of every device
//! on the candidate bus.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use super::plan::Candidate;
use crate::context::{ContextFactory, ModbusContext, RegisterKind};

/// How long to wait between rounds when no candidate port exists. The next
/// round would fail just the same unless hardware is hot-plugged.
pub const HOTPLUG_WAIT_TIME_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchState {
    /// We would be searching, but lack candidates.
    Idle,
    /// A search is about to start but the worker is not yet running.
    WakingUp,
    Searching,
    Found,
    /// `stop` has been called, no new search allowed.
    Stopping,
}

enum TryResult {
    NoPort,
    NotFound,
    Found,
}

/// Invoked at most once per worker lifetime, always from the worker thread,
/// outside the state lock.
pub type SuccessCallback = Arc<dyn Fn(&Candidate) + Send + Sync>;

struct SearchQueue {
    state: SearchState,
    candidates: Vec<Candidate>,
}

struct PortInner {
    name: String,
    factory: ContextFactory,
    on_success: SuccessCallback,
    /*
      Invariants:
      - only these state transitions happen:
        Idle -> WakingUp -> Searching -> Idle, any of those -> Found,
        any -> Stopping; `reset` restarts the cycle at Idle after the
        worker is gone
      - at most one worker runs `search` at a time
    */
    queue: Mutex<SearchQueue>,
}

pub struct Port {
    inner: Arc<PortInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Port {
    pub fn new(name: impl Into<String>, factory: ContextFactory, on_success: SuccessCallback) -> Self {
        let name = name.into();
        log::trace!("Port {name}: state is Idle");
        Self {
            inner: Arc::new(PortInner {
                name,
                factory,
                on_success,
                queue: Mutex::new(SearchQueue {
                    state: SearchState::Idle,
                    candidates: Vec::new(),
                }),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queues a candidate, waking the worker when necessary. May briefly
    /// block to join a worker that is winding down.
    pub fn add_candidate(&self, candidate: Candidate) {
        log::debug!(
            "Port {}: adding candidate {}",
            self.inner.name,
            candidate.bus().label
        );
        let wake_up = {
            let mut queue = self.inner.queue.lock();
            match queue.state {
                SearchState::Idle => {
                    queue.candidates.clear();
                    queue.candidates.push(candidate);
                    queue.state = SearchState::WakingUp;
                    log::trace!("Port {}: state is WakingUp", self.inner.name);
                    true
                }
                SearchState::WakingUp | SearchState::Searching => {
                    queue.candidates.insert(0, candidate);
                    false
                }
                SearchState::Found | SearchState::Stopping => false,
            }
        };
        // The queue lock is released here; only the thread that made the
        // Idle -> WakingUp transition proceeds, so the section below is
        // effectively single-threaded until the worker starts.
        if !wake_up {
            return;
        }

        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            // A previous worker drained its queue and is winding down; wait
            // for it before starting the next one.
            let _ = handle.join();
        }

        let mut queue = self.inner.queue.lock();
        match queue.state {
            SearchState::WakingUp => {
                queue.state = SearchState::Searching;
                log::trace!("Port {}: state is Searching", self.inner.name);
                drop(queue);
                let inner = self.inner.clone();
                *worker = Some(std::thread::spawn(move || inner.search()));
            }
            SearchState::Found | SearchState::Stopping => {}
            state => {
                log::error!(
                    "Port {}: unexpected state {state:?} while waking up",
                    self.inner.name
                );
            }
        }
    }

    /// Terminates the search worker, if any. Terminal.
    pub fn stop(&self) {
        log::trace!("Port {}: stopping", self.inner.name);
        self.stop_worker();
    }

    /// Returns a `Found` port to `Idle` after its bus was cancelled
    /// elsewhere, so new candidates start a fresh search.
    pub fn reset(&self) {
        self.stop_worker();
        let mut queue = self.inner.queue.lock();
        queue.state = SearchState::Idle;
        queue.candidates.clear();
        log::trace!("Port {}: state is Idle", self.inner.name);
    }

    fn stop_worker(&self) {
        {
            let mut queue = self.inner.queue.lock();
            queue.state = SearchState::Stopping;
            log::trace!("Port {}: state is Stopping", self.inner.name);
        }
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            if handle.thread().id() == std::thread::current().id() {
                // Called from the worker itself (a bus failing while its
                // model is built cancels the port from the success
                // callback). The worker observes Stopping and exits right
                // after; joining it here would deadlock.
                return;
            }
            let _ = handle.join();
        }
    }
}

impl PortInner {
    fn search(self: Arc<Self>) {
        // One round visits every queued candidate once. After a round in
        // which every attempt reported a missing port, wait for hot-plug.
        let mut round_remaining = 0usize;
        let mut no_port = true;

        loop {
            let (candidate, rest) = {
                let mut queue = self.queue.lock();
                if queue.state != SearchState::Searching {
                    break;
                }
                if queue.candidates.is_empty() {
                    // Queue drained: back to Idle, worker winds down.
                    queue.state = SearchState::Idle;
                    log::trace!("Port {}: state is Idle", self.name);
                    break;
                }
                (queue.candidates.remove(0), queue.candidates.len())
            };
            if round_remaining == 0 {
                round_remaining = rest + 1;
                no_port = true;
            }

            if candidate.still_feasible() {
                match self.try_candidate(&candidate) {
                    TryResult::NoPort => {
                        self.queue.lock().candidates.push(candidate);
                    }
                    TryResult::NotFound => {
                        no_port = false;
                        self.queue.lock().candidates.push(candidate);
                    }
                    TryResult::Found => {
                        let was_still_searching = {
                            let mut queue = self.queue.lock();
                            if queue.state == SearchState::Searching {
                                queue.state = SearchState::Found;
                                log::trace!("Port {}: state is Found", self.name);
                                true
                            } else {
                                false
                            }
                        };
                        if was_still_searching {
                            (self.on_success)(&candidate);
                        }
                        break;
                    }
                }
            } else {
                log::debug!(
                    "Port {}: {} no longer feasible",
                    self.name,
                    candidate.bus().label
                );
            }

            round_remaining -= 1;
            if round_remaining == 0
                && no_port
                && self.queue.lock().state == SearchState::Searching
            {
                std::thread::sleep(Duration::from_millis(HOTPLUG_WAIT_TIME_MS));
            }
        }
        log::trace!("Port {}: finishing search", self.name);
    }

    fn try_candidate(&self, candidate: &Candidate) -> TryResult {
        let bus = candidate.bus();
        log::debug!("Port {}: trying {}", self.name, bus.label);
        let mut context = match (self.factory)(&self.name, bus) {
            Ok(context) => context,
            Err(error) => {
                log::error!("Port {}: while creating context: {error}", self.name);
                return TryResult::NoPort;
            }
        };
        if let Err(error) = context.connect() {
            log::error!("Port {}: while connecting: {error}", self.name);
            return TryResult::NoPort;
        }
        let found = self.probe_bus(context.as_mut(), bus);
        context.close();
        if found {
            log::debug!("Port {}: {} was successful", self.name, bus.label);
            TryResult::Found
        } else {
            TryResult::NotFound
        }
    }

    // Every readable register of every device must answer a one-register
    // read. Requires a connected context.
    fn probe_bus(&self, context: &mut dyn ModbusContext, bus: &crate::config::BusConfig) -> bool {
        let mut value = [0u16; 1];
        for device in &bus.devices {
            if self.queue.lock().state != SearchState::Searching {
                return false;
            }
            if let Err(error) = context.select_device(device) {
                log::error!(
                    "Port {}: selecting {} failed: {error}",
                    self.name,
                    device.id
                );
                return false;
            }
            for (registers, kind) in [
                (&device.holding_registers, RegisterKind::Holding),
                (&device.input_registers, RegisterKind::Input),
            ] {
                for register in registers.iter() {
                    log::trace!(
                        "Port {}: trying to read {kind} register {register} of {}",
                        self.name,
                        device.id
                    );
                    match context.read_registers(register, kind, 1, &mut value) {
                        Ok(1) => {}
                        Ok(_) => {
                            log::debug!(
                                "Port {}: {kind} register {register} of {} could not be read",
                                self.name,
                                device.id
                            );
                            return false;
                        }
                        Err(error) => {
                            log::debug!(
                                "Port {}: {kind} register {register} of {} could not be read: \
                                 {error}",
                                self.name,
                                device.id
                            );
                            return false;
                        }
                    }
                }
            }
        }
        true
    }
}
