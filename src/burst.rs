//! Burst combinatorics.
//!
//! A burst reads several consecutive registers of one kind at once. The
//! semantic register list of a readable is neither consecutive nor bounded
//! by the device's burst limit, so this module compiles it into the
//! fewest (then smallest) bursts and a mapping from task positions to
//! positions in the concatenated read buffer.
//!
//! We distinguish device register numbers (on the wire) from plan register
//! numbers (offsets into the read buffer).

use std::collections::{BTreeMap, BTreeSet};

use crate::config::ConfigError;
use crate::context::RegisterKind;
use crate::registers::{RegisterIndex, RegisterSet};

/// The ordered register list of a single readable.
pub type Task = Vec<RegisterIndex>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Burst {
    /// First device register of the burst.
    pub start_register: RegisterIndex,
    pub kind: RegisterKind,
    /// Number of consecutive registers, on the wire and in the plan alike.
    pub num_registers: usize,
}

/// An optimized burst sequence for one task.
///
/// The first plan register of each burst is the sum of the preceding bursts'
/// `num_registers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstPlan {
    pub bursts: Vec<Burst>,
    /// Sum over `bursts` of `num_registers`.
    pub num_plan_registers: usize,
    /// `task_to_plan[i]` is the plan register holding the value of
    /// `task[i]`. Duplicate task entries share a slot.
    pub task_to_plan: Vec<usize>,
}

// Accumulates one burst at a time during planning.
struct BurstMaker {
    max_burst_size: usize,
    start_register: RegisterIndex,
    burst_size: usize,
    limit: RegisterIndex,
    total_size: usize,
}

impl BurstMaker {
    fn new(max_burst_size: usize) -> Self {
        Self {
            max_burst_size,
            start_register: 0,
            burst_size: 0,
            limit: 0,
            total_size: 0,
        }
    }

    fn start_burst(&mut self, start_register: RegisterIndex) {
        self.start_register = start_register;
        self.burst_size = 0;
        self.limit = start_register + self.max_burst_size as RegisterIndex;
    }

    // Whether the register still fits into the open burst.
    fn add_register(&mut self, next_register: RegisterIndex) -> bool {
        let fits = next_register < self.limit;
        if fits {
            self.burst_size = (next_register - self.start_register) as usize + 1;
        }
        fits
    }

    // Plan number of a register inside the open burst.
    fn plan_number(&self, current_register: RegisterIndex) -> usize {
        self.total_size + (current_register - self.start_register) as usize
    }

    fn finish_burst(&mut self, kind: RegisterKind) -> Burst {
        self.total_size += self.burst_size;
        Burst {
            start_register: self.start_register,
            kind,
            num_registers: self.burst_size,
        }
    }
}

impl BurstPlan {
    /// Compiles `task` against the device's readable sets.
    ///
    /// Fails when a task register is in neither set, or in both (the kind
    /// of a read would be ambiguous).
    pub fn new(
        task: &[RegisterIndex],
        readable_holding_registers: &RegisterSet,
        readable_input_registers: &RegisterSet,
        max_burst_size: usize,
    ) -> Result<Self, ConfigError> {
        debug_assert!(max_burst_size >= 1);

        // reverse_task[kind][r] holds all i with task[i] == r.
        let mut reverse_task: [BTreeMap<RegisterIndex, BTreeSet<usize>>; 2] =
            [BTreeMap::new(), BTreeMap::new()];
        for (index, register) in task.iter().enumerate() {
            let holding = readable_holding_registers.contains(*register);
            let input = readable_input_registers.contains(*register);
            let slot = match (holding, input) {
                (true, false) => 0,
                (false, true) => 1,
                (false, false) => {
                    return Err(ConfigError(format!(
                        "register {register} is in neither readable register set"
                    )))
                }
                (true, true) => {
                    return Err(ConfigError(format!(
                        "register {register} is in both readable register sets"
                    )))
                }
            };
            reverse_task[slot].entry(*register).or_default().insert(index);
        }

        let mut bursts = Vec::new();
        let mut task_to_plan = vec![0usize; task.len()];
        let mut maker = BurstMaker::new(max_burst_size);

        for (slot, kind) in [(0, RegisterKind::Holding), (1, RegisterKind::Input)] {
            let mut registers = reverse_task[slot].iter().peekable();
            let Some((&first, _)) = registers.peek() else {
                continue;
            };
            maker.start_burst(first);
            while let Some((&register, indices)) = registers.peek() {
                if maker.add_register(register) {
                    let plan_number = maker.plan_number(register);
                    for &index in indices.iter() {
                        task_to_plan[index] = plan_number;
                    }
                    registers.next();
                } else {
                    bursts.push(maker.finish_burst(kind));
                    maker.start_burst(register);
                }
            }
            bursts.push(maker.finish_burst(kind));
        }

        Ok(Self {
            bursts,
            num_plan_registers: maker.total_size,
            task_to_plan,
        })
    }
}

/// A [`BurstPlan`] bundled with the scratch buffers needed for operation.
#[derive(Debug)]
pub struct BurstBuffer {
    pub plan: BurstPlan,
    /// Write target for bursts; `plan.num_plan_registers` long.
    pub padded: Vec<u16>,
    /// Gathered through `task_to_plan` and handed to the decoder; as long as
    /// the task.
    pub compact: Vec<u16>,
}

impl BurstBuffer {
    pub fn new(
        task: &[RegisterIndex],
        readable_holding_registers: &RegisterSet,
        readable_input_registers: &RegisterSet,
        max_burst_size: usize,
    ) -> Result<Self, ConfigError> {
        let plan = BurstPlan::new(
            task,
            readable_holding_registers,
            readable_input_registers,
            max_burst_size,
        )?;
        Ok(Self {
            padded: vec![0; plan.num_plan_registers],
            compact: vec![0; task.len()],
            plan,
        })
    }

    /// Copies each task value out of the padded buffer.
    pub fn gather(&mut self) {
        for (index, plan_number) in self.plan.task_to_plan.iter().enumerate() {
            self.compact[index] = self.padded[*plan_number];
        }
    }
}
