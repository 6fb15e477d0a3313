//! Discrete-event scheduler driving the materials store.
//!
//! A [`Simulation`] owns the store and a queue of plans ordered by time,
//! FIFO among plans with equal times. Running a plan is one activation:
//! the clock is moved to the plan's time, the plan runs with full access to
//! the simulation, and then every removal announced during the plan is
//! reaped.

use crate::error::MaterialsError;
use crate::manager::MaterialsDataManager;
use crate::state::MaterialsState;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::info;

/// A scheduled continuation.
pub type Plan = Box<dyn FnOnce(&mut Simulation)>;

/// Errors raised when scheduling a plan.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("plan time {0} is not finite")]
    NonFiniteTime(f64),
    #[error("plan time {requested} is before the current time {now}")]
    PastTime { requested: f64, now: f64 },
}

// ---------------------------------------------------------------------------
// Plan queue
// ---------------------------------------------------------------------------

struct ScheduledPlan {
    time: f64,
    seq: u64,
    plan: Plan,
}

impl PartialEq for ScheduledPlan {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledPlan {}

impl PartialOrd for ScheduledPlan {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledPlan {
    // Reversed so the max-heap pops the earliest (time, seq) first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ---------------------------------------------------------------------------
// Run result
// ---------------------------------------------------------------------------

/// Result of a [`Simulation::execute`] call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunResult {
    /// Plans executed.
    pub activations: u64,
    /// Batches and stages reaped at activation boundaries.
    pub reaped: usize,
    /// Whether the run stopped because [`Simulation::halt`] was requested.
    pub halted: bool,
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

pub struct Simulation {
    materials: MaterialsDataManager,
    plans: BinaryHeap<ScheduledPlan>,
    next_seq: u64,
    halt_requested: bool,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("time", &self.time())
            .field("pending_plans", &self.plans.len())
            .field("halt_requested", &self.halt_requested)
            .finish_non_exhaustive()
    }
}

impl Simulation {
    pub fn new(materials: MaterialsDataManager) -> Self {
        Self {
            materials,
            plans: BinaryHeap::new(),
            next_seq: 0,
            halt_requested: false,
        }
    }

    pub fn time(&self) -> f64 {
        self.materials.time()
    }

    pub fn materials(&self) -> &MaterialsDataManager {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut MaterialsDataManager {
        &mut self.materials
    }

    pub fn pending_plans(&self) -> usize {
        self.plans.len()
    }

    /// Schedule `plan` to run at `time`, which may equal the current time.
    pub fn add_plan(
        &mut self,
        time: f64,
        plan: impl FnOnce(&mut Simulation) + 'static,
    ) -> Result<(), PlanError> {
        if !time.is_finite() {
            return Err(PlanError::NonFiniteTime(time));
        }
        let now = self.time();
        if time < now {
            return Err(PlanError::PastTime {
                requested: time,
                now,
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.plans.push(ScheduledPlan {
            time,
            seq,
            plan: Box::new(plan),
        });
        Ok(())
    }

    /// Request that [`Simulation::execute`] stop after the current plan.
    pub fn request_halt(&mut self) {
        self.halt_requested = true;
    }

    /// Run one plan as a full activation. Returns the number of entities
    /// reaped, or `None` when the queue is empty.
    pub fn step(&mut self) -> Option<usize> {
        let ScheduledPlan { time, plan, .. } = self.plans.pop()?;
        self.materials.set_time(time);
        plan(self);
        Some(self.materials.end_activation())
    }

    /// Run plans until the queue drains or a halt is requested.
    pub fn execute(&mut self) -> RunResult {
        info!(time = self.time(), pending = self.plans.len(), "simulation started");
        // Commands issued before the first plan form their own activation.
        let mut result = RunResult {
            reaped: self.materials.end_activation(),
            ..RunResult::default()
        };
        while !self.halt_requested {
            let Some(reaped) = self.step() else {
                break;
            };
            result.activations += 1;
            result.reaped += reaped;
        }
        result.halted = self.halt_requested;
        result
    }

    /// Run every plan scheduled at or before `end_time`.
    pub fn execute_until(&mut self, end_time: f64) -> RunResult {
        let mut result = RunResult {
            reaped: self.materials.end_activation(),
            ..RunResult::default()
        };
        while !self.halt_requested
            && self.plans.peek().is_some_and(|next| next.time <= end_time)
        {
            let Some(reaped) = self.step() else {
                break;
            };
            result.activations += 1;
            result.reaped += reaped;
        }
        result.halted = self.halt_requested;
        result
    }

    /// End the simulation, discarding unexecuted plans, and export the
    /// store.
    pub fn halt(mut self) -> Result<MaterialsState, MaterialsError> {
        self.materials.end_activation();
        let discarded = self.plans.len();
        self.plans.clear();
        info!(time = self.time(), discarded, "simulation halted");
        self.materials.to_state()
    }
}
