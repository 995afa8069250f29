//! Fault-tolerant execution engine.
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            ▼                              │
//! Idle ──→ Executing ──trap──→ Recovering ──┘   (method disabled for good)
//!            │
//!            ├── stop / budget ──→ Exhausted
//!            └── nothing enabled ──→ DisabledAll (soft skip)
//! ```
//!
//! Each burst runs in a checkpointed burst process (see [`crate::checkpoint`]).
//! A trapped fault never reaches the orchestrator: the faulting method is
//! disabled, the skip is reported, and execution continues with whatever
//! is still enabled.

use hwstrain_core::{
    Completion, CorrectnessFailure, MappedRegion, MethodId, MethodRegistry, RunControl, Selection,
    StressError, ALL_METHOD,
};
use log::{debug, error, info, warn};

use crate::checkpoint::{BurstRecord, Checkpoint, CheckpointPage, Resumed};
use crate::context::{signal_name, FaultContext, SimulatedFault};
use crate::methods::{self, run_burst, MisalignedOp, BURST_UNITS, SLOT_SPAN};
use crate::view::TargetView;
use crate::STRESSOR;

/// Misaligned engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MisalignedConfig {
    /// Method name, or `all`.
    pub method: String,
    /// Instance ordinal; only instance 0 reports skips and coverage.
    pub instance: usize,
    /// Raise a fault before a method runs, to exercise recovery.
    pub simulated_fault: Option<SimulatedFault>,
}

impl Default for MisalignedConfig {
    fn default() -> Self {
        Self {
            method: ALL_METHOD.to_string(),
            instance: 0,
            simulated_fault: None,
        }
    }
}

/// Engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Executing,
    Recovering,
    /// Stopped by the run control.
    Exhausted,
    /// Nothing left that may run.
    DisabledAll,
}

impl EngineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EngineState::Exhausted | EngineState::DisabledAll)
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MisalignedReport {
    pub method: &'static str,
    pub bogo_ops: u64,
    pub exercised: Vec<&'static str>,
    /// Disabled or never exercised.
    pub skipped: Vec<&'static str>,
    pub state: EngineState,
    pub completion: Completion,
}

/// Single-worker fault-tolerant engine.
pub struct MisalignedEngine {
    registry: MethodRegistry<MisalignedOp>,
    selection: Selection,
    /// Method to fault on, resolved once.
    inject: Option<(MethodId, libc::c_int)>,
    instance: usize,
    target: MappedRegion,
    checkpoint: Checkpoint,
    context: FaultContext,
    state: EngineState,
}

impl MisalignedEngine {
    /// Resolve the method and map the target page.  Fails on unknown names.
    pub fn new(config: &MisalignedConfig) -> Result<Self, StressError> {
        Self::with_registry(config, methods::registry()?)
    }

    /// Build against an explicit registry.
    pub fn with_registry(
        config: &MisalignedConfig,
        registry: MethodRegistry<MisalignedOp>,
    ) -> Result<Self, StressError> {
        let selection = registry.resolve(&config.method)?;
        let inject = match &config.simulated_fault {
            Some(fault) => match registry.resolve(&fault.method)? {
                Selection::Single(id) => Some((id, fault.signal)),
                Selection::All => {
                    return Err(StressError::AggregateNotAllowed {
                        stressor: STRESSOR,
                        name: fault.method.clone(),
                    })
                }
            },
            None => None,
        };
        debug_assert!(registry.len() <= 64);

        let target = MappedRegion::private(SLOT_SPAN + 1, "misaligned target page")?;
        let checkpoint = Checkpoint::new()?;

        Ok(Self {
            registry,
            selection,
            inject,
            instance: config.instance,
            target,
            checkpoint,
            context: FaultContext::default(),
            state: EngineState::Idle,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn registry(&self) -> &MethodRegistry<MisalignedOp> {
        &self.registry
    }

    /// What the interception path recorded last.
    pub fn fault_context(&self) -> FaultContext {
        self.context
    }

    fn method_name(&self) -> &'static str {
        self.registry.selection_name(self.selection)
    }

    /// Run until the control stops us or nothing is left to run.
    pub fn run(&mut self, control: &RunControl) -> Result<MisalignedReport, StressError> {
        self.context.reset();
        debug!("{STRESSOR}.{}: using method '{}'", self.instance, self.method_name());
        self.state = EngineState::Executing;

        while !self.state.is_terminal() {
            if let Err(e) = self.step(control) {
                if let StressError::Correctness(failure) = &e {
                    error!("{STRESSOR}.{}: {failure}", self.instance);
                }
                control.stop();
                return Err(e);
            }
        }

        self.report_exercised();
        let completion = match self.state {
            EngineState::DisabledAll => Completion::Skipped {
                reason: format!(
                    "method '{}' disabled after misalignment faults",
                    self.method_name()
                ),
            },
            _ => Completion::Passed,
        };
        Ok(MisalignedReport {
            method: self.method_name(),
            bogo_ops: control.bogo_ops(),
            exercised: self.registry.exercised_names(),
            skipped: self.registry.skipped_names(),
            state: self.state,
            completion,
        })
    }

    /// One transition out of Executing or Recovering.
    pub fn step(&mut self, control: &RunControl) -> Result<(), StressError> {
        if self.state.is_terminal() {
            return Ok(());
        }
        if self.state == EngineState::Recovering {
            self.state = EngineState::Executing;
        }
        if !control.keep_running() {
            self.state = EngineState::Exhausted;
            return Ok(());
        }
        if !self.registry.is_usable(self.selection) {
            if self.selection == Selection::All {
                self.registry.disable_aggregate();
            }
            self.state = EngineState::DisabledAll;
            return Ok(());
        }

        let record = match self.guarded_pass(control)? {
            Some(record) => record,
            None => {
                self.state = EngineState::Exhausted;
                return Ok(());
            }
        };

        for index in record.exercised_indices() {
            if let Some(id) = self.registry.id_at(index) {
                self.registry.mark_exercised(id);
            }
        }
        self.context = FaultContext {
            current_method: record.current_method.and_then(|i| self.registry.id_at(i)),
            last_signal: record.last_signal,
        };

        match record.resumed {
            Resumed::Completed => control.inc_counter(),
            Resumed::Trapped => self.recover(),
            Resumed::Mismatch {
                offset,
                width,
                expected,
                observed,
            } => {
                let method = self
                    .context
                    .current_method
                    .map_or(self.method_name(), |id| self.registry.get(id).name());
                return Err(CorrectnessFailure {
                    method,
                    offset,
                    width,
                    expected,
                    observed,
                }
                .into());
            }
            Resumed::Interrupted(sig) => {
                warn!(
                    "{STRESSOR}.{}: burst process killed by {}",
                    self.instance,
                    signal_name(sig)
                );
                self.state = EngineState::Exhausted;
            }
        }
        Ok(())
    }

    /// Disable the method that trapped.
    fn recover(&mut self) {
        self.state = EngineState::Recovering;
        let id = match (self.context.current_method, self.selection) {
            (Some(id), _) => id,
            (None, Selection::Single(id)) => id,
            // Trapped before any sub-method started: nothing to blame.
            (None, Selection::All) => {
                self.registry.disable_aggregate();
                return;
            }
        };
        if self.instance == 0 {
            info!(
                "{STRESSOR}.{}: skipping method {}, misaligned operations tripped {}",
                self.instance,
                self.registry.get(id).name(),
                self.context.cause()
            );
        }
        self.registry.disable(id);
    }

    /// One burst of the selection inside a burst process.
    fn guarded_pass(&self, control: &RunControl) -> Result<Option<BurstRecord>, StressError> {
        let view = TargetView::new(&self.target);
        let registry = &self.registry;
        let inject = self.inject;

        let run_one = move |page: &CheckpointPage, id: MethodId| -> Result<(), CorrectnessFailure> {
            page.enter(id);
            if let Some((target, sig)) = inject {
                if target == id {
                    // SAFETY: raise is async-signal-safe.
                    unsafe { libc::raise(sig) };
                }
            }
            let m = registry.get(id);
            run_burst(m.name(), m.op(), &view, BURST_UNITS)?;
            page.mark_exercised(id);
            Ok(())
        };

        self.checkpoint.guarded_burst(control, |page| match self.selection {
            Selection::Single(id) => run_one(page, id),
            Selection::All => registry
                .run_aggregate(|| control.keep_running(), |id, _| run_one(page, id))
                .map(|_| ()),
        })
    }

    fn report_exercised(&self) {
        if self.instance != 0 {
            return;
        }
        let exercised = self.registry.exercised_names();
        if exercised.is_empty() {
            info!("{STRESSOR}.{}: nothing exercised due to misalignment faults", self.instance);
        } else {
            info!("{STRESSOR}.{}: exercised {}", self.instance, exercised.join(" "));
        }
    }
}

/// Run the misaligned engine until `control` says stop.
pub fn run(config: &MisalignedConfig, control: &RunControl) -> Result<MisalignedReport, StressError> {
    MisalignedEngine::new(config)?.run(control)
}
