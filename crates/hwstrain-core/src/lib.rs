//! Shared building blocks for the hwstrain exercisers.
//!
//! Both engines follow the same pattern: a registry of interchangeable
//! stress methods, a burst loop that hammers a memory region, and a
//! closed-form oracle that predicts what the region must contain once the
//! burst is over.  This crate holds the pieces that pattern is made of:
//!
//! 1. **[`registry`]** — ordered table of named methods with the reserved
//!    `all` aggregate and run-scoped `enabled`/`exercised` flags
//! 2. **[`oracle`]** — closed-form step functions and the observation check
//!    that turns a mismatch into a [`CorrectnessFailure`]
//! 3. **[`control`]** — keep-running predicate, op budget and bogo-op counter
//! 4. **[`platform`]** — cache line size / processor count discovery with
//!    safe defaults, plus best-effort CPU affinity in [`affinity`]
//! 5. **[`region`]** — anonymous memory mappings backing the targets
//!
//! # Architecture
//!
//! ```text
//! Orchestrator            Engine worker                  Core
//! ────────────            ─────────────                  ────
//! RunControl ─────────→   keep_running()? ─────────→  control
//!                         registry.resolve(name) ──→  registry
//!                         burst(view, n) ──────────→  region (unsafe view)
//!                         oracle.expected(v0, n) ──→  oracle
//!                         check(observation) ──────→  CorrectnessFailure
//! ```

pub mod affinity;
pub mod control;
pub mod error;
pub mod oracle;
pub mod platform;
pub mod region;
pub mod registry;

pub use control::RunControl;
pub use error::{Completion, CorrectnessFailure, StressError};
pub use oracle::{Baseline, Oracle, StepFn};
pub use platform::{FixedProbe, HostProbe, PlatformProbe};
pub use region::MappedRegion;
pub use registry::{AggregatePass, MethodId, MethodRegistry, Selection, StressMethod, ALL_METHOD};
