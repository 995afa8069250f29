//! Cache line coherency exerciser.
//!
//! Each instance runs a pair of workers, primary and secondary, that own
//! adjacent bytes (`2i`, `2i + 1`) of one shared cache line and hammer them
//! with a selectable method while reading each other's byte.  Every unit of
//! work is checked against a closed-form oracle, so a coherency defect shows
//! up as a [`CorrectnessFailure`](hwstrain_core::CorrectnessFailure) naming
//! the method, offset, expected and observed byte.
//!
//! 1. **[`methods`]** — the method catalogue and its oracles
//! 2. **[`view`]** — the unsafe offset view over the shared line
//! 3. **[`burst`]** — run one burst of a method and verify it
//! 4. **[`worker`]** — primary/secondary loops and the termination handshake
//! 5. **[`harness`]** — configuration, line discovery, instance setup
//!
//! ```text
//! run(config) ──→ resolve method ──→ probe line size ──→ map shared line
//!                                                            │
//!          ┌─────────────── per instance ────────────────────┘
//!          ▼
//!   cacheline-pN ── spawns ──→ cacheline-sN
//!   burst/verify/count         burst/verify
//!   [migrate CPU]              [migrate CPU]
//! ```

pub mod burst;
pub mod harness;
pub mod methods;
pub mod view;
pub mod worker;

/// Stressor name used in diagnostics.
pub const STRESSOR: &str = "cacheline";

pub use burst::{run_burst, BURST_UNITS};
pub use harness::{coverage_note, run, CachelineConfig, CachelineReport};
pub use methods::{registry, CachelineOp};
