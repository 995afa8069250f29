//! Misaligned memory access exerciser.
//!
//! A single worker hammers odd-offset 16/32/64/128-bit words of a private
//! page with reads, writes, increments and (on x86_64) locked increments.
//! Hardware that refuses a misaligned access raises SIGBUS, SIGILL or
//! SIGSEGV; the engine contains the fault, disables the offending method
//! for the rest of the run, and keeps exercising whatever is left.
//!
//! 1. **[`methods`]** — the method catalogue, slot layout and burst runner
//! 2. **[`view`]** — unaligned load/store/locked-increment primitives
//! 3. **[`checkpoint`]** — burst processes and the fault interception path
//! 4. **[`context`]** — fault context and simulated faults
//! 5. **[`engine`]** — the Idle/Executing/Recovering state machine
//!
//! ```text
//! engine.step() ──fork──→ burst process
//!      ▲                   arm checkpoint page
//!      │                   install SIGBUS/SIGILL/SIGSEGV handlers
//!      │                   for method: enter → burst → verify → mark
//!      │                   _exit(0 | trapped | mismatch)
//!      └──── waitpid ◄─────┘
//!  decode: Completed → count   Trapped → disable + skip
//!          Mismatch → CorrectnessFailure
//! ```

pub mod checkpoint;
pub mod context;
pub mod engine;
pub mod methods;
pub mod view;

/// Stressor name used in diagnostics.
pub const STRESSOR: &str = "misaligned";

pub use context::{FaultContext, SimulatedFault};
pub use engine::{run, EngineState, MisalignedConfig, MisalignedEngine, MisalignedReport};
pub use methods::{registry, MisalignedOp};
