//! Primary/secondary workers and the termination handshake.
//!
//! ```text
//! primary (cacheline-pN)                  secondary (cacheline-sN)
//! ──────────────────────                  ────────────────────────
//! spawn secondary ─────────────────────→  loop { burst; verify }
//! loop { burst; verify; count }             until stop or terminate
//!   until stop or notice                  send notice ──────────┐
//! send terminate ──────────────────────→                        │
//! join secondary  ←─────────────────────────────────────────────┘
//! ```
//!
//! Both channels are bounded(1) and carry at most one message, so neither
//! side can block on the other.  Workers check their channel only between
//! bursts.

use std::panic::resume_unwind;
use std::sync::atomic::AtomicU8;
use std::thread::{self, Scope};

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use hwstrain_core::affinity::{migration_target, now_hundredths, try_pin_current_thread};
use hwstrain_core::{CorrectnessFailure, MethodRegistry, RunControl, Selection, StressError};
use log::error;

use crate::burst::{run_burst, BURST_UNITS};
use crate::methods::{CachelineOp, MIX_SEED};
use crate::view::LineView;
use crate::STRESSOR;

/// Which half of an instance pair a worker is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Counts bogo-ops and owns shutdown of the pair.
    Primary,
    Secondary,
}

impl Role {
    pub fn is_primary(self) -> bool {
        self == Role::Primary
    }
}

/// Everything one instance's workers share.
#[derive(Clone, Copy)]
pub struct WorkerContext<'a> {
    pub instance: usize,
    pub registry: &'a MethodRegistry<CachelineOp>,
    pub selection: Selection,
    pub line: &'a [AtomicU8],
    pub line_size: usize,
    pub control: &'a RunControl,
    pub affinity: bool,
    pub cpus: usize,
}

impl<'a> WorkerContext<'a> {
    /// Byte owned by `role`: `2i` for the primary, `2i + 1` for the secondary.
    pub fn offset(&self, role: Role) -> usize {
        2 * self.instance + usize::from(!role.is_primary())
    }

    /// One burst of the selected method, or one pass of the aggregate.
    fn run_selection(&self, view: &LineView<'_>, seed: &mut u8) -> Result<(), CorrectnessFailure> {
        match self.selection {
            Selection::Single(id) => {
                let m = self.registry.get(id);
                run_burst(m.name(), m.op(), view, seed, BURST_UNITS)
            }
            Selection::All => self
                .registry
                .run_aggregate(
                    || self.control.keep_running(),
                    |_, m| run_burst(m.name(), m.op(), view, seed, BURST_UNITS),
                )
                .map(|_| ()),
        }
    }

    /// Burst until the run stops, `peer` signals, or verification fails.
    pub fn worker_loop(&self, role: Role, peer: &Receiver<()>) -> Result<(), CorrectnessFailure> {
        let view = LineView::new(self.line, self.line_size, self.offset(role));
        let mut seed = MIX_SEED;

        while self.control.keep_running() && !signalled(peer) {
            let rc = self.run_selection(&view, &mut seed);
            if role.is_primary() {
                self.control.inc_counter();
            }
            if self.affinity {
                let cpu = migration_target(self.instance, role.is_primary(), now_hundredths(), self.cpus);
                try_pin_current_thread(cpu);
            }
            if let Err(failure) = rc {
                error!("{STRESSOR}.{}: {failure}", self.instance);
                self.control.stop();
                return Err(failure);
            }
        }
        Ok(())
    }
}

/// A message arrived, or the other side is gone.
fn signalled(rx: &Receiver<()>) -> bool {
    !matches!(rx.try_recv(), Err(TryRecvError::Empty))
}

/// Run one instance pair.  Called on the primary's thread.
pub fn run_pair<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    ctx: WorkerContext<'env>,
) -> Result<(), StressError> {
    // secondary → primary: "I have stopped"
    let (notice_tx, notice_rx) = bounded::<()>(1);
    // primary → secondary: "stop now"
    let (terminate_tx, terminate_rx) = bounded::<()>(1);

    let secondary_body = move || {
        let rc = ctx.worker_loop(Role::Secondary, &terminate_rx);
        let _ = notice_tx.try_send(());
        rc
    };

    let spawned = ctx.control.retry_create(|| {
        thread::Builder::new()
            .name(format!("cacheline-s{}", ctx.instance))
            .spawn_scoped(scope, secondary_body.clone())
    });
    // Drop our copies of the channel ends so a dead peer reads as disconnected.
    drop(secondary_body);

    let secondary = match spawned {
        Ok(Some(handle)) => handle,
        Ok(None) => return Ok(()),
        Err(source) => {
            error!("{STRESSOR}.{}: cannot create secondary worker: {source}", ctx.instance);
            return Err(StressError::Resource {
                what: "secondary worker",
                source,
            });
        }
    };

    let primary_rc = ctx.worker_loop(Role::Primary, &notice_rx);
    let _ = terminate_tx.try_send(());
    let secondary_rc = secondary.join().unwrap_or_else(|panic| resume_unwind(panic));

    primary_rc?;
    secondary_rc?;
    Ok(())
}
