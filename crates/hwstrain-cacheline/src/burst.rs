//! Burst runner: repeat one method's unit and verify after every unit.

use hwstrain_core::oracle::verify;
use hwstrain_core::{Baseline, CorrectnessFailure};

use crate::methods::{CachelineOp, UnitState};
use crate::view::LineView;

/// Units per burst.
pub const BURST_UNITS: u32 = 1024;

/// Run `units` units of `op` against the view's own byte.
///
/// `seed` is the worker's harness-owned seed; it is read at the start of
/// the burst and written back at the end, so it threads across bursts.
pub fn run_burst(
    name: &'static str,
    op: &CachelineOp,
    view: &LineView<'_>,
    seed: &mut u8,
    units: u32,
) -> Result<(), CorrectnessFailure> {
    let v0 = view.read_own();
    let seed0 = *seed;
    let mut st = UnitState {
        index: 0,
        seed: seed0,
        transferred: v0,
    };

    for i in 0..units {
        st.index = i;
        if let Err(m) = (op.unit)(view, &mut st) {
            *seed = st.seed;
            return Err(CorrectnessFailure {
                method: name,
                offset: view.own_offset(),
                width: 1,
                expected: u128::from(m.expected),
                observed: u128::from(m.observed),
            });
        }

        let base = match op.oracle.baseline {
            Baseline::Target => v0,
            Baseline::Seed => seed0,
            Baseline::LastTransferred => st.transferred,
        };
        let expected = op.oracle.expected(u128::from(base), u64::from(i) + 1, 1);
        let observed = u128::from(view.read_own());
        if let Err(failure) = verify(name, view.own_offset(), 1, expected, observed) {
            *seed = st.seed;
            return Err(failure);
        }
    }
    *seed = st.seed;
    Ok(())
}
