//! Cache line method catalogue.
//!
//! Each method is one *unit* of work against the worker's own byte plus
//! the oracle predicting that byte after `n` units.  The burst runner
//! repeats the unit and checks the prediction after every unit; a unit
//! may also fail on its own when it reads back a byte it just stored.
//!
//! | Method      | Unit                                              | After `n` units   |
//! |-------------|---------------------------------------------------|-------------------|
//! | `adjacent`  | 7 × (inc own, read neighbour, barrier)            | `v0 + 7n`         |
//! | `atomicinc` | 7 × locked inc own                                | `v0 + 7n`         |
//! | `bits`      | write walking bit, then its complement, check each | `!(1 << (n-1)&7)` |
//! | `copy`      | 8 × own = neighbour                               | last copied value |
//! | `inc`       | 7 × (inc own, barrier)                            | `v0 + 7n`         |
//! | `mix`       | write seed, inc/rotl/rotr own, seed += 1          | `seed0 + n`       |
//! | `rdfwd64`   | inc own, read line words forwards                 | `v0 + n`          |
//! | `rdints`    | inc own, read 2/4/8/16-byte words containing own  | `v0 + n`          |
//! | `rdrev64`   | inc own, read line words backwards                | `v0 + n`          |
//! | `rdwr`      | 16 × (read own, write it back, barrier)           | `v0`              |

use hwstrain_core::{Baseline, MethodRegistry, Oracle, StepFn, StressError};

use crate::view::{barrier, LineView};
use crate::STRESSOR;

/// Initial value of the `mix` seed, per worker.
pub const MIX_SEED: u8 = 0xa5;

/// Per-unit state threaded through a burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitState {
    /// Zero-based unit index within the burst.
    pub index: u32,
    /// Harness-owned seed; carried across bursts.
    pub seed: u8,
    /// Last value copied into the owned byte.
    pub transferred: u8,
}

/// Owned byte read back inside a unit differed from what the unit stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteMismatch {
    pub expected: u8,
    pub observed: u8,
}

/// One unit of a method's operation sequence.
pub type UnitFn = fn(&LineView<'_>, &mut UnitState) -> Result<(), ByteMismatch>;

/// Check the owned byte still holds `expected`.
#[inline(always)]
fn expect_own(view: &LineView<'_>, expected: u8) -> Result<(), ByteMismatch> {
    let observed = view.read_own();
    if observed == expected {
        Ok(())
    } else {
        Err(ByteMismatch { expected, observed })
    }
}

/// A cache line method: unit of work plus oracle.
#[derive(Clone, Copy)]
pub struct CachelineOp {
    pub unit: UnitFn,
    pub oracle: Oracle,
}

impl CachelineOp {
    pub const fn new(unit: UnitFn, oracle: Oracle) -> Self {
        Self { unit, oracle }
    }
}

/// Build the catalogue in registration order.
pub fn registry() -> Result<MethodRegistry<CachelineOp>, StressError> {
    let plus_seven = Oracle::on_target(StepFn::Add(7));
    let plus_one = Oracle::on_target(StepFn::Add(1));

    let mut r = MethodRegistry::new(STRESSOR);
    r.register("adjacent", CachelineOp::new(adjacent, plus_seven))?;
    r.register("atomicinc", CachelineOp::new(atomicinc, plus_seven))?;
    r.register(
        "bits",
        CachelineOp::new(bits, Oracle::on_target(StepFn::InvertedWalkingBit)),
    )?;
    r.register(
        "copy",
        CachelineOp::new(copy, Oracle::new(Baseline::LastTransferred, StepFn::Identity)),
    )?;
    r.register("inc", CachelineOp::new(inc, plus_seven))?;
    r.register(
        "mix",
        CachelineOp::new(mix, Oracle::new(Baseline::Seed, StepFn::Add(1))),
    )?;
    r.register("rdfwd64", CachelineOp::new(rdfwd64, plus_one))?;
    r.register("rdints", CachelineOp::new(rdints, plus_one))?;
    r.register("rdrev64", CachelineOp::new(rdrev64, plus_one))?;
    r.register(
        "rdwr",
        CachelineOp::new(rdwr, Oracle::on_target(StepFn::Identity)),
    )?;
    Ok(r)
}

// ── Methods ─────────────────────────────────────────────────────

fn adjacent(view: &LineView<'_>, _: &mut UnitState) -> Result<(), ByteMismatch> {
    for _ in 0..7 {
        view.inc_own();
        std::hint::black_box(view.read_neighbour());
        barrier();
    }
    Ok(())
}

fn atomicinc(view: &LineView<'_>, _: &mut UnitState) -> Result<(), ByteMismatch> {
    for _ in 0..7 {
        view.atomic_inc_own();
    }
    Ok(())
}

fn bits(view: &LineView<'_>, st: &mut UnitState) -> Result<(), ByteMismatch> {
    std::hint::black_box(view.read_own());
    let bit = 1u8 << (st.index & 7);
    view.write_own(bit);
    barrier();
    expect_own(view, bit)?;
    view.write_own(!bit);
    barrier();
    expect_own(view, !bit)
}

fn copy(view: &LineView<'_>, st: &mut UnitState) -> Result<(), ByteMismatch> {
    for _ in 0..8 {
        let v = view.read_neighbour();
        view.write_own(v);
        st.transferred = v;
    }
    Ok(())
}

fn inc(view: &LineView<'_>, _: &mut UnitState) -> Result<(), ByteMismatch> {
    for _ in 0..7 {
        view.inc_own();
        barrier();
    }
    Ok(())
}

fn mix(view: &LineView<'_>, st: &mut UnitState) -> Result<(), ByteMismatch> {
    view.write_own(st.seed);
    view.inc_own();
    barrier();
    view.write_own(view.read_own().rotate_left(1));
    barrier();
    view.write_own(view.read_own().rotate_right(1));
    barrier();
    st.seed = st.seed.wrapping_add(1);
    Ok(())
}

fn rdfwd64(view: &LineView<'_>, _: &mut UnitState) -> Result<(), ByteMismatch> {
    view.inc_own();
    for w in 0..view.words_per_line() {
        std::hint::black_box(view.read_line_word(w));
        barrier();
    }
    Ok(())
}

fn rdints(view: &LineView<'_>, _: &mut UnitState) -> Result<(), ByteMismatch> {
    view.inc_own();
    barrier();
    std::hint::black_box(view.read_containing::<u16>());
    barrier();
    std::hint::black_box(view.read_containing::<u32>());
    barrier();
    std::hint::black_box(view.read_containing::<u64>());
    barrier();
    std::hint::black_box(view.read_containing::<u128>());
    barrier();
    Ok(())
}

fn rdrev64(view: &LineView<'_>, _: &mut UnitState) -> Result<(), ByteMismatch> {
    view.inc_own();
    for w in (0..view.words_per_line()).rev() {
        std::hint::black_box(view.read_line_word(w));
        barrier();
    }
    Ok(())
}

fn rdwr(view: &LineView<'_>, _: &mut UnitState) -> Result<(), ByteMismatch> {
    for _ in 0..16 {
        let v = view.read_own();
        view.write_own(v);
        barrier();
    }
    Ok(())
}
