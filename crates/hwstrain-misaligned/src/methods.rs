//! Misaligned method catalogue and burst runner.
//!
//! Every method touches all slots of one width, at odd offsets from the
//! start of the page:
//!
//! | Width   | Slots              |
//! |---------|--------------------|
//! | 16-bit  | 1, 3, 5, … 15      |
//! | 32-bit  | 1, 5, 9, 13        |
//! | 64-bit  | 1, 9               |
//! | 128-bit | 1                  |
//!
//! Slots of one width never overlap, so every slot can be verified
//! independently once the burst completes.
//!
//! On x86_64 the `int*atomic` methods use locked increments.  The 16, 32
//! and 64-bit forms accept misaligned operands; `int128atomic` issues
//! `lock cmpxchg16b` on slot 1, which the processor always refuses with a
//! fault, so that method is disabled on its first pass.

use hwstrain_core::oracle::verify;
use hwstrain_core::{CorrectnessFailure, MethodRegistry, Oracle, StepFn, StressError};

use crate::view::{barrier, TargetView, Word};
use crate::STRESSOR;

/// Units per burst.
pub const BURST_UNITS: u32 = 65_535;

/// First slot offset; every slot is odd-aligned from here.
const FIRST_SLOT: usize = 1;

/// Bytes spanned by the slots of any width.
pub const SLOT_SPAN: usize = 16;

/// Access width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W16,
    W32,
    W64,
    W128,
}

impl Width {
    pub fn bytes(self) -> usize {
        match self {
            Width::W16 => 2,
            Width::W32 => 4,
            Width::W64 => 8,
            Width::W128 => 16,
        }
    }

    /// Byte offsets of this width's slots.
    pub fn slots(self) -> impl Iterator<Item = usize> {
        let step = self.bytes();
        (0..SLOT_SPAN / step).map(move |k| FIRST_SLOT + k * step)
    }
}

/// What one unit does to every slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    /// Store the 1-based unit number.
    Write,
    Increment,
    /// Locked read-modify-write increment.
    #[cfg(target_arch = "x86_64")]
    Atomic,
}

/// A misaligned method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MisalignedOp {
    pub width: Width,
    pub access: Access,
    pub oracle: Oracle,
}

impl MisalignedOp {
    pub fn new(width: Width, access: Access) -> Self {
        let step = match access {
            Access::Read => StepFn::Identity,
            Access::Write => StepFn::UnitCount,
            Access::Increment => StepFn::Add(1),
            #[cfg(target_arch = "x86_64")]
            Access::Atomic => StepFn::Add(1),
        };
        Self {
            width,
            access,
            oracle: Oracle::on_target(step),
        }
    }
}

/// Build the catalogue in registration order.
pub fn registry() -> Result<MethodRegistry<MisalignedOp>, StressError> {
    let mut r = MethodRegistry::new(STRESSOR);
    let table: &[(&'static str, Width, Access)] = &[
        ("int16rd", Width::W16, Access::Read),
        ("int16wr", Width::W16, Access::Write),
        ("int16inc", Width::W16, Access::Increment),
        #[cfg(target_arch = "x86_64")]
        ("int16atomic", Width::W16, Access::Atomic),
        ("int32rd", Width::W32, Access::Read),
        ("int32wr", Width::W32, Access::Write),
        ("int32inc", Width::W32, Access::Increment),
        #[cfg(target_arch = "x86_64")]
        ("int32atomic", Width::W32, Access::Atomic),
        ("int64rd", Width::W64, Access::Read),
        ("int64wr", Width::W64, Access::Write),
        ("int64inc", Width::W64, Access::Increment),
        #[cfg(target_arch = "x86_64")]
        ("int64atomic", Width::W64, Access::Atomic),
        ("int128rd", Width::W128, Access::Read),
        ("int128wr", Width::W128, Access::Write),
        ("int128inc", Width::W128, Access::Increment),
        #[cfg(target_arch = "x86_64")]
        ("int128atomic", Width::W128, Access::Atomic),
    ];
    for &(name, width, access) in table {
        r.register(name, MisalignedOp::new(width, access))?;
    }
    Ok(r)
}

/// Run one burst of `op` and verify every slot.
///
/// Performs no allocation and no logging: it runs inside the guarded
/// burst process.
pub fn run_burst(
    name: &'static str,
    op: &MisalignedOp,
    view: &TargetView,
    units: u32,
) -> Result<(), CorrectnessFailure> {
    match op.width {
        Width::W16 => burst::<u16>(name, op, view, units),
        Width::W32 => burst::<u32>(name, op, view, units),
        Width::W64 => burst::<u64>(name, op, view, units),
        Width::W128 => burst::<u128>(name, op, view, units),
    }
}

fn burst<W: Word>(
    name: &'static str,
    op: &MisalignedOp,
    view: &TargetView,
    units: u32,
) -> Result<(), CorrectnessFailure> {
    let mut v0 = [0u128; SLOT_SPAN / 2];
    for (k, off) in op.width.slots().enumerate() {
        v0[k] = view.read::<W>(off).to_u128();
    }

    for unit in 1..=units {
        for off in op.width.slots() {
            match op.access {
                Access::Read => {
                    view.read::<W>(off);
                    // 128-bit loads are already split; no barrier between them.
                    if W::BYTES < 16 {
                        barrier();
                    }
                }
                Access::Write => {
                    view.write::<W>(off, W::truncate(u128::from(unit)));
                    barrier();
                }
                Access::Increment => {
                    let v = view.read::<W>(off);
                    view.write::<W>(off, v.wrapping_inc());
                    barrier();
                }
                #[cfg(target_arch = "x86_64")]
                Access::Atomic => {
                    view.locked_inc::<W>(off);
                    barrier();
                }
            }
        }
    }

    for (k, off) in op.width.slots().enumerate() {
        let expected = op.oracle.expected(v0[k], u64::from(units), W::BYTES);
        let observed = view.read::<W>(off).to_u128();
        verify(name, off, W::BYTES, expected, observed)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwstrain_core::{MappedRegion, Selection};

    fn page() -> Option<MappedRegion> {
        MappedRegion::private(1, "test target")
            .map_err(|e| eprintln!("mmap unavailable: {e}"))
            .ok()
    }

    #[test]
    fn slot_layout() {
        assert_eq!(Width::W16.slots().collect::<Vec<_>>(), vec![1, 3, 5, 7, 9, 11, 13, 15]);
        assert_eq!(Width::W32.slots().collect::<Vec<_>>(), vec![1, 5, 9, 13]);
        assert_eq!(Width::W64.slots().collect::<Vec<_>>(), vec![1, 9]);
        assert_eq!(Width::W128.slots().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn catalogue_order() {
        let names = registry().unwrap().names();
        assert_eq!(names[0], "all");
        assert_eq!(names[1], "int16rd");
        #[cfg(target_arch = "x86_64")]
        {
            assert_eq!(names.last(), Some(&"int128atomic"));
            assert_eq!(names.len(), 17);
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            assert_eq!(names.last(), Some(&"int128inc"));
            assert_eq!(names.len(), 13);
        }
    }

    #[test]
    fn every_method_passes_in_process() {
        let Some(region) = page() else { return };
        let view = TargetView::new(&region);
        let r = registry().unwrap();
        // A locked 128-bit access to an odd address always traps.
        for (_, m) in r.iter().filter(|(_, m)| m.name() != "int128atomic") {
            run_burst(m.name(), m.op(), &view, BURST_UNITS).unwrap_or_else(|f| panic!("{f}"));
        }
    }

    #[test]
    fn write_leaves_last_unit_number() {
        let Some(region) = page() else { return };
        let view = TargetView::new(&region);
        let r = registry().unwrap();
        let Selection::Single(id) = r.resolve("int16wr").unwrap() else {
            unreachable!()
        };
        run_burst("int16wr", r.get(id).op(), &view, BURST_UNITS).unwrap();
        for off in Width::W16.slots() {
            assert_eq!(view.read::<u16>(off), 0xffff);
        }
    }

    #[test]
    fn increment_wraps_per_width() {
        let Some(region) = page() else { return };
        let view = TargetView::new(&region);
        view.write::<u16>(1, 0xfffe);
        let op = MisalignedOp::new(Width::W16, Access::Increment);
        run_burst("int16inc", &op, &view, 3).unwrap();
        assert_eq!(view.read::<u16>(1), 1);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn locked_methods_add_one_per_unit() {
        let Some(region) = page() else { return };
        let view = TargetView::new(&region);
        for width in [Width::W16, Width::W32, Width::W64] {
            let op = MisalignedOp::new(width, Access::Atomic);
            run_burst("atomic", &op, &view, 1000).unwrap_or_else(|f| panic!("{f}"));
        }
    }

    #[test]
    fn wrong_oracle_is_caught_with_slot_offset() {
        let Some(region) = page() else { return };
        let view = TargetView::new(&region);
        let mut op = MisalignedOp::new(Width::W32, Access::Increment);
        op.oracle = Oracle::on_target(StepFn::Add(2));
        let failure = run_burst("int32inc", &op, &view, 10).unwrap_err();
        assert_eq!(failure.offset, 1);
        assert_eq!(failure.width, 4);
        assert_eq!(failure.expected, failure.observed + 10);
    }
}
