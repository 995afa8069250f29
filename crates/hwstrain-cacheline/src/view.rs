//! Unsafe offset view over the shared cache line region.
//!
//! The region is viewed as `[AtomicU8]`: each worker owns one byte and
//! stores only to that byte, while reading its neighbour and whole-line
//! words freely.  Byte and word accesses are `Relaxed` atomics (plain loads and
//! stores on every supported target) and ordering comes only from the
//! explicit [`barrier`] calls the methods make.  A non-atomic
//! read-modify-write on the owned byte is intentional: coherency is the
//! property under test, not software synchronization.

use std::mem::size_of;
use std::sync::atomic::{fence, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};

use hwstrain_core::MappedRegion;

/// Full memory barrier placed after each discrete access.
#[inline(always)]
pub fn barrier() {
    fence(Ordering::SeqCst);
}

/// View a mapping as shared bytes.
pub fn shared_bytes(region: &MappedRegion) -> &[AtomicU8] {
    // SAFETY: AtomicU8 has the layout of u8, the mapping is len() readable
    // and writable bytes, and it outlives the returned borrow.
    unsafe { std::slice::from_raw_parts(region.as_ptr().cast::<AtomicU8>(), region.len()) }
}

/// One worker's window onto the shared line.
#[derive(Clone, Copy)]
pub struct LineView<'a> {
    bytes: &'a [AtomicU8],
    line_size: usize,
    own: usize,
}

impl<'a> LineView<'a> {
    /// View owning byte `own` of `bytes`.
    ///
    /// `line_size` is a power of two of at least 16, `bytes.len()` is a
    /// multiple of it, and `own` is in bounds.  The harness sizes the region
    /// to guarantee all three.
    pub fn new(bytes: &'a [AtomicU8], line_size: usize, own: usize) -> Self {
        debug_assert!(line_size.is_power_of_two() && line_size >= 16);
        debug_assert!(bytes.len() % line_size == 0);
        debug_assert!(own < bytes.len());
        Self {
            bytes,
            line_size,
            own,
        }
    }

    /// Offset of the owned byte.
    pub fn own_offset(&self) -> usize {
        self.own
    }

    /// Offset of the other worker's byte in this pair.
    pub fn neighbour_offset(&self) -> usize {
        self.own ^ 1
    }

    /// Bytes in one cache line.
    pub fn line_size(&self) -> usize {
        self.line_size
    }

    #[inline(always)]
    pub fn read_own(&self) -> u8 {
        self.bytes[self.own].load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn write_own(&self, value: u8) {
        self.bytes[self.own].store(value, Ordering::Relaxed);
    }

    /// Load, add one, store.  Not a locked increment.
    #[inline(always)]
    pub fn inc_own(&self) {
        let v = self.read_own();
        self.write_own(v.wrapping_add(1));
    }

    /// Hardware atomic increment of the owned byte.
    #[inline(always)]
    pub fn atomic_inc_own(&self) {
        self.bytes[self.own].fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn read_neighbour(&self) -> u8 {
        self.bytes[self.neighbour_offset()].load(Ordering::Relaxed)
    }

    /// Start of the line containing the owned byte.
    fn line_base(&self) -> usize {
        self.own & !(self.line_size - 1)
    }

    /// Read the `word`th 8-byte word of the owned line.
    #[inline(always)]
    pub fn read_line_word(&self, word: usize) -> u64 {
        self.read_word::<u64>(self.line_base() + word * size_of::<u64>())
    }

    /// 8-byte words per line.
    pub fn words_per_line(&self) -> usize {
        self.line_size / size_of::<u64>()
    }

    /// Read the naturally aligned `T` that contains the owned byte.
    #[inline(always)]
    pub fn read_containing<T: LineWord>(&self) -> T {
        self.read_word::<T>(self.own & !(size_of::<T>() - 1))
    }

    #[inline(always)]
    fn read_word<T: LineWord>(&self, offset: usize) -> T {
        debug_assert!(offset % size_of::<T>() == 0);
        debug_assert!(offset + size_of::<T>() <= self.bytes.len());
        // SAFETY: `offset` is aligned for T (line base or masked offset,
        // region page-aligned) and `offset + size_of::<T>()` stays inside
        // the region, whose length is a multiple of the line size (>= 16).
        unsafe { T::load(self.bytes[offset].as_ptr()) }
    }
}

/// Word widths that can be read whole out of the shared line.
///
/// Loads are `Relaxed` atomics of the full width, so they race with the
/// workers' byte stores only as atomics do.
pub trait LineWord: Copy {
    /// # Safety
    /// `p` must be aligned for `Self` and point at `size_of::<Self>()`
    /// bytes of the shared region.
    unsafe fn load(p: *mut u8) -> Self;
}

macro_rules! line_word {
    ($t:ty, $atomic:ty) => {
        impl LineWord for $t {
            #[inline(always)]
            unsafe fn load(p: *mut u8) -> Self {
                <$atomic>::from_ptr(p.cast()).load(Ordering::Relaxed)
            }
        }
    };
}

line_word!(u16, AtomicU16);
line_word!(u32, AtomicU32);
line_word!(u64, AtomicU64);

/// No stable 128-bit atomic: two aligned 64-bit halves, in address order.
impl LineWord for u128 {
    #[inline(always)]
    unsafe fn load(p: *mut u8) -> Self {
        let first = u128::from(u64::load(p));
        let second = u128::from(u64::load(p.add(size_of::<u64>())));
        if cfg!(target_endian = "little") {
            first | (second << 64)
        } else {
            (first << 64) | second
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(n: usize) -> Vec<AtomicU8> {
        (0..n).map(|_| AtomicU8::new(0)).collect()
    }

    #[test]
    fn neighbour_is_other_pair_member() {
        let buf = bytes(64);
        assert_eq!(LineView::new(&buf, 64, 6).neighbour_offset(), 7);
        assert_eq!(LineView::new(&buf, 64, 7).neighbour_offset(), 6);
    }

    #[test]
    fn inc_wraps_and_touches_only_own_byte() {
        let buf = bytes(32);
        buf[3].store(0xff, Ordering::Relaxed);
        let view = LineView::new(&buf, 16, 3);
        view.inc_own();
        assert_eq!(view.read_own(), 0);
        view.atomic_inc_own();
        assert_eq!(view.read_own(), 1);
        for (i, b) in buf.iter().enumerate() {
            if i != 3 {
                assert_eq!(b.load(Ordering::Relaxed), 0, "byte {i} modified");
            }
        }
    }

    #[test]
    fn containing_reads_see_owned_byte() {
        // AtomicU64 storage guarantees 8-byte alignment for the byte view.
        let backing: Vec<AtomicU64> = (0..8).map(|_| AtomicU64::new(0)).collect();
        // SAFETY: 64 bytes of atomic storage reinterpreted as AtomicU8.
        let buf: &[AtomicU8] = unsafe { std::slice::from_raw_parts(backing.as_ptr().cast::<AtomicU8>(), 64) };
        let view = LineView::new(buf, 32, 37);
        view.write_own(0xab);
        let word = view.read_containing::<u64>();
        assert_eq!(word.to_ne_bytes()[37 % 8], 0xab);
        let half = view.read_containing::<u16>();
        assert_eq!(half.to_ne_bytes()[1], 0xab);
        // Word 0 of the owned line starts at 32; owned byte is in word 0.
        assert_eq!(view.read_line_word(0).to_ne_bytes()[5], 0xab);
        assert_eq!(view.words_per_line(), 4);
    }

    #[test]
    fn wide_reads_compose_in_address_order() {
        let backing: Vec<AtomicU64> = (0..4).map(|_| AtomicU64::new(0)).collect();
        // SAFETY: 32 bytes of atomic storage reinterpreted as AtomicU8.
        let buf: &[AtomicU8] = unsafe { std::slice::from_raw_parts(backing.as_ptr().cast::<AtomicU8>(), 32) };
        for (i, b) in buf.iter().enumerate() {
            b.store(i as u8, Ordering::Relaxed);
        }
        let view = LineView::new(buf, 16, 19);
        let mut expect = [0u8; 16];
        expect.iter_mut().enumerate().for_each(|(i, b)| *b = 16 + i as u8);
        assert_eq!(view.read_containing::<u128>(), u128::from_ne_bytes(expect));
        assert_eq!(view.read_containing::<u32>(), u32::from_ne_bytes([16, 17, 18, 19]));
        assert_eq!(view.read_line_word(1), u64::from_ne_bytes([24, 25, 26, 27, 28, 29, 30, 31]));
    }
}
