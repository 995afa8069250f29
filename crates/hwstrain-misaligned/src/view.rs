//! Unsafe offset view over the misaligned target page.
//!
//! Every 16/32/64-bit access is a single load or store instruction issued
//! through inline assembly, so the hardware really sees the misaligned
//! address:
//!
//! | Arch      | Loads / stores                  | Locked increment          |
//! |-----------|---------------------------------|---------------------------|
//! | `x86_64`  | `mov` (16/32/64)                | `lock add`, `lock cmpxchg16b` |
//! | `aarch64` | `ldrh`/`ldr`, `strh`/`str`      |                           |
//! | `arm`     | `ldrh`/`ldr`, `strh`/`str`      |                           |
//! | other     | `read_unaligned`/`write_unaligned` |                        |
//!
//! 64-bit accesses on `arm` and all 128-bit accesses are issued as two
//! halves, the way compilers lower them.  On the fallback arches the
//! compiler is free to split a misaligned access into byte accesses, so
//! those targets may never fault.

use std::mem::size_of;
use std::sync::atomic::{fence, Ordering};

use hwstrain_core::MappedRegion;

/// Full memory barrier.
#[inline(always)]
pub fn barrier() {
    fence(Ordering::SeqCst);
}

// ── Raw accesses ────────────────────────────────────────────────

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm"))]
macro_rules! asm_access {
    ($load:ident, $store:ident, $t:ty, $ld:literal, $st:literal) => {
        #[inline(always)]
        pub unsafe fn $load(p: *const u8) -> $t {
            let v: $t;
            std::arch::asm!($ld, p = in(reg) p, v = out(reg) v, options(nostack, readonly, preserves_flags));
            v
        }

        #[inline(always)]
        pub unsafe fn $store(p: *mut u8, v: $t) {
            std::arch::asm!($st, p = in(reg) p, v = in(reg) v, options(nostack, preserves_flags));
        }
    };
}

#[cfg(target_arch = "x86_64")]
mod raw {
    asm_access!(load16, store16, u16, "mov {v:x}, word ptr [{p}]", "mov word ptr [{p}], {v:x}");
    asm_access!(load32, store32, u32, "mov {v:e}, dword ptr [{p}]", "mov dword ptr [{p}], {v:e}");
    asm_access!(load64, store64, u64, "mov {v}, qword ptr [{p}]", "mov qword ptr [{p}], {v}");
}

#[cfg(target_arch = "aarch64")]
mod raw {
    asm_access!(load16, store16, u16, "ldrh {v:w}, [{p}]", "strh {v:w}, [{p}]");
    asm_access!(load32, store32, u32, "ldr {v:w}, [{p}]", "str {v:w}, [{p}]");
    asm_access!(load64, store64, u64, "ldr {v:x}, [{p}]", "str {v:x}, [{p}]");
}

#[cfg(target_arch = "arm")]
mod raw {
    asm_access!(load16, store16, u16, "ldrh {v}, [{p}]", "strh {v}, [{p}]");
    asm_access!(load32, store32, u32, "ldr {v}, [{p}]", "str {v}, [{p}]");

    #[inline(always)]
    pub unsafe fn load64(p: *const u8) -> u64 {
        super::join(u64::from(load32(p)), u64::from(load32(p.add(4))), 32)
    }

    #[inline(always)]
    pub unsafe fn store64(p: *mut u8, v: u64) {
        let (first, second) = super::split(v, 32);
        store32(p, first as u32);
        store32(p.add(4), second as u32);
    }
}

/// Plain unaligned accesses; the compiler may split them.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm")))]
mod raw {
    use std::hint::black_box;
    use std::ptr;

    macro_rules! fallback_access {
        ($load:ident, $store:ident, $t:ty) => {
            #[inline(always)]
            pub unsafe fn $load(p: *const u8) -> $t {
                black_box(ptr::read_unaligned(p.cast::<$t>()))
            }

            #[inline(always)]
            pub unsafe fn $store(p: *mut u8, v: $t) {
                ptr::write_unaligned(p.cast::<$t>(), black_box(v))
            }
        };
    }

    fallback_access!(load16, store16, u16);
    fallback_access!(load32, store32, u32);
    fallback_access!(load64, store64, u64);
}

/// Combine the halves found at the lower and higher address.
#[inline(always)]
fn join<T>(first: T, second: T, half_bits: u32) -> T
where
    T: std::ops::Shl<u32, Output = T> + std::ops::BitOr<Output = T>,
{
    if cfg!(target_endian = "little") {
        first | (second << half_bits)
    } else {
        (first << half_bits) | second
    }
}

/// Halves to store at the lower and higher address.
#[inline(always)]
fn split<T>(v: T, half_bits: u32) -> (T, T)
where
    T: std::ops::Shr<u32, Output = T> + std::ops::Shl<u32, Output = T> + Copy,
{
    let high = v >> half_bits;
    let low = (v << half_bits) >> half_bits;
    if cfg!(target_endian = "little") {
        (low, high)
    } else {
        (high, low)
    }
}

// ── Words ───────────────────────────────────────────────────────

/// Unsigned integer widths the engine accesses.
pub trait Word: Copy + 'static {
    const BYTES: usize = size_of::<Self>();

    fn to_u128(self) -> u128;
    /// Low `BYTES` bytes of `v`.
    fn truncate(v: u128) -> Self;
    fn wrapping_inc(self) -> Self;

    /// # Safety
    /// `p..p + BYTES` must be readable.  No alignment is required.
    unsafe fn load(p: *const u8) -> Self;

    /// # Safety
    /// `p..p + BYTES` must be writable.  No alignment is required.
    unsafe fn store(p: *mut u8, v: Self);

    /// Locked read-modify-write increment.
    ///
    /// # Safety
    /// `p..p + BYTES` must be writable.  The 128-bit form raises a
    /// general protection fault on operands that are not 16-byte aligned.
    #[cfg(target_arch = "x86_64")]
    unsafe fn locked_inc(p: *mut u8);
}

macro_rules! impl_word {
    ($t:ty, $load:ident, $store:ident, $lock:literal) => {
        impl Word for $t {
            #[inline(always)]
            fn to_u128(self) -> u128 {
                self as u128
            }

            #[inline(always)]
            fn truncate(v: u128) -> Self {
                v as $t
            }

            #[inline(always)]
            fn wrapping_inc(self) -> Self {
                self.wrapping_add(1)
            }

            #[inline(always)]
            unsafe fn load(p: *const u8) -> Self {
                raw::$load(p)
            }

            #[inline(always)]
            unsafe fn store(p: *mut u8, v: Self) {
                raw::$store(p, v)
            }

            #[cfg(target_arch = "x86_64")]
            #[inline(always)]
            unsafe fn locked_inc(p: *mut u8) {
                std::arch::asm!($lock, p = in(reg) p, options(nostack));
            }
        }
    };
}

impl_word!(u16, load16, store16, "lock add word ptr [{p}], 1");
impl_word!(u32, load32, store32, "lock add dword ptr [{p}], 1");
impl_word!(u64, load64, store64, "lock add qword ptr [{p}], 1");

impl Word for u128 {
    #[inline(always)]
    fn to_u128(self) -> u128 {
        self
    }

    #[inline(always)]
    fn truncate(v: u128) -> Self {
        v
    }

    #[inline(always)]
    fn wrapping_inc(self) -> Self {
        self.wrapping_add(1)
    }

    #[inline(always)]
    unsafe fn load(p: *const u8) -> Self {
        join(u128::from(raw::load64(p)), u128::from(raw::load64(p.add(8))), 64)
    }

    #[inline(always)]
    unsafe fn store(p: *mut u8, v: Self) {
        let (first, second) = split(v, 64);
        raw::store64(p, first as u64);
        raw::store64(p.add(8), second as u64);
    }

    #[cfg(target_arch = "x86_64")]
    #[inline(always)]
    unsafe fn locked_inc(p: *mut u8) {
        let lo = raw::load64(p);
        let hi = raw::load64(p.add(8));
        // rbx is reserved by the compiler: park it while cmpxchg16b needs it.
        std::arch::asm!(
            "mov {save}, rbx",
            "2:",
            "mov rbx, rax",
            "mov rcx, rdx",
            "add rbx, 1",
            "adc rcx, 0",
            "lock cmpxchg16b xmmword ptr [{p}]",
            "jne 2b",
            "mov rbx, {save}",
            p = in(reg) p,
            save = out(reg) _,
            inout("rax") lo => _,
            inout("rdx") hi => _,
            out("rcx") _,
            options(nostack),
        );
    }
}

// ── View ────────────────────────────────────────────────────────

/// Byte-addressed view of the target page.  Offsets need not be aligned.
#[derive(Clone, Copy)]
pub struct TargetView {
    base: *mut u8,
    len: usize,
}

impl TargetView {
    /// View the whole mapping.
    pub fn new(region: &MappedRegion) -> Self {
        Self {
            base: region.as_ptr(),
            len: region.len(),
        }
    }

    #[inline(always)]
    fn at(&self, offset: usize, bytes: usize) -> *mut u8 {
        debug_assert!(offset + bytes <= self.len);
        // SAFETY: offset + bytes is within the mapping (asserted above;
        // slot offsets are compile-time constants below 17).
        unsafe { self.base.add(offset) }
    }

    /// Misaligned load.
    #[inline(always)]
    pub fn read<W: Word>(&self, offset: usize) -> W {
        // SAFETY: in bounds; Word::load has no alignment requirement.
        unsafe { W::load(self.at(offset, W::BYTES)) }
    }

    /// Misaligned store.
    #[inline(always)]
    pub fn write<W: Word>(&self, offset: usize, value: W) {
        // SAFETY: in bounds; Word::store has no alignment requirement.
        unsafe { W::store(self.at(offset, W::BYTES), value) }
    }

    /// Locked increment of a misaligned word.
    ///
    /// x86 permits locked 16/32/64-bit operations on unaligned operands;
    /// the 128-bit form faults unless `offset` is 16-byte aligned.
    #[cfg(target_arch = "x86_64")]
    #[inline(always)]
    pub fn locked_inc<W: Word>(&self, offset: usize) {
        // SAFETY: in bounds; a fault is contained by the guarded burst.
        unsafe { W::locked_inc(self.at(offset, W::BYTES)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Option<MappedRegion> {
        MappedRegion::private(1, "test target")
            .map_err(|e| eprintln!("mmap unavailable: {e}"))
            .ok()
    }

    #[test]
    fn misaligned_round_trip_each_width() {
        let Some(region) = page() else { return };
        let view = TargetView::new(&region);
        view.write::<u16>(1, 0xbeef);
        view.write::<u32>(5, 0xdead_beef);
        view.write::<u64>(9, 0x0123_4567_89ab_cdef);
        assert_eq!(view.read::<u16>(1), 0xbeef);
        assert_eq!(view.read::<u32>(5), 0xdead_beef);
        assert_eq!(view.read::<u64>(9), 0x0123_4567_89ab_cdef);
        view.write::<u128>(1, u128::MAX - 1);
        assert_eq!(view.read::<u128>(1), u128::MAX - 1);
    }

    #[test]
    fn loads_agree_with_native_byte_order() {
        let Some(region) = page() else { return };
        let view = TargetView::new(&region);
        let bytes: [u8; 17] = std::array::from_fn(|i| (i as u8).wrapping_mul(37).wrapping_add(11));
        // SAFETY: the mapping is at least one page.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), region.as_ptr(), bytes.len()) };

        let mut expect16 = [0u8; 2];
        expect16.copy_from_slice(&bytes[3..5]);
        assert_eq!(view.read::<u16>(3), u16::from_ne_bytes(expect16));
        let mut expect32 = [0u8; 4];
        expect32.copy_from_slice(&bytes[5..9]);
        assert_eq!(view.read::<u32>(5), u32::from_ne_bytes(expect32));
        let mut expect64 = [0u8; 8];
        expect64.copy_from_slice(&bytes[1..9]);
        assert_eq!(view.read::<u64>(1), u64::from_ne_bytes(expect64));
        let mut expect128 = [0u8; 16];
        expect128.copy_from_slice(&bytes[1..17]);
        assert_eq!(view.read::<u128>(1), u128::from_ne_bytes(expect128));

        view.write::<u128>(1, u128::from_ne_bytes(expect128).wrapping_add(1));
        let mut back = [0u8; 16];
        // SAFETY: in bounds of the mapping.
        unsafe { std::ptr::copy_nonoverlapping(region.as_ptr().add(1), back.as_mut_ptr(), 16) };
        assert_eq!(u128::from_ne_bytes(back), u128::from_ne_bytes(expect128).wrapping_add(1));
    }

    #[test]
    fn word_helpers() {
        assert_eq!(u16::truncate(0x1_0005), 5);
        assert_eq!(u16::MAX.wrapping_inc(), 0);
        assert_eq!(<u64 as Word>::BYTES, 8);
        assert_eq!(<u128 as Word>::BYTES, 16);
        assert_eq!(0xffu32.to_u128(), 0xff);
    }

    #[test]
    fn halves_follow_byte_order() {
        let v = 0x1111_2222_u64;
        let (first, second) = split(v, 16);
        assert_eq!(join(first, second, 16), v);
        if cfg!(target_endian = "little") {
            assert_eq!((first, second), (0x2222, 0x1111));
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn locked_inc_on_odd_offsets() {
        let Some(region) = page() else { return };
        let view = TargetView::new(&region);
        view.write::<u16>(3, u16::MAX);
        view.locked_inc::<u16>(3);
        assert_eq!(view.read::<u16>(3), 0);
        view.write::<u32>(5, 7);
        view.locked_inc::<u32>(5);
        assert_eq!(view.read::<u32>(5), 8);
        view.write::<u64>(9, 41);
        view.locked_inc::<u64>(9);
        assert_eq!(view.read::<u64>(9), 42);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn locked_inc_128_carries_into_high_half() {
        let Some(region) = page() else { return };
        if !std::arch::is_x86_feature_detected!("cmpxchg16b") {
            eprintln!("cmpxchg16b unavailable");
            return;
        }
        let view = TargetView::new(&region);
        // Aligned operand: the locked form succeeds.
        view.write::<u128>(16, u128::from(u64::MAX));
        view.locked_inc::<u128>(16);
        assert_eq!(view.read::<u128>(16), 1u128 << 64);
    }
}
