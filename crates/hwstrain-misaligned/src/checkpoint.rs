//! Checkpoint/resume around one burst.
//!
//! The checkpoint is taken by forking a burst process immediately before
//! the burst.  The burst process installs handlers for the fault signals,
//! records which method it is running in a shared checkpoint page, and
//! leaves with `_exit`.  When a fault traps, the handler stores the signal
//! into the page and exits; the engine "resumes at the checkpoint" when
//! `waitpid` returns and reads the page.
//!
//! ```text
//! engine                              burst process
//! ──────                              ─────────────
//! arm page
//! fork ─────────────────────────────→ install SIGBUS/SIGILL/SIGSEGV
//!                                     page.current = m; burst(m)
//!                                       fault → handler: page.signal = s
//!                                               _exit(TRAPPED)
//!                                     page.exercised |= m
//!                                     _exit(0 | MISMATCH)
//! waitpid ←───────────────────────────┘
//! read page → Completed | Trapped | Mismatch
//! ```
//!
//! Between `fork` and `_exit` nothing allocates, locks, or logs.

use std::io;
use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicU64, AtomicUsize, Ordering};

use hwstrain_core::{CorrectnessFailure, MappedRegion, MethodId, RunControl, StressError};

use crate::context::FAULT_SIGNALS;

/// Burst process exit status after a trapped fault.
pub const EXIT_TRAPPED: i32 = 0x7d;
/// Burst process exit status after an oracle mismatch.
pub const EXIT_MISMATCH: i32 = 0x7e;
/// Burst process exit status when handlers could not be installed.
pub const EXIT_NO_HANDLERS: i32 = 0x7f;

const NO_METHOD: usize = usize::MAX;

/// Layout of the shared checkpoint page.  All-zero is a valid state.
#[repr(C)]
pub struct CheckpointPage {
    current_method: AtomicUsize,
    last_signal: AtomicI32,
    exercised: AtomicU64,
    mismatch_offset: AtomicUsize,
    mismatch_width: AtomicUsize,
    expected: [AtomicU64; 2],
    observed: [AtomicU64; 2],
}

impl CheckpointPage {
    /// Record that `id` is about to run.
    #[inline]
    pub fn enter(&self, id: MethodId) {
        self.current_method.store(id.index(), Ordering::SeqCst);
    }

    /// Record that a burst of `id` completed and verified.
    #[inline]
    pub fn mark_exercised(&self, id: MethodId) {
        if id.index() < 64 {
            self.exercised.fetch_or(1 << id.index(), Ordering::SeqCst);
        }
    }

    fn arm(&self) {
        self.current_method.store(NO_METHOD, Ordering::SeqCst);
        self.last_signal.store(0, Ordering::SeqCst);
        self.exercised.store(0, Ordering::SeqCst);
    }

    fn record_signal(&self, sig: libc::c_int) {
        self.last_signal.store(sig, Ordering::SeqCst);
    }

    fn record_mismatch(&self, failure: &CorrectnessFailure) {
        self.mismatch_offset.store(failure.offset, Ordering::SeqCst);
        self.mismatch_width.store(failure.width, Ordering::SeqCst);
        self.expected[0].store(failure.expected as u64, Ordering::SeqCst);
        self.expected[1].store((failure.expected >> 64) as u64, Ordering::SeqCst);
        self.observed[0].store(failure.observed as u64, Ordering::SeqCst);
        self.observed[1].store((failure.observed >> 64) as u64, Ordering::SeqCst);
    }

    fn read_u128(halves: &[AtomicU64; 2]) -> u128 {
        u128::from(halves[0].load(Ordering::SeqCst)) | (u128::from(halves[1].load(Ordering::SeqCst)) << 64)
    }
}

/// Outcome of one guarded burst, as seen after resuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resumed {
    /// The burst process ran to completion.
    Completed,
    /// A fault signal stopped the burst.
    Trapped,
    /// Verification failed at the recorded location.
    Mismatch {
        offset: usize,
        width: usize,
        expected: u128,
        observed: u128,
    },
    /// The burst process was killed by a non-fault signal.
    Interrupted(libc::c_int),
}

/// Everything the burst process left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstRecord {
    pub resumed: Resumed,
    /// Registry index of the method running last.
    pub current_method: Option<usize>,
    pub last_signal: Option<libc::c_int>,
    /// Bit `i` set when method `i` completed a verified burst.
    pub exercised: u64,
}

impl BurstRecord {
    /// Registry indices of exercised methods.
    pub fn exercised_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..64).filter(move |i| self.exercised & (1 << i) != 0)
    }
}

static ARMED_PAGE: AtomicPtr<CheckpointPage> = AtomicPtr::new(ptr::null_mut());

extern "C" fn on_fault(sig: libc::c_int) {
    let page = ARMED_PAGE.load(Ordering::SeqCst);
    if !page.is_null() {
        // SAFETY: set only inside the burst process, to the live shared page.
        unsafe { (*page).record_signal(sig) };
    }
    // SAFETY: _exit is async-signal-safe and never returns.
    unsafe { libc::_exit(EXIT_TRAPPED) }
}

fn install_fault_handlers() -> io::Result<()> {
    for sig in FAULT_SIGNALS {
        // SAFETY: zeroed sigaction is valid; the handler only performs an
        // atomic store and _exit.
        unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = on_fault as *const () as usize;
            sa.sa_flags = 0;
            libc::sigemptyset(&mut sa.sa_mask);
            if libc::sigaction(sig, &sa, ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

/// Shared checkpoint page plus the fork/resume machinery.
pub struct Checkpoint {
    region: MappedRegion,
}

impl Checkpoint {
    pub fn new() -> Result<Self, StressError> {
        let region = MappedRegion::shared(size_of::<CheckpointPage>(), "checkpoint page")?;
        Ok(Self { region })
    }

    /// The shared page.
    pub fn page(&self) -> &CheckpointPage {
        // SAFETY: the mapping is page-aligned, at least one page long,
        // zero-filled (a valid CheckpointPage), and lives as long as self.
        unsafe { &*self.region.as_ptr().cast::<CheckpointPage>() }
    }

    /// Run `body` in a burst process and wait for it.
    ///
    /// `body` must be async-signal-safe: no allocation, locking or logging.
    /// Returns `Ok(None)` when the run was stopped while process creation
    /// kept failing.
    pub fn guarded_burst<F>(&self, control: &RunControl, body: F) -> Result<Option<BurstRecord>, StressError>
    where
        F: FnOnce(&CheckpointPage) -> Result<(), CorrectnessFailure>,
    {
        let page = self.page();
        page.arm();

        let forked = control.retry_create(|| {
            // SAFETY: the child only runs async-signal-safe code before _exit.
            match unsafe { libc::fork() } {
                pid if pid < 0 => Err(io::Error::last_os_error()),
                pid => Ok(pid),
            }
        });
        let pid = match forked {
            Ok(Some(pid)) => pid,
            Ok(None) => return Ok(None),
            Err(source) => {
                return Err(StressError::Resource {
                    what: "guarded burst process",
                    source,
                })
            }
        };

        if pid == 0 {
            ARMED_PAGE.store(page as *const CheckpointPage as *mut CheckpointPage, Ordering::SeqCst);
            let code = if install_fault_handlers().is_err() {
                EXIT_NO_HANDLERS
            } else {
                match body(page) {
                    Ok(()) => 0,
                    Err(failure) => {
                        page.record_mismatch(&failure);
                        EXIT_MISMATCH
                    }
                }
            };
            // SAFETY: leave the burst process without running destructors.
            unsafe { libc::_exit(code) }
        }

        let status = wait_for(pid)?;
        let current = page.current_method.load(Ordering::SeqCst);
        let mut record = BurstRecord {
            resumed: Resumed::Completed,
            current_method: (current != NO_METHOD).then_some(current),
            last_signal: match page.last_signal.load(Ordering::SeqCst) {
                0 => None,
                sig => Some(sig),
            },
            exercised: page.exercised.load(Ordering::SeqCst),
        };

        if libc::WIFEXITED(status) {
            record.resumed = match libc::WEXITSTATUS(status) {
                0 => Resumed::Completed,
                EXIT_TRAPPED => Resumed::Trapped,
                EXIT_MISMATCH => Resumed::Mismatch {
                    offset: page.mismatch_offset.load(Ordering::SeqCst),
                    width: page.mismatch_width.load(Ordering::SeqCst),
                    expected: CheckpointPage::read_u128(&page.expected),
                    observed: CheckpointPage::read_u128(&page.observed),
                },
                EXIT_NO_HANDLERS => {
                    return Err(StressError::Resource {
                        what: "fault signal handlers",
                        source: io::Error::other("sigaction failed in burst process"),
                    })
                }
                code => {
                    return Err(StressError::Resource {
                        what: "guarded burst process",
                        source: io::Error::other(format!("unexpected exit status {code}")),
                    })
                }
            };
        } else if libc::WIFSIGNALED(status) {
            let sig = libc::WTERMSIG(status);
            if FAULT_SIGNALS.contains(&sig) {
                record.last_signal.get_or_insert(sig);
                record.resumed = Resumed::Trapped;
            } else {
                record.resumed = Resumed::Interrupted(sig);
            }
        }
        Ok(Some(record))
    }
}

/// `waitpid`, retrying on EINTR.
fn wait_for(pid: libc::pid_t) -> Result<libc::c_int, StressError> {
    let mut status = 0;
    loop {
        // SAFETY: pid is our child; status is a valid out-pointer.
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        if rc == pid {
            return Ok(status);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(StressError::Resource {
                what: "guarded burst process",
                source: err,
            });
        }
    }
}
