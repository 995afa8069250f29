//! Platform probe — cache line size and processor count discovery.
//!
//! Both queries may fail on restricted hosts (containers without sysfs,
//! non-Linux kernels).  Callers go through [`cache_line_size_or_default`]
//! and [`processor_count_or_default`], which substitute safe defaults and
//! report why the default was used.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Line size assumed when the host cannot tell us.
pub const DEFAULT_CACHE_LINE_SIZE: usize = 64;
/// Smallest line size the engines will work with.
pub const MIN_CACHE_LINE_SIZE: usize = 16;
/// Processor count assumed when the host cannot tell us.
pub const DEFAULT_PROCESSOR_COUNT: usize = 1;

/// Why the cache line size could not be discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMiss {
    /// No cache topology information at all.
    NoCacheDetails,
    /// Topology present but no level-1 cache in it.
    NoSuitableCache,
    /// Level-1 cache present with no usable line size.
    UnknownLineSize,
}

impl fmt::Display for ProbeMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeMiss::NoCacheDetails => f.write_str("unable to determine cache line details"),
            ProbeMiss::NoSuitableCache => f.write_str("no suitable cache found"),
            ProbeMiss::UnknownLineSize => f.write_str("unable to determine cache line size"),
        }
    }
}

/// Source of host facts the engines depend on.
pub trait PlatformProbe: Send + Sync {
    /// Level-1 data cache coherency line size in bytes.
    fn cache_line_size(&self) -> Result<usize, ProbeMiss>;

    /// Configured logical processors, if known.
    fn processor_count(&self) -> Option<usize>;
}

/// Reads the running host: sysfs cache topology and `sysconf`.
#[derive(Debug, Clone)]
pub struct HostProbe {
    cache_dir: PathBuf,
}

impl HostProbe {
    /// Probe the running host.
    pub fn new() -> Self {
        Self::with_cache_dir("/sys/devices/system/cpu/cpu0/cache")
    }

    /// Probe an alternative sysfs cache directory (`index*/level`,
    /// `index*/type`, `index*/coherency_line_size`).
    pub fn with_cache_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            cache_dir: dir.as_ref().to_path_buf(),
        }
    }

    fn read_trimmed(path: &Path) -> Option<String> {
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformProbe for HostProbe {
    fn cache_line_size(&self) -> Result<usize, ProbeMiss> {
        let entries = fs::read_dir(&self.cache_dir).map_err(|_| ProbeMiss::NoCacheDetails)?;

        let mut indices: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("index"))
            })
            .collect();
        if indices.is_empty() {
            return Err(ProbeMiss::NoCacheDetails);
        }
        indices.sort();

        // Level 1, preferring the data cache over the instruction cache.
        let level1 = indices
            .iter()
            .filter(|p| Self::read_trimmed(&p.join("level")).as_deref() == Some("1"))
            .min_by_key(|p| match Self::read_trimmed(&p.join("type")).as_deref() {
                Some("Data") => 0,
                Some("Unified") => 1,
                _ => 2,
            })
            .ok_or(ProbeMiss::NoSuitableCache)?;

        Self::read_trimmed(&level1.join("coherency_line_size"))
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .ok_or(ProbeMiss::UnknownLineSize)
    }

    fn processor_count(&self) -> Option<usize> {
        // SAFETY: sysconf has no memory-safety preconditions.
        let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
        usize::try_from(n).ok().filter(|&n| n > 0)
    }
}

/// Fixed answers, for tests and for hosts where discovery is known-bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedProbe {
    pub cache_line: Result<usize, ProbeMiss>,
    pub processors: Option<usize>,
}

impl FixedProbe {
    /// Probe reporting a known line size and processor count.
    pub fn new(cache_line: usize, processors: usize) -> Self {
        Self {
            cache_line: Ok(cache_line),
            processors: Some(processors),
        }
    }

    /// Probe that can discover nothing.
    pub fn unknown(miss: ProbeMiss) -> Self {
        Self {
            cache_line: Err(miss),
            processors: None,
        }
    }
}

impl PlatformProbe for FixedProbe {
    fn cache_line_size(&self) -> Result<usize, ProbeMiss> {
        self.cache_line
    }

    fn processor_count(&self) -> Option<usize> {
        self.processors
    }
}

/// Discovered line size, or [`DEFAULT_CACHE_LINE_SIZE`] plus the reason.
pub fn cache_line_size_or_default<P: PlatformProbe + ?Sized>(probe: &P) -> (usize, Option<ProbeMiss>) {
    match probe.cache_line_size() {
        Ok(n) => (n, None),
        Err(miss) => (DEFAULT_CACHE_LINE_SIZE, Some(miss)),
    }
}

/// Discovered processor count, or [`DEFAULT_PROCESSOR_COUNT`].
pub fn processor_count_or_default<P: PlatformProbe + ?Sized>(probe: &P) -> usize {
    probe
        .processor_count()
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_PROCESSOR_COUNT)
}

/// Round a reported line size up to a power of two, at least
/// [`MIN_CACHE_LINE_SIZE`] bytes.
pub fn normalize_line_size(reported: usize) -> usize {
    reported
        .max(MIN_CACHE_LINE_SIZE)
        .checked_next_power_of_two()
        .unwrap_or(DEFAULT_CACHE_LINE_SIZE)
}

/// System page size, falling back to 4 KiB.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(n).ok().filter(|&n| n > 0).unwrap_or(4096)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_sysfs(name: &str, caches: &[(&str, &str, &str, Option<&str>)]) -> PathBuf {
        let root = std::env::temp_dir().join(format!("hwstrain-probe-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        for (index, level, kind, line) in caches {
            let dir = root.join(index);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("level"), format!("{level}\n")).unwrap();
            fs::write(dir.join("type"), format!("{kind}\n")).unwrap();
            if let Some(line) = line {
                fs::write(dir.join("coherency_line_size"), format!("{line}\n")).unwrap();
            }
        }
        root
    }

    #[test]
    fn host_probe_prefers_level1_data_cache() {
        let root = fake_sysfs(
            "data",
            &[
                ("index0", "1", "Instruction", Some("32")),
                ("index1", "1", "Data", Some("128")),
                ("index2", "2", "Unified", Some("64")),
            ],
        );
        let probe = HostProbe::with_cache_dir(&root);
        assert_eq!(probe.cache_line_size(), Ok(128));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn host_probe_reports_each_miss() {
        let missing = HostProbe::with_cache_dir("/nonexistent/hwstrain/cache");
        assert_eq!(missing.cache_line_size(), Err(ProbeMiss::NoCacheDetails));

        let root = fake_sysfs("nol1", &[("index0", "2", "Unified", Some("64"))]);
        let probe = HostProbe::with_cache_dir(&root);
        assert_eq!(probe.cache_line_size(), Err(ProbeMiss::NoSuitableCache));
        let _ = fs::remove_dir_all(root);

        let root = fake_sysfs("noline", &[("index0", "1", "Data", None)]);
        let probe = HostProbe::with_cache_dir(&root);
        assert_eq!(probe.cache_line_size(), Err(ProbeMiss::UnknownLineSize));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn defaults_apply_when_undiscoverable() {
        let probe = FixedProbe::unknown(ProbeMiss::NoSuitableCache);
        assert_eq!(
            cache_line_size_or_default(&probe),
            (DEFAULT_CACHE_LINE_SIZE, Some(ProbeMiss::NoSuitableCache))
        );
        assert_eq!(processor_count_or_default(&probe), 1);

        let probe = FixedProbe::new(128, 8);
        assert_eq!(cache_line_size_or_default(&probe), (128, None));
        assert_eq!(processor_count_or_default(&probe), 8);
    }

    #[test]
    fn line_size_normalization() {
        assert_eq!(normalize_line_size(64), 64);
        assert_eq!(normalize_line_size(8), 16);
        assert_eq!(normalize_line_size(48), 64);
        assert_eq!(normalize_line_size(0), 16);
        assert_eq!(normalize_line_size(usize::MAX), DEFAULT_CACHE_LINE_SIZE);
    }

    #[test]
    fn host_probe_sees_at_least_one_processor() {
        assert!(HostProbe::new().processor_count().unwrap_or(1) >= 1);
        assert!(page_size() >= 4096);
    }

    #[test]
    fn miss_messages() {
        assert_eq!(ProbeMiss::NoSuitableCache.to_string(), "no suitable cache found");
    }
}
