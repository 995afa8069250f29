//! Multi-instance harness: configuration, setup and the run report.

use std::panic::resume_unwind;
use std::thread;

use hwstrain_core::platform::{
    cache_line_size_or_default, normalize_line_size, processor_count_or_default,
};
use hwstrain_core::{MappedRegion, PlatformProbe, RunControl, StressError, ALL_METHOD};
use log::{debug, error, info};

use crate::methods;
use crate::view::shared_bytes;
use crate::worker::{run_pair, WorkerContext};
use crate::STRESSOR;

/// Cache line engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachelineConfig {
    /// Method name, or `all`.
    pub method: String,
    /// Migrate workers between CPUs after every burst.
    pub affinity: bool,
    /// Worker pairs to run.
    pub instances: usize,
}

impl Default for CachelineConfig {
    fn default() -> Self {
        Self {
            method: ALL_METHOD.to_string(),
            affinity: false,
            instances: 1,
        }
    }
}

/// Summary of a passing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachelineReport {
    pub method: &'static str,
    /// Normalized line size the workers ran against.
    pub line_size: usize,
    pub instances: usize,
    /// Bursts counted by the primaries.
    pub bogo_ops: u64,
}

/// Note emitted once when too few instances cover the line.
pub fn coverage_note(line_size: usize, instances: usize) -> Option<String> {
    (instances.saturating_mul(2) < line_size).then(|| {
        format!(
            "to fully exercise a {} byte cache line, {} instances are required",
            line_size,
            line_size / 2
        )
    })
}

/// Bytes to map so that every pair's offsets fall inside whole lines.
pub fn shared_len(line_size: usize, instances: usize) -> usize {
    let needed = instances.saturating_mul(2).max(line_size);
    needed.div_ceil(line_size) * line_size
}

/// Run the cache line engine until `control` says stop.
///
/// Fails before any worker starts on an unknown method name.
pub fn run<P: PlatformProbe + ?Sized>(
    config: &CachelineConfig,
    control: &RunControl,
    probe: &P,
) -> Result<CachelineReport, StressError> {
    let registry = methods::registry()?;
    let selection = registry.resolve(&config.method)?;
    let method = registry.selection_name(selection);
    let instances = config.instances.max(1);

    let (reported, miss) = cache_line_size_or_default(probe);
    if let Some(miss) = miss {
        info!("{STRESSOR}.0: using built-in defaults as {miss}");
    }
    let line_size = normalize_line_size(reported);
    debug!("{STRESSOR}.0: L1 cache line size {line_size} bytes");
    if let Some(note) = coverage_note(line_size, instances) {
        info!("{STRESSOR}.0: {note}");
    }
    let cpus = processor_count_or_default(probe);

    let region = MappedRegion::shared(shared_len(line_size, instances), "shared cache line")?;
    let line = shared_bytes(&region);

    let outcome = thread::scope(|scope| {
        let mut pairs = Vec::with_capacity(instances);
        let mut spawn_error = None;

        for instance in 0..instances {
            debug!("{STRESSOR}.{instance}: using method '{method}'");
            let ctx = WorkerContext {
                instance,
                registry: &registry,
                selection,
                line,
                line_size,
                control,
                affinity: config.affinity,
                cpus,
            };
            let spawned = control.retry_create(|| {
                thread::Builder::new()
                    .name(format!("cacheline-p{instance}"))
                    .spawn_scoped(scope, move || run_pair(scope, ctx))
            });
            match spawned {
                Ok(Some(handle)) => pairs.push(handle),
                Ok(None) => break,
                Err(source) => {
                    error!("{STRESSOR}.{instance}: cannot create primary worker: {source}");
                    control.stop();
                    spawn_error = Some(StressError::Resource {
                        what: "primary worker",
                        source,
                    });
                    break;
                }
            }
        }

        let mut outcome = spawn_error.map_or(Ok(()), Err);
        for handle in pairs {
            let rc = handle.join().unwrap_or_else(|panic| resume_unwind(panic));
            if outcome.is_ok() {
                outcome = rc;
            }
        }
        outcome
    });
    outcome?;

    Ok(CachelineReport {
        method,
        line_size,
        instances,
        bogo_ops: control.bogo_ops(),
    })
}
