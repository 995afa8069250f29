//! Operator front-end for the hwstrain exercisers.
//!
//! # Usage
//!
//! ```bash
//! # Two pairs hammering one cache line with every method, for 10 seconds
//! hwstrain --timeout 10 cacheline --instances 2
//!
//! # One method, migrating workers between CPUs after every burst
//! hwstrain --ops 1000 cacheline --method atomicinc --affinity
//!
//! # Misaligned accesses, every method
//! hwstrain --timeout 5 misaligned
//!
//! # List the method catalogues
//! hwstrain methods
//! ```
//!
//! Exit status: 0 passed, 1 bad options, 2 verification failure,
//! 3 resource unavailable or nothing exercised.

use std::process;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use hwstrain_cacheline::{CachelineConfig, CachelineReport};
use hwstrain_core::error::EXIT_FAILURE;
use hwstrain_core::{Completion, HostProbe, RunControl, StressError};
use hwstrain_misaligned::{MisalignedConfig, MisalignedReport, SimulatedFault};

#[derive(Parser, Debug)]
#[command(name = "hwstrain")]
#[command(about = "Cache line coherency and misaligned access exercisers")]
#[command(version)]
struct Cli {
    /// Stop after this many bogo operations (0 = unlimited).
    #[arg(long, global = true, default_value = "0")]
    ops: u64,

    /// Stop after this many seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Hammer adjacent bytes of one cache line from worker pairs.
    Cacheline {
        /// Method name, or "all".
        #[arg(short, long, default_value = "all")]
        method: String,

        /// Migrate workers to another CPU after every burst.
        #[arg(short, long)]
        affinity: bool,

        /// Number of worker pairs.
        #[arg(short, long, default_value = "1")]
        instances: usize,
    },

    /// Exercise misaligned loads, stores and increments.
    Misaligned {
        /// Method name, or "all".
        #[arg(short, long, default_value = "all")]
        method: String,

        /// Instance ordinal used in diagnostics.
        #[arg(long, default_value = "0")]
        instance: usize,

        /// Raise a fault before METHOD runs (METHOD[:BUS|ILL|SEGV]).
        #[arg(long, hide = true, value_name = "METHOD[:SIGNAL]")]
        inject_fault: Option<SimulatedFault>,
    },

    /// List every accepted method name.
    Methods,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut control = RunControl::new(cli.ops);
    if let Some(secs) = cli.timeout {
        control = control.with_deadline(Duration::from_secs(secs));
    }
    stop_on_signals(control.stop_flag());

    let code = match cli.command {
        Commands::Cacheline {
            method,
            affinity,
            instances,
        } => {
            let config = CachelineConfig {
                method,
                affinity,
                instances,
            };
            finish(
                hwstrain_cacheline::run(&config, &control, &HostProbe::new()).map(|report| {
                    print_cacheline(&report);
                    Completion::Passed
                }),
            )
        }
        Commands::Misaligned {
            method,
            instance,
            inject_fault,
        } => {
            let config = MisalignedConfig {
                method,
                instance,
                simulated_fault: inject_fault,
            };
            finish(hwstrain_misaligned::run(&config, &control).map(|report| {
                print_misaligned(&report);
                report.completion
            }))
        }
        Commands::Methods => cmd_methods(),
    };
    process::exit(code);
}

fn finish(outcome: Result<Completion, StressError>) -> i32 {
    match outcome {
        Ok(completion) => {
            if let Completion::Skipped { reason } = &completion {
                log::info!("skipped: {reason}");
            }
            completion.exit_code()
        }
        Err(e) => {
            // Correctness failures were already reported by the engine.
            if !matches!(e, StressError::Correctness(_)) {
                log::error!("{e}");
            }
            e.exit_code()
        }
    }
}

fn print_cacheline(report: &CachelineReport) {
    println!(
        "cacheline: method {}, {} byte line, {} instance(s), {} bogo ops",
        report.method, report.line_size, report.instances, report.bogo_ops
    );
}

fn print_misaligned(report: &MisalignedReport) {
    println!(
        "misaligned: method {}, {} bogo ops, state {:?}",
        report.method, report.bogo_ops, report.state
    );
    if !report.exercised.is_empty() {
        println!("  exercised: {}", report.exercised.join(" "));
    }
    if !report.skipped.is_empty() {
        println!("  skipped:   {}", report.skipped.join(" "));
    }
}

fn cmd_methods() -> i32 {
    let catalogues = hwstrain_cacheline::registry()
        .map(|r| r.names())
        .and_then(|c| hwstrain_misaligned::registry().map(|m| (c, m.names())));
    match catalogues {
        Ok((cacheline, misaligned)) => {
            println!("cacheline:  {}", cacheline.join(" "));
            println!("misaligned: {}", misaligned.join(" "));
            0
        }
        Err(e) => {
            log::error!("{e}");
            EXIT_FAILURE
        }
    }
}

static STOP_FLAG: AtomicPtr<AtomicBool> = AtomicPtr::new(std::ptr::null_mut());

/// Clear `running` on SIGINT or SIGTERM.
fn stop_on_signals(running: Arc<AtomicBool>) {
    // Leaked: the handler may fire until the process exits.
    STOP_FLAG.store(Arc::into_raw(running).cast_mut(), Ordering::SeqCst);

    extern "C" fn handler(_: libc::c_int) {
        let flag = STOP_FLAG.load(Ordering::SeqCst);
        if !flag.is_null() {
            // SAFETY: points at a leaked Arc allocation that is never freed.
            unsafe { (*flag).store(false, Ordering::Relaxed) };
        }
    }

    // SAFETY: the handler only performs atomic loads and stores.
    unsafe {
        let h = handler as *const () as libc::sighandler_t;
        libc::signal(libc::SIGINT, h);
        libc::signal(libc::SIGTERM, h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cacheline_defaults() {
        let cli = Cli::try_parse_from(["hwstrain", "cacheline"]).unwrap();
        assert_eq!(cli.ops, 0);
        assert_eq!(cli.timeout, None);
        match cli.command {
            Commands::Cacheline {
                method,
                affinity,
                instances,
            } => {
                assert_eq!(method, "all");
                assert!(!affinity);
                assert_eq!(instances, 1);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "hwstrain", "cacheline", "-m", "bits", "--affinity", "--ops", "50", "--timeout", "3",
        ])
        .unwrap();
        assert_eq!(cli.ops, 50);
        assert_eq!(cli.timeout, Some(3));
        assert!(matches!(
            cli.command,
            Commands::Cacheline { ref method, affinity: true, .. } if method == "bits"
        ));
    }

    #[test]
    fn inject_fault_parses_signal() {
        let cli = Cli::try_parse_from(["hwstrain", "misaligned", "--inject-fault", "int64inc:SEGV"])
            .unwrap();
        let Commands::Misaligned { inject_fault, .. } = cli.command else {
            panic!("expected misaligned");
        };
        let fault = inject_fault.unwrap();
        assert_eq!(fault.method, "int64inc");
        assert_eq!(fault.signal, libc::SIGSEGV);

        assert!(Cli::try_parse_from(["hwstrain", "misaligned", "--inject-fault", "x:HUP"]).is_err());
    }

    #[test]
    fn unknown_method_maps_to_configuration_exit() {
        let config = CachelineConfig {
            method: "bogus".into(),
            ..CachelineConfig::default()
        };
        let outcome = hwstrain_cacheline::run(&config, &RunControl::new(1), &HostProbe::new());
        assert_eq!(finish(outcome.map(|_| Completion::Passed)), EXIT_FAILURE);
    }

    #[test]
    fn skipped_completion_exit_code() {
        let skipped = Completion::Skipped {
            reason: "nothing left".into(),
        };
        assert_eq!(finish(Ok(skipped)), hwstrain_core::error::EXIT_NO_RESOURCE);
        assert_eq!(finish(Ok(Completion::Passed)), 0);
    }
}
