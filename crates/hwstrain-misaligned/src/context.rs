//! Fault context and simulated faults.

use std::fmt;
use std::str::FromStr;

use hwstrain_core::MethodId;

/// Signal classes intercepted around a burst.
pub const FAULT_SIGNALS: [libc::c_int; 3] = [libc::SIGBUS, libc::SIGILL, libc::SIGSEGV];

/// What the interception path recorded about the last trapped burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultContext {
    /// Method that was running when the burst process stopped.
    pub current_method: Option<MethodId>,
    /// Signal that stopped it, if one was recorded.
    pub last_signal: Option<libc::c_int>,
}

impl FaultContext {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// "SIGBUS", or "an error" when no signal was recorded.
    pub fn cause(&self) -> String {
        match self.last_signal {
            Some(sig) => signal_name(sig),
            None => "an error".to_string(),
        }
    }
}

/// Conventional name of a signal number.
pub fn signal_name(sig: libc::c_int) -> String {
    match sig {
        libc::SIGBUS => "SIGBUS".to_string(),
        libc::SIGILL => "SIGILL".to_string(),
        libc::SIGSEGV => "SIGSEGV".to_string(),
        libc::SIGINT => "SIGINT".to_string(),
        libc::SIGTERM => "SIGTERM".to_string(),
        libc::SIGKILL => "SIGKILL".to_string(),
        other => format!("signal {other}"),
    }
}

/// Raise `signal` just before `method` runs inside the guarded burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedFault {
    pub method: String,
    pub signal: libc::c_int,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFaultError(String);

impl fmt::Display for ParseFaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid simulated fault '{}', expected METHOD[:BUS|ILL|SEGV]", self.0)
    }
}

impl std::error::Error for ParseFaultError {}

impl FromStr for SimulatedFault {
    type Err = ParseFaultError;

    /// `int128rd`, `int128rd:SEGV` or `int128rd:SIGSEGV`; defaults to SIGBUS.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (method, signal) = match s.split_once(':') {
            Some((m, sig)) => (m, sig),
            None => (s, "BUS"),
        };
        if method.is_empty() {
            return Err(ParseFaultError(s.to_string()));
        }
        let upper = signal.to_ascii_uppercase();
        let signal = match upper.trim_start_matches("SIG") {
            "BUS" => libc::SIGBUS,
            "ILL" => libc::SIGILL,
            "SEGV" => libc::SIGSEGV,
            _ => return Err(ParseFaultError(s.to_string())),
        };
        Ok(Self {
            method: method.to_string(),
            signal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simulated_fault() {
        let f: SimulatedFault = "int128rd".parse().unwrap();
        assert_eq!(f.method, "int128rd");
        assert_eq!(f.signal, libc::SIGBUS);

        let f: SimulatedFault = "int16wr:SIGSEGV".parse().unwrap();
        assert_eq!(f.signal, libc::SIGSEGV);
        let f: SimulatedFault = "int16wr:ill".parse().unwrap();
        assert_eq!(f.signal, libc::SIGILL);

        assert!("int16wr:KILL".parse::<SimulatedFault>().is_err());
        assert!(":BUS".parse::<SimulatedFault>().is_err());
    }

    #[test]
    fn cause_names_signal_or_error() {
        let mut ctx = FaultContext {
            current_method: None,
            last_signal: Some(libc::SIGBUS),
        };
        assert_eq!(ctx.cause(), "SIGBUS");
        ctx.reset();
        assert_eq!(ctx, FaultContext::default());
        assert_eq!(ctx.cause(), "an error");
        assert_eq!(signal_name(99), "signal 99");
    }
}
