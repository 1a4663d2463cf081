//! Memory admission gate (spec §4.2). Whether a worker is allowed to start
//! its next task depends only on a free-memory reading and, in `Specific`
//! mode, the biggest task's estimated footprint. The actual probe is
//! injected as a [`MemoryProbe`] so gate policy can be unit tested without
//! `/proc`, and so the known admit/admit race this gate accepts is driven
//! entirely by two workers independently calling the same pure function,
//! not by anything stateful here.

use anyhow::{Context, Result};
use std::time::Duration;

/// `Admission::Refuse` is deliberately not a `bool`: the source's gate
/// returns `1` for refuse, inverted from the usual boolean convention, and
/// a dedicated type sidesteps that footgun entirely (spec §9).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Admission {
    Admit,
    Refuse,
}

/// How long a refused worker sleeps before re-gating (spec §4.2: "design
/// value: 60 s").
pub const BACK_OFF: Duration = Duration::from_secs(60);

/// The safety floor below which the gate refuses outright. Not specified
/// numerically by the source; chosen here as a conservative implementation
/// default and left out of the wire protocol since it's a worker-local
/// policy knob, not something the master needs to agree on.
pub const DEFAULT_SAFETY_FLOOR_KIB: u64 = 65_536;

pub trait MemoryProbe: Send {
    fn available_kib(&self) -> Result<u64>;
}

/// Reads `MemAvailable` out of `/proc/meminfo`. This is the one function
/// standing in for the `memcheck` external collaborator; everything above
/// it is unit-tested against a fake [`MemoryProbe`] instead.
pub struct ProcMemInfoProbe;

impl MemoryProbe for ProcMemInfoProbe {
    fn available_kib(&self) -> Result<u64> {
        let contents = std::fs::read_to_string("/proc/meminfo")
            .context("reading /proc/meminfo for the admission gate")?;
        parse_mem_available(&contents)
    }
}

fn parse_mem_available(meminfo: &str) -> Result<u64> {
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kib_str = rest.trim().trim_end_matches("kB").trim();
            return kib_str
                .parse()
                .with_context(|| format!("parsing MemAvailable value `{kib_str}`"));
        }
    }
    anyhow::bail!("MemAvailable line not found in /proc/meminfo")
}

/// Runs the gate once. `mode` is `None` for `Generic`, `Some(max_kib)` for
/// `Specific` (mirroring `GreetingMessage::max_task_size_kib`).
pub fn gate(probe: &dyn MemoryProbe, mode: Option<u64>, safety_floor_kib: u64) -> Result<Admission> {
    let available_kib = probe.available_kib()?;
    let headroom_after = match mode {
        None => available_kib,
        Some(max_kib) => available_kib.saturating_sub(max_kib),
    };
    Ok(if headroom_after >= safety_floor_kib {
        Admission::Admit
    } else {
        Admission::Refuse
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(u64);
    impl MemoryProbe for FixedProbe {
        fn available_kib(&self) -> Result<u64> {
            Ok(self.0)
        }
    }

    #[test]
    fn generic_mode_admits_above_the_floor() {
        let probe = FixedProbe(100_000);
        assert_eq!(gate(&probe, None, 65_536).unwrap(), Admission::Admit);
    }

    #[test]
    fn generic_mode_refuses_below_the_floor() {
        let probe = FixedProbe(10_000);
        assert_eq!(gate(&probe, None, 65_536).unwrap(), Admission::Refuse);
    }

    #[test]
    fn specific_mode_accounts_for_the_estimated_task_size() {
        let probe = FixedProbe(100_000);
        assert_eq!(gate(&probe, Some(50_000), 65_536).unwrap(), Admission::Refuse);
        assert_eq!(gate(&probe, Some(10_000), 65_536).unwrap(), Admission::Admit);
    }

    #[test]
    fn specific_mode_does_not_underflow_when_task_exceeds_available() {
        let probe = FixedProbe(1_000);
        assert_eq!(gate(&probe, Some(50_000), 65_536).unwrap(), Admission::Refuse);
    }

    #[test]
    fn parses_mem_available_line() {
        let meminfo = "MemTotal:       16384000 kB\nMemAvailable:    8192000 kB\nMemFree: 100 kB\n";
        assert_eq!(parse_mem_available(meminfo).unwrap(), 8_192_000);
    }

    #[test]
    fn missing_mem_available_line_is_an_error() {
        assert!(parse_mem_available("MemTotal: 16384000 kB\n").is_err());
    }
}
