use std::fmt;
use std::time::Duration;

use crate::relay::HostRecord;

/// Everything a finished scan hands to the reporting stage. `hosts` always
/// holds one record per target, in enumeration order.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub hosts: Vec<HostRecord>,
    pub cancelled: bool,
    pub elapsed: Duration,
    pub peak_active: usize,
}

impl ScanReport {
    /// Hosts with at least one `Passed` check, i.e. open relays.
    pub fn vulnerable(&self) -> impl Iterator<Item = &HostRecord> {
        self.hosts.iter().filter(|host| host.is_vulnerable())
    }

    pub fn summary(&self) -> ScanSummary {
        let mut summary = ScanSummary {
            hosts: self.hosts.len(),
            ..ScanSummary::default()
        };
        for host in &self.hosts {
            if host.smtp_open {
                summary.smtp_open += 1;
            } else if host.visited && !host.cancelled {
                summary.unreachable += 1;
            }
            if host.is_vulnerable() {
                summary.vulnerable += 1;
            }
            if host.fatal || host.fatal_error {
                summary.fatal += 1;
            }
            if host.cancelled {
                summary.cancelled += 1;
            }
            summary.checks += host.checks.len();
        }
        summary
    }
}

#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub hosts: usize,
    pub smtp_open: usize,
    pub unreachable: usize,
    pub vulnerable: usize,
    pub fatal: usize,
    pub cancelled: usize,
    pub checks: usize,
}

impl fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} host(s): {} smtp open, {} unreachable, {} open relay(s), {} fatal, {} cancelled, {} check(s)",
            self.hosts,
            self.smtp_open,
            self.unreachable,
            self.vulnerable,
            self.fatal,
            self.cancelled,
            self.checks
        )
    }
}
