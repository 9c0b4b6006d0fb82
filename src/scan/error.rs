use thiserror::Error;

use crate::relay::RuleError;
use crate::targets::TargetError;

use super::report::ScanReport;

/// Configuration problems, raised before any scan task starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("concurrency limit must be at least 1")]
    ZeroConcurrency,
    #[error("{name} timeout must be greater than zero")]
    ZeroTimeout { name: &'static str },
    #[error("port must not be 0")]
    ZeroPort,
    #[error("no bounds given for any octet (255^4 addresses); pass allow_large_scan to confirm")]
    UnboundedRange,
    #[error("{count} targets exceed the safety ceiling of {ceiling}; pass allow_large_scan to confirm")]
    RangeTooLarge { count: u64, ceiling: u64 },
    #[error("rules use {{name}}/{{domain}} but no relay address was given")]
    MissingRelayAddress,
    #[error("invalid target specification: {0}")]
    Targets(#[from] TargetError),
    #[error("invalid rule set: {0}")]
    Rules(#[from] RuleError),
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Admission stopped at host `index`. `report` holds every host that
    /// completed before the abort; the rest are marked cancelled.
    #[error("could not start scan task for host #{index} after {attempts} attempt(s): {source}")]
    SpawnExhausted {
        index: usize,
        attempts: u32,
        #[source]
        source: std::io::Error,
        report: Box<ScanReport>,
    },
}

impl ScanError {
    /// Results gathered before the scan was aborted, if it got that far.
    pub fn partial_report(&self) -> Option<&ScanReport> {
        match self {
            Self::SpawnExhausted { report, .. } => Some(report.as_ref()),
            Self::Config(_) => None,
        }
    }
}

/// Misuse of the host store. Surfaced as a `fatal_error` host, never as a
/// scan failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("host index {index} is outside the store (len {len})")]
    OutOfRange { index: usize, len: usize },
    #[error("host index {index} was already completed")]
    AlreadyCompleted { index: usize },
}
