#![forbid(unsafe_code)]
//! relayscan: bounded-concurrency SMTP open-relay scanner over IPv4 ranges

pub mod relay;
pub mod scan;
pub mod targets;

pub use relay::{
    CheckResult, HostRecord, RelayAddress, RelayOutcome, RelayProbe, Rule, RuleError, RuleSet,
    SmtpReply, Stage, StageFailure,
};
pub use scan::{
    CancelToken, ConfigError, ScanError, ScanOptions, ScanReport, ScanSummary, Scheduler,
    run_scan, run_scan_with_cancel,
};
pub use targets::{AddressRange, OctetSpan, TargetError, Targets};
