//! Bounded-concurrency scan orchestration.
//!
//! [`run_scan`] validates a [`ScanOptions`], then hands every target to a
//! [`Scheduler`] which runs one [`RelayProbe`](crate::relay::RelayProbe) per
//! host on its own OS thread. At most `concurrency` tasks run at once: each
//! holds a [`Permit`] from [`Slots`] and releases it when it ends, so no
//! separate reaper is needed. A [`CancelToken`] stops admission and unwinds
//! in-flight conversations.

mod error;
mod options;
mod report;
mod scheduler;
mod slots;
mod spawn;
mod store;

pub use error::{ConfigError, ScanError, StoreError};
pub use options::ScanOptions;
pub use report::{ScanReport, ScanSummary};
pub use scheduler::{Probe, Scheduler};
pub use slots::{CancelToken, Permit, Slots};
pub use spawn::{OsThreads, RetryPolicy, SpawnTask, Task};
pub use store::HostStore;

use std::sync::Arc;

use tracing::debug;

use crate::relay::RelayProbe;

/// Scans `options.targets` with the plaintext TCP transport.
pub fn run_scan(options: &ScanOptions) -> Result<ScanReport, ScanError> {
    run_scan_with_cancel(options, &CancelToken::new())
}

/// Same as [`run_scan`], aborting early once `cancel` fires.
pub fn run_scan_with_cancel(
    options: &ScanOptions,
    cancel: &CancelToken,
) -> Result<ScanReport, ScanError> {
    options.validate()?;
    debug!(host_deadline = ?options.host_deadline(), "per-host time bound");
    let options = Arc::new(options.clone());
    let probe = RelayProbe::from_options(Arc::clone(&options));
    Scheduler::new(Arc::new(probe), options.concurrency)
        .with_retry(RetryPolicy::from(options.as_ref()))
        .with_cancel(cancel.clone())
        .run(&options.targets)
}
