use std::io;
use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::relay::HostRecord;
use crate::targets::Targets;

use super::error::{ConfigError, ScanError};
use super::report::ScanReport;
use super::slots::{CancelToken, Slots};
use super::spawn::{OsThreads, RetryPolicy, SpawnTask};
use super::store::HostStore;

/// Per-host work run inside a scan task.
pub trait Probe: Send + Sync {
    fn probe(&self, index: usize, address: Ipv4Addr, cancel: &CancelToken) -> HostRecord;
}

/// Bounded-concurrency dispatcher: one task per host, at most `limit` at a
/// time, admitted in enumeration order.
pub struct Scheduler<P, S = OsThreads> {
    probe: Arc<P>,
    spawner: S,
    slots: Arc<Slots>,
    retry: RetryPolicy,
    cancel: CancelToken,
}

enum Admission {
    Started,
    Cancelled,
}

/// A task that could not be started within the retry budget.
struct SpawnFailure {
    index: usize,
    attempts: u32,
    source: io::Error,
}

impl<P: Probe + 'static> Scheduler<P, OsThreads> {
    pub fn new(probe: Arc<P>, limit: usize) -> Self {
        Self {
            probe,
            spawner: OsThreads::default(),
            slots: Slots::new(limit),
            retry: RetryPolicy::default(),
            cancel: CancelToken::new(),
        }
    }
}

impl<P: Probe + 'static, S: SpawnTask> Scheduler<P, S> {
    pub fn with_spawner<S2: SpawnTask>(self, spawner: S2) -> Scheduler<P, S2> {
        Scheduler {
            probe: self.probe,
            spawner,
            slots: self.slots,
            retry: self.retry,
            cancel: self.cancel,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn slots(&self) -> &Arc<Slots> {
        &self.slots
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Scans every target and returns once all admitted tasks have finished.
    ///
    /// Per-host problems end up in the returned records. The only error is a
    /// task that could not be started within the retry budget; in-flight
    /// tasks are cancelled and drained first, and the error carries the
    /// report of everything that did run.
    pub fn run(&self, targets: &Targets) -> Result<ScanReport, ScanError> {
        let count = targets.count();
        if usize::try_from(count).is_err() {
            return Err(ConfigError::RangeTooLarge {
                count,
                ceiling: usize::MAX as u64,
            }
            .into());
        }

        let started = Instant::now();
        let mut store = HostStore::with_targets(targets);
        let (tx, rx) = mpsc::channel::<(usize, HostRecord)>();
        info!(hosts = count, limit = self.slots.limit(), "scan started");

        let mut admitted = 0usize;
        let mut failure = None;
        for (index, address) in targets.iter().enumerate() {
            match self.admit(index, address, &tx) {
                Ok(Admission::Started) => admitted += 1,
                Ok(Admission::Cancelled) => {
                    info!(admitted, "admission stopped by cancellation");
                    break;
                }
                Err(err) => {
                    warn!(index, attempts = err.attempts, error = %err.source, "aborting scan");
                    self.cancel.cancel();
                    failure = Some(err);
                    break;
                }
            }
        }
        drop(tx);

        for (index, record) in rx {
            if let Err(err) = store.complete(index, record) {
                warn!(index, error = %err, "discarding scan result");
            }
        }
        self.slots.wait_idle();
        store.finalize(admitted);
        if let Some(failure) = &failure {
            store.mark_unstarted(
                failure.index,
                format!("scan task not started: {}", failure.source),
            );
        }

        let report = ScanReport {
            hosts: store.into_records(),
            cancelled: self.cancel.is_cancelled(),
            elapsed: started.elapsed(),
            peak_active: self.slots.peak(),
        };
        info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            summary = %report.summary(),
            "scan finished"
        );

        match failure {
            Some(SpawnFailure {
                index,
                attempts,
                source,
            }) => Err(ScanError::SpawnExhausted {
                index,
                attempts,
                source,
                report: Box::new(report),
            }),
            None => Ok(report),
        }
    }

    fn admit(
        &self,
        index: usize,
        address: Ipv4Addr,
        tx: &Sender<(usize, HostRecord)>,
    ) -> Result<Admission, SpawnFailure> {
        let mut attempt = 0u32;
        loop {
            let Some(permit) = self.slots.acquire(&self.cancel) else {
                return Ok(Admission::Cancelled);
            };
            let probe = Arc::clone(&self.probe);
            let cancel = self.cancel.clone();
            let tx = tx.clone();
            let task = Box::new(move || {
                let _permit = permit;
                let record = probe.probe(index, address, &cancel);
                // the receiver outlives every task
                let _ = tx.send((index, record));
            });

            match self.spawner.spawn_task(format!("relayscan-{index}"), task) {
                Ok(()) => {
                    debug!(index, %address, "host admitted");
                    return Ok(Admission::Started);
                }
                Err(source) => {
                    attempt += 1;
                    if attempt > self.retry.retries {
                        return Err(SpawnFailure {
                            index,
                            attempts: attempt,
                            source,
                        });
                    }
                    let delay = self.retry.delay(attempt);
                    warn!(index, attempt, error = %source, ?delay, "scan task spawn failed, retrying");
                    thread::sleep(delay);
                }
            }
        }
    }
}
