use std::io;
use std::thread;
use std::time::Duration;

use super::options::ScanOptions;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Starts one detached scan task. On error the task is dropped unrun.
pub trait SpawnTask: Send + Sync {
    fn spawn_task(&self, name: String, task: Task) -> io::Result<()>;
}

/// One OS thread per task.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsThreads {
    pub stack_size: Option<usize>,
}

impl SpawnTask for OsThreads {
    fn spawn_task(&self, name: String, task: Task) -> io::Result<()> {
        let mut builder = thread::Builder::new().name(name);
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        builder.spawn(task).map(drop)
    }
}

/// Bounded retry for task creation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Linear backoff: `backoff * attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            backoff: Duration::from_millis(200),
        }
    }
}

impl From<&ScanOptions> for RetryPolicy {
    fn from(options: &ScanOptions) -> Self {
        Self {
            retries: options.spawn_retries,
            backoff: options.spawn_backoff,
        }
    }
}
