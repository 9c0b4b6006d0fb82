use crate::relay::HostRecord;
use crate::targets::Targets;

use super::error::StoreError;

/// Fixed-size table of host records indexed by scan position.
#[derive(Debug, Clone, Default)]
pub struct HostStore {
    records: Vec<HostRecord>,
}

impl HostStore {
    /// Pre-allocates one pending record per target.
    pub fn with_targets(targets: &Targets) -> Self {
        let records = targets
            .iter()
            .enumerate()
            .map(|(index, address)| HostRecord::new(index, address))
            .collect();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&HostRecord> {
        self.records.get(index)
    }

    /// Stores the finished record of `index`. Each index accepts exactly one
    /// completion.
    pub fn complete(&mut self, index: usize, mut record: HostRecord) -> Result<(), StoreError> {
        let len = self.records.len();
        let slot = self
            .records
            .get_mut(index)
            .ok_or(StoreError::OutOfRange { index, len })?;
        if slot.visited {
            return Err(StoreError::AlreadyCompleted { index });
        }
        record.index = index;
        record.address = slot.address;
        record.visited = true;
        *slot = record;
        Ok(())
    }

    /// Marks what never reported back: indices below `admitted` had a task
    /// that vanished, the rest were never admitted.
    pub(crate) fn finalize(&mut self, admitted: usize) {
        for record in self.records.iter_mut().filter(|r| !r.visited) {
            if record.index < admitted {
                record.fatal_error = true;
                record.error = Some("scan task ended without reporting".to_string());
            } else {
                record.cancelled = true;
            }
        }
    }

    /// The task for `index` was never started.
    pub(crate) fn mark_unstarted(&mut self, index: usize, reason: String) {
        if let Some(record) = self.records.get_mut(index).filter(|r| !r.visited) {
            record.cancelled = false;
            record.fatal_error = true;
            record.error = Some(reason);
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HostRecord> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<HostRecord> {
        self.records
    }
}
