use std::sync::Arc;

use anyhow::Result;

use events::CounterRecord;

use crate::core::table::CounterTable;

/// Read access to a set of counter records, used by consumers taking
/// snapshots concurrently with the probes updating the records.
pub trait SnapshotReader: Send {
    /// Name of the source, used to label its records.
    fn name(&self) -> &str;
    /// Maximum number of records the source can hold, if known.
    fn capacity(&self) -> Option<u32>;
    /// Reads all records currently in the source. The result is not a
    /// transaction: records updated during the read can be seen either before
    /// or after their update.
    fn read_all(&self) -> Result<Vec<CounterRecord>>;
}

impl SnapshotReader for CounterTable {
    fn name(&self) -> &str {
        CounterTable::name(self)
    }

    fn capacity(&self) -> Option<u32> {
        Some(CounterTable::capacity(self) as u32)
    }

    fn read_all(&self) -> Result<Vec<CounterRecord>> {
        Ok(self.snapshot())
    }
}

impl<T: SnapshotReader + Sync + ?Sized> SnapshotReader for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn capacity(&self) -> Option<u32> {
        (**self).capacity()
    }

    fn read_all(&self) -> Result<Vec<CounterRecord>> {
        (**self).read_all()
    }
}
