use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{bail, Result};

use events::{CounterKey, CounterRecord};

/// Errors reported by table operations. None of them is fatal, they tell the
/// caller which path to take next.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// A record already exists for the key: a prior or concurrent insertion
    /// won.
    #[error("Record already exists")]
    AlreadyExists,
    /// No published record exists for the key.
    #[error("Record not found")]
    NotFound,
    /// All slots are used by other keys.
    #[error("Table capacity ({0}) exceeded")]
    CapacityExceeded(usize),
}

// Key word of a slot: free, or the key tagged with SLOT_USED once claimed. A
// claimed slot is never released.
const SLOT_FREE: u64 = 0;
const SLOT_USED: u64 = 1 << 32;
// Count word of a slot: zero until the inserter publishes the initial count,
// then the count tagged with COUNT_VALID.
const COUNT_VALID: u64 = 1 << 32;

// Fibonacci hashing multiplier (2^64 / golden ratio).
const HASH_MULTIPLIER: u64 = 0x9e37_79b9_7f4a_7c15;

#[derive(Default)]
struct Slot {
    key: AtomicU64,
    count: AtomicU64,
}

impl Slot {
    /// Returns the count of the slot if it was published.
    fn published(&self) -> Option<u32> {
        let count = self.count.load(Ordering::Acquire);
        (count & COUNT_VALID != 0).then_some(count as u32)
    }
}

/// Fixed-capacity mapping from keys to counts.
///
/// Slots live in an open-addressed array and are probed linearly from the
/// hash of the key. Each slot is two atomic words, the key (claimed once with a
/// compare-and-swap) and the count. There is no lock: operations on different
/// keys never wait for each other and every operation visits at most
/// `capacity` slots.
///
/// Records are never removed, which gives the following guarantees:
/// - At most one record exists per key.
/// - The count of a record never decreases.
/// - A reader never sees a partially written record.
pub struct CounterTable {
    name: String,
    slots: Box<[Slot]>,
}

impl CounterTable {
    /// Capacity of the table used by the SSL_read instrumentation.
    pub const DEFAULT_CAPACITY: usize = 10;

    pub fn new(name: &str, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            bail!("Table {name} must have a non-zero capacity");
        }
        if capacity > u32::MAX as usize {
            bail!("Table {name} capacity ({capacity}) is too large");
        }

        Ok(Self {
            name: name.to_string(),
            slots: (0..capacity).map(|_| Slot::default()).collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of published records.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.published().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots a key can live in, in probing order.
    fn probe_seq(&self, key: CounterKey) -> impl Iterator<Item = &Slot> {
        let len = self.slots.len();
        let home = ((key as u64).wrapping_mul(HASH_MULTIPLIER) >> 32) as usize % len;
        (0..len).map(move |i| &self.slots[(home + i) % len])
    }

    /// Finds the slot claimed for a key, published or not.
    fn find(&self, key: CounterKey) -> Option<&Slot> {
        let tagged = SLOT_USED | key as u64;
        for slot in self.probe_seq(key) {
            match slot.key.load(Ordering::Acquire) {
                // Slots are claimed in probing order and never released, the
                // key can't be further away.
                SLOT_FREE => return None,
                used if used == tagged => return Some(slot),
                _ => continue,
            }
        }
        None
    }

    /// Returns the current record for a key, if any.
    pub fn lookup(&self, key: CounterKey) -> Option<CounterRecord> {
        self.find(key)
            .and_then(Slot::published)
            .map(|count| CounterRecord::new(key, count))
    }

    /// Creates a record for a key, only if none exists.
    pub fn insert_if_absent(&self, key: CounterKey, initial: u32) -> Result<(), TableError> {
        let tagged = SLOT_USED | key as u64;

        for slot in self.probe_seq(key) {
            let mut current = slot.key.load(Ordering::Acquire);
            if current == SLOT_FREE {
                match slot.key.compare_exchange(
                    SLOT_FREE,
                    tagged,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        slot.count
                            .store(COUNT_VALID | initial as u64, Ordering::Release);
                        return Ok(());
                    }
                    Err(winner) => current = winner,
                }
            }

            if current == tagged {
                return Err(TableError::AlreadyExists);
            }
        }

        Err(TableError::CapacityExceeded(self.slots.len()))
    }

    /// Replaces the count of an existing record.
    ///
    /// The count never goes backward: a value computed from a stale lookup is
    /// absorbed by a concurrent, higher, update.
    pub fn update_existing(&self, key: CounterKey, count: u32) -> Result<(), TableError> {
        let slot = self.find(key).ok_or(TableError::NotFound)?;
        if slot.published().is_none() {
            return Err(TableError::NotFound);
        }

        slot.count
            .fetch_max(COUNT_VALID | count as u64, Ordering::AcqRel);
        Ok(())
    }

    /// Atomically increments the count of an existing record, saturating at
    /// u32::MAX. Returns the new count.
    pub fn increment(&self, key: CounterKey) -> Result<u32, TableError> {
        let slot = self.find(key).ok_or(TableError::NotFound)?;

        slot.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current & COUNT_VALID != 0)
                    .then(|| COUNT_VALID | (current as u32).saturating_add(1) as u64)
            })
            .map(|previous| (previous as u32).saturating_add(1))
            .map_err(|_| TableError::NotFound)
    }

    /// Fills `records` with all the published records. Each record is
    /// internally consistent, but the set is not read in a single transaction.
    pub fn snapshot_into(&self, records: &mut Vec<CounterRecord>) {
        records.clear();
        records.extend(self.slots.iter().filter_map(|slot| {
            let key = slot.key.load(Ordering::Acquire);
            if key == SLOT_FREE {
                return None;
            }
            slot.published()
                .map(|count| CounterRecord::new(key as u32, count))
        }));
    }

    /// Returns all the published records.
    pub fn snapshot(&self) -> Vec<CounterRecord> {
        let mut records = Vec::with_capacity(self.slots.len());
        self.snapshot_into(&mut records);
        records
    }
}

impl fmt::Debug for CounterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterTable")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
