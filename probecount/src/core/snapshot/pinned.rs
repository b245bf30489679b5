use std::{mem, path::Path};

use anyhow::{anyhow, bail, Result};
use libbpf_rs::{MapCore, MapFlags, MapHandle};
use log::debug;

use events::CounterRecord;

use super::SnapshotReader;

/// Default location of the pinned counting map.
pub const DEFAULT_MAP_PATH: &str = "/run/probes/maps/rcount";

/// Reads counter records out of a BPF hash map, usually pinned on a bpffs by
/// the program owning it. Keys and values must both be `u32`.
pub struct PinnedMapReader {
    name: String,
    map: MapHandle,
}

impl PinnedMapReader {
    /// Opens the map pinned at `path`.
    pub fn open<P: AsRef<Path>>(name: &str, path: P) -> Result<Self> {
        let path = path.as_ref();
        let map = MapHandle::from_pinned_path(path)
            .map_err(|e| anyhow!("Could not open pinned map {}: {e}", path.display()))?;

        Self::from_map(name, map)
    }

    /// Reads from an already opened map.
    pub fn from_map(name: &str, map: MapHandle) -> Result<Self> {
        let size = mem::size_of::<u32>() as u32;
        if map.key_size() != size || map.value_size() != size {
            bail!(
                "Map {name} has unexpected key/value sizes ({}/{}, expected {size}/{size})",
                map.key_size(),
                map.value_size(),
            );
        }

        debug!(
            "Reading map {name} ({:?}, {} entries max)",
            map.map_type(),
            map.max_entries()
        );

        Ok(PinnedMapReader {
            name: name.to_string(),
            map,
        })
    }
}

impl SnapshotReader for PinnedMapReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn capacity(&self) -> Option<u32> {
        Some(self.map.max_entries())
    }

    fn read_all(&self) -> Result<Vec<CounterRecord>> {
        let mut records = Vec::new();

        for raw_key in self.map.keys() {
            // The entry might have been removed since the key was listed.
            let raw_value = match self.map.lookup(&raw_key, MapFlags::ANY)? {
                Some(value) => value,
                None => continue,
            };

            let mut record = CounterRecord::default();
            let mut raw = raw_key;
            raw.extend_from_slice(&raw_value);
            plain::copy_from_bytes(&mut record, &raw)
                .or_else(|_| bail!("Cannot parse record from map {}", self.name))?;
            records.push(record);
        }

        Ok(records)
    }
}
