//! Name registry for live rings, owned by the sequencer task.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::RingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RingSlot {
    /// A create command is in flight; the engine has not assigned an index yet.
    Creating,
    Live(u32),
}

/// Maps ring names to engine ring indices.
#[derive(Debug, Default)]
pub struct RingStore {
    rings: HashMap<Bytes, RingSlot>,
}

impl RingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` refers to a live ring.
    pub fn contains(&self, name: &[u8]) -> bool {
        matches!(self.rings.get(name), Some(RingSlot::Live(_)))
    }

    /// Engine index of a live ring.
    pub fn index(&self, name: &[u8]) -> Result<u32, RingError> {
        match self.rings.get(name) {
            Some(RingSlot::Live(index)) => Ok(*index),
            Some(RingSlot::Creating) | None => Err(RingError::RingNotFound),
        }
    }

    /// Reserve `name` for a create that is about to be sent.
    pub fn begin_create(&mut self, name: Bytes) -> Result<(), RingError> {
        if self.rings.contains_key(&name) {
            return Err(RingError::RingExists);
        }
        self.rings.insert(name, RingSlot::Creating);
        Ok(())
    }

    /// Resolve a reservation: register the index, or release the name when the
    /// create failed.
    pub fn finish_create(&mut self, name: &Bytes, index: Option<u32>) {
        match index {
            Some(index) => {
                self.rings.insert(name.clone(), RingSlot::Live(index));
            },
            None => {
                if self.rings.get(name) == Some(&RingSlot::Creating) {
                    self.rings.remove(name);
                }
            },
        }
    }

    /// Drop `name` if it still points at `index`.
    pub fn remove(&mut self, name: &Bytes, index: u32) {
        if self.rings.get(name) == Some(&RingSlot::Live(index)) {
            self.rings.remove(name);
        }
    }

    /// Number of live rings.
    pub fn len(&self) -> usize {
        self.rings
            .values()
            .filter(|slot| matches!(slot, RingSlot::Live(_)))
            .count()
    }
}
