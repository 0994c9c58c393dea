use std::collections::{
    BTreeMap,
    HashMap,
};

use bytes::Bytes;
use tracing::debug;

use crate::{
    error::RingError,
    hash::{
        HashFunction,
        Mode,
        POSITION_WIDTH,
    },
};

/// Largest node identifier accepted, bounded by the 2-byte length prefix used
/// when node lists go over the wire.
pub const MAX_NODE_LEN: usize = u16::MAX as usize;

/// A consistent hash ring over opaque byte-string node identifiers.
///
/// Each node owns `replicas` points on a `u64` circle. Keys map to the first
/// point at or after their own position, wrapping around to the lowest point.
#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    /// Points keyed by (position, insertion sequence). The sequence keeps
    /// colliding positions distinct and ordered by insertion.
    points: BTreeMap<(u64, u64), Bytes>,

    /// Number of points each present node owns.
    nodes: HashMap<Bytes, u32>,

    /// The number of virtual points per node.
    replicas: u32,

    hash_fn: HashFunction,
    mode: Mode,
    next_seq: u64,
}

impl ConsistentHashRing {
    /// Create an empty ring. `replicas` must be positive.
    pub fn new(replicas: u32, hash_fn: HashFunction) -> Result<Self, RingError> {
        if replicas == 0 {
            return Err(RingError::InvalidArgument);
        }

        Ok(ConsistentHashRing {
            points: BTreeMap::new(),
            nodes: HashMap::new(),
            replicas,
            hash_fn,
            mode: Mode::Normal,
            next_seq: 0,
        })
    }

    /// Add a node to the ring.
    ///
    /// A node that is already present has its points replaced by a fresh set
    /// generated under the current mode.
    pub fn add_node(&mut self, node: Bytes) -> Result<(), RingError> {
        if node.is_empty() || node.len() > MAX_NODE_LEN {
            return Err(RingError::InvalidArgument);
        }

        let mut positions = Vec::new();
        positions
            .try_reserve_exact(self.replicas as usize)
            .map_err(|_| RingError::Unknown)?;
        for i in 0..self.replicas {
            positions.push(self.mode.point(self.hash_fn, &node, i));
        }

        if self.nodes.contains_key(&node) {
            self.remove_node(&node)?;
        }

        for pos in positions {
            self.points.insert((pos, self.next_seq), node.clone());
            self.next_seq += 1;
        }
        self.nodes.insert(node.clone(), self.replicas);

        debug!(node = %String::from_utf8_lossy(&node), replicas = self.replicas, mode = ?self.mode, "added node to ring");
        Ok(())
    }

    /// Remove every point owned by `node`.
    pub fn remove_node(&mut self, node: &[u8]) -> Result<(), RingError> {
        if self.nodes.remove(node).is_none() {
            return Err(RingError::NodeNotFound);
        }

        self.points.retain(|_, owner| owner.as_ref() != node);
        debug!(node = %String::from_utf8_lossy(node), "removed node from ring");
        Ok(())
    }

    /// Get the node responsible for the given key.
    pub fn find_node(&self, key: &[u8]) -> Result<Bytes, RingError> {
        let start = self.key_position(key);
        self.points
            .range((start, 0)..)
            .chain(self.points.range(..(start, 0)))
            .map(|(_, node)| node.clone())
            .next()
            .ok_or(RingError::NodeNotFound)
    }

    /// Collect up to `count` distinct nodes walking clockwise from the key's
    /// position. Returns fewer when the ring holds fewer nodes.
    pub fn get_nodes(&self, key: &[u8], count: u32) -> Result<Vec<Bytes>, RingError> {
        if count == 0 {
            return Err(RingError::InvalidArgument);
        }
        if self.points.is_empty() {
            return Err(RingError::NodeNotFound);
        }

        let start = self.key_position(key);
        let max_distinct = (count as usize).min(self.nodes.len());
        let mut found: Vec<Bytes> = Vec::with_capacity(max_distinct);

        for (_, node) in self.points.range((start, 0)..).chain(self.points.range(..(start, 0))) {
            if !found.contains(node) {
                found.push(node.clone());
                if found.len() == max_distinct {
                    break;
                }
            }
        }

        Ok(found)
    }

    /// Raw position bytes of `key` under this ring's hash function.
    pub fn calc_hash(&self, key: &[u8]) -> [u8; POSITION_WIDTH] {
        self.hash_fn.position_bytes(key)
    }

    /// Switch the point-generation mode for subsequent adds and lookups.
    /// Points already on the ring are kept as they are.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn hash_function(&self) -> HashFunction {
        self.hash_fn
    }

    pub fn replicas(&self) -> u32 {
        self.replicas
    }

    pub fn contains_node(&self, node: &[u8]) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Points in ring order as (position, node).
    pub fn points(&self) -> impl Iterator<Item = (u64, &Bytes)> {
        self.points.iter().map(|(&(pos, _), node)| (pos, node))
    }

    fn key_position(&self, key: &[u8]) -> u64 {
        self.mode.key_position(self.hash_fn, key)
    }
}
