//! The ring engine: every live ring, addressed by index, driven by binary
//! command frames.
//!
//! [`spawn`] runs an [`Engine`] on its own task. It reads one command frame at
//! a time and writes exactly one response frame per command, in order, so a
//! caller can correlate responses purely by position.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{
    debug,
    info,
    warn,
};

use crate::{
    consistent_hashring::ConsistentHashRing,
    error::RingError,
    hash::HashFunction,
    protocol::{
        Command,
        Response,
        Status,
    },
};

/// Caller side of the engine's ordered binary channel.
#[derive(Debug)]
pub struct Port {
    pub commands: mpsc::Sender<Bytes>,
    pub responses: mpsc::Receiver<Bytes>,
}

impl Port {
    /// Build a port from raw channel halves, e.g. to stand in for the engine.
    pub fn new(commands: mpsc::Sender<Bytes>, responses: mpsc::Receiver<Bytes>) -> Self {
        Self { commands, responses }
    }
}

/// Start an engine task. The task exits once the command side of the port is
/// dropped, closing the response side as its acknowledgment.
pub fn spawn(capacity: usize) -> (Port, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(capacity);
    let (response_tx, response_rx) = mpsc::channel(capacity);
    let handle = tokio::spawn(run(Engine::new(), command_rx, response_tx));
    (Port::new(command_tx, response_rx), handle)
}

async fn run(mut engine: Engine, mut commands: mpsc::Receiver<Bytes>, responses: mpsc::Sender<Bytes>) {
    info!("ring engine started");
    while let Some(frame) = commands.recv().await {
        let reply = engine.handle_frame(&frame);
        if responses.send(reply).await.is_err() {
            warn!("response channel closed, stopping ring engine");
            break;
        }
    }
    info!(rings = engine.ring_count(), "ring engine stopped");
}

/// Ring state keyed by index. Indices are never reused, so a stale index
/// cannot reach a newer ring.
#[derive(Debug, Default)]
pub struct Engine {
    rings: HashMap<u32, ConsistentHashRing>,
    next_index: u32,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ring_count(&self) -> usize {
        self.rings.len()
    }

    /// Decode, execute and encode one frame. Undecodable frames still get a
    /// response so the stream stays aligned.
    pub fn handle_frame(&mut self, frame: &Bytes) -> Bytes {
        let response = match Command::decode(frame) {
            Ok(command) => self.execute(command),
            Err(e) => {
                warn!(error = %e, "rejecting malformed command frame");
                Response::Error(Status::InvalidArgument)
            },
        };
        response.encode()
    }

    pub fn execute(&mut self, command: Command) -> Response {
        let name = command.name();
        let result = match command {
            Command::CreateRing { replicas, hash_fn } => self.create(replicas, hash_fn).map(Response::RingIndex),
            Command::DeleteRing { index } => self.delete(index).map(|()| Response::Ok),
            Command::AddNode { index, node } => self
                .ring_mut(index)
                .and_then(|ring| ring.add_node(node))
                .map(|()| Response::Ok),
            Command::RemoveNode { index, node } => self
                .ring_mut(index)
                .and_then(|ring| ring.remove_node(&node))
                .map(|()| Response::Ok),
            Command::FindNode { index, key } => self
                .ring(index)
                .and_then(|ring| ring.find_node(&key))
                .map(Response::Binary),
            Command::SetMode { index, mode } => self.ring_mut(index).map(|ring| {
                ring.set_mode(mode);
                Response::Ok
            }),
            Command::CalcHash { index, key } => self
                .ring(index)
                .map(|ring| Response::Binary(Bytes::copy_from_slice(&ring.calc_hash(&key)))),
            Command::GetNodes { index, count, key } => self
                .ring(index)
                .and_then(|ring| ring.get_nodes(&key, count))
                .map(Response::List),
        };

        match result {
            Ok(response) => {
                debug!(command = name, response = response.kind(), "executed command");
                response
            },
            Err(e) => {
                debug!(command = name, error = %e, "command failed");
                Response::Error(e.status().unwrap_or(Status::Unknown))
            },
        }
    }

    fn create(&mut self, replicas: u32, hash_fn: HashFunction) -> Result<u32, RingError> {
        let ring = ConsistentHashRing::new(replicas, hash_fn)?;
        let index = self.next_index;
        self.next_index = index.checked_add(1).ok_or(RingError::Unknown)?;
        self.rings.insert(index, ring);
        info!(index, replicas, hash_fn = ?hash_fn, "created ring");
        Ok(index)
    }

    fn delete(&mut self, index: u32) -> Result<(), RingError> {
        let missing = self.missing(index);
        self.rings.remove(&index).ok_or(missing)?;
        info!(index, "deleted ring");
        Ok(())
    }

    fn ring(&self, index: u32) -> Result<&ConsistentHashRing, RingError> {
        self.rings.get(&index).ok_or_else(|| self.missing(index))
    }

    fn ring_mut(&mut self, index: u32) -> Result<&mut ConsistentHashRing, RingError> {
        let missing = self.missing(index);
        self.rings.get_mut(&index).ok_or(missing)
    }

    /// Deleted rings are "not found"; indices never handed out are invalid.
    fn missing(&self, index: u32) -> RingError {
        if index < self.next_index {
            RingError::RingNotFound
        } else {
            RingError::InvalidRing
        }
    }
}
