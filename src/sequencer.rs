//! Request sequencer: multiplexes many callers onto one ordered engine port.
//!
//! Responses are matched to callers purely by position. Every command sent
//! to the engine appends its caller to a FIFO; every response frame is handed
//! to the caller at the head. This only holds while the port delivers exactly
//! one response per command, in order, so any sign that alignment is lost
//! (closed port, undecodable frame, response with nobody waiting) is fatal.

use std::{
    collections::VecDeque,
    time::Instant,
};

use bytes::Bytes;
use tokio::sync::{
    mpsc,
    oneshot,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

use crate::{
    engine::Port,
    error::RingError,
    hash::{
        HashFunction,
        Mode,
    },
    observability::SequencerMetrics,
    protocol::{
        Command,
        Response,
    },
    store::RingStore,
};

pub(crate) type Reply = oneshot::Sender<Result<Response, RingError>>;

/// A ring operation addressed by ring name.
#[derive(Debug, Clone)]
pub(crate) enum Operation {
    CreateRing {
        name: Bytes,
        replicas: u32,
        hash_fn: HashFunction,
    },
    DeleteRing {
        name: Bytes,
    },
    AddNode {
        name: Bytes,
        node: Bytes,
    },
    RemoveNode {
        name: Bytes,
        node: Bytes,
    },
    FindNode {
        name: Bytes,
        key: Bytes,
    },
    SetMode {
        name: Bytes,
        mode: Mode,
    },
    CalcHash {
        name: Bytes,
        key: Bytes,
    },
    GetNodes {
        name: Bytes,
        key: Bytes,
        count: u32,
    },
}

#[derive(Debug)]
pub(crate) enum Request {
    /// Round trip through the engine.
    Call { op: Operation, reply: Reply },
    /// Stop accepting calls, drain the queue and close the engine port.
    Shutdown { reply: oneshot::Sender<()> },
}

/// Existence check answered from the name registry. Lookups travel on their
/// own channel so they are served even while the in-flight window is full.
#[derive(Debug)]
pub(crate) struct Lookup {
    pub(crate) name: Bytes,
    pub(crate) reply: oneshot::Sender<bool>,
}

/// Registry update to apply once a command's response arrives.
#[derive(Debug)]
enum Effect {
    None,
    Create(Bytes),
    Delete(Bytes, u32),
}

#[derive(Debug)]
struct PendingCall {
    seq: u64,
    command: &'static str,
    effect: Effect,
    reply: Reply,
    issued_at: Instant,
}

pub(crate) struct Sequencer {
    store: RingStore,
    port: Port,
    pending: VecDeque<PendingCall>,
    max_in_flight: usize,
    next_seq: u64,
    metrics: SequencerMetrics,
}

impl Sequencer {
    /// `max_in_flight` must not exceed the capacity of either port channel,
    /// so neither side of the port can block on a full buffer.
    pub(crate) fn new(port: Port, max_in_flight: usize) -> Self {
        Self {
            store: RingStore::new(),
            port,
            pending: VecDeque::new(),
            max_in_flight: max_in_flight.max(1),
            next_seq: 0,
            metrics: SequencerMetrics::new(),
        }
    }

    pub(crate) async fn run(mut self, mut requests: mpsc::Receiver<Request>, mut lookups: mpsc::Receiver<Lookup>) {
        info!(max_in_flight = self.max_in_flight, "request sequencer started");
        let mut accepting = true;
        let mut lookups_open = true;
        let mut shutdown_waiters = Vec::new();

        loop {
            if !accepting && self.pending.is_empty() {
                break;
            }

            let has_room = self.pending.len() < self.max_in_flight;
            tokio::select! {
                frame = self.port.responses.recv() => {
                    let outcome = match frame {
                        Some(frame) => self.deliver(frame),
                        None => Err(RingError::ChannelClosed),
                    };
                    if let Err(e) = outcome {
                        self.fail(e);
                        return;
                    }
                },
                lookup = lookups.recv(), if lookups_open => match lookup {
                    Some(Lookup { name, reply }) => {
                        let _ = reply.send(self.store.contains(&name));
                    },
                    None => lookups_open = false,
                },
                request = requests.recv(), if accepting && has_room => match request {
                    Some(Request::Call { op, reply }) => {
                        if let Err(e) = self.issue(op, reply).await {
                            self.fail(e);
                            return;
                        }
                    },
                    Some(Request::Shutdown { reply }) => {
                        info!(pending = self.pending.len(), "shutdown requested, draining");
                        accepting = false;
                        shutdown_waiters.push(reply);
                    },
                    None => {
                        debug!(pending = self.pending.len(), "all callers gone, draining");
                        accepting = false;
                    },
                },
            }
        }

        // Closing the command side tells the engine to stop; its response side
        // closing in turn acknowledges that it has.
        let Port {
            commands,
            mut responses,
        } = self.port;
        drop(commands);
        while let Some(frame) = responses.recv().await {
            warn!(len = frame.len(), "dropping unsolicited response during shutdown");
        }

        // Calls queued behind the shutdown request are never issued.
        requests.close();
        while let Ok(request) = requests.try_recv() {
            match request {
                Request::Call { reply, .. } => {
                    let _ = reply.send(Err(RingError::ChannelClosed));
                },
                Request::Shutdown { reply } => shutdown_waiters.push(reply),
            }
        }

        lookups.close();
        while let Ok(Lookup { name, reply }) = lookups.try_recv() {
            let _ = reply.send(self.store.contains(&name));
        }

        info!(rings = self.store.len(), "request sequencer stopped");
        for waiter in shutdown_waiters {
            let _ = waiter.send(());
        }
    }

    /// Resolve the ring name, send the command and queue the caller.
    ///
    /// Calls that fail name resolution are answered immediately and never
    /// reach the queue. An `Err` means the port is unusable.
    async fn issue(&mut self, op: Operation, reply: Reply) -> Result<(), RingError> {
        let (command, effect) = match self.prepare(op) {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = reply.send(Err(e));
                return Ok(());
            },
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        let name = command.name();
        let frame = command.encode();

        self.pending.push_back(PendingCall {
            seq,
            command: name,
            effect,
            reply,
            issued_at: Instant::now(),
        });
        debug!(seq, command = name, pending = self.pending.len(), "issued command");

        self.port
            .commands
            .send(frame)
            .await
            .map_err(|_| RingError::ChannelClosed)
    }

    fn prepare(&mut self, op: Operation) -> Result<(Command, Effect), RingError> {
        let prepared = match op {
            Operation::CreateRing {
                name,
                replicas,
                hash_fn,
            } => {
                self.store.begin_create(name.clone())?;
                (Command::CreateRing { replicas, hash_fn }, Effect::Create(name))
            },
            Operation::DeleteRing { name } => {
                let index = self.store.index(&name)?;
                (Command::DeleteRing { index }, Effect::Delete(name, index))
            },
            Operation::AddNode { name, node } => {
                let index = self.store.index(&name)?;
                (Command::AddNode { index, node }, Effect::None)
            },
            Operation::RemoveNode { name, node } => {
                let index = self.store.index(&name)?;
                (Command::RemoveNode { index, node }, Effect::None)
            },
            Operation::FindNode { name, key } => {
                let index = self.store.index(&name)?;
                (Command::FindNode { index, key }, Effect::None)
            },
            Operation::SetMode { name, mode } => {
                let index = self.store.index(&name)?;
                (Command::SetMode { index, mode }, Effect::None)
            },
            Operation::CalcHash { name, key } => {
                let index = self.store.index(&name)?;
                (Command::CalcHash { index, key }, Effect::None)
            },
            Operation::GetNodes { name, key, count } => {
                let index = self.store.index(&name)?;
                (Command::GetNodes { index, count, key }, Effect::None)
            },
        };
        Ok(prepared)
    }

    /// Hand one response frame to the oldest pending caller.
    fn deliver(&mut self, frame: Bytes) -> Result<(), RingError> {
        let Some(call) = self.pending.pop_front() else {
            return Err(RingError::UnexpectedResponse("response with no pending caller"));
        };

        let response = match Response::decode(&frame) {
            Ok(response) => response,
            Err(e) => {
                let err = RingError::from(e);
                let _ = call.reply.send(Err(err.clone()));
                return Err(err);
            },
        };

        match (&call.effect, &response) {
            (Effect::Create(name), Response::RingIndex(index)) => {
                self.store.finish_create(name, Some(*index));
                info!(ring = %String::from_utf8_lossy(name), index, "ring registered");
            },
            (Effect::Create(name), _) => self.store.finish_create(name, None),
            (Effect::Delete(name, index), Response::Ok) => {
                self.store.remove(name, *index);
                info!(ring = %String::from_utf8_lossy(name), index, "ring unregistered");
            },
            _ => {},
        }

        self.metrics
            .record(call.command, response.kind(), call.issued_at.elapsed());
        debug!(seq = call.seq, command = call.command, response = response.kind(), "delivering response");

        let result = match response {
            Response::Error(status) => Err(RingError::from(status)),
            other => Ok(other),
        };
        if call.reply.send(result).is_err() {
            warn!(seq = call.seq, command = call.command, "caller went away, discarding response");
        }
        Ok(())
    }

    /// Fail every pending caller after a fault that breaks alignment.
    fn fail(&mut self, err: RingError) {
        error!(error = %err, pending = self.pending.len(), "engine channel fault, stopping sequencer");
        for call in self.pending.drain(..) {
            let _ = call.reply.send(Err(RingError::ChannelClosed));
        }
    }
}
