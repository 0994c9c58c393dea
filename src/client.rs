//! Public handle over the sequencer.
//!
//! [`HashRing`] turns each call into a named operation, sends it to the
//! sequencer task and waits for the matching response. Names, nodes and keys
//! are accepted as anything byte-like.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{
    mpsc,
    oneshot,
};
use tracing::warn;

use crate::{
    config::RingConfig,
    engine::{
        self,
        Port,
    },
    error::RingError,
    hash::{
        HashFunction,
        Mode,
    },
    protocol::Response,
    sequencer::{
        Lookup,
        Operation,
        Request,
        Sequencer,
    },
};

/// Cloneable handle to a running engine and its sequencer.
///
/// Dropping the last handle drains outstanding calls and stops both tasks.
#[derive(Debug, Clone)]
pub struct HashRing {
    requests: mpsc::Sender<Request>,
    lookups: mpsc::Sender<Lookup>,
    call_timeout: Option<Duration>,
    default_replicas: u32,
    default_hash_function: HashFunction,
}

impl HashRing {
    /// Spawn an engine and a sequencer on the current tokio runtime.
    pub fn start(config: &RingConfig) -> Self {
        let capacity = config.channel_capacity.max(1);
        let (port, _engine) = engine::spawn(capacity);
        Self::with_port(port, config)
    }

    /// Run a sequencer against an existing engine port. Both port channels
    /// must hold at least `config.channel_capacity` frames.
    pub fn with_port(port: Port, config: &RingConfig) -> Self {
        let capacity = config.channel_capacity.max(1);
        let (requests, request_rx) = mpsc::channel(capacity);
        let (lookups, lookup_rx) = mpsc::channel(capacity);
        tokio::spawn(Sequencer::new(port, capacity).run(request_rx, lookup_rx));

        Self {
            requests,
            lookups,
            call_timeout: config.call_timeout(),
            default_replicas: config.default_replicas,
            default_hash_function: config.default_hash_function,
        }
    }

    pub async fn create_ring(
        &self,
        name: impl AsRef<[u8]>,
        replicas: u32,
        hash_fn: HashFunction,
    ) -> Result<(), RingError> {
        let op = Operation::CreateRing {
            name: to_bytes(name)?,
            replicas,
            hash_fn,
        };
        expect_ok(self.call(op).await?)
    }

    /// Create a ring with the configured default replica count and hash function.
    pub async fn create_default_ring(&self, name: impl AsRef<[u8]>) -> Result<(), RingError> {
        self.create_ring(name, self.default_replicas, self.default_hash_function)
            .await
    }

    pub async fn delete_ring(&self, name: impl AsRef<[u8]>) -> Result<(), RingError> {
        let op = Operation::DeleteRing { name: to_bytes(name)? };
        expect_ok(self.call(op).await?)
    }

    /// Answered locally by the sequencer, without a round trip to the engine
    /// and without waiting behind calls in flight.
    pub async fn has_ring(&self, name: impl AsRef<[u8]>) -> Result<bool, RingError> {
        let (reply, rx) = oneshot::channel();
        self.lookups
            .send(Lookup {
                name: to_bytes(name)?,
                reply,
            })
            .await
            .map_err(|_| RingError::ChannelClosed)?;
        rx.await.map_err(|_| RingError::ChannelClosed)
    }

    pub async fn add_node(&self, name: impl AsRef<[u8]>, node: impl AsRef<[u8]>) -> Result<(), RingError> {
        let op = Operation::AddNode {
            name: to_bytes(name)?,
            node: to_bytes(node)?,
        };
        expect_ok(self.call(op).await?)
    }

    pub async fn remove_node(&self, name: impl AsRef<[u8]>, node: impl AsRef<[u8]>) -> Result<(), RingError> {
        let op = Operation::RemoveNode {
            name: to_bytes(name)?,
            node: to_bytes(node)?,
        };
        expect_ok(self.call(op).await?)
    }

    pub async fn find_node(&self, name: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Result<Bytes, RingError> {
        let op = Operation::FindNode {
            name: to_bytes(name)?,
            key: to_bytes(key)?,
        };
        match self.call(op).await? {
            Response::Binary(node) => Ok(node),
            other => Err(RingError::UnexpectedResponse(other.kind())),
        }
    }

    /// Up to `count` distinct nodes for `key`, in ring walk order.
    pub async fn get_nodes(
        &self,
        name: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
        count: u32,
    ) -> Result<Vec<Bytes>, RingError> {
        let op = Operation::GetNodes {
            name: to_bytes(name)?,
            key: to_bytes(key)?,
            count,
        };
        match self.call(op).await? {
            Response::List(nodes) => Ok(nodes),
            other => Err(RingError::UnexpectedResponse(other.kind())),
        }
    }

    pub async fn calc_hash(&self, name: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Result<Bytes, RingError> {
        let op = Operation::CalcHash {
            name: to_bytes(name)?,
            key: to_bytes(key)?,
        };
        match self.call(op).await? {
            Response::Binary(digest) => Ok(digest),
            other => Err(RingError::UnexpectedResponse(other.kind())),
        }
    }

    pub async fn set_mode(&self, name: impl AsRef<[u8]>, mode: Mode) -> Result<(), RingError> {
        let op = Operation::SetMode {
            name: to_bytes(name)?,
            mode,
        };
        expect_ok(self.call(op).await?)
    }

    /// Stop the sequencer once every call already issued has been answered,
    /// then wait for the engine to close its port.
    pub async fn shutdown(&self) -> Result<(), RingError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Shutdown { reply })
            .await
            .map_err(|_| RingError::ChannelClosed)?;
        rx.await.map_err(|_| RingError::ChannelClosed)
    }

    async fn call(&self, op: Operation) -> Result<Response, RingError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Call { op, reply })
            .await
            .map_err(|_| RingError::ChannelClosed)?;

        let response = async { rx.await.unwrap_or(Err(RingError::ChannelClosed)) };
        match self.call_timeout {
            None => response.await,
            // The queued slot stays in place and its response is discarded on
            // arrival, so later callers stay aligned.
            Some(limit) => match tokio::time::timeout(limit, response).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_ms = limit.as_millis() as u64, "gave up waiting for engine response");
                    Err(RingError::Timeout)
                },
            },
        }
    }
}

fn to_bytes(value: impl AsRef<[u8]>) -> Result<Bytes, RingError> {
    let value = value.as_ref();
    if u32::try_from(value.len()).is_err() {
        return Err(RingError::InvalidArgument);
    }
    Ok(Bytes::copy_from_slice(value))
}

fn expect_ok(response: Response) -> Result<(), RingError> {
    match response {
        Response::Ok | Response::RingIndex(_) => Ok(()),
        other => Err(RingError::UnexpectedResponse(other.kind())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expect_ok() {
        assert_eq!(expect_ok(Response::Ok), Ok(()));
        assert_eq!(expect_ok(Response::RingIndex(4)), Ok(()));
        assert_eq!(
            expect_ok(Response::Binary(Bytes::new())),
            Err(RingError::UnexpectedResponse("binary"))
        );
    }

    #[tokio::test]
    async fn test_textual_and_binary_names_are_equivalent() {
        let ring = HashRing::start(&RingConfig::default());
        ring.create_ring("myring", 8, HashFunction::Sha1).await.unwrap();

        assert!(ring.has_ring(b"myring").await.unwrap());
        assert!(ring.has_ring(String::from("myring")).await.unwrap());
        ring.add_node(b"myring".to_vec(), "slotA").await.unwrap();
        assert_eq!(ring.find_node("myring", "keyA").await.unwrap(), Bytes::from_static(b"slotA"));

        ring.shutdown().await.unwrap();
    }
}
