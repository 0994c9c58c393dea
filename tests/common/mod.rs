#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use hashring::{
    HashRing,
    config::RingConfig,
    engine::Port,
    protocol::{
        Command,
        Response,
    },
};
use tokio::sync::mpsc;

/// Engine stand-in driven by the test: it sees every command frame the
/// sequencer sends and writes whatever response frames the test chooses.
pub struct ScriptedEngine {
    pub commands: mpsc::Receiver<Bytes>,
    pub responses: mpsc::Sender<Bytes>,
}

impl ScriptedEngine {
    pub async fn next_command(&mut self) -> Command {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.commands.recv())
            .await
            .expect("timed out waiting for a command frame")
            .expect("command channel closed");
        Command::decode(&frame).expect("sequencer sent an undecodable command")
    }

    pub async fn reply(&self, response: Response) {
        self.responses
            .send(response.encode())
            .await
            .expect("response channel closed");
    }

    pub async fn reply_raw(&self, frame: &'static [u8]) {
        self.responses
            .send(Bytes::from_static(frame))
            .await
            .expect("response channel closed");
    }
}

pub fn config(capacity: usize, call_timeout_ms: u64) -> RingConfig {
    RingConfig {
        channel_capacity: capacity,
        call_timeout_ms,
        ..RingConfig::default()
    }
}

/// A handle whose sequencer talks to a [`ScriptedEngine`] instead of a real one.
pub fn scripted(config: &RingConfig) -> (HashRing, ScriptedEngine) {
    let (command_tx, command_rx) = mpsc::channel(config.channel_capacity);
    let (response_tx, response_rx) = mpsc::channel(config.channel_capacity);
    let ring = HashRing::with_port(Port::new(command_tx, response_rx), config);
    (
        ring,
        ScriptedEngine {
            commands: command_rx,
            responses: response_tx,
        },
    )
}

/// Register `name` against a scripted engine, answering the create with `index`.
pub async fn create_scripted(ring: &HashRing, engine: &mut ScriptedEngine, name: &'static str, index: u32) {
    let create = {
        let ring = ring.clone();
        tokio::spawn(async move { ring.create_ring(name, 8, Default::default()).await })
    };
    assert!(matches!(engine.next_command().await, Command::CreateRing { replicas: 8, .. }));
    engine.reply(Response::RingIndex(index)).await;
    create.await.unwrap().unwrap();
}

pub fn names(nodes: &[Bytes]) -> Vec<String> {
    nodes
        .iter()
        .map(|node| String::from_utf8_lossy(node).into_owned())
        .collect()
}
