pub mod client;
pub mod config;
pub mod consistent_hashring;
pub mod engine;
pub mod error;
pub mod hash;
pub mod observability;
pub mod protocol;
mod sequencer;
mod store;

pub use client::HashRing;
pub use consistent_hashring::ConsistentHashRing;
pub use error::RingError;
pub use hash::{
    HashFunction,
    Mode,
};
