use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use hashring::{
    ConsistentHashRing,
    HashFunction,
    HashRing,
    RingError,
    protocol::{
        Command,
        DecodeError,
        Response,
    },
};

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_get_their_own_answers() {
    // Small capacity so callers constantly contend for in-flight slots.
    let ring = HashRing::start(&common::config(4, 0));
    let nodes = ["alpha", "beta", "gamma", "delta", "epsilon"];

    let mut expected = Vec::new();
    for (i, hash_fn) in [HashFunction::Sha1, HashFunction::Md5].into_iter().enumerate() {
        let name = format!("ring-{i}");
        ring.create_ring(&name, 32, hash_fn).await.unwrap();
        let mut local = ConsistentHashRing::new(32, hash_fn).unwrap();
        for node in nodes {
            ring.add_node(&name, node).await.unwrap();
            local.add_node(Bytes::from_static(node.as_bytes())).unwrap();
        }
        expected.push((name, local));
    }

    let calls = (0..400).map(|i| {
        let ring = ring.clone();
        let (name, local) = &expected[i % expected.len()];
        let name = name.clone();
        let key = format!("key-{i}");
        let want = local.find_node(key.as_bytes()).unwrap();
        async move {
            let got = ring.find_node(&name, &key).await.unwrap();
            assert_eq!(got, want, "wrong answer for {key} on {name}");
        }
    });
    join_all(calls).await;

    ring.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_timed_out_call_keeps_queue_aligned() {
    let (ring, mut engine) = common::scripted(&common::config(8, 200));
    common::create_scripted(&ring, &mut engine, "r", 0).await;

    // Nobody answers, so the first call gives up.
    assert_eq!(ring.find_node("r", "first").await, Err(RingError::Timeout));
    assert!(matches!(engine.next_command().await, Command::FindNode { index: 0, .. }));

    let second = {
        let ring = ring.clone();
        tokio::spawn(async move { ring.find_node("r", "second").await })
    };
    assert!(matches!(engine.next_command().await, Command::FindNode { index: 0, .. }));

    // The late answer to the first call is discarded, not handed to the second.
    engine.reply(Response::Binary(Bytes::from_static(b"late"))).await;
    engine.reply(Response::Binary(Bytes::from_static(b"on-time"))).await;
    assert_eq!(second.await.unwrap(), Ok(Bytes::from_static(b"on-time")));
}

#[tokio::test]
async fn test_abandoned_caller_does_not_shift_responses() {
    let (ring, mut engine) = common::scripted(&common::config(8, 0));
    common::create_scripted(&ring, &mut engine, "r", 3).await;

    let abandoned = {
        let ring = ring.clone();
        tokio::spawn(async move { ring.find_node("r", "gone").await })
    };
    assert!(matches!(engine.next_command().await, Command::FindNode { index: 3, .. }));
    abandoned.abort();
    assert!(abandoned.await.unwrap_err().is_cancelled());
    engine.reply(Response::Binary(Bytes::from_static(b"nobody"))).await;

    let kept = {
        let ring = ring.clone();
        tokio::spawn(async move { ring.find_node("r", "kept").await })
    };
    assert!(matches!(engine.next_command().await, Command::FindNode { index: 3, .. }));
    engine.reply(Response::Binary(Bytes::from_static(b"somebody"))).await;
    assert_eq!(kept.await.unwrap(), Ok(Bytes::from_static(b"somebody")));
}

#[tokio::test]
async fn test_engine_errors_map_to_ring_errors() {
    let (ring, mut engine) = common::scripted(&common::config(8, 0));
    common::create_scripted(&ring, &mut engine, "r", 0).await;

    let call = {
        let ring = ring.clone();
        tokio::spawn(async move { ring.get_nodes("r", "k", 2).await })
    };
    assert_eq!(
        engine.next_command().await,
        Command::GetNodes {
            index: 0,
            count: 2,
            key: Bytes::from_static(b"k"),
        }
    );
    engine.reply(Response::Error(hashring::protocol::Status::InvalidRing)).await;
    assert_eq!(call.await.unwrap(), Err(RingError::InvalidRing));

    // A failed create releases the name.
    let create = {
        let ring = ring.clone();
        tokio::spawn(async move { ring.create_ring("other", 8, HashFunction::Md5).await })
    };
    assert!(matches!(engine.next_command().await, Command::CreateRing { .. }));
    engine.reply(Response::Error(hashring::protocol::Status::Unknown)).await;
    assert_eq!(create.await.unwrap(), Err(RingError::Unknown));
    assert!(!ring.has_ring("other").await.unwrap());
}

#[tokio::test]
async fn test_has_ring_answers_while_window_is_full() {
    let (ring, mut engine) = common::scripted(&common::config(1, 0));
    common::create_scripted(&ring, &mut engine, "r", 0).await;

    // One call in flight fills the window; a second waits behind it.
    let head = {
        let ring = ring.clone();
        tokio::spawn(async move { ring.find_node("r", "a").await })
    };
    engine.next_command().await;
    let queued = {
        let ring = ring.clone();
        tokio::spawn(async move { ring.find_node("r", "b").await })
    };

    let lookup = tokio::time::timeout(Duration::from_secs(1), ring.has_ring("r")).await;
    assert_eq!(lookup, Ok(Ok(true)));
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(1), ring.has_ring("missing")).await,
        Ok(Ok(false))
    );
    assert!(!head.is_finished());

    engine.reply(Response::Binary(Bytes::from_static(b"x"))).await;
    assert_eq!(head.await.unwrap(), Ok(Bytes::from_static(b"x")));
    assert!(matches!(engine.next_command().await, Command::FindNode { index: 0, .. }));
    engine.reply(Response::Binary(Bytes::from_static(b"y"))).await;
    assert_eq!(queued.await.unwrap(), Ok(Bytes::from_static(b"y")));
}

#[tokio::test]
async fn test_closed_engine_fails_pending_and_later_calls() {
    let (ring, mut engine) = common::scripted(&common::config(8, 0));
    common::create_scripted(&ring, &mut engine, "r", 0).await;

    let pending = {
        let ring = ring.clone();
        tokio::spawn(async move { ring.find_node("r", "k").await })
    };
    engine.next_command().await;
    drop(engine);

    assert_eq!(pending.await.unwrap(), Err(RingError::ChannelClosed));
    assert_eq!(ring.find_node("r", "k").await, Err(RingError::ChannelClosed));
    assert_eq!(ring.has_ring("r").await, Err(RingError::ChannelClosed));
}

#[tokio::test]
async fn test_undecodable_response_is_fatal() {
    let (ring, mut engine) = common::scripted(&common::config(8, 0));
    common::create_scripted(&ring, &mut engine, "r", 0).await;

    let head = {
        let ring = ring.clone();
        tokio::spawn(async move { ring.find_node("r", "a").await })
    };
    engine.next_command().await;
    let behind = {
        let ring = ring.clone();
        tokio::spawn(async move { ring.find_node("r", "b").await })
    };
    engine.next_command().await;

    engine.reply_raw(&[0xff]).await;
    assert_eq!(
        head.await.unwrap(),
        Err(RingError::Protocol(DecodeError::UnknownTag(0xff)))
    );
    assert_eq!(behind.await.unwrap(), Err(RingError::ChannelClosed));
    assert_eq!(ring.find_node("r", "c").await, Err(RingError::ChannelClosed));
}

#[tokio::test]
async fn test_unsolicited_response_is_fatal() {
    let (ring, mut engine) = common::scripted(&common::config(8, 0));
    common::create_scripted(&ring, &mut engine, "r", 0).await;

    engine.reply(Response::Ok).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(ring.find_node("r", "k").await, Err(RingError::ChannelClosed));
}

#[tokio::test]
async fn test_shutdown_drains_then_waits_for_engine() {
    let (ring, mut engine) = common::scripted(&common::config(8, 0));
    common::create_scripted(&ring, &mut engine, "r", 0).await;

    let pending = {
        let ring = ring.clone();
        tokio::spawn(async move { ring.find_node("r", "k").await })
    };
    engine.next_command().await;

    let shutdown = {
        let ring = ring.clone();
        tokio::spawn(async move { ring.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!shutdown.is_finished());

    // The outstanding call still gets its answer.
    engine.reply(Response::Binary(Bytes::from_static(b"n"))).await;
    assert_eq!(pending.await.unwrap(), Ok(Bytes::from_static(b"n")));

    // The sequencer closes its command side, then waits for the engine to
    // close the response side.
    assert!(engine.commands.recv().await.is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!shutdown.is_finished());

    drop(engine.responses);
    assert_eq!(shutdown.await.unwrap(), Ok(()));
    assert_eq!(ring.find_node("r", "k").await, Err(RingError::ChannelClosed));
}

#[tokio::test]
async fn test_shutdown_with_real_engine() {
    let ring = HashRing::start(&common::config(16, 0));
    ring.create_ring("r", 8, HashFunction::Sha1).await.unwrap();
    ring.add_node("r", "only").await.unwrap();

    let calls = (0..32).map(|i| {
        let ring = ring.clone();
        async move { ring.find_node("r", format!("k{i}")).await }
    });
    let results = join_all(calls).await;
    assert!(results.iter().all(|r| r == &Ok(Bytes::from_static(b"only"))));

    ring.shutdown().await.unwrap();
    assert_eq!(ring.create_ring("s", 8, HashFunction::Sha1).await, Err(RingError::ChannelClosed));
}
