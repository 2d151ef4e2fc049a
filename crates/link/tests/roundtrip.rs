//! End-to-end transfers between two links over an in-process pipe.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use peerdrop_data_channel::{ChannelEvent, Connection, memory};
use peerdrop_link::{
    CallbackObserver, Completion, FileSource, InboundTransfers, PeerLink, Role, TransferConfig,
    TransferError, TransferEvent,
};
use peerdrop_protocol::{AbortSide, TransferMessage, decode, encode};

const WAIT: Duration = Duration::from_secs(10);

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn linked(config: TransferConfig) -> (PeerLink, PeerLink) {
    let (a, b) = memory::pipe();
    (
        PeerLink::spawn(a, config.clone()),
        PeerLink::spawn(b, config),
    )
}

async fn next(inbound: &mut InboundTransfers) -> TransferEvent {
    tokio::time::timeout(WAIT, inbound.next_event())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

/// Collects inbound events up to and including the first terminal one.
async fn until_terminal(inbound: &mut InboundTransfers) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    loop {
        let event = next(inbound).await;
        let done = event.is_terminal();
        events.push(event);
        if done {
            return events;
        }
    }
}

fn local_percents(events: &[TransferEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Progress(p) => Some(p.percent),
            _ => None,
        })
        .collect()
}

async fn send_raw(conn: &Connection, msg: TransferMessage) {
    conn.sender().send(encode(&msg).unwrap()).await.unwrap();
}

async fn recv_raw(conn: &mut Connection) -> Option<TransferMessage> {
    loop {
        let event = tokio::time::timeout(WAIT, conn.recv())
            .await
            .expect("timed out waiting for frame")?;
        match event {
            ChannelEvent::Frame(frame) => return Some(decode(&frame).unwrap()),
            ChannelEvent::Closed => return None,
            ChannelEvent::Error(_) => {}
        }
    }
}

#[tokio::test]
async fn sends_150k_in_three_chunks() {
    let (alice, bob) = linked(TransferConfig::default());
    let mut inbound = bob.register_receive_handler().unwrap();
    let data = pattern(150_000);

    let mut outbound = alice
        .start_sending_file(FileSource::from_bytes("big.bin", data.clone()))
        .unwrap();

    let mut sent = Vec::new();
    while let Some(event) = outbound.next_event().await {
        if let TransferEvent::Progress(p) = &event {
            sent.push(p.bytes_transferred);
        }
        if event.is_terminal() {
            break;
        }
    }
    let summary = outbound.finish().await.unwrap();
    assert_eq!(summary.chunks, 3);
    assert_eq!(summary.total_size, 150_000);
    assert_eq!(sent, vec![65_536, 131_072, 150_000]);

    let events = until_terminal(&mut inbound).await;
    assert!(matches!(
        &events[0],
        TransferEvent::Started { role: Role::Receiver, descriptor } if descriptor.total_size == 150_000
    ));
    assert_eq!(local_percents(&events), vec![43, 87, 100]);
    let Some(TransferEvent::Completed(Completion::Received(file))) = events.last() else {
        panic!("expected completion, got {:?}", events.last());
    };
    assert_eq!(file.file_name(), "big.bin");
    assert_eq!(file.bytes(), data.as_slice());

    let taken = inbound.take_received().unwrap();
    assert_eq!(taken.bytes(), data.as_slice());
    assert!(inbound.take_received().is_none());
}

#[tokio::test]
async fn round_trip_is_byte_identical_without_window() {
    let config = TransferConfig {
        chunk_size: 1000,
        window: 0,
        ..Default::default()
    };
    let (alice, bob) = linked(config);
    let mut inbound = bob.register_receive_handler().unwrap();

    for (name, len) in [("empty.txt", 0), ("one.bin", 1), ("exact.bin", 3000), ("odd.bin", 4321)] {
        let data = pattern(len);
        let outbound = alice
            .start_sending_file(FileSource::from_bytes(name, data.clone()))
            .unwrap();
        outbound.finish().await.unwrap();

        let events = until_terminal(&mut inbound).await;
        assert!(matches!(events.last(), Some(TransferEvent::Completed(_))));
        let file = inbound.take_received().unwrap();
        assert_eq!(file.file_name(), name);
        assert_eq!(file.bytes(), data.as_slice());
    }
}

#[tokio::test]
async fn opposite_directions_do_not_interfere() {
    let config = TransferConfig {
        chunk_size: 512,
        ..Default::default()
    };
    let (alice, bob) = linked(config);
    let mut alice_in = alice.register_receive_handler().unwrap();
    let mut bob_in = bob.register_receive_handler().unwrap();

    let to_bob = pattern(10_000);
    let to_alice: Vec<u8> = pattern(7_777).into_iter().rev().collect();

    let a = alice
        .start_sending_file(FileSource::from_bytes("to-bob", to_bob.clone()))
        .unwrap();
    let b = bob
        .start_sending_file(FileSource::from_bytes("to-alice", to_alice.clone()))
        .unwrap();
    a.finish().await.unwrap();
    b.finish().await.unwrap();

    until_terminal(&mut bob_in).await;
    until_terminal(&mut alice_in).await;
    assert_eq!(bob_in.take_received().unwrap().bytes(), to_bob.as_slice());
    assert_eq!(alice_in.take_received().unwrap().bytes(), to_alice.as_slice());
}

#[tokio::test]
async fn wide_window_in_both_directions_completes() {
    // Far more chunks in flight than a connection buffers, so acks have to
    // get through while both send queues are full.
    let config = TransferConfig {
        chunk_size: 512,
        window: 200,
        ..Default::default()
    };
    let (alice, bob) = linked(config);
    let mut alice_in = alice.register_receive_handler().unwrap();
    let mut bob_in = bob.register_receive_handler().unwrap();

    let to_bob = pattern(204_800);
    let to_alice: Vec<u8> = pattern(204_800).into_iter().rev().collect();

    let a = alice
        .start_sending_file(FileSource::from_bytes("to-bob", to_bob.clone()))
        .unwrap();
    let b = bob
        .start_sending_file(FileSource::from_bytes("to-alice", to_alice.clone()))
        .unwrap();
    let (a, b) = tokio::time::timeout(WAIT, async { tokio::join!(a.finish(), b.finish()) })
        .await
        .expect("bidirectional transfer hung");
    assert_eq!(a.unwrap().chunks, 400);
    assert_eq!(b.unwrap().chunks, 400);

    until_terminal(&mut bob_in).await;
    until_terminal(&mut alice_in).await;
    assert_eq!(bob_in.take_received().unwrap().bytes(), to_bob.as_slice());
    assert_eq!(alice_in.take_received().unwrap().bytes(), to_alice.as_slice());
}

#[tokio::test]
async fn restart_supersedes_partial_transfer() {
    let (raw, conn) = memory::pipe();
    let bob = PeerLink::spawn(conn, TransferConfig::default());
    let mut inbound = bob.register_receive_handler().unwrap();

    send_raw(&raw, TransferMessage::start("first.bin", 10, None, 0)).await;
    send_raw(&raw, TransferMessage::chunk("first.bin", 0, b"AAAAA".to_vec())).await;
    send_raw(&raw, TransferMessage::start("second.bin", 4, None, 0)).await;
    send_raw(&raw, TransferMessage::chunk("second.bin", 0, b"BBBB".to_vec())).await;

    let events = until_terminal(&mut inbound).await;
    assert!(events.iter().any(|e| matches!(
        e,
        TransferEvent::Superseded { previous, received: 5 } if previous.file_name == "first.bin"
    )));
    let file = inbound.take_received().unwrap();
    assert_eq!(file.file_name(), "second.bin");
    assert_eq!(file.bytes(), b"BBBB");
    assert!(inbound.take_received().is_none());
}

#[tokio::test]
async fn stray_chunk_is_flagged_and_link_survives() {
    let (raw, conn) = memory::pipe();
    let bob = PeerLink::spawn(conn, TransferConfig::default());
    let mut inbound = bob.register_receive_handler().unwrap();

    send_raw(&raw, TransferMessage::chunk("ghost.bin", 0, b"boo".to_vec())).await;
    assert!(matches!(
        next(&mut inbound).await,
        TransferEvent::Violation(TransferError::ProtocolViolation(_))
    ));

    send_raw(&raw, TransferMessage::start("real.bin", 2, None, 0)).await;
    send_raw(&raw, TransferMessage::chunk("real.bin", 0, b"ok".to_vec())).await;
    let events = until_terminal(&mut inbound).await;
    assert!(matches!(events.last(), Some(TransferEvent::Completed(_))));
}

#[tokio::test]
async fn advisory_progress_is_clamped() {
    let (raw, conn) = memory::pipe();
    let bob = PeerLink::spawn(conn, TransferConfig::default());
    let mut inbound = bob.register_receive_handler().unwrap();

    let frame = peerdrop_protocol::Frame::Text(r#"{"type":"progress","percent":250}"#.into());
    raw.sender().send(frame).await.unwrap();
    assert!(matches!(
        next(&mut inbound).await,
        TransferEvent::AdvisoryProgress(100)
    ));

    for (json, expected) in [
        (r#"{"type":"progress","percent":1e12}"#, 100),
        (r#"{"type":"progress","percent":-5000000000}"#, 0),
        (r#"{"type":"progress","percent":42.7}"#, 42),
    ] {
        let frame = peerdrop_protocol::Frame::Text(json.into());
        raw.sender().send(frame).await.unwrap();
        match next(&mut inbound).await {
            TransferEvent::AdvisoryProgress(percent) => assert_eq!(percent, expected, "{json}"),
            other => panic!("expected advisory progress for {json}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn sender_abort_fails_inbound_transfer() {
    let (raw, conn) = memory::pipe();
    let bob = PeerLink::spawn(conn, TransferConfig::default());
    let mut inbound = bob.register_receive_handler().unwrap();

    send_raw(&raw, TransferMessage::start("f.bin", 10, None, 0)).await;
    send_raw(&raw, TransferMessage::chunk("f.bin", 0, b"abc".to_vec())).await;
    send_raw(&raw, TransferMessage::abort(AbortSide::Sender, "user cancelled")).await;

    let events = until_terminal(&mut inbound).await;
    assert!(matches!(
        events.last(),
        Some(TransferEvent::Failed { error: TransferError::Aborted(reason), .. }) if reason == "user cancelled"
    ));
    assert!(inbound.take_received().is_none());
}

#[tokio::test]
async fn close_mid_transfer_is_incomplete() {
    let (raw, conn) = memory::pipe();
    let bob = PeerLink::spawn(conn, TransferConfig::default());
    let mut inbound = bob.register_receive_handler().unwrap();

    send_raw(&raw, TransferMessage::start("f.bin", 10, None, 0)).await;
    send_raw(&raw, TransferMessage::chunk("f.bin", 0, b"abc".to_vec())).await;
    raw.sender().close();

    let events = until_terminal(&mut inbound).await;
    assert!(matches!(
        events.last(),
        Some(TransferEvent::Failed {
            error: TransferError::IncompleteTransfer {
                received: 3,
                expected: 10
            },
            ..
        })
    ));
    assert!(inbound.take_received().is_none());
    let ended = tokio::time::timeout(WAIT, inbound.next_event()).await.unwrap();
    assert!(ended.is_none());
    bob.closed().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_transfer_fails_and_tells_sender() {
    let (mut raw, conn) = memory::pipe();
    let config = TransferConfig {
        stall_timeout_secs: 5,
        ..Default::default()
    };
    let bob = PeerLink::spawn(conn, config);
    let mut inbound = bob.register_receive_handler().unwrap();

    send_raw(&raw, TransferMessage::start("slow.bin", 10, None, 0)).await;
    let events = until_terminal(&mut inbound).await;
    assert!(matches!(
        events.last(),
        Some(TransferEvent::Failed {
            error: TransferError::Stalled,
            ..
        })
    ));

    let msg = recv_raw(&mut raw).await.unwrap();
    assert!(matches!(
        msg,
        TransferMessage::Abort(abort) if abort.side == AbortSide::Receiver
    ));
}

#[tokio::test]
async fn checksum_mismatch_is_reported_to_both_sides() {
    let (mut raw, conn) = memory::pipe();
    let bob = PeerLink::spawn(conn, TransferConfig::default());
    let mut inbound = bob.register_receive_handler().unwrap();

    let wrong = peerdrop_transfer::checksum_bytes(b"something else");
    send_raw(&raw, TransferMessage::start("f.bin", 4, Some(wrong), 0)).await;
    send_raw(&raw, TransferMessage::chunk("f.bin", 0, b"data".to_vec())).await;

    let events = until_terminal(&mut inbound).await;
    assert!(matches!(
        events.last(),
        Some(TransferEvent::Failed {
            error: TransferError::ChecksumMismatch { .. },
            ..
        })
    ));
    assert!(matches!(
        recv_raw(&mut raw).await,
        Some(TransferMessage::Abort(abort)) if abort.side == AbortSide::Receiver
    ));
}

#[tokio::test]
async fn receiver_abort_fails_outbound_transfer() {
    let (conn, mut raw) = memory::pipe();
    let config = TransferConfig {
        chunk_size: 4,
        window: 1,
        ..Default::default()
    };
    let alice = PeerLink::spawn(conn, config);
    let outbound = alice
        .start_sending_file(FileSource::from_bytes("f.bin", pattern(12)))
        .unwrap();

    assert!(matches!(
        recv_raw(&mut raw).await,
        Some(TransferMessage::Start(start)) if start.window == 1 && start.total_size == 12
    ));
    assert!(matches!(
        recv_raw(&mut raw).await,
        Some(TransferMessage::Chunk(chunk)) if chunk.seq == Some(0)
    ));
    send_raw(&raw, TransferMessage::abort(AbortSide::Receiver, "disk full")).await;

    let err = outbound.finish().await.unwrap_err();
    assert!(matches!(err, TransferError::Aborted(reason) if reason == "disk full"));
}

#[tokio::test(start_paused = true)]
async fn sender_stalls_without_acks() {
    let (conn, mut raw) = memory::pipe();
    let config = TransferConfig {
        chunk_size: 4,
        window: 1,
        stall_timeout_secs: 5,
        ..Default::default()
    };
    let alice = PeerLink::spawn(conn, config);
    let mut outbound = alice
        .start_sending_file(FileSource::from_bytes("f.bin", pattern(12)))
        .unwrap();

    assert!(matches!(recv_raw(&mut raw).await, Some(TransferMessage::Start(_))));
    assert!(matches!(
        recv_raw(&mut raw).await,
        Some(TransferMessage::Chunk(chunk)) if chunk.seq == Some(0)
    ));

    let mut failures = 0;
    while let Some(event) = outbound.next_event().await {
        if let TransferEvent::Failed { role, error, .. } = &event {
            assert_eq!(*role, Role::Sender);
            assert!(matches!(error, TransferError::Stalled));
            failures += 1;
        }
    }
    assert_eq!(failures, 1);
    assert!(matches!(outbound.finish().await, Err(TransferError::Stalled)));

    loop {
        match recv_raw(&mut raw).await {
            Some(TransferMessage::Abort(abort)) => {
                assert_eq!(abort.side, AbortSide::Sender);
                break;
            }
            Some(TransferMessage::Chunk(chunk)) => panic!("unexpected chunk {:?}", chunk.seq),
            Some(_) => continue,
            None => panic!("connection closed before abort"),
        }
    }
}

#[tokio::test]
async fn stale_ack_grants_no_credit() {
    let (conn, mut raw) = memory::pipe();
    let config = TransferConfig {
        chunk_size: 4,
        window: 1,
        ..Default::default()
    };
    let alice = PeerLink::spawn(conn, config);
    let outbound = alice
        .start_sending_file(FileSource::from_bytes("f.bin", pattern(12)))
        .unwrap();

    assert!(matches!(recv_raw(&mut raw).await, Some(TransferMessage::Start(_))));
    assert!(matches!(
        recv_raw(&mut raw).await,
        Some(TransferMessage::Chunk(chunk)) if chunk.seq == Some(0)
    ));
    assert!(matches!(recv_raw(&mut raw).await, Some(TransferMessage::Progress(_))));

    // An ack for a chunk that was never sent must not open the window.
    send_raw(&raw, TransferMessage::ack(5)).await;
    let quiet = tokio::time::timeout(Duration::from_millis(100), raw.recv()).await;
    assert!(quiet.is_err());

    let mut seqs = vec![0];
    send_raw(&raw, TransferMessage::ack(0)).await;
    while seqs.len() < 3 {
        if let Some(TransferMessage::Chunk(chunk)) = recv_raw(&mut raw).await {
            let seq = chunk.seq.unwrap();
            seqs.push(seq);
            send_raw(&raw, TransferMessage::ack(seq)).await;
        }
    }
    assert_eq!(seqs, vec![0, 1, 2]);
    assert_eq!(outbound.finish().await.unwrap().chunks, 3);
}

#[tokio::test]
async fn window_limits_chunks_in_flight() {
    let (conn, mut raw) = memory::pipe();
    let config = TransferConfig {
        chunk_size: 4,
        window: 2,
        ..Default::default()
    };
    let alice = PeerLink::spawn(conn, config);
    let outbound = alice
        .start_sending_file(FileSource::from_bytes("f.bin", pattern(16)))
        .unwrap();

    // Start, then two chunks with their progress messages.
    let mut seqs = Vec::new();
    while seqs.len() < 2 {
        if let Some(TransferMessage::Chunk(chunk)) = recv_raw(&mut raw).await {
            seqs.push(chunk.seq.unwrap());
        }
    }
    // Drain the progress message after the second chunk.
    assert!(matches!(recv_raw(&mut raw).await, Some(TransferMessage::Progress(_))));

    // Nothing more until a credit comes back.
    let quiet = tokio::time::timeout(Duration::from_millis(100), raw.recv()).await;
    assert!(quiet.is_err());

    for seq in 0..4 {
        send_raw(&raw, TransferMessage::ack(seq)).await;
    }
    let summary = outbound.finish().await.unwrap();
    assert_eq!(summary.chunks, 4);
    assert_eq!(seqs, vec![0, 1]);
}

#[tokio::test]
async fn cancel_aborts_and_tells_receiver() {
    let (conn, mut raw) = memory::pipe();
    let config = TransferConfig {
        chunk_size: 4,
        window: 1,
        ..Default::default()
    };
    let alice = PeerLink::spawn(conn, config);
    let outbound = alice
        .start_sending_file(FileSource::from_bytes("f.bin", pattern(40)))
        .unwrap();

    assert!(matches!(recv_raw(&mut raw).await, Some(TransferMessage::Start(_))));
    outbound.cancel();
    assert!(matches!(
        outbound.finish().await,
        Err(TransferError::Cancelled)
    ));

    loop {
        match recv_raw(&mut raw).await {
            Some(TransferMessage::Abort(abort)) => {
                assert_eq!(abort.side, AbortSide::Sender);
                break;
            }
            Some(_) => continue,
            None => panic!("connection closed before abort"),
        }
    }
}

#[tokio::test]
async fn one_outbound_transfer_at_a_time() {
    let (conn, _raw) = memory::pipe();
    let config = TransferConfig {
        chunk_size: 4,
        window: 1,
        ..Default::default()
    };
    let alice = PeerLink::spawn(conn, config);
    let first = alice
        .start_sending_file(FileSource::from_bytes("a", pattern(40)))
        .unwrap();

    let second = alice.start_sending_file(FileSource::from_bytes("b", pattern(4)));
    assert!(matches!(second, Err(TransferError::TransferInProgress)));

    first.cancel();
    let _ = first.finish().await;
    assert!(alice.start_sending_file(FileSource::from_bytes("c", pattern(4))).is_ok());
}

#[tokio::test]
async fn sending_on_closed_link_is_unavailable() {
    let (alice, bob) = linked(TransferConfig::default());
    bob.close();
    bob.closed().await;

    // The close reaches alice's side asynchronously.
    tokio::time::timeout(WAIT, async {
        while alice.is_open() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let result = alice.start_sending_file(FileSource::from_bytes("late", vec![1]));
    assert!(matches!(result, Err(TransferError::TransportUnavailable(_))));
}

#[tokio::test]
async fn receive_handler_registers_once() {
    let (alice, _bob) = linked(TransferConfig::default());
    assert!(alice.register_receive_handler().is_some());
    assert!(alice.register_receive_handler().is_none());
}

#[tokio::test]
async fn observer_sees_one_terminal_event_per_transfer() {
    let (alice, bob) = linked(TransferConfig::default());
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&seen);
    bob.set_observer(Arc::new(CallbackObserver::new(move |event| {
        let label = match event {
            TransferEvent::Started { .. } => "started",
            TransferEvent::Completed(_) => "completed",
            TransferEvent::Failed { .. } => "failed",
            _ => return,
        };
        log.lock().unwrap().push(label.to_string());
    })));
    let mut inbound = bob.register_receive_handler().unwrap();

    let outbound = alice
        .start_sending_file(FileSource::from_bytes("watched.bin", pattern(200_000)))
        .unwrap();
    outbound.finish().await.unwrap();
    until_terminal(&mut inbound).await;

    assert_eq!(*seen.lock().unwrap(), vec!["started", "completed"]);
}
