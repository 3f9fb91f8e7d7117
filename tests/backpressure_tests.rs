//! Integration tests for backpressure and slot alignment.
//!
//! These tests verify that:
//! - Blocking slots stall the producer until the worker makes room
//! - Drop policies keep the right end of the queue and count what they drop
//! - Multi-slot nodes run partial cycles when a slot fills up
//! - End-of-stream sentinels are never dropped

use mediagraph::buffer::Buffer;
use mediagraph::clock::Timestamp;
use mediagraph::element::{BackpressurePolicy, Output, SlotSpec, process_fn};
use mediagraph::metadata::{MediaType, Metadata};
use mediagraph::pipeline::{EventChannel, Node, NodeBuilder, PushOutcome, SchedulingModel};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const SETTLE: Duration = Duration::from_millis(50);

fn buf(seq: u64) -> Buffer {
    Buffer::from_vec(vec![0; 32], Metadata::from_sequence(seq))
}

type Seen = Arc<Mutex<Vec<u64>>>;

/// A queued node whose process function waits on `gate` every cycle.
fn gated_node(slot: SlotSpec, gate: Arc<Mutex<()>>) -> (Node, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let node = NodeBuilder::new(
        "gated",
        process_fn("gated", move |inputs, _| {
            let _open = gate.lock().unwrap();
            for b in inputs.iter().flatten() {
                log.lock().unwrap().push(b.metadata().sequence);
            }
            Ok(Output::none())
        }),
    )
    .input(slot)
    .model(SchedulingModel::AsyncCommon)
    .build();
    (node, seen)
}

// ============================================================================
// Policies
// ============================================================================

/// A full blocking slot stalls the producer until a cycle frees room.
#[test]
fn test_blocking_stalls_producer() {
    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock().unwrap();
    let (node, seen) = gated_node(SlotSpec::new("in").with_capacity(2), gate.clone());
    node.start().unwrap();

    // The worker takes 0 and waits on the gate; 1 and 2 fill the slot
    node.send_input(buf(0), 0).unwrap();
    thread::sleep(SETTLE);
    node.send_input(buf(1), 0).unwrap();
    node.send_input(buf(2), 0).unwrap();

    let sent = Arc::new(AtomicBool::new(false));
    let producer = {
        let node = node.clone();
        let sent = sent.clone();
        thread::spawn(move || {
            let outcome = node.send_input(buf(3), 0).unwrap();
            sent.store(true, Ordering::SeqCst);
            outcome
        })
    };

    thread::sleep(SETTLE);
    assert!(!sent.load(Ordering::SeqCst), "producer was not stalled");

    drop(held);
    assert_eq!(producer.join().unwrap(), PushOutcome::Queued);
    node.stop().unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(node.stats().dropped, 0);
}

/// Drop-current keeps what is queued and discards the newcomers.
#[test]
fn test_drop_current_keeps_oldest() {
    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock().unwrap();
    let slot = SlotSpec::new("in")
        .with_capacity(3)
        .with_policy(BackpressurePolicy::DropCurrent);
    let (node, seen) = gated_node(slot, gate.clone());
    node.start().unwrap();

    node.send_input(buf(0), 0).unwrap();
    thread::sleep(SETTLE);
    let outcomes: Vec<PushOutcome> = (1..=10)
        .map(|i| node.send_input(buf(i), 0).unwrap())
        .collect();
    assert!(outcomes[..3].iter().all(|o| *o == PushOutcome::Queued));
    assert!(outcomes[3..].iter().all(|o| *o == PushOutcome::DroppedCurrent));

    drop(held);
    node.stop().unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    let stats = node.stats();
    assert_eq!(stats.dropped, 7);
    assert_eq!(stats.slots[0].dropped, 7);
    assert_eq!(stats.slots[0].received, 11);
}

/// Drop-front evicts the oldest queued buffer so the newest always gets in.
#[test]
fn test_drop_front_keeps_newest() {
    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock().unwrap();
    let slot = SlotSpec::new("in")
        .with_capacity(3)
        .with_policy(BackpressurePolicy::DropFront);
    let (node, seen) = gated_node(slot, gate.clone());
    node.start().unwrap();

    node.send_input(buf(0), 0).unwrap();
    thread::sleep(SETTLE);
    for i in 1..=10 {
        let outcome = node.send_input(buf(i), 0).unwrap();
        assert!(outcome.is_queued() || outcome == PushOutcome::DroppedFront);
    }

    drop(held);
    node.stop().unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![0, 8, 9, 10]);
    assert_eq!(node.stats().dropped, 7);
}

/// End-of-stream is queued even when the slot is full.
#[test]
fn test_eos_never_dropped() {
    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock().unwrap();
    let channel = EventChannel::new();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let worker_gate = gate.clone();
    let node = NodeBuilder::new(
        "tail",
        process_fn("tail", move |inputs, _| {
            let _open = worker_gate.lock().unwrap();
            for b in inputs.iter().flatten() {
                log.lock().unwrap().push(b.metadata().sequence);
            }
            Ok(Output::none())
        }),
    )
    .input(
        SlotSpec::new("in")
            .with_capacity(2)
            .with_policy(BackpressurePolicy::DropCurrent),
    )
    .model(SchedulingModel::AsyncCommon)
    .events(channel.sender())
    .build();
    node.start().unwrap();

    node.send_input(buf(0), 0).unwrap();
    thread::sleep(SETTLE);
    node.send_input(buf(1), 0).unwrap();
    node.send_input(buf(2), 0).unwrap();
    let outcome = node
        .send_input(Buffer::eos(MediaType::Generic, Timestamp::ZERO), 0)
        .unwrap();
    assert_eq!(outcome, PushOutcome::Queued);

    drop(held);
    assert!(channel.receiver().wait_eos("tail", Duration::from_secs(5)));
    assert!(node.is_eos());
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    node.stop().unwrap();
}

// ============================================================================
// Slot alignment
// ============================================================================

type Cycles = Arc<Mutex<Vec<(Option<u64>, Option<u64>)>>>;

/// A full slot forces a cycle without waiting for the other slot.
#[test]
fn test_full_slot_forces_partial_cycle() {
    let cycles: Cycles = Arc::new(Mutex::new(Vec::new()));
    let log = cycles.clone();
    let join = NodeBuilder::new(
        "join",
        process_fn("join", move |inputs, _| {
            let seq = |i: usize| inputs[i].as_ref().map(|b| b.metadata().sequence);
            log.lock().unwrap().push((seq(0), seq(1)));
            Ok(Output::none())
        }),
    )
    .inputs(vec![
        SlotSpec::new("video").with_capacity(2),
        SlotSpec::new("audio").with_capacity(2),
    ])
    .model(SchedulingModel::AsyncCommon)
    .build();

    // Wire the audio slot so the node waits for it
    let audio = NodeBuilder::new("audio", process_fn("audio", |_, _| Ok(Output::none())))
        .outputs(1)
        .build();
    audio.add_down_flow(0, &join, 1).unwrap();
    join.start().unwrap();
    audio.start().unwrap();

    join.send_input(buf(0), 0).unwrap();
    thread::sleep(SETTLE);
    assert!(cycles.lock().unwrap().is_empty());

    join.send_input(buf(1), 0).unwrap();
    thread::sleep(SETTLE);
    assert_eq!(*cycles.lock().unwrap(), vec![(Some(0), None)]);

    audio.send_input(buf(100), 0).unwrap();
    assert!(join.wait_idle(Duration::from_secs(5)));
    assert_eq!(
        *cycles.lock().unwrap(),
        vec![(Some(0), None), (Some(1), Some(100))]
    );

    audio.stop().unwrap();
    join.stop().unwrap();
}

/// A dropping slot never holds back the slot next to it.
#[test]
fn test_dropping_slot_does_not_block_sibling() {
    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock().unwrap();
    let worker_gate = gate.clone();
    let cycles: Cycles = Arc::new(Mutex::new(Vec::new()));
    let log = cycles.clone();
    let node = NodeBuilder::new(
        "pair",
        process_fn("pair", move |inputs, _| {
            let _open = worker_gate.lock().unwrap();
            let seq = |i: usize| inputs[i].as_ref().map(|b| b.metadata().sequence);
            log.lock().unwrap().push((seq(0), seq(1)));
            Ok(Output::none())
        }),
    )
    .inputs(vec![
        SlotSpec::new("lossy")
            .with_capacity(1)
            .with_policy(BackpressurePolicy::DropFront),
        SlotSpec::new("lossless").with_capacity(4),
    ])
    .model(SchedulingModel::AsyncCommon)
    .build();
    node.start().unwrap();

    node.send_input(buf(0), 0).unwrap();
    thread::sleep(SETTLE);
    for i in 1..=3 {
        node.send_input(buf(i), 0).unwrap();
    }
    for i in 10..13 {
        assert_eq!(node.send_input(buf(i), 1).unwrap(), PushOutcome::Queued);
    }

    drop(held);
    node.stop().unwrap();

    let cycles = cycles.lock().unwrap();
    let lossless: Vec<u64> = cycles.iter().filter_map(|c| c.1).collect();
    assert_eq!(lossless, vec![10, 11, 12]);
    let lossy: Vec<u64> = cycles.iter().filter_map(|c| c.0).collect();
    assert_eq!(lossy, vec![0, 3]);
    assert_eq!(node.stats().slots[0].dropped, 2);
    assert_eq!(node.stats().slots[1].dropped, 0);
}
