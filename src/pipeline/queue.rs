//! Bounded multi-slot input queue shared by every threaded node.
//!
//! One [`SlotQueue`] holds the input side of a node: a bounded FIFO per
//! input slot plus the latest-buffer cache used by periodic nodes. All
//! blocking and drop behaviour of the engine lives here:
//!
//! - `push` applies the slot's [`BackpressurePolicy`] when the slot is full
//! - `next_cycle` hands the worker one buffer per slot once every active
//!   slot has data, or as soon as any slot is full
//! - `close` stops intake while queued buffers drain; `abort` discards them
//!
//! End-of-stream sentinels are never dropped: they are queued even past
//! capacity, and `DropFront` skips over them when choosing a victim.

use crate::buffer::Buffer;
use crate::element::{BackpressurePolicy, SlotSpec};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Result of pushing a buffer into a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The buffer was queued.
    Queued,
    /// The buffer was queued after discarding the oldest queued buffer.
    DroppedFront,
    /// The buffer was discarded because the slot was full.
    DroppedCurrent,
    /// The node no longer accepts input; the buffer was discarded.
    Rejected,
}

impl PushOutcome {
    /// Whether a backpressure policy discarded a buffer.
    pub fn is_drop(&self) -> bool {
        matches!(self, PushOutcome::DroppedFront | PushOutcome::DroppedCurrent)
    }

    /// Whether the pushed buffer is now queued.
    pub fn is_queued(&self) -> bool {
        matches!(self, PushOutcome::Queued | PushOutcome::DroppedFront)
    }
}

/// Per-slot counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    /// Buffers offered to the slot.
    pub received: u64,
    /// Buffers discarded by the slot's policy.
    pub dropped: u64,
    /// Buffers currently queued.
    pub depth: usize,
}

struct Slot {
    queue: VecDeque<Buffer>,
    capacity: usize,
    policy: BackpressurePolicy,
    latest: Option<Buffer>,
    wired: bool,
    finished: bool,
    received: u64,
    dropped: u64,
}

impl Slot {
    fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    /// Participates in cycle alignment.
    fn is_active(&self) -> bool {
        !self.finished && (self.wired || !self.queue.is_empty())
    }
}

struct State {
    slots: Vec<Slot>,
    closed: bool,
    aborted: bool,
    in_cycle: bool,
}

impl State {
    fn has_data(&self) -> bool {
        self.slots.iter().any(|s| !s.queue.is_empty())
    }

    fn is_ready(&self) -> bool {
        self.has_data()
            && (self
                .slots
                .iter()
                .all(|s| !s.is_active() || !s.queue.is_empty())
                || self.slots.iter().any(Slot::is_full))
    }

    fn pop_cycle(&mut self) -> Vec<Option<Buffer>> {
        self.in_cycle = true;
        self.slots.iter_mut().map(|s| s.queue.pop_front()).collect()
    }
}

/// The input side of a node.
pub struct SlotQueue {
    state: Mutex<State>,
    /// Signalled when data arrives or readiness may have changed.
    readable: Condvar,
    /// Signalled when room is made in any slot.
    writable: Condvar,
    /// Signalled when the queue becomes empty with no cycle running.
    idle: Condvar,
}

impl SlotQueue {
    /// Create a queue for the given input slots.
    pub fn new(specs: &[SlotSpec]) -> Self {
        let slots = specs
            .iter()
            .map(|spec| Slot {
                queue: VecDeque::with_capacity(spec.capacity),
                capacity: spec.capacity.max(1),
                policy: spec.policy,
                latest: None,
                wired: false,
                finished: false,
                received: 0,
                dropped: 0,
            })
            .collect();

        Self {
            state: Mutex::new(State {
                slots,
                closed: false,
                aborted: false,
                in_cycle: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Number of input slots.
    pub fn slot_count(&self) -> usize {
        self.lock().slots.len()
    }

    /// Offer a buffer to `slot`, applying its policy when full.
    ///
    /// Under [`BackpressurePolicy::Blocking`] this waits until the worker
    /// makes room or the queue is closed. There is no timeout.
    pub fn push(&self, slot: usize, buffer: Buffer) -> PushOutcome {
        self.offer(slot, buffer).0
    }

    /// Like [`push`](Self::push), also handing back the buffer that did not
    /// make it into the queue: the evicted front under `DropFront`, the
    /// arrival under `DropCurrent` or when rejected.
    pub fn offer(&self, slot: usize, buffer: Buffer) -> (PushOutcome, Option<Buffer>) {
        let mut state = self.lock();
        if state.closed || state.aborted {
            return (PushOutcome::Rejected, Some(buffer));
        }
        state.slots[slot].received += 1;

        if buffer.is_eos() {
            state.slots[slot].queue.push_back(buffer);
            self.readable.notify_all();
            return (PushOutcome::Queued, None);
        }

        loop {
            let s = &mut state.slots[slot];
            if !s.is_full() {
                s.queue.push_back(buffer);
                self.readable.notify_all();
                return (PushOutcome::Queued, None);
            }

            match s.policy {
                BackpressurePolicy::Blocking => {
                    state = self.writable.wait(state).unwrap();
                    if state.closed || state.aborted {
                        return (PushOutcome::Rejected, Some(buffer));
                    }
                }
                BackpressurePolicy::DropFront => {
                    s.dropped += 1;
                    return match s.queue.iter().position(|b| !b.is_eos()) {
                        Some(victim) => {
                            let evicted = s.queue.remove(victim);
                            s.queue.push_back(buffer);
                            self.readable.notify_all();
                            (PushOutcome::DroppedFront, evicted)
                        }
                        // Only sentinels queued; nothing may be evicted
                        None => (PushOutcome::DroppedCurrent, Some(buffer)),
                    };
                }
                BackpressurePolicy::DropCurrent => {
                    s.dropped += 1;
                    return (PushOutcome::DroppedCurrent, Some(buffer));
                }
            }
        }
    }

    /// Replace the cached latest buffer of `slot`.
    pub fn store_latest(&self, slot: usize, buffer: Buffer) -> PushOutcome {
        let mut state = self.lock();
        if state.closed || state.aborted {
            return PushOutcome::Rejected;
        }
        let s = &mut state.slots[slot];
        s.received += 1;
        s.latest = Some(buffer);
        PushOutcome::Queued
    }

    /// Clone of the latest buffer per slot.
    pub fn latest(&self) -> Vec<Option<Buffer>> {
        self.lock().slots.iter().map(|s| s.latest.clone()).collect()
    }

    /// Block until a cycle is ready and take one buffer per slot.
    ///
    /// Slots without a buffer this cycle yield `None`. After
    /// [`close`](Self::close) the remaining buffers are still returned, then
    /// `None` signals the worker to exit. After [`abort`](Self::abort) `None`
    /// is returned at once.
    pub fn next_cycle(&self) -> Option<Vec<Option<Buffer>>> {
        let mut state = self.lock();
        loop {
            if state.aborted {
                return None;
            }
            if state.is_ready() || (state.closed && state.has_data()) {
                let cycle = state.pop_cycle();
                self.writable.notify_all();
                return Some(cycle);
            }
            if state.closed {
                return None;
            }
            state = self.readable.wait(state).unwrap();
        }
    }

    /// Mark the cycle taken by `next_cycle` as processed.
    pub fn cycle_done(&self) {
        let mut state = self.lock();
        state.in_cycle = false;
        if !state.has_data() {
            self.idle.notify_all();
        }
    }

    /// Wait until every slot is empty and no cycle is running.
    ///
    /// Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.in_cycle || (state.has_data() && !state.aborted) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self.idle.wait_timeout(state, remaining).unwrap().0;
        }
        true
    }

    /// Sleep until `deadline`, returning `false` early if the queue is
    /// closed or aborted.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut state = self.lock();
        loop {
            if state.closed || state.aborted {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            state = self.readable.wait_timeout(state, remaining).unwrap().0;
        }
    }

    /// Record whether `slot` has at least one upstream edge.
    pub fn set_wired(&self, slot: usize, wired: bool) {
        self.lock().slots[slot].wired = wired;
        self.readable.notify_all();
    }

    /// Record that `slot` reached end-of-stream.
    pub fn set_finished(&self, slot: usize) {
        self.lock().slots[slot].finished = true;
        self.readable.notify_all();
    }

    /// Stop accepting input; queued buffers still drain.
    pub fn close(&self) {
        self.lock().closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Stop accepting input and discard everything queued.
    ///
    /// Returns the number of discarded buffers.
    pub fn abort(&self) -> usize {
        let discarded = {
            let mut state = self.lock();
            state.aborted = true;
            state
                .slots
                .iter_mut()
                .map(|s| {
                    s.latest = None;
                    s.queue.drain(..).count()
                })
                .sum()
        };
        self.readable.notify_all();
        self.writable.notify_all();
        self.idle.notify_all();
        discarded
    }

    /// Whether intake has stopped.
    pub fn is_closed(&self) -> bool {
        let state = self.lock();
        state.closed || state.aborted
    }

    /// Buffers queued on `slot`.
    pub fn depth(&self, slot: usize) -> usize {
        self.lock().slots[slot].queue.len()
    }

    /// Counters for every slot.
    pub fn stats(&self) -> Vec<SlotStats> {
        self.lock()
            .slots
            .iter()
            .map(|s| SlotStats {
                received: s.received,
                dropped: s.dropped,
                depth: s.queue.len(),
            })
            .collect()
    }
}

impl std::fmt::Debug for SlotQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotQueue")
            .field("slots", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}
