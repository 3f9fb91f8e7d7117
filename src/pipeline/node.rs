//! Pipeline nodes: lifecycle, scheduling and dynamic edges.
//!
//! A [`Node`] wraps a [`Process`] implementation with input slots, output
//! slots and one of three [`SchedulingModel`]s. Nodes are cheap handles
//! around shared state: clone them freely to wire, feed and stop a node from
//! different threads.
//!
//! # Lifecycle
//!
//! ```text
//! Uninstalled --start()--> Running --stop()--> Draining --> Stopped
//! ```
//!
//! `stop()` rejects new input, lets the worker finish what is already
//! queued, joins it, then calls [`Process::stop`]. `abort()` does the same
//! but discards queued buffers first.
//!
//! # Edges
//!
//! `add_down_flow` and `remove_down_flow` may be called while buffers are
//! flowing. Delivery happens under a read lock of the routing table and
//! edge changes take the write lock, so an edge added by a call sees only
//! buffers emitted after the call returns, and a removed edge sees nothing
//! once the call returns.

use super::config::{DEFAULT_FAILURE_THRESHOLD, EngineOptions, SchedulingModel};
use super::events::{Event, EventSender};
use super::queue::{PushOutcome, SlotQueue, SlotStats};
use crate::buffer::Buffer;
use crate::clock::Timestamp;
use crate::element::{Output, Process, ProcessContext, SlotDirection, SlotSpec};
use crate::error::{Error, Result};
use crate::metadata::MediaType;
use crate::observability::{
    NodeMetrics, instrument_node, trace_drop, trace_eos, trace_process_failure, trace_state_change,
};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeState {
    /// Constructed, not started.
    #[default]
    Uninstalled,
    /// Accepting and processing input.
    Running,
    /// Shutting down: no new input, queued input still processed.
    Draining,
    /// Worker joined, `Process::stop` called.
    Stopped,
}

impl NodeState {
    /// Returns the name of this state.
    pub fn name(&self) -> &'static str {
        match self {
            NodeState::Uninstalled => "uninstalled",
            NodeState::Running => "running",
            NodeState::Draining => "draining",
            NodeState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of a node's counters.
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    /// Process invocations.
    pub cycles: u64,
    /// Buffers offered to the node's inputs.
    pub received: u64,
    /// Buffers discarded by backpressure policies.
    pub dropped: u64,
    /// Failed process invocations.
    pub failures: u64,
    /// Current run of consecutive failures.
    pub consecutive_failures: u64,
    /// Buffers emitted on output slots (counted once per emission, not per
    /// edge).
    pub emitted: u64,
    /// Per input slot counters.
    pub slots: Vec<SlotStats>,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
    emitted: AtomicU64,
}

// ============================================================================
// End-of-stream tracking
// ============================================================================

/// Identifies one edge for EOS accounting.
type EdgeId = u64;

static NEXT_EDGE: AtomicU64 = AtomicU64::new(1);

/// Per-slot EOS bookkeeping.
///
/// An input slot is finished once every live upstream edge has delivered
/// EOS, or, for a slot fed directly through `send_input`, once it received
/// one. EOS is remembered per edge, so removing an edge never counts for a
/// sibling that is still streaming. The node completes when every slot that
/// ever had an upstream or an EOS is finished.
struct EosTracker {
    upstream: Vec<HashSet<EdgeId>>,
    ended: Vec<HashSet<EdgeId>>,
    direct: Vec<bool>,
    /// Senders of the sentinels still waiting in the slot queue, in order.
    queued: Vec<VecDeque<Option<EdgeId>>>,
    finished: Vec<bool>,
    last_pts: Timestamp,
    outputs_ended: Vec<bool>,
    completed: bool,
}

impl EosTracker {
    fn new(inputs: usize, outputs: usize) -> Self {
        Self {
            upstream: vec![HashSet::new(); inputs],
            ended: vec![HashSet::new(); inputs],
            direct: vec![false; inputs],
            queued: vec![VecDeque::new(); inputs],
            finished: vec![false; inputs],
            last_pts: Timestamp::ZERO,
            outputs_ended: vec![false; outputs],
            completed: false,
        }
    }

    /// Note an EOS on `slot` from `origin` (`None` for `send_input`).
    fn record(&mut self, slot: usize, origin: Option<EdgeId>) {
        match origin {
            // A sentinel from an edge removed since it was queued is stale
            Some(edge) if self.upstream[slot].contains(&edge) => {
                self.ended[slot].insert(edge);
            }
            Some(_) => {}
            None => self.direct[slot] = true,
        }
    }

    fn edge_removed(&mut self, slot: usize, edge: EdgeId) {
        self.upstream[slot].remove(&edge);
        self.ended[slot].remove(&edge);
    }

    /// Re-evaluate `slot`; returns true if it just became finished.
    fn update(&mut self, slot: usize) -> bool {
        if self.finished[slot] {
            return false;
        }
        let upstream = &self.upstream[slot];
        let done = if upstream.is_empty() {
            self.direct[slot]
        } else {
            upstream.iter().all(|edge| self.ended[slot].contains(edge))
        };
        if done {
            self.finished[slot] = true;
        }
        done
    }

    /// Whether the node should complete now.
    fn should_complete(&self) -> bool {
        if self.completed || self.finished.is_empty() {
            return false;
        }
        let mut any = false;
        for slot in 0..self.finished.len() {
            let relevant =
                !self.upstream[slot].is_empty() || self.direct[slot] || self.finished[slot];
            if relevant {
                if !self.finished[slot] {
                    return false;
                }
                any = true;
            }
        }
        any
    }
}

// ============================================================================
// Node internals
// ============================================================================

struct Route {
    id: EdgeId,
    target: Weak<NodeCore>,
    slot: usize,
}

/// The implementation and its context, locked together.
struct ProcessCell {
    process: Box<dyn Process>,
    ctx: ProcessContext,
}

struct Worker {
    handle: JoinHandle<()>,
    thread: ThreadId,
}

struct NodeCore {
    name: String,
    model: SchedulingModel,
    inputs: Vec<SlotSpec>,
    outputs: usize,
    output_media: Vec<MediaType>,
    cell: Mutex<ProcessCell>,
    queue: SlotQueue,
    routes: RwLock<Vec<Vec<Route>>>,
    eos: Mutex<EosTracker>,
    state: Mutex<NodeState>,
    lifecycle: Mutex<()>,
    worker: Mutex<Option<Worker>>,
    events: Option<EventSender>,
    failure_threshold: u64,
    counters: Counters,
    metrics: NodeMetrics,
}

impl NodeCore {
    fn state(&self) -> NodeState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, to: NodeState) {
        let from = std::mem::replace(&mut *self.state.lock().unwrap(), to);
        if from == to {
            return;
        }
        trace_state_change(&self.name, from.name(), to.name());
        self.post(Event::StateChanged {
            node: self.name.clone(),
            from,
            to,
        });
    }

    fn post(&self, event: Event) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }

    /// Accept a buffer on an input slot from edge `origin`, or from
    /// `send_input` when `origin` is `None`.
    fn deliver(&self, slot: usize, buffer: Buffer, origin: Option<EdgeId>) -> PushOutcome {
        if self.state() != NodeState::Running {
            return PushOutcome::Rejected;
        }
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        match self.model {
            SchedulingModel::Synchronous => {
                let mut inputs = vec![None; self.inputs.len()];
                inputs[slot] = Some(buffer);
                self.run_cycle(inputs, origin);
                PushOutcome::Queued
            }
            SchedulingModel::AsyncCommon => {
                if buffer.is_eos() {
                    // The sender is recorded under the lock so the worker
                    // pairs it with this sentinel
                    let mut eos = self.eos.lock().unwrap();
                    let outcome = self.queue.push(slot, buffer);
                    if outcome.is_queued() {
                        eos.queued[slot].push_back(origin);
                    }
                    return outcome;
                }
                let (outcome, discarded) = self.queue.offer(slot, buffer);
                if outcome.is_drop() {
                    let policy = self.inputs[slot].policy.name();
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_drop(slot, policy);
                    if let Some(dropped) = &discarded {
                        trace_drop(&self.name, slot, policy, dropped.metadata().sequence);
                    }
                }
                self.metrics.record_depth(slot, self.queue.depth(slot));
                outcome
            }
            SchedulingModel::AsyncPeriodic { .. } => {
                if buffer.is_eos() {
                    self.handle_eos(&[slot], buffer.pts(), origin);
                    PushOutcome::Queued
                } else {
                    self.queue.store_latest(slot, buffer)
                }
            }
        }
    }

    /// Run one process cycle and emit its outputs.
    ///
    /// `origin` is the sender of an inline EOS; queued sentinels carry
    /// their own.
    fn run_cycle(&self, mut inputs: Vec<Option<Buffer>>, origin: Option<EdgeId>) {
        let mut eos_slots = Vec::new();
        let mut eos_pts = Timestamp::ZERO;
        for (slot, entry) in inputs.iter_mut().enumerate() {
            match entry {
                Some(buffer) if buffer.is_eos() => {
                    eos_slots.push(slot);
                    eos_pts = eos_pts.max(buffer.pts());
                    *entry = None;
                }
                Some(buffer) => buffer.mark_holder(&self.name),
                None => {}
            }
        }

        let has_data = inputs.iter().any(Option::is_some);
        if has_data || (self.inputs.is_empty() && eos_slots.is_empty()) || self.is_periodic() {
            if let Some(output) = self.invoke(&inputs) {
                self.emit_output(output);
            }
        }

        if !eos_slots.is_empty() {
            self.handle_eos(&eos_slots, eos_pts, origin);
        }
    }

    fn is_periodic(&self) -> bool {
        matches!(self.model, SchedulingModel::AsyncPeriodic { .. })
    }

    /// Call the process function, accounting for failures.
    fn invoke(&self, inputs: &[Option<Buffer>]) -> Option<Output> {
        let mut cell = self.cell.lock().unwrap();
        if self.state() == NodeState::Stopped {
            return None;
        }
        let ProcessCell { process, ctx } = &mut *cell;

        let result = {
            let _timer = self.metrics.start_timer();
            process.process(inputs, ctx)
        };
        ctx.advance_cycle();
        drop(cell);
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(output) => {
                self.counters.consecutive_failures.store(0, Ordering::Relaxed);
                Some(output)
            }
            Err(err) => {
                self.record_failure(&err);
                None
            }
        }
    }

    fn record_failure(&self, err: &Error) {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        let consecutive = self
            .counters
            .consecutive_failures
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        self.metrics.record_failure();
        trace_process_failure(&self.name, consecutive, err);

        if consecutive % self.failure_threshold == 0 {
            self.post(Event::ProcessFailure {
                node: self.name.clone(),
                consecutive,
                message: err.to_string(),
            });
        }
    }

    /// Record EOS on input slots and complete the node if every input ended.
    fn handle_eos(&self, slots: &[usize], pts: Timestamp, origin: Option<EdgeId>) {
        let complete = {
            let mut eos = self.eos.lock().unwrap();
            eos.last_pts = eos.last_pts.max(pts);
            for &slot in slots {
                let origin = if self.model == SchedulingModel::AsyncCommon {
                    eos.queued[slot].pop_front().flatten()
                } else {
                    origin
                };
                eos.record(slot, origin);
                if eos.update(slot) {
                    self.queue.set_finished(slot);
                }
            }
            let complete = eos.should_complete();
            if complete {
                eos.completed = true;
            }
            complete
        };

        if complete {
            self.complete();
        }
    }

    /// Flush the implementation and forward one EOS per output slot.
    fn complete(&self) {
        let flushed = {
            let mut cell = self.cell.lock().unwrap();
            let ProcessCell { process, ctx } = &mut *cell;
            process.flush(ctx)
        };
        match flushed {
            Ok(output) => self.emit_output(output),
            Err(err) => self.record_failure(&err),
        }

        let pts = self.eos.lock().unwrap().last_pts;
        for slot in 0..self.outputs {
            self.emit(slot, Buffer::eos(self.output_media[slot], pts));
        }

        trace_eos(&self.name);
        if self.outputs == 0 {
            self.post(Event::Eos {
                node: self.name.clone(),
            });
        }
    }

    fn emit_output(&self, output: Output) {
        for (slot, buffer) in output {
            if slot < self.outputs {
                self.emit(slot, buffer);
            } else {
                tracing::warn!(
                    node = %self.name,
                    slot = slot,
                    outputs = self.outputs,
                    "process produced a buffer for a missing output slot"
                );
            }
        }
    }

    /// Broadcast a buffer to every edge of an output slot.
    ///
    /// Returns the number of edges reached.
    fn emit(&self, slot: usize, buffer: Buffer) -> usize {
        let routes = self.routes.read().unwrap();
        {
            let mut eos = self.eos.lock().unwrap();
            if eos.outputs_ended[slot] {
                tracing::trace!(node = %self.name, slot = slot, "output ended, buffer discarded");
                return 0;
            }
            if buffer.is_eos() {
                eos.outputs_ended[slot] = true;
            }
        }
        self.counters.emitted.fetch_add(1, Ordering::Relaxed);

        let mut reached = 0;
        for route in &routes[slot] {
            if let Some(target) = route.target.upgrade() {
                target.deliver(route.slot, buffer.clone(), Some(route.id));
                reached += 1;
            }
        }
        reached
    }

    fn upstream_added(&self, slot: usize, edge: EdgeId) {
        self.eos.lock().unwrap().upstream[slot].insert(edge);
        self.queue.set_wired(slot, true);
    }

    fn upstream_removed(&self, slot: usize, edge: EdgeId) {
        let (now_finished, complete, wired, pts) = {
            let mut eos = self.eos.lock().unwrap();
            eos.edge_removed(slot, edge);
            let wired = !eos.upstream[slot].is_empty();
            // A slot whose remaining edges already delivered EOS is done
            let now_finished = wired && eos.update(slot);
            let complete = now_finished && eos.should_complete();
            if complete && self.model != SchedulingModel::AsyncCommon {
                eos.completed = true;
            }
            (now_finished, complete, wired, eos.last_pts)
        };

        if !wired {
            self.queue.set_wired(slot, false);
        }
        if !now_finished {
            return;
        }
        self.queue.set_finished(slot);
        if complete {
            if self.model == SchedulingModel::AsyncCommon {
                // Complete behind the buffers still queued on the worker
                let media = self.inputs[slot].media_type;
                let mut eos = self.eos.lock().unwrap();
                if self.queue.push(slot, Buffer::eos(media, pts)).is_queued() {
                    eos.queued[slot].push_back(None);
                }
            } else {
                self.complete();
            }
        }
    }
}

// ============================================================================
// Workers
// ============================================================================

fn run_async_worker(core: Arc<NodeCore>) {
    let _span = instrument_node(&core.name, core.model.name());
    tracing::debug!(node = %core.name, "worker started");

    while let Some(inputs) = core.queue.next_cycle() {
        core.run_cycle(inputs, None);
        core.queue.cycle_done();
        for slot in 0..core.inputs.len() {
            core.metrics.record_depth(slot, core.queue.depth(slot));
        }
    }

    tracing::debug!(node = %core.name, "worker exited");
}

fn run_periodic_worker(core: Arc<NodeCore>, interval: Duration) {
    let _span = instrument_node(&core.name, core.model.name());
    tracing::debug!(node = %core.name, interval = ?interval, "periodic worker started");

    let mut next = Instant::now() + interval;
    while core.queue.wait_until(next) {
        let now = Instant::now();
        let mut skipped = 0u64;
        next += interval;
        while next <= now {
            next += interval;
            skipped += 1;
        }
        if skipped > 0 {
            tracing::debug!(node = %core.name, skipped = skipped, "missed periodic ticks");
        }

        let completed = core.eos.lock().unwrap().completed;
        if completed && !core.inputs.is_empty() {
            continue;
        }
        core.run_cycle(core.queue.latest(), None);
    }

    tracing::debug!(node = %core.name, "periodic worker exited");
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Node`].
///
/// # Example
///
/// ```rust
/// use mediagraph::element::{BackpressurePolicy, Output, SlotSpec, process_fn};
/// use mediagraph::pipeline::{NodeBuilder, SchedulingModel};
///
/// let node = NodeBuilder::new("scale", process_fn("scale", |inputs, _| {
///         Ok(Output::from(inputs[0].clone()))
///     }))
///     .input(SlotSpec::new("video").with_capacity(5).with_policy(BackpressurePolicy::DropFront))
///     .outputs(1)
///     .model(SchedulingModel::AsyncCommon)
///     .build();
///
/// assert_eq!(node.input_count(), 1);
/// ```
pub struct NodeBuilder {
    name: String,
    process: Box<dyn Process>,
    inputs: Vec<SlotSpec>,
    output_media: Vec<MediaType>,
    model: SchedulingModel,
    events: Option<EventSender>,
    failure_threshold: u64,
}

impl NodeBuilder {
    /// Start building a node around `process`.
    pub fn new(name: impl Into<String>, process: impl Process) -> Self {
        Self {
            name: name.into(),
            process: Box::new(process),
            inputs: Vec::new(),
            output_media: Vec::new(),
            model: SchedulingModel::default(),
            events: None,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    /// Start building from a boxed implementation.
    pub fn boxed(name: impl Into<String>, process: Box<dyn Process>) -> Self {
        Self {
            name: name.into(),
            process,
            inputs: Vec::new(),
            output_media: Vec::new(),
            model: SchedulingModel::default(),
            events: None,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    /// Add an input slot.
    pub fn input(mut self, spec: SlotSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    /// Set all input slots.
    pub fn inputs(mut self, specs: Vec<SlotSpec>) -> Self {
        self.inputs = specs;
        self
    }

    /// Set the number of generic output slots.
    pub fn outputs(mut self, count: usize) -> Self {
        self.output_media = vec![MediaType::Generic; count];
        self
    }

    /// Add an output slot carrying `media_type`.
    pub fn output(mut self, media_type: MediaType) -> Self {
        self.output_media.push(media_type);
        self
    }

    /// Set the scheduling model.
    pub fn model(mut self, model: SchedulingModel) -> Self {
        self.model = model;
        self
    }

    /// Attach an event channel.
    pub fn events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Consecutive failures between two `ProcessFailure` events.
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Apply parsed engine options (slots, model, threshold).
    pub fn options(self, options: &EngineOptions) -> Self {
        self.inputs(options.input_slots())
            .outputs(options.outputs)
            .model(options.model)
            .failure_threshold(options.failure_threshold)
    }

    /// Build the node in the `Uninstalled` state.
    pub fn build(self) -> Node {
        let inputs = self.inputs.len();
        let outputs = self.output_media.len();
        let ctx = ProcessContext::new(self.name.clone(), self.events.clone());

        Node {
            core: Arc::new(NodeCore {
                metrics: NodeMetrics::new(&self.name, inputs),
                queue: SlotQueue::new(&self.inputs),
                name: self.name,
                model: self.model,
                inputs: self.inputs,
                outputs,
                output_media: self.output_media,
                cell: Mutex::new(ProcessCell {
                    process: self.process,
                    ctx,
                }),
                routes: RwLock::new((0..outputs).map(|_| Vec::new()).collect()),
                eos: Mutex::new(EosTracker::new(inputs, outputs)),
                state: Mutex::new(NodeState::Uninstalled),
                lifecycle: Mutex::new(()),
                worker: Mutex::new(None),
                events: self.events,
                failure_threshold: self.failure_threshold,
                counters: Counters::default(),
            }),
        }
    }
}

// ============================================================================
// Node
// ============================================================================

/// Handle to a pipeline node.
///
/// Cloning the handle shares the node. Threaded nodes keep running until
/// [`stop`](Self::stop) or [`abort`](Self::abort) is called; dropping the
/// last handle does not stop the worker.
#[derive(Clone)]
pub struct Node {
    core: Arc<NodeCore>,
}

impl Node {
    /// Start building a node.
    pub fn builder(name: impl Into<String>, process: impl Process) -> NodeBuilder {
        NodeBuilder::new(name, process)
    }

    /// Node name.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Scheduling model.
    pub fn model(&self) -> SchedulingModel {
        self.core.model
    }

    /// Number of input slots.
    pub fn input_count(&self) -> usize {
        self.core.inputs.len()
    }

    /// Number of output slots.
    pub fn output_count(&self) -> usize {
        self.core.outputs
    }

    /// Input slot descriptions.
    pub fn input_slots(&self) -> &[SlotSpec] {
        &self.core.inputs
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        self.core.state()
    }

    /// Whether both handles refer to the same node.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Start the node: call [`Process::start`] and spawn the worker.
    ///
    /// Starting a running node is a no-op; a stopped node cannot restart.
    pub fn start(&self) -> Result<()> {
        let _lifecycle = self.core.lifecycle.lock().unwrap();
        match self.state() {
            NodeState::Running => return Ok(()),
            NodeState::Uninstalled => {}
            state => {
                return Err(Error::InvalidState {
                    node: self.core.name.clone(),
                    message: format!("cannot start a node that is {state}"),
                });
            }
        }

        {
            let mut cell = self.core.cell.lock().unwrap();
            let ProcessCell { process, ctx } = &mut *cell;
            process.start(ctx)?;
        }
        self.core.set_state(NodeState::Running);

        let core = self.core.clone();
        let spawned = match self.core.model {
            SchedulingModel::Synchronous => None,
            SchedulingModel::AsyncCommon => Some(
                thread::Builder::new()
                    .name(format!("mg-{}", self.core.name))
                    .spawn(move || run_async_worker(core))?,
            ),
            SchedulingModel::AsyncPeriodic { interval } => Some(
                thread::Builder::new()
                    .name(format!("mg-{}", self.core.name))
                    .spawn(move || run_periodic_worker(core, interval))?,
            ),
        };
        if let Some(handle) = spawned {
            let thread = handle.thread().id();
            *self.core.worker.lock().unwrap() = Some(Worker { handle, thread });
        }
        Ok(())
    }

    /// Stop the node gracefully.
    ///
    /// New input is rejected at once. Buffers already queued are processed,
    /// the worker is joined and [`Process::stop`] is called. When this
    /// returns no further process call will happen. Idempotent.
    pub fn stop(&self) -> Result<()> {
        self.shutdown(false)
    }

    /// Stop the node, discarding queued input.
    pub fn abort(&self) -> Result<()> {
        self.shutdown(true)
    }

    fn shutdown(&self, discard: bool) -> Result<()> {
        if let Some(worker) = self.core.worker.lock().unwrap().as_ref()
            && worker.thread == thread::current().id()
        {
            return Err(Error::InvalidState {
                node: self.core.name.clone(),
                message: "a node cannot stop itself from its own worker".into(),
            });
        }

        let _lifecycle = self.core.lifecycle.lock().unwrap();
        match self.state() {
            NodeState::Stopped => return Ok(()),
            NodeState::Uninstalled => {
                self.core.queue.close();
                self.core.set_state(NodeState::Stopped);
                return Ok(());
            }
            NodeState::Running | NodeState::Draining => {}
        }

        self.core.set_state(NodeState::Draining);
        if discard {
            let discarded = self.core.queue.abort();
            if discarded > 0 {
                tracing::debug!(node = %self.core.name, discarded = discarded, "queued input discarded");
            }
        } else {
            self.core.queue.close();
        }

        let worker = self.core.worker.lock().unwrap().take();
        if let Some(worker) = worker
            && worker.handle.join().is_err()
        {
            tracing::error!(node = %self.core.name, "worker panicked");
        }

        let stopped = {
            let mut cell = self.core.cell.lock().unwrap();
            let ProcessCell { process, ctx } = &mut *cell;
            self.core.set_state(NodeState::Stopped);
            process.stop(ctx)
        };
        stopped
    }

    /// Inject a buffer.
    ///
    /// On a node with inputs, `slot` is an input slot and the buffer goes
    /// through the node's scheduling model. On a source (no inputs), `slot`
    /// is an output slot and the buffer is emitted downstream directly.
    pub fn send_input(&self, buffer: Buffer, slot: usize) -> Result<PushOutcome> {
        let state = self.state();
        if state != NodeState::Running {
            return Err(Error::NotRunning {
                node: self.core.name.clone(),
                state,
            });
        }

        if self.core.inputs.is_empty() {
            self.check_slot(SlotDirection::Output, slot)?;
            self.core.counters.received.fetch_add(1, Ordering::Relaxed);
            self.core.emit(slot, buffer);
            return Ok(PushOutcome::Queued);
        }

        self.check_slot(SlotDirection::Input, slot)?;
        Ok(self.core.deliver(slot, buffer, None))
    }

    /// Emit a buffer on an output slot, as if produced by the process
    /// function. Returns the number of edges reached.
    pub fn emit(&self, slot: usize, buffer: Buffer) -> Result<usize> {
        self.check_slot(SlotDirection::Output, slot)?;
        Ok(self.core.emit(slot, buffer))
    }

    fn check_slot(&self, direction: SlotDirection, index: usize) -> Result<()> {
        let count = match direction {
            SlotDirection::Input => self.core.inputs.len(),
            SlotDirection::Output => self.core.outputs,
        };
        if index < count {
            Ok(())
        } else {
            Err(Error::InvalidSlot {
                node: self.core.name.clone(),
                direction,
                index,
                count,
            })
        }
    }

    /// Connect output slot `out_slot` to input `dst_slot` of `dst`.
    ///
    /// Safe while buffers flow: `dst` receives only buffers emitted after
    /// this returns.
    pub fn add_down_flow(&self, out_slot: usize, dst: &Node, dst_slot: usize) -> Result<()> {
        self.check_slot(SlotDirection::Output, out_slot)?;
        dst.check_slot(SlotDirection::Input, dst_slot)?;
        if self.ptr_eq(dst) {
            return Err(Error::Config(format!(
                "node '{}' cannot feed itself",
                self.core.name
            )));
        }

        let mut routes = self.core.routes.write().unwrap();
        let duplicate = routes[out_slot]
            .iter()
            .any(|r| r.slot == dst_slot && r.target.as_ptr() == Arc::as_ptr(&dst.core));
        if duplicate {
            return Err(Error::Config(format!(
                "'{}' output {out_slot} is already connected to '{}' input {dst_slot}",
                self.core.name, dst.core.name
            )));
        }
        if self.core.eos.lock().unwrap().outputs_ended[out_slot] {
            return Err(Error::Config(format!(
                "'{}' output {out_slot} has already reached end of stream",
                self.core.name
            )));
        }

        let id = NEXT_EDGE.fetch_add(1, Ordering::Relaxed);
        dst.core.upstream_added(dst_slot, id);
        routes[out_slot].push(Route {
            id,
            target: Arc::downgrade(&dst.core),
            slot: dst_slot,
        });
        tracing::debug!(
            src = %self.core.name,
            out_slot = out_slot,
            dst = %dst.core.name,
            dst_slot = dst_slot,
            "edge added"
        );
        Ok(())
    }

    /// Remove every edge from this node to `dst`.
    ///
    /// Once this returns `dst` receives nothing more from this node. Buffers
    /// already queued at `dst` are processed normally. Returns the number of
    /// removed edges.
    pub fn remove_down_flow(&self, dst: &Node) -> usize {
        self.remove_routes(dst, |_, _| true)
    }

    /// Remove the single edge `out_slot -> dst:dst_slot`.
    pub fn remove_down_flow_slot(&self, out_slot: usize, dst: &Node, dst_slot: usize) -> bool {
        self.remove_routes(dst, |out, slot| out == out_slot && slot == dst_slot) > 0
    }

    fn remove_routes(&self, dst: &Node, mut matches: impl FnMut(usize, usize) -> bool) -> usize {
        let removed: Vec<(usize, EdgeId)> = {
            let mut routes = self.core.routes.write().unwrap();
            let target = Arc::as_ptr(&dst.core);
            let mut removed = Vec::new();
            for (out, slot_routes) in routes.iter_mut().enumerate() {
                slot_routes.retain(|r| {
                    let hit = r.target.as_ptr() == target && matches(out, r.slot);
                    if hit {
                        removed.push((r.slot, r.id));
                    }
                    !hit
                });
            }
            removed
        };

        for &(slot, edge) in &removed {
            dst.core.upstream_removed(slot, edge);
        }
        if !removed.is_empty() {
            tracing::debug!(
                src = %self.core.name,
                dst = %dst.core.name,
                edges = removed.len(),
                "edges removed"
            );
        }
        removed.len()
    }

    /// Number of edges leaving `out_slot`.
    pub fn fan_out(&self, out_slot: usize) -> usize {
        self.core
            .routes
            .read()
            .unwrap()
            .get(out_slot)
            .map_or(0, Vec::len)
    }

    /// Forward a runtime control to the implementation.
    pub fn control(&self, key: &str, value: &str) -> Result<()> {
        let mut cell = self.core.cell.lock().unwrap();
        let ProcessCell { process, ctx } = &mut *cell;
        process.control(key, value, ctx)
    }

    /// Wait until no input is queued and no cycle is running.
    ///
    /// Returns `false` on timeout. Always true for unqueued models.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        match self.core.model {
            SchedulingModel::AsyncCommon => self.core.queue.wait_idle(timeout),
            _ => true,
        }
    }

    /// Whether every input (or, for sources, every output) reached EOS.
    pub fn is_eos(&self) -> bool {
        let eos = self.core.eos.lock().unwrap();
        if self.core.inputs.is_empty() {
            !eos.outputs_ended.is_empty() && eos.outputs_ended.iter().all(|&e| e)
        } else {
            eos.completed
        }
    }

    /// Snapshot the node's counters.
    pub fn stats(&self) -> NodeStats {
        let c = &self.core.counters;
        NodeStats {
            cycles: c.cycles.load(Ordering::Relaxed),
            received: c.received.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            consecutive_failures: c.consecutive_failures.load(Ordering::Relaxed),
            emitted: c.emitted.load(Ordering::Relaxed),
            slots: self.core.queue.stats(),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.core.name)
            .field("model", &self.core.model)
            .field("inputs", &self.core.inputs.len())
            .field("outputs", &self.core.outputs)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{BackpressurePolicy, process_fn};
    use crate::metadata::Metadata;
    use crate::pipeline::EventChannel;

    fn buf(seq: u64) -> Buffer {
        Buffer::from_vec(vec![seq as u8], Metadata::from_sequence(seq))
    }

    fn forward(name: &str) -> NodeBuilder {
        NodeBuilder::new(
            name,
            process_fn(name, |inputs, _| Ok(Output::from(inputs[0].clone()))),
        )
        .input(SlotSpec::new("in"))
        .outputs(1)
    }

    fn recorder(name: &str) -> (Node, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let node = NodeBuilder::new(
            name,
            process_fn(name, move |inputs, _| {
                for b in inputs.iter().flatten() {
                    sink_seen.lock().unwrap().push(b.metadata().sequence);
                }
                Ok(Output::none())
            }),
        )
        .input(SlotSpec::new("in"))
        .model(SchedulingModel::Synchronous)
        .build();
        (node, seen)
    }

    #[test]
    fn test_lifecycle_transitions() {
        let channel = EventChannel::new();
        let node = forward("f").events(channel.sender()).build();
        assert_eq!(node.state(), NodeState::Uninstalled);

        node.start().unwrap();
        assert_eq!(node.state(), NodeState::Running);
        node.start().unwrap();

        node.stop().unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
        node.stop().unwrap();
        assert!(matches!(node.start(), Err(Error::InvalidState { .. })));

        let states: Vec<(NodeState, NodeState)> = channel
            .receiver()
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                Event::StateChanged { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                (NodeState::Uninstalled, NodeState::Running),
                (NodeState::Running, NodeState::Draining),
                (NodeState::Draining, NodeState::Stopped),
            ]
        );
    }

    #[test]
    fn test_send_input_requires_running() {
        let node = forward("f").build();
        let err = node.send_input(buf(0), 0).unwrap_err();
        assert!(matches!(
            err,
            Error::NotRunning {
                state: NodeState::Uninstalled,
                ..
            }
        ));
    }

    #[test]
    fn test_sync_node_runs_inline() {
        let (sink, seen) = recorder("sink");
        sink.start().unwrap();
        sink.send_input(buf(7), 0).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![7]);
        assert_eq!(sink.stats().cycles, 1);
    }

    #[test]
    fn test_async_chain_delivers_in_order() {
        let node = forward("f").build();
        let (sink, seen) = recorder("sink");
        node.add_down_flow(0, &sink, 0).unwrap();
        sink.start().unwrap();
        node.start().unwrap();

        for i in 0..20 {
            node.send_input(buf(i), 0).unwrap();
        }
        node.stop().unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_wiring_validates_slots() {
        let a = forward("a").build();
        let b = forward("b").build();

        let err = a.add_down_flow(1, &b, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidSlot {
                direction: SlotDirection::Output,
                index: 1,
                ..
            }
        ));
        let err = a.add_down_flow(0, &b, 3).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidSlot {
                direction: SlotDirection::Input,
                index: 3,
                ..
            }
        ));
        assert!(a.add_down_flow(0, &a, 0).unwrap_err().is_configuration());

        a.add_down_flow(0, &b, 0).unwrap();
        assert!(a.add_down_flow(0, &b, 0).unwrap_err().is_configuration());
        assert_eq!(a.fan_out(0), 1);
    }

    #[test]
    fn test_remove_down_flow_counts_edges() {
        let src = NodeBuilder::new("src", process_fn("src", |_, _| Ok(Output::none())))
            .outputs(2)
            .build();
        let (sink, _) = recorder("sink");
        src.add_down_flow(0, &sink, 0).unwrap();
        src.add_down_flow(1, &sink, 0).unwrap();

        assert!(src.remove_down_flow_slot(1, &sink, 0));
        assert!(!src.remove_down_flow_slot(1, &sink, 0));
        assert_eq!(src.remove_down_flow(&sink), 1);
        assert_eq!(src.fan_out(0), 0);
    }

    #[test]
    fn test_source_send_input_emits() {
        let src = NodeBuilder::new("src", process_fn("src", |_, _| Ok(Output::none())))
            .outputs(1)
            .build();
        let (sink, seen) = recorder("sink");
        src.add_down_flow(0, &sink, 0).unwrap();
        src.start().unwrap();
        sink.start().unwrap();

        src.send_input(buf(1), 0).unwrap();
        assert!(matches!(
            src.send_input(buf(2), 1),
            Err(Error::InvalidSlot { .. })
        ));
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_eos_completes_sink_once() {
        let channel = EventChannel::new();
        let sink = NodeBuilder::new("sink", process_fn("sink", |_, _| Ok(Output::none())))
            .input(SlotSpec::new("in"))
            .model(SchedulingModel::Synchronous)
            .events(channel.sender())
            .build();
        sink.start().unwrap();
        sink.send_input(Buffer::eos(MediaType::Generic, Timestamp::ZERO), 0)
            .unwrap();
        sink.send_input(Buffer::eos(MediaType::Generic, Timestamp::ZERO), 0)
            .unwrap();

        let eos_events = channel
            .receiver()
            .drain()
            .into_iter()
            .filter(|e| e.is_eos_of("sink"))
            .count();
        assert_eq!(eos_events, 1);
        assert!(sink.is_eos());
    }

    #[test]
    fn test_eos_tracked_per_edge() {
        let mut eos = EosTracker::new(1, 0);
        eos.upstream[0].extend([1, 2]);

        eos.record(0, Some(1));
        assert!(!eos.update(0));

        // Edge 1 ended and goes away; edge 2 still streams
        eos.edge_removed(0, 1);
        assert!(!eos.update(0));
        assert!(!eos.should_complete());

        // A sentinel from the removed edge dequeued late is ignored
        eos.record(0, Some(1));
        assert!(!eos.update(0));

        eos.record(0, Some(2));
        assert!(eos.update(0));
        assert!(eos.should_complete());
    }

    #[test]
    fn test_process_failures_raise_events() {
        let channel = EventChannel::new();
        let node = NodeBuilder::new(
            "flaky",
            process_fn("flaky", |_, _| Err(Error::Element("decode error".into()))),
        )
        .input(SlotSpec::new("in"))
        .model(SchedulingModel::Synchronous)
        .failure_threshold(2)
        .events(channel.sender())
        .build();
        node.start().unwrap();

        for i in 0..5 {
            node.send_input(buf(i), 0).unwrap();
        }
        let failures: Vec<u64> = channel
            .receiver()
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                Event::ProcessFailure { consecutive, .. } => Some(consecutive),
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec![2, 4]);

        let stats = node.stats();
        assert_eq!(stats.failures, 5);
        assert_eq!(stats.consecutive_failures, 5);
        // Failures never stop the node
        assert_eq!(node.state(), NodeState::Running);
    }

    #[test]
    fn test_drop_policy_counts() {
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock().unwrap();
        let worker_gate = gate.clone();
        let node = NodeBuilder::new(
            "slow",
            process_fn("slow", move |_, _| {
                let _g = worker_gate.lock().unwrap();
                Ok(Output::none())
            }),
        )
        .input(
            SlotSpec::new("in")
                .with_capacity(2)
                .with_policy(BackpressurePolicy::DropCurrent),
        )
        .build();
        node.start().unwrap();

        // The first buffer is taken by the blocked worker, two fill the queue
        node.send_input(buf(0), 0).unwrap();
        thread::sleep(Duration::from_millis(30));
        node.send_input(buf(1), 0).unwrap();
        node.send_input(buf(2), 0).unwrap();
        let outcome = node.send_input(buf(3), 0).unwrap();
        assert_eq!(outcome, PushOutcome::DroppedCurrent);

        drop(held);
        node.stop().unwrap();
        let stats = node.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.cycles, 3);
    }

    #[test]
    fn test_stop_from_worker_is_rejected() {
        let slot: Arc<Mutex<Option<Node>>> = Arc::new(Mutex::new(None));
        let result: Arc<Mutex<Option<bool>>> = Arc::new(Mutex::new(None));
        let (inner_slot, inner_result) = (slot.clone(), result.clone());

        let node = NodeBuilder::new(
            "selfish",
            process_fn("selfish", move |_, _| {
                if let Some(me) = inner_slot.lock().unwrap().as_ref() {
                    *inner_result.lock().unwrap() = Some(me.stop().is_err());
                }
                Ok(Output::none())
            }),
        )
        .input(SlotSpec::new("in"))
        .build();
        *slot.lock().unwrap() = Some(node.clone());
        node.start().unwrap();
        node.send_input(buf(0), 0).unwrap();
        assert!(node.wait_idle(Duration::from_secs(1)));

        assert_eq!(*result.lock().unwrap(), Some(true));
        slot.lock().unwrap().take();
        node.stop().unwrap();
    }

    #[test]
    fn test_periodic_node_ticks_with_latest() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let tick_log = ticks.clone();
        let node = NodeBuilder::new(
            "tick",
            process_fn("tick", move |inputs, _| {
                tick_log
                    .lock()
                    .unwrap()
                    .push(inputs[0].as_ref().map(|b| b.metadata().sequence));
                Ok(Output::none())
            }),
        )
        .input(SlotSpec::new("in"))
        .model(SchedulingModel::AsyncPeriodic {
            interval: Duration::from_millis(10),
        })
        .build();
        node.start().unwrap();

        thread::sleep(Duration::from_millis(35));
        node.send_input(buf(5), 0).unwrap();
        node.send_input(buf(6), 0).unwrap();
        thread::sleep(Duration::from_millis(35));
        node.stop().unwrap();

        let ticks = ticks.lock().unwrap();
        assert!(ticks.len() >= 3, "too few ticks: {ticks:?}");
        assert_eq!(ticks[0], None);
        // The latest buffer is retained between ticks
        assert_eq!(ticks.last().copied().flatten(), Some(6));
    }
}
