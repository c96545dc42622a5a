//! Audio graph - owns nodes, wiring and the once-per-tick pull.
//!
//! Nodes live in an arena addressed by [`NodeId`]. Each input channel of a node
//! keeps an ordered list of `(source, output channel)` wires whose outputs are
//! summed into it, and each node keeps a list of dependents that are pulled
//! even though nothing reads their output. Evaluating a node pulls its
//! dependents and sources first, which recursively evaluates the whole upstream
//! graph; a node stamped with the current tick is never evaluated twice, which
//! makes shared ancestors and feedback loops safe.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, trace};

use crate::listener::{Listener, Mailbox, Message, MAILBOX_CAPACITY};
use crate::node::{Compute, NodeFlags, NodeId, OutputInit, PausePolicy, ProcessContext};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Wire {
    source: NodeId,
    channel: usize,
}

struct NodeData {
    compute: Box<dyn Compute>,
    inputs: Vec<Vec<f32>>,
    outputs: Vec<Vec<f32>>,
    /// Per input channel, summed in order.
    sources: Vec<Vec<Wire>>,
    dependents: Vec<NodeId>,
    /// No input channel has a source; skips zeroing and summation entirely.
    no_inputs: bool,
    flags: Arc<NodeFlags>,
    /// Whether the pause policy has been applied for the current pause.
    pause_applied: bool,
    pause_policy: PausePolicy,
    output_init: OutputInit,
    kill_listener: Option<Box<dyn Listener>>,
    kill_notified: bool,
    last_tick: Option<u64>,
    sender: Sender<Message>,
    receiver: Receiver<Message>,
}

impl NodeData {
    fn apply_pause(&mut self) {
        if self.pause_policy == PausePolicy::Zero {
            for buffer in self.outputs.iter_mut() {
                buffer.fill(0.0);
            }
        }
        self.pause_applied = true;
    }
}

struct Slot {
    generation: u32,
    node: Option<NodeData>,
}

/// An arena of nodes pulled synchronously once per tick.
pub struct Graph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    sample_rate: u32,
    buffer_len: usize,
    tick: u64,
}

impl Graph {
    /// Create an empty graph whose buffers hold `buffer_len` frames.
    pub fn new(sample_rate: u32, buffer_len: usize) -> Self {
        Self {
            slots: Vec::with_capacity(64),
            free: Vec::new(),
            sample_rate,
            buffer_len: buffer_len.max(1),
            tick: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames per tick.
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// The tick the next evaluation belongs to.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Move to the given tick. Every node becomes eligible for evaluation again.
    pub fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    /// Move to the next tick.
    pub fn advance(&mut self) {
        self.tick += 1;
    }

    /// Resize every node buffer. Takes effect from the next tick.
    pub fn set_buffer_len(&mut self, buffer_len: usize) {
        self.buffer_len = buffer_len.max(1);
        let len = self.buffer_len;
        for node in self.slots.iter_mut().filter_map(|s| s.node.as_mut()) {
            for buffer in node.inputs.iter_mut().chain(node.outputs.iter_mut()) {
                buffer.resize(len, 0.0);
            }
        }
    }

    /// Context handed to computations during the current tick.
    pub fn context(&self) -> ProcessContext {
        ProcessContext {
            sample_rate: self.sample_rate,
            buffer_len: self.buffer_len,
            tick: self.tick,
        }
    }

    /// Add a node. Its channel shape is fixed from `num_inputs`/`num_outputs`.
    pub fn add<C: Compute>(&mut self, compute: C) -> NodeId {
        self.add_boxed(Box::new(compute))
    }

    /// Add an already boxed computation.
    pub fn add_boxed(&mut self, compute: Box<dyn Compute>) -> NodeId {
        let ins = compute.num_inputs();
        let outs = compute.num_outputs();
        let (sender, receiver) = crossbeam_channel::bounded(MAILBOX_CAPACITY);
        let data = NodeData {
            compute,
            inputs: vec![vec![0.0; self.buffer_len]; ins],
            outputs: vec![vec![0.0; self.buffer_len]; outs],
            sources: vec![Vec::new(); ins],
            dependents: Vec::new(),
            no_inputs: true,
            flags: Arc::new(NodeFlags::default()),
            pause_applied: false,
            pause_policy: PausePolicy::default(),
            output_init: OutputInit::default(),
            kill_listener: None,
            kill_notified: false,
            last_tick: None,
            sender,
            receiver,
        };

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(data);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(data),
                });
                NodeId { index, generation: 0 }
            }
        };
        trace!(?id, ins, outs, "added node");
        id
    }

    fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    fn data_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }

    fn expect_data(&self, id: NodeId) -> &NodeData {
        match self.data(id) {
            Some(data) => data,
            None => panic!("node {:?} is not in this graph", id),
        }
    }

    fn expect_data_mut(&mut self, id: NodeId) -> &mut NodeData {
        match self.data_mut(id) {
            Some(data) => data,
            None => panic!("node {:?} is not in this graph", id),
        }
    }

    /// Whether `id` still occupies a slot (deleted nodes do until [`sweep`](Self::sweep)).
    pub fn contains(&self, id: NodeId) -> bool {
        self.data(id).is_some()
    }

    /// Number of nodes in the arena, deleted or not.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow a node's computation as its concrete type.
    pub fn node<T: Compute>(&self, id: NodeId) -> Option<&T> {
        self.data(id).and_then(|d| (*d.compute).as_any().downcast_ref())
    }

    /// Mutably borrow a node's computation as its concrete type.
    pub fn node_mut<T: Compute>(&mut self, id: NodeId) -> Option<&mut T> {
        self.data_mut(id).and_then(|d| (*d.compute).as_any_mut().downcast_mut())
    }

    pub fn num_inputs(&self, id: NodeId) -> usize {
        self.expect_data(id).inputs.len()
    }

    pub fn num_outputs(&self, id: NodeId) -> usize {
        self.expect_data(id).outputs.len()
    }

    /// The output buffers computed for the most recent tick.
    pub fn outputs(&self, id: NodeId) -> &[Vec<f32>] {
        &self.expect_data(id).outputs
    }

    /// One output channel.
    ///
    /// # Panics
    ///
    /// Panics if `channel` is out of range.
    pub fn output(&self, id: NodeId, channel: usize) -> &[f32] {
        &self.expect_data(id).outputs[channel]
    }

    /// One input channel as summed during the most recent evaluation.
    pub fn input(&self, id: NodeId, channel: usize) -> &[f32] {
        &self.expect_data(id).inputs[channel]
    }

    // ---------------------------------------------------------------------
    // Wiring
    // ---------------------------------------------------------------------

    /// Sum `source`'s output channel `source_channel` into `target`'s input `target_input`.
    ///
    /// # Panics
    ///
    /// Panics if either channel index does not exist.
    pub fn connect(&mut self, source: NodeId, source_channel: usize, target: NodeId, target_input: usize) {
        let outs = self.num_outputs(source);
        assert!(
            source_channel < outs,
            "source {:?} has {} outputs, no channel {}",
            source,
            outs,
            source_channel
        );
        let data = self.expect_data_mut(target);
        assert!(
            target_input < data.sources.len(),
            "target {:?} has {} inputs, no channel {}",
            target,
            data.sources.len(),
            target_input
        );
        data.sources[target_input].push(Wire {
            source,
            channel: source_channel,
        });
        data.no_inputs = false;
    }

    /// Wire every input of `target` to `source`, cycling through the source's
    /// outputs when it has fewer channels than `target` has inputs.
    ///
    /// A source without outputs is not connected.
    pub fn auto_connect(&mut self, source: NodeId, target: NodeId) {
        let outs = self.num_outputs(source);
        if outs == 0 {
            return;
        }
        for input in 0..self.num_inputs(target) {
            self.connect(source, input % outs, target, input);
        }
    }

    /// Remove the wires from `source` into one input of `target`.
    pub fn disconnect(&mut self, target: NodeId, target_input: usize, source: NodeId) {
        let data = self.expect_data_mut(target);
        data.sources[target_input].retain(|w| w.source != source);
        if data.sources[target_input].is_empty() {
            data.inputs[target_input].fill(0.0);
        }
        data.no_inputs = data.sources.iter().all(Vec::is_empty);
    }

    /// Remove every wire from `source` into any input of `target`.
    pub fn disconnect_all(&mut self, target: NodeId, source: NodeId) {
        let data = self.expect_data_mut(target);
        for (wires, input) in data.sources.iter_mut().zip(data.inputs.iter_mut()) {
            let before = wires.len();
            wires.retain(|w| w.source != source);
            if wires.is_empty() && before > 0 {
                input.fill(0.0);
            }
        }
        data.no_inputs = data.sources.iter().all(Vec::is_empty);
    }

    /// Remove every wire into `target`.
    pub fn clear_inputs(&mut self, target: NodeId) {
        let data = self.expect_data_mut(target);
        for (wires, input) in data.sources.iter_mut().zip(data.inputs.iter_mut()) {
            wires.clear();
            input.fill(0.0);
        }
        data.no_inputs = true;
    }

    /// Remove `source` from the inputs and dependents of every node in the graph.
    pub fn remove_all_connections(&mut self, source: NodeId) {
        for slot in self.slots.iter_mut() {
            let Some(data) = slot.node.as_mut() else {
                continue;
            };
            for (wires, input) in data.sources.iter_mut().zip(data.inputs.iter_mut()) {
                let before = wires.len();
                wires.retain(|w| w.source != source);
                if wires.is_empty() && before > 0 {
                    input.fill(0.0);
                }
            }
            data.no_inputs = data.sources.iter().all(Vec::is_empty);
            data.dependents.retain(|&d| d != source);
        }
    }

    /// Number of wires feeding one input of `target`.
    pub fn source_count(&self, target: NodeId, target_input: usize) -> usize {
        self.expect_data(target).sources[target_input].len()
    }

    /// Whether `target` currently takes the no-inputs path.
    pub fn has_no_inputs(&self, target: NodeId) -> bool {
        self.expect_data(target).no_inputs
    }

    /// Pull `dependent` every time `target` is evaluated, regardless of outputs.
    pub fn add_dependent(&mut self, target: NodeId, dependent: NodeId) {
        assert!(self.contains(dependent), "dependent {:?} is not in this graph", dependent);
        self.expect_data_mut(target).dependents.push(dependent);
    }

    pub fn remove_dependent(&mut self, target: NodeId, dependent: NodeId) {
        self.expect_data_mut(target).dependents.retain(|&d| d != dependent);
    }

    pub fn dependent_count(&self, target: NodeId) -> usize {
        self.expect_data(target).dependents.len()
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    pub fn set_pause_policy(&mut self, id: NodeId, policy: PausePolicy) {
        self.expect_data_mut(id).pause_policy = policy;
    }

    pub fn set_output_init(&mut self, id: NodeId, init: OutputInit) {
        self.expect_data_mut(id).output_init = init;
    }

    /// Stop evaluating `id`. Its output is cleared or held according to its [`PausePolicy`].
    pub fn pause(&mut self, id: NodeId) {
        let data = self.expect_data_mut(id);
        if data.flags.is_deleted() {
            return;
        }
        data.flags.set_paused(true);
        data.apply_pause();
    }

    /// Resume a paused node.
    pub fn start(&mut self, id: NodeId) {
        let data = self.expect_data_mut(id);
        data.flags.set_paused(false);
        data.pause_applied = false;
    }

    pub fn is_paused(&self, id: NodeId) -> bool {
        self.data(id).map_or(false, |d| d.flags.is_paused())
    }

    /// Whether `id` is deleted. Swept nodes count as deleted.
    pub fn is_deleted(&self, id: NodeId) -> bool {
        self.data(id).map_or(true, |d| d.flags.is_deleted())
    }

    /// Delete `id` and notify its kill listener. Consumers drop it on their next evaluation.
    pub fn kill(&mut self, id: NodeId) {
        if let Some(data) = self.data_mut(id) {
            data.flags.kill();
            Self::notify_killed(id, data);
        }
    }

    /// Set the listener told (once) when `id` is deleted.
    pub fn set_kill_listener<L: Listener + 'static>(&mut self, id: NodeId, listener: L) {
        self.expect_data_mut(id).kill_listener = Some(Box::new(listener));
    }

    pub fn clear_kill_listener(&mut self, id: NodeId) {
        self.expect_data_mut(id).kill_listener = None;
    }

    /// A handle for messaging `id` from anywhere, including other threads.
    pub fn mailbox(&self, id: NodeId) -> Mailbox {
        let data = self.expect_data(id);
        Mailbox {
            id,
            sender: data.sender.clone(),
            flags: data.flags.clone(),
        }
    }

    fn notify_killed(id: NodeId, data: &mut NodeData) {
        if data.kill_notified {
            return;
        }
        data.kill_notified = true;
        debug!(?id, "node killed");
        if let Some(listener) = data.kill_listener.as_mut() {
            listener.message(&Message::Killed(id));
        }
    }

    /// Check whether `id` is gone, firing its kill notification the first time
    /// a deletion made through a mailbox is observed.
    fn observe_deleted(&mut self, id: NodeId) -> bool {
        match self.data_mut(id) {
            Some(data) if data.flags.is_deleted() => {
                Self::notify_killed(id, data);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    /// Free the slots of deleted nodes and drop every reference to them.
    ///
    /// Returns the number of nodes removed.
    pub fn sweep(&mut self) -> usize {
        let dead: Vec<NodeId> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let data = slot.node.as_ref()?;
                data.flags.is_deleted().then_some(NodeId {
                    index: index as u32,
                    generation: slot.generation,
                })
            })
            .collect();

        for &id in &dead {
            if let Some(data) = self.data_mut(id) {
                Self::notify_killed(id, data);
            }
            self.remove_all_connections(id);
            let slot = &mut self.slots[id.index as usize];
            slot.node = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
        }
        if !dead.is_empty() {
            debug!(removed = dead.len(), "swept deleted nodes");
        }
        dead.len()
    }

    // ---------------------------------------------------------------------
    // Evaluation
    // ---------------------------------------------------------------------

    /// Evaluate `id` for the current tick, pulling everything upstream of it.
    ///
    /// Does nothing if the node is paused, deleted, or already evaluated this tick.
    pub fn update(&mut self, id: NodeId) {
        let tick = self.tick;
        let ctx = self.context();

        let Some(data) = self.data_mut(id) else {
            return;
        };
        if data.flags.is_deleted() {
            Self::notify_killed(id, data);
            return;
        }
        if data.flags.is_paused() {
            if !data.pause_applied {
                data.apply_pause();
            }
            return;
        }
        data.pause_applied = false;
        if data.last_tick == Some(tick) {
            return;
        }
        // stamped before recursing so a feedback wire back to this node
        // reads last tick's output instead of recursing forever
        data.last_tick = Some(tick);

        while let Ok(msg) = data.receiver.try_recv() {
            data.compute.message(&msg);
        }

        let mut dependents = std::mem::take(&mut data.dependents);
        let has_inputs = !data.no_inputs;

        dependents.retain(|&dep| {
            if self.observe_deleted(dep) {
                return false;
            }
            self.update(dep);
            true
        });

        let (sources, inputs) = if has_inputs {
            let Some(data) = self.data_mut(id) else {
                return;
            };
            let mut sources = std::mem::take(&mut data.sources);
            let mut inputs = std::mem::take(&mut data.inputs);
            for (wires, input) in sources.iter_mut().zip(inputs.iter_mut()) {
                if wires.is_empty() {
                    continue;
                }
                input.fill(0.0);
                wires.retain(|wire| {
                    if self.observe_deleted(wire.source) {
                        return false;
                    }
                    self.update(wire.source);
                    if let Some(src) = self.data(wire.source) {
                        for (acc, sample) in input.iter_mut().zip(src.outputs[wire.channel].iter()) {
                            *acc += *sample;
                        }
                    }
                    true
                });
            }
            (Some(sources), Some(inputs))
        } else {
            (None, None)
        };

        let Some(data) = self.data_mut(id) else {
            return;
        };
        // anything registered while we were recursing stays registered
        dependents.append(&mut data.dependents);
        data.dependents = dependents;
        if let (Some(sources), Some(inputs)) = (sources, inputs) {
            data.no_inputs = sources.iter().all(Vec::is_empty);
            data.sources = sources;
            data.inputs = inputs;
        }

        if data.output_init == OutputInit::Zero {
            for buffer in data.outputs.iter_mut() {
                buffer.fill(0.0);
            }
        }
        data.compute.process(&ctx, &data.inputs, &mut data.outputs);

        if data.compute.is_finished() {
            data.flags.kill();
            Self::notify_killed(id, data);
        }
    }
}
