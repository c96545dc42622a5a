//! Messages, listeners and broadcast groups.
//!
//! Anything that wants to be told about an event implements [`Listener`]:
//! closures, [`Mailbox`]es that forward into a graph node, or another
//! [`ListenerGroup`]. Broadcasters hold a `ListenerGroup` and never see the
//! concrete listener types.

use core::any::Any;
use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use tracing::trace;

use crate::node::{NodeFlags, NodeId};

/// Payload delivered to listeners and node mailboxes.
#[derive(Clone, Debug)]
pub enum Message {
    /// Resume a paused recipient.
    Start,
    /// Pause the recipient.
    Pause,
    /// Delete the recipient. Not reversible.
    Kill,
    /// Sent to a kill listener: the node with this id has just been deleted.
    Killed(NodeId),
    /// A timing pulse from a [`Clock`](crate::nodes::Clock).
    Tick { count: u64, beat: bool },
    /// Generic "do your thing now" (restart a player, fire an envelope).
    Trigger,
    /// Named parameter change.
    Param(&'static str, f32),
    /// Anything else.
    Custom(Arc<dyn Any + Send + Sync>),
}

/// A recipient of broadcast messages.
pub trait Listener: Send {
    fn message(&mut self, msg: &Message);

    /// Deleted listeners are dropped from groups instead of receiving messages.
    fn is_deleted(&self) -> bool {
        false
    }
}

impl<F: FnMut(&Message) + Send> Listener for F {
    fn message(&mut self, msg: &Message) {
        self(msg)
    }
}

/// An ordered, self-pruning set of listeners.
///
/// By default a group only relays messages. `Pause`/`Start`/`Kill` sent to the
/// group act on the group itself, and reach the members only when forwarding
/// is switched on with [`forward_pause`](Self::forward_pause) or
/// [`forward_kill`](Self::forward_kill).
#[derive(Default)]
pub struct ListenerGroup {
    listeners: Vec<Box<dyn Listener>>,
    paused: bool,
    deleted: bool,
    forward_pause: bool,
    forward_kill: bool,
}

impl ListenerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward pause and start requests to the members (builder pattern).
    pub fn forward_pause(mut self, forward: bool) -> Self {
        self.forward_pause = forward;
        self
    }

    /// Forward kill requests to the members (builder pattern).
    pub fn forward_kill(mut self, forward: bool) -> Self {
        self.forward_kill = forward;
        self
    }

    /// Append a listener. Delivery order is insertion order.
    pub fn add<L: Listener + 'static>(&mut self, listener: L) {
        self.listeners.push(Box::new(listener));
    }

    /// Append an already boxed listener.
    pub fn add_boxed(&mut self, listener: Box<dyn Listener>) {
        self.listeners.push(listener);
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Number of members, including deleted ones not yet pruned.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Deliver `msg` to every live member in order, dropping deleted ones.
    pub fn broadcast(&mut self, msg: &Message) {
        self.listeners.retain_mut(|listener| {
            if listener.is_deleted() {
                return false;
            }
            listener.message(msg);
            true
        });
    }

    pub fn pause(&mut self) {
        self.paused = true;
        if self.forward_pause {
            self.broadcast(&Message::Pause);
        }
    }

    pub fn start(&mut self) {
        self.paused = false;
        if self.forward_pause {
            self.broadcast(&Message::Start);
        }
    }

    /// Delete the group. Members are killed too when kill forwarding is on.
    pub fn kill(&mut self) {
        if self.deleted {
            return;
        }
        self.deleted = true;
        if self.forward_kill {
            self.broadcast(&Message::Kill);
        }
        self.listeners.clear();
    }
}

impl Listener for ListenerGroup {
    fn message(&mut self, msg: &Message) {
        match msg {
            Message::Pause => self.pause(),
            Message::Start => self.start(),
            Message::Kill => self.kill(),
            _ if !self.paused && !self.deleted => self.broadcast(msg),
            _ => {}
        }
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Messages a node's queue holds before further sends are dropped.
pub const MAILBOX_CAPACITY: usize = 1024;

/// A cloneable, thread-safe way to reach one graph node.
///
/// Lifecycle messages take effect immediately on the node's shared flags.
/// Everything else is queued and handed to [`Compute::message`](crate::Compute::message)
/// when the node is next evaluated. The queue holds [`MAILBOX_CAPACITY`]
/// messages; a node that is paused or never pulled drops the overflow.
#[derive(Clone)]
pub struct Mailbox {
    pub(crate) id: NodeId,
    pub(crate) sender: Sender<Message>,
    pub(crate) flags: Arc<NodeFlags>,
}

impl Mailbox {
    /// The node this mailbox delivers to.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Send a message to the node. Safe to call from any thread, never blocks.
    ///
    /// Returns `false` if the message was dropped because the queue is full
    /// or the node has been swept.
    pub fn send(&self, msg: Message) -> bool {
        match msg {
            Message::Pause => self.flags.set_paused(true),
            Message::Start => self.flags.set_paused(false),
            Message::Kill => {
                self.flags.kill();
            }
            other => match self.sender.try_send(other) {
                Ok(()) => {}
                Err(TrySendError::Full(msg)) => {
                    trace!(id = ?self.id, ?msg, "mailbox full, message dropped");
                    return false;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            },
        }
        true
    }

    /// Whether the node has been deleted.
    pub fn is_node_deleted(&self) -> bool {
        self.flags.is_deleted()
    }
}

impl Listener for Mailbox {
    fn message(&mut self, msg: &Message) {
        self.send(msg.clone());
    }

    fn is_deleted(&self) -> bool {
        self.flags.is_deleted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        dead: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Listener for Recorder {
        fn message(&mut self, _msg: &Message) {
            self.log.lock().unwrap().push(self.name);
        }

        fn is_deleted(&self) -> bool {
            self.dead.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[test]
    fn broadcast_prunes_dead_and_keeps_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dead_b = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut group = ListenerGroup::new();
        for (name, dead) in [
            ("a", Arc::new(Default::default())),
            ("b", dead_b.clone()),
            ("c", Arc::new(Default::default())),
        ] {
            group.add(Recorder { name, log: log.clone(), dead });
        }

        group.broadcast(&Message::Trigger);
        dead_b.store(true, std::sync::atomic::Ordering::SeqCst);
        group.broadcast(&Message::Trigger);

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c", "a", "c"]);
        assert_eq!(group.len(), 2);
    }

    #[test]
    fn lifecycle_is_not_forwarded_by_default() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut group = ListenerGroup::new();
        group.add(move |msg: &Message| sink.lock().unwrap().push(format!("{:?}", msg)));

        group.message(&Message::Pause);
        group.message(&Message::Trigger);
        assert!(seen.lock().unwrap().is_empty());

        group.message(&Message::Start);
        group.message(&Message::Trigger);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn forwarding_kill_reaches_members() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut group = ListenerGroup::new().forward_kill(true);
        group.add(move |msg: &Message| sink.lock().unwrap().push(format!("{:?}", msg)));

        group.message(&Message::Kill);
        assert!(group.is_deleted());
        assert_eq!(*seen.lock().unwrap(), vec!["Kill".to_string()]);
    }
}
