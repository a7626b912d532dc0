//! Hand-off queue between the connection threads and the host thread

use crossbeam::queue::{ArrayQueue, SegQueue};
use serde_json::Value;
use strum::{Display, EnumString};

use super::registry::ConnectionHandle;
use super::types::FrameMode;

/// A decoded, validated request waiting for the next tick
#[derive(Debug)]
pub struct PendingCommand {
    /// `None` for notifications
    pub id: Option<Value>,
    /// George command text
    pub command: String,
    /// Connection the response goes back to
    pub connection: ConnectionHandle,
    /// Frame mode of the request, mirrored by the response
    pub frame_mode: FrameMode,
}

/// What a bounded queue does when a push finds it full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Refuse the incoming command
    #[default]
    RejectNew,
    /// Evict the oldest queued command to make room
    DropOldest,
}

/// Result of [`CommandQueue::push`]
#[derive(Debug)]
#[must_use]
pub enum PushOutcome {
    Queued,
    /// Queue full, the given command was not queued
    Rejected(PendingCommand),
    /// Queue full, the given command was queued and this one was evicted
    Displaced(PendingCommand),
}

#[derive(Debug)]
enum Slots {
    Bounded(ArrayQueue<PendingCommand>),
    Unbounded(SegQueue<PendingCommand>),
}

/// Lock-free FIFO of pending commands, shared by many producers and a single
/// consumer.
#[derive(Debug)]
pub struct CommandQueue {
    slots: Slots,
    policy: OverflowPolicy,
}

impl CommandQueue {
    /// Creates a queue holding at most `capacity` commands, `None` or 0 for
    /// unbounded
    pub fn new(capacity: Option<usize>, policy: OverflowPolicy) -> Self {
        let slots = match capacity.filter(|&c| c > 0) {
            Some(capacity) => Slots::Bounded(ArrayQueue::new(capacity)),
            None => Slots::Unbounded(SegQueue::new()),
        };
        Self { slots, policy }
    }

    pub fn unbounded() -> Self {
        Self::new(None, OverflowPolicy::default())
    }

    pub fn capacity(&self) -> Option<usize> {
        match &self.slots {
            Slots::Bounded(slots) => Some(slots.capacity()),
            Slots::Unbounded(_) => None,
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Enqueues a command, applying the overflow policy if the queue is full
    pub fn push(&self, item: PendingCommand) -> PushOutcome {
        match &self.slots {
            Slots::Unbounded(slots) => {
                slots.push(item);
                PushOutcome::Queued
            }
            Slots::Bounded(slots) => match self.policy {
                OverflowPolicy::RejectNew => match slots.push(item) {
                    Ok(()) => PushOutcome::Queued,
                    Err(item) => PushOutcome::Rejected(item),
                },
                OverflowPolicy::DropOldest => match slots.force_push(item) {
                    None => PushOutcome::Queued,
                    Some(evicted) => PushOutcome::Displaced(evicted),
                },
            },
        }
    }

    /// Takes the oldest pending command, never blocks
    pub fn pop_one(&self) -> Option<PendingCommand> {
        match &self.slots {
            Slots::Bounded(slots) => slots.pop(),
            Slots::Unbounded(slots) => slots.pop(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.slots {
            Slots::Bounded(slots) => slots.len(),
            Slots::Unbounded(slots) => slots.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all pending commands without executing them, returns how many
    pub fn clear(&self) -> usize {
        std::iter::from_fn(|| self.pop_one()).count()
    }
}
