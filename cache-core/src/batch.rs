//! Dispatch input and output.

use roomcache_types::{Event, RoomId, SyncResponse};

/// A room's membership as reported by the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// Joined rooms.
    Join,
    /// Pending invites.
    Invite,
    /// Rooms the user left or was removed from.
    Leave,
}

/// Non-timeline events of one room in one batch.
#[derive(Debug, Clone)]
pub struct RoomBatch {
    /// The room.
    pub room: RoomId,
    /// Membership section the room came from.
    pub membership: Membership,
    /// State, ephemeral and account-data events, in payload order.
    pub events: Vec<Event>,
}

/// Everything one committed sync batch dispatches, already parsed.
#[derive(Debug, Clone)]
pub struct Batch<'a> {
    /// The payload, for sync-scoped subscribers.
    pub sync: &'a SyncResponse,
    /// User-scoped events, in payload order.
    pub user: Vec<Event>,
    /// Rooms: joined first, then invited, then left.
    pub rooms: Vec<RoomBatch>,
    /// Timeline events per room, oldest first.
    pub timelines: Vec<(RoomId, Vec<Event>)>,
}

impl<'a> Batch<'a> {
    /// An empty batch for `sync`.
    pub fn new(sync: &'a SyncResponse) -> Self {
        Self {
            sync,
            user: Vec::new(),
            rooms: Vec::new(),
            timelines: Vec::new(),
        }
    }

    /// Number of events (markers not included).
    pub fn event_count(&self) -> usize {
        self.user.len()
            + self.rooms.iter().map(|r| r.events.len()).sum::<usize>()
            + self.timelines.iter().map(|(_, t)| t.len()).sum::<usize>()
    }
}

/// What a dispatch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handler invocations, markers and sync callbacks included.
    pub invocations: usize,
    /// Handlers that panicked.
    pub panics: usize,
    /// True if timeline dispatch was skipped (first batch after start).
    pub timeline_suppressed: bool,
}
