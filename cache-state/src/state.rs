//! The state manager: applies sync batches and answers queries.
//!
//! Applying a batch is a two-stage pipeline:
//!
//! 1. All writes of the batch go through one write transaction. If any of
//!    them fails the transaction rolls back and the batch is rejected.
//! 2. Only after the commit, the batch is parsed and dispatched to the
//!    registry, then waiters are woken. Nothing in stage 2 can undo stage 1.
//!
//! Both stages run under one lock, so batches are committed and dispatched
//! strictly in call order. Readers are never blocked by it.

use roomcache_core::{DispatchReport, Registry};
use roomcache_store::{Engine, Node, Path};
use roomcache_types::{
    parse, Cursor, Event, ParsedEvent, RawEvent, RoomId, RoomSummary, SyncResponse, UserId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::{Mutex, PoisonError};

use crate::batch;
use crate::config::StoreConfig;
use crate::error::{Result, StateError};
use crate::layout;
use crate::waiter::SyncWaiters;

type StoreResult<T> = roomcache_store::Result<T>;

/// Outcome of [`StateManager::apply_sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// The cursor recorded by this batch.
    pub cursor: Cursor,
    /// Event values written to the store.
    pub written: usize,
    /// What dispatch did.
    pub dispatch: DispatchReport,
    /// Waiters that received the cursor.
    pub woken: usize,
}

/// Persistent cache of sync state.
pub struct StateManager {
    root: Node<'static>,
    registry: Registry,
    waiters: SyncWaiters,
    timeline_limit: usize,
    apply_lock: Mutex<()>,
}

impl StateManager {
    /// A manager over `engine`, keeping `timeline_limit` events per room.
    pub fn new(engine: Engine, timeline_limit: usize) -> Self {
        Self {
            root: Node::new(engine, Path::new([layout::ROOT])),
            registry: Registry::new(),
            waiters: SyncWaiters::new(),
            timeline_limit: timeline_limit.max(1),
            apply_lock: Mutex::new(()),
        }
    }

    /// Open the store described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let engine = Engine::open(&config.path)?.with_codec(config.codec);
        tracing::info!(
            "Opened state cache at {} (timeline limit {})",
            config.path.display(),
            config.timeline_limit
        );
        Ok(Self::new(engine, config.timeline_limit))
    }

    /// A manager over an in-memory store.
    pub fn in_memory(timeline_limit: usize) -> Result<Self> {
        Ok(Self::new(Engine::in_memory()?, timeline_limit))
    }

    /// The event registry subscribers register with.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Events kept per room timeline.
    pub fn timeline_limit(&self) -> usize {
        self.timeline_limit
    }

    /// Number of tasks currently waiting for a sync.
    pub fn pending_waiters(&self) -> usize {
        self.waiters.len()
    }

    /// Apply one sync payload.
    ///
    /// On error nothing from the payload is stored and nothing is dispatched.
    pub fn apply_sync(&self, sync: &SyncResponse) -> Result<ApplyReport> {
        let _guard = self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let limit = self.timeline_limit;
        let written = self.root.tx_update(|root| write_sync(root, sync, limit))?;
        tracing::info!(
            "Committed sync batch {} ({} joined, {} invited, {} left, {} values)",
            sync.next_batch,
            sync.rooms.join.len(),
            sync.rooms.invite.len(),
            sync.rooms.leave.len(),
            written
        );

        let batch = batch::build(sync, limit);
        let dispatch = self.registry.dispatch(&batch);
        if dispatch.panics > 0 {
            tracing::warn!("{} subscriber(s) panicked during batch {}", dispatch.panics, sync.next_batch);
        }

        let woken = self.waiters.notify(&sync.next_batch);

        Ok(ApplyReport {
            cursor: sync.next_batch.clone(),
            written,
            dispatch,
            woken,
        })
    }

    /// Resolve with the cursor of the next applied sync.
    ///
    /// The waiter is registered when this is called, not when the future is
    /// first polled. Dropping the future deregisters it. Resolves to `None`
    /// if the manager is dropped first.
    pub fn wait_next_sync(&self) -> impl Future<Output = Option<Cursor>> + Send + 'static {
        let mut waiter = self.waiters.subscribe();
        async move { waiter.next().await }
    }

    /// Cache room state and account-data events from outside a sync
    /// (e.g. a state fetch), without overwriting anything already cached.
    ///
    /// Returns the number of events written.
    pub fn cache_room_events(&self, room: &RoomId, events: &[RawEvent]) -> Result<usize> {
        let written = self.root.tx_update(|root| {
            let mut written = 0;
            for raw in events {
                let Some(event) = parse_for_write(raw, Some(room)) else {
                    continue;
                };
                let stored = match &event.state_key {
                    Some(state_key) => layout::room_state(root, room, &event.event_type)
                        .set_if_none(state_key, raw.as_bytes())?,
                    None => layout::room_account_data(root, room)
                        .set_if_none(&event.event_type, raw.as_bytes())?,
                };
                written += usize::from(stored);
            }
            Ok(written)
        })?;
        Ok(written)
    }

    /// Cache user-scoped events without overwriting anything already cached.
    ///
    /// A newly cached `m.direct` event also fills the direct-room set.
    pub fn cache_user_events(&self, events: &[RawEvent]) -> Result<usize> {
        let written = self.root.tx_update(|root| {
            let user = layout::user(root);
            let mut written = 0;
            for raw in events {
                let Some(event) = parse_for_write(raw, None) else {
                    continue;
                };
                let stored = match user_key(&event) {
                    Some(key) => user.set_if_none(key, raw.as_bytes())?,
                    None => false,
                };
                if stored && event.event_type == layout::DIRECT {
                    rebuild_directs(root, &event)?;
                }
                written += usize::from(stored);
            }
            Ok(written)
        })?;
        Ok(written)
    }

    /// Cache older timeline events (e.g. from back-pagination) without
    /// overwriting anything, then trim the timeline to its limit.
    pub fn cache_timeline_events(&self, room: &RoomId, events: &[RawEvent]) -> Result<usize> {
        let limit = self.timeline_limit;
        let written = self.root.tx_update(|root| {
            let timeline = layout::timeline_events(root, room);
            let mut written = 0;
            for raw in events {
                let Some(key) = parse_for_write(raw, Some(room)).and_then(|e| layout::timeline_key(&e))
                else {
                    continue;
                };
                written += usize::from(timeline.set_if_none(key, raw.as_bytes())?);
            }
            timeline.drop_except_last(limit)?;
            Ok(written)
        })?;
        Ok(written)
    }

    /// The cursor of the last applied sync, `None` if never synced.
    pub fn next_cursor(&self) -> Result<Option<Cursor>> {
        match self.root.get(layout::NEXT_BATCH) {
            Ok(bytes) => Ok(Some(Cursor::new(String::from_utf8_lossy(&bytes)))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The user this cache belongs to, if recorded.
    pub fn whoami(&self) -> Result<Option<UserId>> {
        match self.root.get(layout::USER_ID) {
            Ok(bytes) => Ok(Some(UserId::new(String::from_utf8_lossy(&bytes)))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Record the user this cache belongs to.
    pub fn set_whoami(&self, user: &UserId) -> Result<()> {
        self.root.set(layout::USER_ID, user.as_str())?;
        Ok(())
    }

    /// One room state event.
    ///
    /// A cached event that no longer parses counts as not found.
    pub fn room_state(&self, room: &RoomId, event_type: &str, state_key: &str) -> Result<Event> {
        let node = layout::room_state(&self.root, room, event_type);
        let bytes = node.get(state_key)?;
        parse_stored(&bytes, Some(room), node.path())
    }

    /// All state events of one type in a room, by state key.
    ///
    /// Entries that no longer parse are skipped. An unknown room or type
    /// gives an empty map.
    pub fn room_states(&self, room: &RoomId, event_type: &str) -> Result<BTreeMap<String, Event>> {
        let mut out = BTreeMap::new();
        let walked = layout::room_state(&self.root, room, event_type).each(false, |key, value, _| {
            if let Some(event) = parse_or_skip(value, Some(room)) {
                out.insert(String::from_utf8_lossy(key).into_owned(), event);
            }
            Ok(ControlFlow::Continue(()))
        });
        empty_if_missing(walked)?;
        Ok(out)
    }

    /// The cached timeline of a room, oldest first.
    pub fn room_timeline(&self, room: &RoomId) -> Result<Vec<Event>> {
        let mut out = Vec::new();
        let walked = layout::timeline_events(&self.root, room).each(false, |_, value, _| {
            out.extend(parse_or_skip(value, Some(room)));
            Ok(ControlFlow::Continue(()))
        });
        empty_if_missing(walked)?;
        Ok(out)
    }

    /// The newest cached timeline event of `event_type` in a room.
    pub fn latest_in_timeline(&self, room: &RoomId, event_type: &str) -> Result<Event> {
        let mut found = None;
        let walked = layout::timeline_events(&self.root, room).each(true, |_, value, _| {
            match parse_or_skip(value, Some(room)) {
                Some(event) if event.event_type == event_type => {
                    found = Some(event);
                    Ok(ControlFlow::Break(()))
                }
                _ => Ok(ControlFlow::Continue(())),
            }
        });
        empty_if_missing(walked)?;
        found.ok_or_else(|| StateError::NotFound(format!("no {} in timeline of {}", event_type, room)))
    }

    /// Pagination token for events before the cached timeline.
    pub fn room_prev_batch(&self, room: &RoomId) -> Result<Option<String>> {
        match layout::timeline(&self.root, room).get(layout::PREV_BATCH) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// One user-scoped event (account data) by type.
    pub fn user_event(&self, event_type: &str) -> Result<Event> {
        let node = layout::user(&self.root);
        let bytes = node.get(event_type)?;
        parse_stored(&bytes, None, node.path())
    }

    /// The last presence event of a user.
    pub fn presence(&self, user: &UserId) -> Result<Event> {
        let node = layout::user(&self.root);
        let bytes = node.get(layout::presence_key(user.as_str()))?;
        parse_stored(&bytes, None, node.path())
    }

    /// One room account-data event by type.
    pub fn room_account_data(&self, room: &RoomId, event_type: &str) -> Result<Event> {
        let node = layout::room_account_data(&self.root, room);
        let bytes = node.get(event_type)?;
        parse_stored(&bytes, Some(room), node.path())
    }

    /// The last summary received for a room.
    pub fn room_summary(&self, room: &RoomId) -> Result<RoomSummary> {
        Ok(layout::summaries(&self.root).get_any(room)?)
    }

    /// Every room with cached state, timeline or summary, sorted by id.
    pub fn rooms(&self) -> Result<Vec<RoomId>> {
        let mut names = BTreeSet::new();
        names.extend(empty_if_missing(layout::rooms(&self.root).children())?);
        names.extend(empty_if_missing(layout::timelines(&self.root).children())?);
        let walked = layout::summaries(&self.root).each(false, |room, _, _| {
            names.insert(room.to_vec());
            Ok(ControlFlow::Continue(()))
        });
        empty_if_missing(walked)?;

        Ok(names
            .into_iter()
            .map(|name| RoomId::new(String::from_utf8_lossy(&name)))
            .collect())
    }

    /// True if the room is a direct-message room.
    pub fn is_direct(&self, room: &RoomId) -> Result<bool> {
        Ok(layout::directs(&self.root).exists(room)?)
    }

    /// Direct-message rooms and their partner.
    pub fn direct_rooms(&self) -> Result<BTreeMap<RoomId, UserId>> {
        let mut out = BTreeMap::new();
        let walked = layout::directs(&self.root).each(false, |room, user, _| {
            out.insert(
                RoomId::new(String::from_utf8_lossy(room)),
                UserId::new(String::from_utf8_lossy(user)),
            );
            Ok(ControlFlow::Continue(()))
        });
        empty_if_missing(walked)?;
        Ok(out)
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("root", self.root.path())
            .field("timeline_limit", &self.timeline_limit)
            .field("registry", &self.registry)
            .finish()
    }
}

fn empty_if_missing<T: Default>(result: StoreResult<T>) -> StoreResult<T> {
    match result {
        Err(e) if e.is_not_found() => Ok(T::default()),
        other => other,
    }
}

/// Parse an event about to be written; unparseable events are logged and skipped.
fn parse_for_write(raw: &RawEvent, room: Option<&RoomId>) -> Option<Event> {
    match raw.parse(room) {
        ParsedEvent::Event(event) => Some(event),
        ParsedEvent::Erroneous(err) => {
            tracing::warn!("Not caching {}", err);
            None
        }
    }
}

fn parse_or_skip(bytes: &[u8], room: Option<&RoomId>) -> Option<Event> {
    match parse(bytes, room) {
        ParsedEvent::Event(event) => Some(event),
        ParsedEvent::Erroneous(err) => {
            tracing::debug!("Skipping cached {}", err);
            None
        }
    }
}

fn parse_stored(bytes: &[u8], room: Option<&RoomId>, at: &Path) -> Result<Event> {
    parse(bytes, room).into_result().map_err(|err| {
        tracing::warn!("Cached event under {} is unreadable: {}", at, err);
        StateError::NotFound(format!("unreadable event under {}", at))
    })
}

/// Key of a user-scoped event: its type, or (presence, sender) for presence.
fn user_key(event: &Event) -> Option<Vec<u8>> {
    if event.event_type == layout::PRESENCE {
        let sender = event.sender.as_ref()?;
        return Some(layout::presence_key(sender.as_str()));
    }
    Some(event.event_type.as_bytes().to_vec())
}

fn write_events_as_state(root: &Node<'_>, room: &RoomId, raws: &[RawEvent]) -> StoreResult<usize> {
    let mut written = 0;
    for raw in raws {
        let Some(event) = parse_for_write(raw, Some(room)) else {
            continue;
        };
        let Some(state_key) = &event.state_key else {
            continue;
        };
        layout::room_state(root, room, &event.event_type).set(state_key, raw.as_bytes())?;
        written += 1;
    }
    Ok(written)
}

fn write_room_account_data(root: &Node<'_>, room: &RoomId, raws: &[RawEvent]) -> StoreResult<usize> {
    let node = layout::room_account_data(root, room);
    let mut written = 0;
    for raw in raws {
        let Some(event) = parse_for_write(raw, Some(room)) else {
            continue;
        };
        node.set(&event.event_type, raw.as_bytes())?;
        written += 1;
    }
    Ok(written)
}

fn append_timeline(root: &Node<'_>, room: &RoomId, raws: &[RawEvent], limit: usize) -> StoreResult<usize> {
    let node = layout::timeline_events(root, room);
    let mut written = 0;
    for raw in raws {
        let Some(event) = parse_for_write(raw, Some(room)) else {
            continue;
        };
        let Some(key) = layout::timeline_key(&event) else {
            tracing::debug!("Timeline event without id or timestamp in {}", room);
            continue;
        };
        node.set(key, raw.as_bytes())?;
        written += 1;
    }
    if written > 0 {
        node.drop_except_last(limit)?;
    }
    Ok(written)
}

/// Replace the direct-room set from `m.direct` content (`user -> [room]`).
fn rebuild_directs(root: &Node<'_>, event: &Event) -> StoreResult<()> {
    let directs = layout::directs(root);
    directs.drop_bucket()?;

    let Some(map) = event.content.as_object() else {
        return Ok(());
    };
    for (user, rooms) in map {
        for room in rooms.as_array().into_iter().flatten().filter_map(|r| r.as_str()) {
            directs.set(room, user)?;
        }
    }
    Ok(())
}

fn write_user_events(root: &Node<'_>, raws: &[RawEvent]) -> StoreResult<usize> {
    let user = layout::user(root);
    let mut written = 0;
    for raw in raws {
        let Some(event) = parse_for_write(raw, None) else {
            continue;
        };
        let Some(key) = user_key(&event) else {
            continue;
        };
        user.set(key, raw.as_bytes())?;
        if event.event_type == layout::DIRECT {
            rebuild_directs(root, &event)?;
        }
        written += 1;
    }
    Ok(written)
}

/// All writes of one sync batch. Runs inside the batch's write transaction.
fn write_sync(root: &Node<'_>, sync: &SyncResponse, limit: usize) -> StoreResult<usize> {
    let mut written = 0;

    for (room, joined) in &sync.rooms.join {
        written += write_events_as_state(root, room, &joined.state.events)?;
        written += write_events_as_state(root, room, &joined.timeline.events)?;
        written += write_room_account_data(root, room, &joined.account_data.events)?;
        if !joined.summary.is_empty() {
            layout::summaries(root).set_any(room, &joined.summary)?;
        }
        written += append_timeline(root, room, &joined.timeline.events, limit)?;
        if let Some(prev_batch) = &joined.timeline.prev_batch {
            layout::timeline(root, room).set(layout::PREV_BATCH, prev_batch)?;
        }
    }

    for (room, invited) in &sync.rooms.invite {
        written += write_events_as_state(root, room, &invited.invite_state.events)?;
    }

    for (room, left) in &sync.rooms.leave {
        written += write_events_as_state(root, room, &left.state.events)?;
        written += write_events_as_state(root, room, &left.timeline.events)?;
        written += write_room_account_data(root, room, &left.account_data.events)?;
        layout::timeline(root, room).drop_bucket()?;
    }

    written += write_user_events(root, &sync.account_data.events)?;
    written += write_user_events(root, &sync.presence.events)?;

    root.set(layout::NEXT_BATCH, sync.next_batch.as_str())?;
    Ok(written)
}
