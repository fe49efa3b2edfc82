//! Event registry: type-indexed subscriptions and batch dispatch.
//!
//! Subscriptions live in an arena addressed by generation-checked
//! [`SubscriptionId`]s. Subscribing and unsubscribing never touch the live
//! table; they append to a pending-change list which [`Registry::dispatch`]
//! applies atomically before it walks the batch. Consequences:
//!
//! - A handler may subscribe or unsubscribe (itself included) while it is
//!   being called; nothing deadlocks.
//! - Changes become visible at the start of the next dispatch, never halfway
//!   through one.
//! - Handlers run with no registry lock held.

use roomcache_types::{Event, RoomId, SyncResponse, ROOM_SYNCED};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::batch::{Batch, DispatchReport};
use crate::handler::{Handler, Options, Scope, TypeFilter};

/// Opaque identifier of a subscription.
///
/// The generation makes a stale id (whose slot has since been reused)
/// harmless: it no longer matches anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    index: u32,
    generation: u32,
}

struct Slot {
    id: SubscriptionId,
    scope: Scope,
    filter: TypeFilter,
    once: bool,
    handler: Handler,
    seq: u64,
}

enum Change {
    Add(Slot),
    Remove(SubscriptionId),
}

#[derive(Default)]
struct Pending {
    changes: Vec<Change>,
    generations: Vec<u32>,
    free: Vec<u32>,
    next_seq: u64,
}

#[derive(Default)]
struct Table {
    slots: Vec<Option<Slot>>,
    index: HashMap<(Scope, TypeFilter), Vec<u32>>,
}

impl Table {
    fn insert(&mut self, slot: Slot) {
        let i = slot.id.index as usize;
        if self.slots.len() <= i {
            self.slots.resize_with(i + 1, || None);
        }
        self.index
            .entry((slot.scope.clone(), slot.filter.clone()))
            .or_default()
            .push(slot.id.index);
        self.slots[i] = Some(slot);
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let Some(entry) = self.slots.get_mut(id.index as usize) else {
            return false;
        };
        match entry {
            Some(slot) if slot.id == id => {}
            _ => return false,
        }
        let Some(slot) = entry.take() else {
            return false;
        };

        let key = (slot.scope, slot.filter);
        if let Some(list) = self.index.get_mut(&key) {
            list.retain(|&i| i != id.index);
            if list.is_empty() {
                self.index.remove(&key);
            }
        }
        true
    }
}

struct Shared {
    pending: Mutex<Pending>,
    table: RwLock<Table>,
    batches: AtomicU64,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
struct Target {
    id: SubscriptionId,
    seq: u64,
    once: bool,
    handler: Handler,
}

struct Deferred {
    target: Target,
    room: Option<RoomId>,
    event: Event,
}

#[derive(Default)]
struct Run {
    report: DispatchReport,
    deferred: Vec<Deferred>,
    deferred_at: HashMap<SubscriptionId, usize>,
}

impl Run {
    fn invoke(&mut self, id: SubscriptionId, what: &str, call: impl FnOnce() -> bool) {
        match catch_unwind(AssertUnwindSafe(call)) {
            Ok(true) => self.report.invocations += 1,
            Ok(false) => {}
            Err(payload) => {
                self.report.panics += 1;
                tracing::error!(
                    "Subscriber {:?} panicked while handling {}: {}",
                    id,
                    what,
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    fn defer(&mut self, target: Target, room: Option<&RoomId>, event: &Event) {
        let entry = Deferred {
            target,
            room: room.cloned(),
            event: event.clone(),
        };
        match self.deferred_at.get(&entry.target.id) {
            Some(&i) => self.deferred[i] = entry,
            None => {
                self.deferred_at.insert(entry.target.id, self.deferred.len());
                self.deferred.push(entry);
            }
        }
    }

    /// Call the deferred `once` subscribers of the stage just finished, in
    /// subscription order.
    fn flush(&mut self) {
        let mut deferred = std::mem::take(&mut self.deferred);
        self.deferred_at.clear();
        deferred.sort_by_key(|d| d.target.seq);
        for d in deferred {
            let handler = d.target.handler;
            let (room, event) = (d.room, d.event);
            self.invoke(d.target.id, &event.event_type, || {
                handler.offer(room.as_ref(), &event)
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic>"
    }
}

/// The subscription table.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(Pending::default()),
                table: RwLock::new(Table::default()),
                batches: AtomicU64::new(0),
            }),
        }
    }

    /// Register `handler` for events of `filter` in `scope`.
    ///
    /// Takes effect at the next [`Registry::dispatch`]. Only the typed
    /// `on_*` constructors call this, so a handler shape always fits its
    /// scope.
    pub(crate) fn subscribe(
        &self,
        scope: Scope,
        filter: impl Into<TypeFilter>,
        options: Options,
        handler: Handler,
    ) -> Subscription {
        assert!(
            scope.admits(&handler),
            "{:?} cannot be subscribed in {:?}",
            handler,
            scope
        );
        let filter = filter.into();
        tracing::debug!("Subscribing {:?} to {:?} in {:?}", handler, filter, scope);

        let mut pending = self.shared.pending();
        let index = match pending.free.pop() {
            Some(index) => index,
            None => {
                pending.generations.push(0);
                (pending.generations.len() - 1) as u32
            }
        };
        let id = SubscriptionId {
            index,
            generation: pending.generations[index as usize],
        };
        let seq = pending.next_seq;
        pending.next_seq += 1;
        pending.changes.push(Change::Add(Slot {
            id,
            scope,
            filter,
            once: options.once,
            handler,
            seq,
        }));
        drop(pending);

        Subscription {
            id,
            registry: Arc::downgrade(&self.shared),
            revoked: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Receive every sync payload after it is committed.
    pub fn on_sync(&self, f: impl Fn(&SyncResponse) + Send + Sync + 'static) -> Subscription {
        self.subscribe(Scope::Sync, TypeFilter::Any, Options::default(), Handler::Sync(Arc::new(f)))
    }

    /// Receive user-scoped events (account data, presence, to-device).
    pub fn on_user_event(
        &self,
        event_type: impl Into<TypeFilter>,
        options: Options,
        f: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Scope::User, event_type, options, Handler::Event(Arc::new(f)))
    }

    /// Receive room state, ephemeral and account-data events of one room
    /// (or of every room with `None`).
    pub fn on_room_event(
        &self,
        room: Option<RoomId>,
        event_type: impl Into<TypeFilter>,
        options: Options,
        f: impl Fn(&RoomId, &Event) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Scope::Room(room), event_type, options, Handler::RoomEvent(Arc::new(f)))
    }

    /// Receive room state events, optionally only those with `state_key`.
    pub fn on_state_event(
        &self,
        room: Option<RoomId>,
        event_type: impl Into<TypeFilter>,
        state_key: Option<String>,
        options: Options,
        f: impl Fn(&RoomId, &Event) + Send + Sync + 'static,
    ) -> Subscription {
        let handler = Handler::StateEvent {
            state_key,
            f: Arc::new(f),
        };
        self.subscribe(Scope::Room(room), event_type, options, handler)
    }

    /// Receive timeline events. Not called for the first batch after start.
    pub fn on_timeline_event(
        &self,
        room: Option<RoomId>,
        event_type: impl Into<TypeFilter>,
        options: Options,
        f: impl Fn(&RoomId, &Event) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Scope::Timeline(room), event_type, options, Handler::RoomEvent(Arc::new(f)))
    }

    /// Be told when all of a room's events in a batch have been dispatched.
    pub fn on_room_synced(
        &self,
        room: Option<RoomId>,
        f: impl Fn(&RoomId) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Scope::Room(room), ROOM_SYNCED, Options::default(), Handler::Signal(Arc::new(f)))
    }

    /// Number of live subscriptions (pending changes not included).
    pub fn len(&self) -> usize {
        self.shared.read().slots.iter().flatten().count()
    }

    /// True if no subscription is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of subscribe/unsubscribe requests waiting for the next dispatch.
    pub fn pending_changes(&self) -> usize {
        self.shared.pending().changes.len()
    }

    /// Number of batches dispatched so far.
    pub fn batches(&self) -> u64 {
        self.shared.batches.load(Ordering::SeqCst)
    }

    fn apply_pending(&self) {
        let changes = std::mem::take(&mut self.shared.pending().changes);
        if changes.is_empty() {
            return;
        }

        let mut freed = Vec::new();
        {
            let mut table = self.shared.write();
            for change in changes {
                match change {
                    Change::Add(slot) => table.insert(slot),
                    Change::Remove(id) => {
                        if table.remove(id) {
                            freed.push(id.index);
                        }
                    }
                }
            }
        }

        if !freed.is_empty() {
            let mut pending = self.shared.pending();
            for index in freed {
                let generation = &mut pending.generations[index as usize];
                *generation = generation.wrapping_add(1);
                pending.free.push(index);
            }
        }
    }

    fn targets(&self, scope: &Scope, event_type: &str) -> Vec<Target> {
        let table = self.shared.read();

        let mut scopes = vec![scope.clone()];
        scopes.extend(scope.any_room());

        let mut found: Vec<&Slot> = Vec::new();
        for scope in scopes {
            for filter in [TypeFilter::Type(event_type.to_string()), TypeFilter::Any] {
                let Some(list) = table.index.get(&(scope.clone(), filter)) else {
                    continue;
                };
                found.extend(
                    list.iter()
                        .filter_map(|&i| table.slots.get(i as usize).and_then(Option::as_ref)),
                );
            }
        }
        found.sort_by_key(|slot| slot.seq);

        let targets = found
            .into_iter()
            .map(|slot| Target {
                id: slot.id,
                seq: slot.seq,
                once: slot.once,
                handler: slot.handler.clone(),
            })
            .collect();
        targets
    }

    fn deliver(&self, run: &mut Run, scope: &Scope, room: Option<&RoomId>, event: &Event) {
        for target in self.targets(scope, &event.event_type) {
            if target.once {
                // The room-synced marker never counts as a wildcard's newest event
                let marker_only = event.event_type == ROOM_SYNCED
                    && !matches!(target.handler, Handler::Signal(_));
                if !marker_only && target.handler.accepts(room, event) {
                    run.defer(target, room, event);
                }
                continue;
            }
            let handler = target.handler;
            run.invoke(target.id, &event.event_type, || handler.offer(room, event));
        }
    }

    /// Dispatch one committed batch.
    ///
    /// Order: sync subscribers, user events, then each room's events followed
    /// by its room-synced marker (joined, invited, left), then timelines.
    /// Timeline dispatch is skipped on the first batch after start so a
    /// backfill does not look like new activity. `once` subscribers are
    /// called at the end of their stage (user events, rooms, timelines),
    /// each with the newest event it matched, so at most once per batch.
    ///
    /// A panicking handler is logged and counted; it does not stop the
    /// dispatch.
    pub fn dispatch(&self, batch: &Batch<'_>) -> DispatchReport {
        self.apply_pending();
        let first = self.shared.batches.fetch_add(1, Ordering::SeqCst) == 0;
        let mut run = Run::default();

        for target in self.targets(&Scope::Sync, "") {
            let handler = target.handler;
            run.invoke(target.id, "sync", || match &handler {
                Handler::Sync(f) => {
                    f(batch.sync);
                    true
                }
                _ => false,
            });
        }

        for event in &batch.user {
            self.deliver(&mut run, &Scope::User, None, event);
        }
        run.flush();

        for room in &batch.rooms {
            let scope = Scope::Room(Some(room.room.clone()));
            for event in &room.events {
                self.deliver(&mut run, &scope, Some(&room.room), event);
            }
            let marker = Event::room_synced(&room.room);
            self.deliver(&mut run, &scope, Some(&room.room), &marker);
        }
        run.flush();

        if first {
            let skipped: usize = batch.timelines.iter().map(|(_, t)| t.len()).sum();
            tracing::debug!("First batch: not dispatching {} timeline events", skipped);
            run.report.timeline_suppressed = true;
        } else {
            for (room, events) in &batch.timelines {
                let scope = Scope::Timeline(Some(room.clone()));
                for event in events {
                    self.deliver(&mut run, &scope, Some(room), event);
                }
            }
            run.flush();
        }

        run.report
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("subscriptions", &self.len())
            .field("pending_changes", &self.pending_changes())
            .field("batches", &self.batches())
            .finish()
    }
}

/// Handle to one subscription.
///
/// Clones refer to the same subscription. Dropping the handle does not
/// unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<Shared>,
    revoked: Arc<AtomicBool>,
}

impl Subscription {
    /// The subscription's id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the subscription, effective from the next dispatch.
    ///
    /// Safe to call from inside the subscription's own handler. Returns
    /// `false` if it was already removed or the registry is gone.
    pub fn unsubscribe(&self) -> bool {
        if self.revoked.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Some(shared) = self.registry.upgrade() else {
            return false;
        };
        shared.pending().changes.push(Change::Remove(self.id));
        tracing::debug!("Unsubscribed {:?}", self.id);
        true
    }

    /// True until [`Subscription::unsubscribe`] is called or the registry is dropped.
    pub fn is_active(&self) -> bool {
        !self.revoked.load(Ordering::SeqCst) && self.registry.strong_count() > 0
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
