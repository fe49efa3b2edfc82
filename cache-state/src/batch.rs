//! Turning a committed sync payload into a dispatch batch.

use roomcache_core::{Batch, Membership, RoomBatch};
use roomcache_types::{Event, ParsedEvent, RawEvent, RoomId, SyncResponse};

/// Parse raw events, dropping (and logging) the ones that do not parse.
pub(crate) fn parse_all<'a>(
    raws: impl IntoIterator<Item = &'a RawEvent>,
    room: Option<&RoomId>,
) -> Vec<Event> {
    raws.into_iter()
        .filter_map(|raw| match raw.parse(room) {
            ParsedEvent::Event(event) => Some(event),
            ParsedEvent::Erroneous(err) => {
                match room {
                    Some(room) => tracing::warn!("Skipping {} in {}", err, room),
                    None => tracing::warn!("Skipping {}", err),
                }
                None
            }
        })
        .collect()
}

/// The last `limit` events of a timeline in (timestamp, event id) order.
///
/// Events without a timestamp or id cannot be placed and are left out.
pub(crate) fn trimmed_timeline(mut events: Vec<Event>, limit: usize) -> Vec<Event> {
    events.retain(|e| e.timeline_position().is_some());
    events.sort_by(|a, b| a.timeline_position().cmp(&b.timeline_position()));
    let excess = events.len().saturating_sub(limit);
    events.drain(..excess);
    events
}

/// Build the dispatch batch for `sync`.
pub(crate) fn build(sync: &SyncResponse, timeline_limit: usize) -> Batch<'_> {
    let mut batch = Batch::new(sync);

    batch.user = parse_all(
        sync.account_data
            .events
            .iter()
            .chain(&sync.presence.events)
            .chain(&sync.to_device.events),
        None,
    );

    for (room, joined) in &sync.rooms.join {
        let events = parse_all(
            joined
                .state
                .events
                .iter()
                .chain(&joined.ephemeral.events)
                .chain(&joined.account_data.events),
            Some(room),
        );
        batch.rooms.push(RoomBatch {
            room: room.clone(),
            membership: Membership::Join,
            events,
        });
        let timeline = parse_all(&joined.timeline.events, Some(room));
        batch
            .timelines
            .push((room.clone(), trimmed_timeline(timeline, timeline_limit)));
    }

    for (room, invited) in &sync.rooms.invite {
        batch.rooms.push(RoomBatch {
            room: room.clone(),
            membership: Membership::Invite,
            events: parse_all(&invited.invite_state.events, Some(room)),
        });
    }

    for (room, left) in &sync.rooms.leave {
        let events = parse_all(
            left.state.events.iter().chain(&left.account_data.events),
            Some(room),
        );
        batch.rooms.push(RoomBatch {
            room: room.clone(),
            membership: Membership::Leave,
            events,
        });
        let timeline = parse_all(&left.timeline.events, Some(room));
        batch
            .timelines
            .push((room.clone(), trimmed_timeline(timeline, timeline_limit)));
    }

    batch.timelines.retain(|(_, events)| !events.is_empty());
    batch
}
