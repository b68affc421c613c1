//! Community (open group) poll handling.
//!
//! Rooms are fetched together with the server's capabilities in one
//! sequence request; the response is folded into the `open_groups`
//! projection and room-image download directives are emitted only when
//! the image is new or not yet on disk.

use chrono::Utc;
use tracing::debug;

use sablier_net::batch::CapabilitiesAndRooms;
use sablier_net::responses::Room;
use sablier_store::{open_groups, Database, OpenGroup, StoreError};

use crate::directives::{ChangeEvent, Directive};
use crate::error::Result;

/// Outcome of folding a rooms poll into local state.
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub directives: Vec<Directive>,
    pub events: Vec<ChangeEvent>,
}

/// Apply a capabilities+rooms response for `server`.
pub fn handle_rooms_response(
    db: &mut Database,
    server: &str,
    response: &CapabilitiesAndRooms,
) -> Result<PollOutcome> {
    debug!(
        server = %server,
        rooms = response.rooms.len(),
        blinded = response.capabilities.supports("blind"),
        "applying rooms poll"
    );

    let mut outcome = PollOutcome::default();
    let server_owned = server.to_string();
    let rooms = response.rooms.clone();
    let mut directives = Vec::new();
    let mut events = Vec::new();

    db.with_transaction(|tx| {
        for room in &rooms {
            let existing = open_groups::get_open_group(tx, &server_owned, &room.token);
            let existing = match existing {
                Ok(row) => Some(row),
                Err(StoreError::NotFound) => None,
                Err(e) => return Err(e),
            };

            let image_current = match (&existing, &room.image_id) {
                (Some(row), Some(image_id)) => {
                    row.image_id.as_deref() == Some(image_id.as_str()) && row.image_path.is_some()
                }
                _ => false,
            };

            let row_changed = existing
                .as_ref()
                .map(|row| {
                    row.name != room.name
                        || row.image_id != room.image_id
                        || row.info_updates != room.info_updates
                })
                .unwrap_or(true);

            open_groups::upsert_open_group(
                tx,
                &OpenGroup {
                    server: server_owned.clone(),
                    room: room.token.clone(),
                    name: room.name.clone(),
                    image_id: room.image_id.clone(),
                    // A new image id invalidates the downloaded file.
                    image_path: if image_current {
                        existing.as_ref().and_then(|r| r.image_path.clone())
                    } else {
                        None
                    },
                    info_updates: room.info_updates,
                    created_at: existing
                        .as_ref()
                        .map(|r| r.created_at)
                        .unwrap_or_else(Utc::now),
                },
            )?;

            if let Some(image_id) = &room.image_id {
                if !image_current {
                    directives.push(Directive::DownloadRoomImage {
                        server: server_owned.clone(),
                        room: room.token.clone(),
                        image_id: image_id.clone(),
                    });
                }
            }

            if row_changed {
                events.push(ChangeEvent::Conversation {
                    thread_id: format!("{}/{}", server_owned, room.token),
                });
            }
        }
        Ok(())
    })?;

    outcome.directives = directives;
    outcome.events = events;
    Ok(outcome)
}

/// Reconcile optimistic local mutations (reactions etc.) against a
/// confirmed poll: changes whose `seq_no` the server has caught up to are
/// settled and dropped; unconfirmed ones (no `seq_no` yet) stay pending.
pub fn reconcile_pending_changes(
    pending: &mut Vec<sablier_shared::types::PendingChange>,
    server: &str,
    room: &str,
    confirmed_seq_no: i64,
) {
    pending.retain(|change| {
        change.server != server
            || change.room != room
            || change.seq_no.map(|s| s > confirmed_seq_no).unwrap_or(true)
    });
}

/// Convenience for a single-room poll.
pub fn handle_room_response(
    db: &mut Database,
    server: &str,
    capabilities: &sablier_shared::types::Capabilities,
    room: &Room,
) -> Result<PollOutcome> {
    handle_rooms_response(
        db,
        server,
        &CapabilitiesAndRooms {
            capabilities: capabilities.clone(),
            rooms: vec![room.clone()],
        },
    )
}
