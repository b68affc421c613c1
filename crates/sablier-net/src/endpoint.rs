use sablier_shared::types::{AccountId, Namespace};

/// HTTP method of a prepared request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    pub fn allows_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

/// Every endpoint this client talks to, community server and storage
/// swarm alike. The enum is the routing key for batch sub-responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    // Community server
    Capabilities,
    Rooms,
    Room(String),
    RoomPollInfo(String, i64),
    RoomMessagesRecent(String),
    RoomMessage(String),
    RoomReactAdd(String, i64, String),
    RoomReactRemove(String, i64, String),
    RoomFileUpload(String),
    RoomFileDownload(String, String),
    Inbox,
    InboxFor(AccountId),
    Outbox,
    Batch,
    Sequence,
    // Storage swarm
    SnodeStore(Namespace),
    SnodeRetrieve(Namespace),
    SnodeExpire,
    SnodeDelete,
}

/// Coarse endpoint class, used as the key of batch/sequence sub-response
/// unions. Looking up the wrong kind is a caller bug surfaced by the
/// typed accessors, not a runtime cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Capabilities,
    Rooms,
    Room,
    RoomPollInfo,
    Messages,
    SendMessage,
    Reaction,
    File,
    Inbox,
    Outbox,
    Batch,
    Sequence,
    Store,
    Retrieve,
    Expire,
    Delete,
}

impl Endpoint {
    pub fn path(&self) -> String {
        match self {
            Endpoint::Capabilities => "/capabilities".to_string(),
            Endpoint::Rooms => "/rooms".to_string(),
            Endpoint::Room(token) => format!("/room/{token}"),
            Endpoint::RoomPollInfo(token, info_updates) => {
                format!("/room/{token}/pollInfo/{info_updates}")
            }
            Endpoint::RoomMessagesRecent(token) => format!("/room/{token}/messages/recent"),
            Endpoint::RoomMessage(token) => format!("/room/{token}/message"),
            Endpoint::RoomReactAdd(token, id, emoji) => {
                format!("/room/{token}/reaction/{id}/{emoji}")
            }
            Endpoint::RoomReactRemove(token, id, emoji) => {
                format!("/room/{token}/reaction/{id}/{emoji}")
            }
            Endpoint::RoomFileUpload(token) => format!("/room/{token}/file"),
            Endpoint::RoomFileDownload(token, file_id) => {
                format!("/room/{token}/file/{file_id}")
            }
            Endpoint::Inbox => "/inbox".to_string(),
            Endpoint::InboxFor(account) => format!("/inbox/{}", account.to_hex()),
            Endpoint::Outbox => "/outbox".to_string(),
            Endpoint::Batch => "/batch".to_string(),
            Endpoint::Sequence => "/sequence".to_string(),
            Endpoint::SnodeStore(_) => "/storage/store".to_string(),
            Endpoint::SnodeRetrieve(_) => "/storage/retrieve".to_string(),
            Endpoint::SnodeExpire => "/storage/expire".to_string(),
            Endpoint::SnodeDelete => "/storage/delete".to_string(),
        }
    }

    /// The method this endpoint is normally called with.
    pub fn default_method(&self) -> Method {
        match self {
            Endpoint::Capabilities
            | Endpoint::Rooms
            | Endpoint::Room(_)
            | Endpoint::RoomPollInfo(_, _)
            | Endpoint::RoomMessagesRecent(_)
            | Endpoint::RoomFileDownload(_, _)
            | Endpoint::Inbox
            | Endpoint::Outbox => Method::Get,
            Endpoint::RoomReactRemove(_, _, _) => Method::Delete,
            _ => Method::Post,
        }
    }

    pub fn kind(&self) -> EndpointKind {
        match self {
            Endpoint::Capabilities => EndpointKind::Capabilities,
            Endpoint::Rooms => EndpointKind::Rooms,
            Endpoint::Room(_) => EndpointKind::Room,
            Endpoint::RoomPollInfo(_, _) => EndpointKind::RoomPollInfo,
            Endpoint::RoomMessagesRecent(_) => EndpointKind::Messages,
            Endpoint::RoomMessage(_) => EndpointKind::SendMessage,
            Endpoint::RoomReactAdd(_, _, _) | Endpoint::RoomReactRemove(_, _, _) => {
                EndpointKind::Reaction
            }
            Endpoint::RoomFileUpload(_) | Endpoint::RoomFileDownload(_, _) => EndpointKind::File,
            Endpoint::Inbox | Endpoint::InboxFor(_) => EndpointKind::Inbox,
            Endpoint::Outbox => EndpointKind::Outbox,
            Endpoint::Batch => EndpointKind::Batch,
            Endpoint::Sequence => EndpointKind::Sequence,
            Endpoint::SnodeStore(_) => EndpointKind::Store,
            Endpoint::SnodeRetrieve(_) => EndpointKind::Retrieve,
            Endpoint::SnodeExpire => EndpointKind::Expire,
            Endpoint::SnodeDelete => EndpointKind::Delete,
        }
    }

    /// Whether this endpoint lives on a community server (as opposed to a
    /// storage node).
    pub fn is_server_endpoint(&self) -> bool {
        !matches!(
            self,
            Endpoint::SnodeStore(_)
                | Endpoint::SnodeRetrieve(_)
                | Endpoint::SnodeExpire
                | Endpoint::SnodeDelete
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(Endpoint::Capabilities.path(), "/capabilities");
        assert_eq!(Endpoint::Room("lobby".into()).path(), "/room/lobby");
        assert_eq!(
            Endpoint::RoomPollInfo("lobby".into(), 7).path(),
            "/room/lobby/pollInfo/7"
        );
        assert_eq!(
            Endpoint::RoomFileDownload("lobby".into(), "12".into()).path(),
            "/room/lobby/file/12"
        );
    }

    #[test]
    fn test_default_methods() {
        assert_eq!(Endpoint::Capabilities.default_method(), Method::Get);
        assert_eq!(
            Endpoint::RoomMessage("lobby".into()).default_method(),
            Method::Post
        );
        assert_eq!(
            Endpoint::RoomReactRemove("lobby".into(), 1, "👍".into()).default_method(),
            Method::Delete
        );
    }

    #[test]
    fn test_server_vs_snode() {
        assert!(Endpoint::Rooms.is_server_endpoint());
        assert!(!Endpoint::SnodeExpire.is_server_endpoint());
    }
}
