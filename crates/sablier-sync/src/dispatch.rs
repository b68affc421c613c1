//! Message dispatch.
//!
//! Builds the destination-specific encryption wrapping for an outgoing
//! message and prepares the request that carries it; records the result
//! into local state exactly once. Retries belong to the job layer — a
//! prepared send is a single fallible operation.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use sablier_net::bencode::Bencode;
use sablier_net::endpoint::{Endpoint, Method};
use sablier_net::request::{PreparedRequest, Target};
use sablier_net::responses::{SendMessageResponse, StoreResponse};
use sablier_shared::auth::{self, AuthMethod, SigningScheme};
use sablier_shared::blinding::BlindedKeyPair;
use sablier_shared::clock::Clock;
use sablier_shared::crypto::{self, SymmetricKey};
use sablier_shared::identity::Identity;
use sablier_shared::types::{AccountId, Capabilities, MessageDestination, Namespace};
use sablier_store::{interactions, Database};

use crate::directives::Directive;
use crate::error::{Result, SyncError};
use crate::message::{pad, Envelope, MessageKind, OutgoingMessage};

/// Everything destination-dependent the caller resolves before dispatch.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Storage node address for swarm destinations.
    pub snode_address: String,
    /// Community server pubkey (community destinations).
    pub server_pubkey: Option<[u8; 32]>,
    /// Community server capabilities, when already fetched.
    pub capabilities: Option<Capabilities>,
    /// Current group encryption key (new closed-group path).
    pub group_key: Option<SymmetricKey>,
    /// Admin-issued subaccount token for group swarm writes.
    pub subaccount_token: Option<Vec<u8>>,
    /// Local display name; a community post requires a non-empty one.
    pub local_display_name: Option<String>,
    /// Message time-to-live on the storage network.
    pub ttl_ms: u64,
}

/// Unified send confirmation across destination kinds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendConfirmation {
    /// Swarm storage hash, when the destination assigns one.
    pub server_hash: Option<String>,
    /// Community-assigned message id.
    pub server_id: Option<i64>,
    /// Community-assigned posted timestamp (ms).
    pub posted_ms: Option<u64>,
}

/// The message dispatcher.
pub struct MessageSender<'a> {
    pub identity: &'a Identity,
    pub clock: &'a dyn Clock,
}

impl<'a> MessageSender<'a> {
    pub fn new(identity: &'a Identity, clock: &'a dyn Clock) -> Self {
        Self { identity, clock }
    }

    /// Build the prepared, signed request for one message. Pure until the
    /// request is handed to a transport; cancellation before that applies
    /// no side effects.
    pub fn prepare_send(
        &self,
        message: &OutgoingMessage,
        destination: &MessageDestination,
        namespace: Namespace,
        file_ids: &[String],
        options: &SendOptions,
    ) -> Result<PreparedRequest<SendConfirmation>> {
        // Config-class payloads never travel the plain send path.
        if message.kind == MessageKind::Config || namespace.is_config() {
            return Err(SyncError::InvalidConfigMessageHandling);
        }
        if !message.is_valid() {
            return Err(SyncError::InvalidMessage(
                "message failed its structural validity check".to_string(),
            ));
        }
        // Never silently drop or partially send attachments.
        if message.attachment_ids.len() != file_ids.len() {
            return Err(SyncError::AttachmentsNotUploaded);
        }

        let mut request = match destination {
            MessageDestination::Contact { account } => {
                self.prepare_swarm_send(message, *account, namespace, options, false)?
            }
            MessageDestination::SyncToSelf => {
                let own = AccountId::standard(self.identity.x25519_public().to_bytes());
                self.prepare_swarm_send(message, own, namespace, options, true)?
            }
            MessageDestination::LegacyClosedGroup { group } => {
                self.prepare_swarm_send(message, *group, namespace, options, false)?
            }
            MessageDestination::ClosedGroup { group } => match namespace {
                Namespace::GroupMessages => {
                    self.prepare_group_send(message, *group, options)?
                }
                Namespace::RevokedRetrievableGroupMessages => {
                    self.prepare_revoked_send(message, *group, options)?
                }
                other => {
                    return Err(SyncError::InvalidMessage(format!(
                        "closed-group send into unsupported namespace {other:?}"
                    )))
                }
            },
            MessageDestination::Community { server, room } => {
                self.prepare_community_send(message, server, room, options)?
            }
            MessageDestination::CommunityInbox { server, recipient } => {
                self.prepare_inbox_send(message, server, *recipient, options)?
            }
        };

        // The signing step always runs last, over the fully-built request.
        request.sign(Some(self.identity), SigningScheme::Standard, self.clock)?;
        Ok(request)
    }

    /// Session-protocol path: seal for the recipient's x25519 key, then
    /// wrap in the legacy envelope.
    fn prepare_swarm_send(
        &self,
        message: &OutgoingMessage,
        recipient: AccountId,
        namespace: Namespace,
        options: &SendOptions,
        to_self: bool,
    ) -> Result<PreparedRequest<SendConfirmation>> {
        let mut content = message.clone();
        // Attach the sender profile unless we are the destination.
        if to_self {
            content.profile = None;
        }

        let padded = pad(content.to_bytes()?);
        let recipient_pub = x25519_dalek::PublicKey::from(recipient.key);
        let ciphertext = crypto::seal(&self.identity.x25519_secret(), &recipient_pub, &padded)?;

        let envelope = Envelope {
            source: Some(
                AccountId::standard(self.identity.x25519_public().to_bytes()).to_hex(),
            ),
            timestamp_ms: message.sent_timestamp_ms,
            content: ciphertext,
        };

        self.prepare_store(
            recipient,
            namespace,
            envelope.to_bytes()?,
            options,
            AuthMethod::Standard,
        )
    }

    /// New closed-group path: wrap in the envelope first, then encrypt
    /// the whole envelope with the group key.
    fn prepare_group_send(
        &self,
        message: &OutgoingMessage,
        group: AccountId,
        options: &SendOptions,
    ) -> Result<PreparedRequest<SendConfirmation>> {
        let group_key = options.group_key.ok_or_else(|| {
            SyncError::InvalidMessage("no group encryption key available".to_string())
        })?;

        let envelope = Envelope {
            source: Some(
                AccountId::standard(self.identity.x25519_public().to_bytes()).to_hex(),
            ),
            timestamp_ms: message.sent_timestamp_ms,
            content: pad(message.to_bytes()?),
        };
        let ciphertext = crypto::encrypt(&group_key, &envelope.to_bytes()?)?;

        let auth = match &options.subaccount_token {
            Some(token) => AuthMethod::Subaccount {
                group,
                auth_token: token.clone(),
            },
            None => AuthMethod::Standard,
        };
        self.prepare_store(group, Namespace::GroupMessages, ciphertext, options, auth)
    }

    /// Revoked-retrievable path: the payload was encrypted upstream; it
    /// travels as a plaintext bencoded message.
    fn prepare_revoked_send(
        &self,
        message: &OutgoingMessage,
        group: AccountId,
        options: &SendOptions,
    ) -> Result<PreparedRequest<SendConfirmation>> {
        let mut dict = BTreeMap::new();
        dict.insert(b"t".to_vec(), Bencode::Int(message.sent_timestamp_ms as i64));
        dict.insert(b"d".to_vec(), Bencode::Bytes(message.to_bytes()?));
        let payload = Bencode::Dict(dict).encode();

        let auth = match &options.subaccount_token {
            Some(token) => AuthMethod::Subaccount {
                group,
                auth_token: token.clone(),
            },
            None => AuthMethod::Standard,
        };
        self.prepare_store(
            group,
            Namespace::RevokedRetrievableGroupMessages,
            payload,
            options,
            auth,
        )
    }

    /// Shared snode store request.
    fn prepare_store(
        &self,
        swarm: AccountId,
        namespace: Namespace,
        data: Vec<u8>,
        options: &SendOptions,
        auth: AuthMethod,
    ) -> Result<PreparedRequest<SendConfirmation>> {
        let body = json!({
            "pubkey": swarm.to_hex(),
            "namespace": namespace.id(),
            "timestamp": self.clock.now_ms(),
            "ttl": options.ttl_ms,
            "data": BASE64.encode(&data),
        });

        let request = PreparedRequest::<StoreResponse>::prepare(
            Endpoint::SnodeStore(namespace),
            Method::Post,
            Some(body),
            Target::Snode {
                address: options.snode_address.clone(),
                swarm_pubkey: swarm,
            },
            auth,
        )?;
        Ok(request.try_map(|store| {
            Ok(SendConfirmation {
                server_hash: Some(store.hash),
                server_id: None,
                posted_ms: None,
            })
        }))
    }

    /// Community post: plain padded body, signed under the server's
    /// blinding rules; the server assigns id and timestamp.
    fn prepare_community_send(
        &self,
        message: &OutgoingMessage,
        server: &str,
        room: &str,
        options: &SendOptions,
    ) -> Result<PreparedRequest<SendConfirmation>> {
        if options
            .local_display_name
            .as_deref()
            .map(|n| n.is_empty())
            .unwrap_or(true)
        {
            return Err(SyncError::InvalidMessage(
                "community posts require a non-empty display name".to_string(),
            ));
        }
        let server_pubkey = options.server_pubkey.ok_or_else(|| {
            SyncError::InvalidMessage("community server pubkey unknown".to_string())
        })?;

        let auth = AuthMethod::Community {
            server_pubkey,
            capabilities: options.capabilities.clone(),
            force_blinded: false,
        };

        let padded = pad(message.to_bytes()?);
        let signed = auth::sign(Some(self.identity), &padded, &auth, SigningScheme::Unblinded)?;
        let body = json!({
            "data": BASE64.encode(&padded),
            "signature": BASE64.encode(signed.signature),
        });

        let request = PreparedRequest::<SendMessageResponse>::prepare(
            Endpoint::RoomMessage(room.to_string()),
            Method::Post,
            Some(body),
            Target::Server {
                base_url: server.to_string(),
                server_pubkey,
            },
            auth,
        )?;
        Ok(request.try_map(|sent| {
            Ok(SendConfirmation {
                server_hash: None,
                server_id: Some(sent.id),
                posted_ms: Some((sent.posted * 1000.0) as u64),
            })
        }))
    }

    /// Blinded DM into a community inbox. Attachments are unsupported on
    /// this path.
    fn prepare_inbox_send(
        &self,
        message: &OutgoingMessage,
        server: &str,
        recipient: AccountId,
        options: &SendOptions,
    ) -> Result<PreparedRequest<SendConfirmation>> {
        if !message.attachment_ids.is_empty() {
            return Err(SyncError::InvalidMessage(
                "community inbox messages cannot carry attachments".to_string(),
            ));
        }
        let server_pubkey = options.server_pubkey.ok_or_else(|| {
            SyncError::InvalidMessage("community server pubkey unknown".to_string())
        })?;

        let pair = BlindedKeyPair::blind15(self.identity, &server_pubkey);
        let shared = pair.shared_secret(&recipient.key)?;
        let key =
            crypto::derive_blinded_dm_key(&shared, &pair.public_bytes(), &recipient.key);
        let ciphertext = crypto::encrypt(&key, &pad(message.to_bytes()?))?;

        let body = json!({ "message": BASE64.encode(&ciphertext) });
        let request = PreparedRequest::<SendMessageResponse>::prepare(
            Endpoint::InboxFor(recipient),
            Method::Post,
            Some(body),
            Target::Server {
                base_url: server.to_string(),
                server_pubkey,
            },
            AuthMethod::Community {
                server_pubkey,
                capabilities: options.capabilities.clone(),
                force_blinded: true,
            },
        )?;
        Ok(request.try_map(|sent| {
            Ok(SendConfirmation {
                server_hash: None,
                server_id: Some(sent.id),
                posted_ms: Some((sent.posted * 1000.0) as u64),
            })
        }))
    }
}

/// The thread a destination's interactions live under.
pub fn thread_id_for(destination: &MessageDestination, identity: &Identity) -> String {
    match destination {
        MessageDestination::Contact { account } => account.to_hex(),
        MessageDestination::SyncToSelf => {
            AccountId::standard(identity.x25519_public().to_bytes()).to_hex()
        }
        MessageDestination::LegacyClosedGroup { group }
        | MessageDestination::ClosedGroup { group } => group.to_hex(),
        MessageDestination::Community { server, room } => format!("{server}/{room}"),
        MessageDestination::CommunityInbox { server, recipient } => {
            format!("{server}/inbox/{}", recipient.to_hex())
        }
    }
}

/// Record a successful send on the interaction row, idempotently, and
/// emit the follow-up directives (expiry timer, sync-to-self copy).
///
/// A sync-destination send that was not self-send-valid records `sent`
/// without a server hash so the copy never false-positive-dedups against
/// the original.
pub fn record_send_success(
    db: &Database,
    interaction_id: Uuid,
    destination: &MessageDestination,
    confirmation: &SendConfirmation,
    expires_in_ms: Option<u64>,
    self_send_valid: bool,
) -> Result<Vec<Directive>> {
    let record_hash = match destination {
        MessageDestination::SyncToSelf if !self_send_valid => None,
        _ => confirmation.server_hash.as_deref(),
    };
    interactions::mark_interaction_sent(db.conn(), interaction_id, record_hash)?;

    let mut directives = Vec::new();
    if let Some(expires_in_ms) = expires_in_ms {
        directives.push(Directive::ScheduleExpiry {
            interaction_id,
            expires_in_ms,
        });
    }
    // One-to-one sends get a best-effort copy to our own swarm so other
    // devices see them; sync/self messages must not loop.
    if matches!(destination, MessageDestination::Contact { .. }) {
        directives.push(Directive::SyncToSelf { interaction_id });
    }
    Ok(directives)
}

/// Failure recovery: flip any in-flight interaction rows of the thread to
/// their terminal failed state with a human-readable cause. Never masks
/// the original error — store failures here are logged and swallowed.
pub fn record_send_failure(db: &Database, thread_id: &str, cause: &str) {
    if let Err(recovery_error) = interactions::mark_in_flight_failed(db.conn(), thread_id, cause) {
        warn!(
            thread = %thread_id,
            error = %recovery_error,
            "failed to record send failure state"
        );
    }
}
