//! Job executors: the boundary the engine is invoked from.
//!
//! Every job resolves to exactly one of success, failure (with its
//! permanence) or deferred — an error is never silently swallowed.
//! Retry/backoff policy lives with the scheduler that re-invokes these,
//! not here.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use sablier_net::endpoint::{Endpoint, Method};
use sablier_net::request::{PreparedRequest, Target};
use sablier_net::responses::SwarmExpireResponse;
use sablier_net::transport::Transport;
use sablier_net::validation;
use sablier_shared::auth::{AuthMethod, SigningScheme};
use sablier_shared::clock::Clock;
use sablier_shared::crypto::SymmetricKey;
use sablier_shared::identity::Identity;
use sablier_shared::types::{AccountId, MessageDestination, Namespace};
use sablier_store::Database;

use crate::directives::Directive;
use crate::dispatch::{self, MessageSender, SendOptions};
use crate::error::SyncError;
use crate::merge::{self, ConfigDelta};
use crate::message::OutgoingMessage;
use crate::push;
use crate::state::ConfigRegistry;

/// Terminal result of one job run.
#[derive(Debug)]
pub enum JobOutcome {
    Success,
    Failure { error: SyncError, permanent: bool },
    Deferred,
}

impl JobOutcome {
    fn from_error(error: SyncError) -> Self {
        let permanent = error.is_permanent();
        JobOutcome::Failure { error, permanent }
    }
}

/// Shared capabilities a job runs against.
pub struct JobContext {
    pub db: Arc<Mutex<Database>>,
    pub registry: Arc<ConfigRegistry>,
    pub transport: Arc<dyn Transport>,
    pub identity: Arc<Identity>,
    pub clock: Arc<dyn Clock>,
    /// Side-effect directives surface here for the scheduler to act on.
    pub directives: Option<mpsc::UnboundedSender<Directive>>,
}

impl JobContext {
    fn emit(&self, directive: Directive) {
        if let Some(tx) = &self.directives {
            let _ = tx.send(directive);
        }
    }
}

/// One unit of deferrable/retryable work.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, ctx: &JobContext) -> JobOutcome;
}

// ---------------------------------------------------------------------------
// ConfigMessageReceiveJob
// ---------------------------------------------------------------------------

/// Merge a batch of received config deltas, then fire the server-side
/// deletions the merge requested (fire-and-forget).
pub struct ConfigMessageReceiveJob {
    pub owner: AccountId,
    pub local_account: AccountId,
    pub decryption_key: SymmetricKey,
    pub deltas: Vec<ConfigDelta>,
    pub snode_address: String,
}

#[async_trait]
impl Job for ConfigMessageReceiveJob {
    fn name(&self) -> &'static str {
        "ConfigMessageReceiveJob"
    }

    async fn run(&self, ctx: &JobContext) -> JobOutcome {
        let outcome = {
            let mut db = match ctx.db.lock() {
                Ok(db) => db,
                Err(_) => return JobOutcome::Deferred,
            };
            merge::merge_incoming(
                &ctx.registry,
                &mut db,
                self.owner,
                &self.local_account,
                &self.decryption_key,
                self.deltas.clone(),
                ctx.clock.as_ref(),
            )
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => return JobOutcome::from_error(e),
        };

        info!(
            owner = %self.owner.short(),
            applied = outcome.applied.len(),
            skipped = outcome.skipped.len(),
            "config merge finished"
        );

        for directive in outcome.directives {
            match directive {
                Directive::ServerDelete { owner, hashes } => {
                    self.fire_server_delete(ctx, owner, hashes);
                }
                other => ctx.emit(other),
            }
        }
        JobOutcome::Success
    }
}

impl ConfigMessageReceiveJob {
    /// Fire-and-forget network deletion of merged-away message hashes.
    fn fire_server_delete(&self, ctx: &JobContext, owner: AccountId, hashes: Vec<String>) {
        let body = json!({
            "pubkey": owner.to_hex(),
            "messages": hashes,
        });
        let mut request = match PreparedRequest::<serde_json::Value>::prepare(
            Endpoint::SnodeDelete,
            Method::Post,
            Some(body),
            Target::Snode {
                address: self.snode_address.clone(),
                swarm_pubkey: owner,
            },
            AuthMethod::Standard,
        ) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "could not prepare server delete");
                return;
            }
        };
        if let Err(e) = request.sign(
            Some(ctx.identity.as_ref()),
            SigningScheme::Standard,
            ctx.clock.as_ref(),
        ) {
            warn!(error = %e, "could not sign server delete");
            return;
        }

        let transport = ctx.transport.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.send(request.parts()).await {
                warn!(error = %e, "server delete failed");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// ConfigSyncJob
// ---------------------------------------------------------------------------

/// Push a dirty config namespace to the owner's swarm and confirm it.
pub struct ConfigSyncJob {
    pub owner: AccountId,
    pub namespace: Namespace,
    pub encryption_key: SymmetricKey,
    pub snode_address: String,
    pub ttl_ms: u64,
}

#[async_trait]
impl Job for ConfigSyncJob {
    fn name(&self) -> &'static str {
        "ConfigSyncJob"
    }

    async fn run(&self, ctx: &JobContext) -> JobOutcome {
        let key = (self.owner, self.namespace);

        let request = {
            let db = match ctx.db.lock() {
                Ok(db) => db,
                Err(_) => return JobOutcome::Deferred,
            };
            push::build_push_request(
                &ctx.registry,
                &db,
                &key,
                &self.encryption_key,
                &self.snode_address,
                self.ttl_ms,
                ctx.clock.as_ref(),
            )
        };

        let mut request = match request {
            Ok(Some(request)) => request,
            Ok(None) => return JobOutcome::Success,
            Err(e) => return JobOutcome::from_error(e),
        };

        if let Err(e) = request.sign(
            Some(ctx.identity.as_ref()),
            SigningScheme::Standard,
            ctx.clock.as_ref(),
        ) {
            return JobOutcome::from_error(e.into());
        }

        match request.send(ctx.transport.as_ref()).await {
            Ok((info, store)) if info.is_success() => {
                info!(
                    owner = %self.owner.short(),
                    namespace = ?self.namespace,
                    hash = %store.hash,
                    "config pushed"
                );
                let db = match ctx.db.lock() {
                    Ok(db) => db,
                    Err(_) => return JobOutcome::Deferred,
                };
                match push::confirm_pushed(&ctx.registry, &db, &key) {
                    Ok(()) => JobOutcome::Success,
                    Err(e) => JobOutcome::from_error(e),
                }
            }
            Ok((info, _)) => JobOutcome::from_error(SyncError::Net(
                sablier_net::NetError::Network(sablier_net::NetworkError::Transport(format!(
                    "config push rejected with status {}",
                    info.code
                ))),
            )),
            Err(e) => JobOutcome::from_error(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// MessageSendJob
// ---------------------------------------------------------------------------

/// Dispatch one message: prepare, send, record — exactly once. The job
/// never retries internally.
pub struct MessageSendJob {
    pub message: OutgoingMessage,
    pub destination: MessageDestination,
    pub namespace: Namespace,
    pub file_ids: Vec<String>,
    pub options: SendOptions,
    pub interaction_id: Uuid,
    pub self_send_valid: bool,
}

#[async_trait]
impl Job for MessageSendJob {
    fn name(&self) -> &'static str {
        "MessageSendJob"
    }

    async fn run(&self, ctx: &JobContext) -> JobOutcome {
        let prepared = {
            let sender = MessageSender::new(ctx.identity.as_ref(), ctx.clock.as_ref());
            sender.prepare_send(
                &self.message,
                &self.destination,
                self.namespace,
                &self.file_ids,
                &self.options,
            )
        };

        let request = match prepared {
            Ok(request) => request,
            Err(e) => {
                self.recover_failure(ctx, &e);
                return JobOutcome::from_error(e);
            }
        };

        match request.send(ctx.transport.as_ref()).await {
            Ok((info, confirmation)) if info.is_success() => {
                let db = match ctx.db.lock() {
                    Ok(db) => db,
                    Err(_) => return JobOutcome::Deferred,
                };
                match dispatch::record_send_success(
                    &db,
                    self.interaction_id,
                    &self.destination,
                    &confirmation,
                    self.message.expires_in_ms,
                    self.self_send_valid,
                ) {
                    Ok(directives) => {
                        for directive in directives {
                            ctx.emit(directive);
                        }
                        JobOutcome::Success
                    }
                    Err(e) => JobOutcome::from_error(e),
                }
            }
            Ok((info, _)) => {
                let error = SyncError::Net(sablier_net::NetError::Network(
                    sablier_net::NetworkError::Transport(format!(
                        "send rejected with status {}",
                        info.code
                    )),
                ));
                self.recover_failure(ctx, &error);
                JobOutcome::from_error(error)
            }
            Err(e) => {
                let error: SyncError = e.into();
                self.recover_failure(ctx, &error);
                JobOutcome::from_error(error)
            }
        }
    }
}

impl MessageSendJob {
    /// The failure-state recovery write runs detached from the error path
    /// so it can never mask the original error or re-enter the caller's
    /// transaction.
    fn recover_failure(&self, ctx: &JobContext, error: &SyncError) {
        let db = ctx.db.clone();
        let thread_id = dispatch::thread_id_for(&self.destination, ctx.identity.as_ref());
        let cause = error.to_string();
        tokio::spawn(async move {
            if let Ok(db) = db.lock() {
                dispatch::record_send_failure(&db, &thread_id, &cause);
            }
        });
    }
}

// ---------------------------------------------------------------------------
// ExpiryUpdateJob
// ---------------------------------------------------------------------------

/// Update message expiries on the swarm and verify every node's signed
/// confirmation (all-or-nothing by default).
pub struct ExpiryUpdateJob {
    pub swarm: AccountId,
    pub snode_address: String,
    pub message_hashes: Vec<String>,
    pub expiry_ms: u64,
    pub required_successful: i32,
}

#[async_trait]
impl Job for ExpiryUpdateJob {
    fn name(&self) -> &'static str {
        "ExpiryUpdateJob"
    }

    async fn run(&self, ctx: &JobContext) -> JobOutcome {
        let body = json!({
            "pubkey": self.swarm.to_hex(),
            "messages": self.message_hashes,
            "expiry": self.expiry_ms,
        });
        let mut request = match PreparedRequest::<SwarmExpireResponse>::prepare(
            Endpoint::SnodeExpire,
            Method::Post,
            Some(body),
            Target::Snode {
                address: self.snode_address.clone(),
                swarm_pubkey: self.swarm,
            },
            AuthMethod::Standard,
        ) {
            Ok(request) => request,
            Err(e) => return JobOutcome::from_error(e.into()),
        };
        if let Err(e) = request.sign(
            Some(ctx.identity.as_ref()),
            SigningScheme::Standard,
            ctx.clock.as_ref(),
        ) {
            return JobOutcome::from_error(e.into());
        }

        let response = match request.send(ctx.transport.as_ref()).await {
            Ok((_, response)) => response,
            Err(e) => return JobOutcome::from_error(e.into()),
        };

        match validation::validate_expiry_update(
            &self.swarm.to_hex(),
            &self.message_hashes,
            self.required_successful,
            &response,
        ) {
            Ok(expiry) => {
                info!(swarm = %self.swarm.short(), expiry, "swarm confirmed expiry update");
                JobOutcome::Success
            }
            Err(e) => JobOutcome::from_error(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sablier_net::transport::{NetworkError, RequestParts, ResponseInfo};
    use sablier_shared::clock::SystemClock;
    use sablier_shared::crypto;
    use sablier_store::{Interaction, SendState};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::{ConfigObject, GroupInfoConfig, Lww};
    use crate::message::MessageKind;

    /// Transport double returning a canned response.
    struct FakeTransport {
        code: u16,
        body: Vec<u8>,
        calls: AtomicUsize,
        fail: Option<NetworkError>,
    }

    impl FakeTransport {
        fn ok(code: u16, body: &str) -> Self {
            Self {
                code,
                body: body.as_bytes().to_vec(),
                calls: AtomicUsize::new(0),
                fail: None,
            }
        }

        fn failing(error: NetworkError) -> Self {
            Self {
                code: 0,
                body: vec![],
                calls: AtomicUsize::new(0),
                fail: Some(error),
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(
            &self,
            _request: RequestParts,
        ) -> Result<(ResponseInfo, Vec<u8>), NetworkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = &self.fail {
                return Err(match error {
                    NetworkError::Timeout => NetworkError::Timeout,
                    other => NetworkError::Transport(other.to_string()),
                });
            }
            Ok((
                ResponseInfo {
                    code: self.code,
                    headers: BTreeMap::new(),
                },
                self.body.clone(),
            ))
        }
    }

    fn context(transport: Arc<dyn Transport>) -> JobContext {
        JobContext {
            db: Arc::new(Mutex::new(Database::open_in_memory().unwrap())),
            registry: Arc::new(ConfigRegistry::new([7u8; 32])),
            transport,
            identity: Arc::new(Identity::generate()),
            clock: Arc::new(SystemClock),
            directives: None,
        }
    }

    fn seed_interaction(ctx: &JobContext, thread: &str) -> Uuid {
        let interaction = Interaction {
            id: Uuid::new_v4(),
            thread_id: thread.to_string(),
            author: "05aa".to_string(),
            body: Some("hello".to_string()),
            state: SendState::Sending,
            failure_text: None,
            server_hash: None,
            sent_timestamp_ms: 1,
            has_attachments: false,
            expires_in_ms: None,
            created_at: Utc::now(),
        };
        ctx.db.lock().unwrap().insert_interaction(&interaction).unwrap();
        interaction.id
    }

    fn send_job(ctx: &JobContext, destination: MessageDestination) -> MessageSendJob {
        let thread = dispatch::thread_id_for(&destination, ctx.identity.as_ref());
        MessageSendJob {
            message: OutgoingMessage {
                kind: MessageKind::Visible,
                sent_timestamp_ms: 1,
                text: Some("hello".to_string()),
                attachment_ids: vec![],
                profile: None,
                expires_in_ms: None,
                sync_target: None,
            },
            destination,
            namespace: Namespace::Default,
            file_ids: vec![],
            options: SendOptions {
                snode_address: "https://snode.example.org:22021".to_string(),
                ttl_ms: 86_400_000,
                ..Default::default()
            },
            interaction_id: seed_interaction(ctx, &thread),
            self_send_valid: true,
        }
    }

    #[tokio::test]
    async fn test_message_send_success_records_hash() {
        let transport = Arc::new(FakeTransport::ok(200, r#"{"hash": "stored-hash"}"#));
        let ctx = context(transport);
        let job = send_job(
            &ctx,
            MessageDestination::Contact {
                account: AccountId::standard([2u8; 32]),
            },
        );

        let outcome = job.run(&ctx).await;
        assert!(matches!(outcome, JobOutcome::Success));

        let row = ctx
            .db
            .lock()
            .unwrap()
            .get_interaction(job.interaction_id)
            .unwrap();
        assert_eq!(row.state, SendState::Sent);
        assert_eq!(row.server_hash.as_deref(), Some("stored-hash"));
    }

    #[tokio::test]
    async fn test_message_send_timeout_is_transient_failure() {
        let transport = Arc::new(FakeTransport::failing(NetworkError::Timeout));
        let ctx = context(transport);
        let job = send_job(
            &ctx,
            MessageDestination::Contact {
                account: AccountId::standard([2u8; 32]),
            },
        );

        let outcome = job.run(&ctx).await;
        match outcome {
            JobOutcome::Failure { permanent, .. } => assert!(!permanent),
            other => panic!("expected failure, got {other:?}"),
        }

        // The detached recovery write lands shortly after.
        tokio::task::yield_now().await;
        for _ in 0..50 {
            let state = ctx
                .db
                .lock()
                .unwrap()
                .get_interaction(job.interaction_id)
                .unwrap()
                .state;
            if state == SendState::Failed {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("interaction never flipped to failed");
    }

    #[tokio::test]
    async fn test_message_send_structural_error_is_permanent_without_network_call() {
        let transport = Arc::new(FakeTransport::ok(200, "{}"));
        let calls = transport.clone();
        let ctx = context(transport);

        let mut job = send_job(
            &ctx,
            MessageDestination::Contact {
                account: AccountId::standard([2u8; 32]),
            },
        );
        job.message.attachment_ids.push("file-1".to_string()); // nothing uploaded

        let outcome = job.run(&ctx).await;
        match outcome {
            JobOutcome::Failure { error, permanent } => {
                assert!(permanent);
                assert!(matches!(error, SyncError::AttachmentsNotUploaded));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(calls.calls.load(Ordering::SeqCst), 0, "must fail before any network call");
    }

    #[tokio::test]
    async fn test_config_receive_job_merges_and_succeeds() {
        let transport = Arc::new(FakeTransport::ok(200, "{}"));
        let ctx = context(transport);

        let key: SymmetricKey = [3u8; 32];
        let mut info = GroupInfoConfig::default();
        info.name = Lww::new("Ops".to_string(), 100);
        let object = ConfigObject::GroupInfo(info);

        let owner = AccountId::blinded15([3u8; 32]);
        let job = ConfigMessageReceiveJob {
            owner,
            local_account: AccountId::standard([1u8; 32]),
            decryption_key: key,
            deltas: vec![ConfigDelta {
                namespace: Namespace::GroupInfo,
                server_hash: "h1".to_string(),
                server_timestamp_ms: 100,
                ciphertext: crypto::encrypt(&key, &object.encode().unwrap()).unwrap(),
            }],
            snode_address: "https://snode.example.org:22021".to_string(),
        };

        let outcome = job.run(&ctx).await;
        assert!(matches!(outcome, JobOutcome::Success));
        assert_eq!(
            ctx.db.lock().unwrap().get_group(&owner.to_hex()).unwrap().name,
            "Ops"
        );
    }

    #[tokio::test]
    async fn test_config_sync_job_pushes_dirty_namespace() {
        let transport = Arc::new(FakeTransport::ok(200, r#"{"hash": "cfg-hash"}"#));
        let ctx = context(transport.clone());

        let owner = AccountId::blinded15([3u8; 32]);
        let key = (owner, Namespace::GroupInfo);
        {
            let db = ctx.db.lock().unwrap();
            let clock = SystemClock;
            push::stage_and_maybe_push(
                &ctx.registry,
                &db,
                key,
                push::ConfigMutation::SetGroupName("Ops".to_string()),
                true,
                &[5u8; 32],
                "https://snode.example.org:22021",
                86_400_000,
                &clock,
            )
            .unwrap();
        }

        let job = ConfigSyncJob {
            owner,
            namespace: Namespace::GroupInfo,
            encryption_key: [5u8; 32],
            snode_address: "https://snode.example.org:22021".to_string(),
            ttl_ms: 86_400_000,
        };
        let outcome = job.run(&ctx).await;
        assert!(matches!(outcome, JobOutcome::Success));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        // Nothing left to push: the next run short-circuits.
        let outcome = job.run(&ctx).await;
        assert!(matches!(outcome, JobOutcome::Success));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
