//! A transport that replays scripted sync results.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use strata_crypto::LocalCryptoService;
use strata_net::{MessagesRequest, NetError, Result as NetResult, SyncRequest, Transport};
use strata_shared::keys::{
    KeyChangesResponse, KeysClaimRequest, KeysClaimResponse, KeysQueryRequest, KeysQueryResponse,
    KeysUploadRequest, KeysUploadResponse, SendToDeviceRequest, SigningKeysUploadRequest,
};
use strata_shared::sync::{MessagesResponse, SyncResponse};
use strata_shared::{DeviceId, EventId, RoomId, TransactionId, UserId};
use strata_store::{Database, SharedDatabase};
use strata_sync::{Processors, RoomLocks, SyncResponseHandler, VerificationTracker};

/// Sync results are served in order; once the script runs out a sync hangs
/// like a long poll with nothing to report.
#[derive(Default)]
pub struct ScriptedTransport {
    syncs: Mutex<VecDeque<NetResult<SyncResponse>>>,
    requests: Mutex<Vec<SyncRequest>>,
}

impl ScriptedTransport {
    pub fn push_sync(&self, result: NetResult<SyncResponse>) {
        self.syncs.lock().unwrap().push_back(result);
    }

    pub fn sync_requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn sync(&self, request: &SyncRequest) -> NetResult<SyncResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.syncs.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn upload_keys(&self, _request: &KeysUploadRequest) -> NetResult<KeysUploadResponse> {
        Ok(KeysUploadResponse::default())
    }

    async fn claim_keys(&self, _request: &KeysClaimRequest) -> NetResult<KeysClaimResponse> {
        Ok(KeysClaimResponse::default())
    }

    async fn query_keys(&self, _request: &KeysQueryRequest) -> NetResult<KeysQueryResponse> {
        Ok(KeysQueryResponse::default())
    }

    async fn key_changes(&self, _from: &str, _to: &str) -> NetResult<KeyChangesResponse> {
        Ok(KeyChangesResponse::default())
    }

    async fn send_to_device(
        &self,
        _event_type: &str,
        _txn_id: &TransactionId,
        _request: &SendToDeviceRequest,
    ) -> NetResult<()> {
        Ok(())
    }

    async fn upload_signing_keys(&self, _request: &SigningKeysUploadRequest) -> NetResult<()> {
        Ok(())
    }

    async fn room_messages(&self, _request: &MessagesRequest) -> NetResult<MessagesResponse> {
        Err(NetError::Network("messages are not scripted".into()))
    }

    async fn send_event(
        &self,
        _room_id: &RoomId,
        _event_type: &str,
        txn_id: &TransactionId,
        _content: &Value,
    ) -> NetResult<EventId> {
        Ok(EventId::parse(format!("$sent-{txn_id}")).unwrap())
    }
}

/// An in-memory store and a response handler backed by real crypto.
pub fn session_parts() -> (SharedDatabase, Arc<SyncResponseHandler>) {
    let user_id = UserId::parse("@me:example.org").unwrap();
    let device_id = DeviceId::parse("PHONE").unwrap();
    let db = Database::open_in_memory().unwrap().into_shared();
    let account = LocalCryptoService::load_account(&db, &user_id, &device_id).unwrap();
    let crypto = Arc::new(LocalCryptoService::new(db.clone(), account).unwrap());
    let handler = SyncResponseHandler::new(
        db.clone(),
        crypto,
        Arc::new(VerificationTracker::new(user_id.clone(), device_id)),
        user_id,
        RoomLocks::new(),
        Processors::new(),
    );
    (db, Arc::new(handler))
}
