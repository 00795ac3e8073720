//! Scripted transport for the key-exchange tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use strata_net::{MessagesRequest, NetError, Result, SyncRequest, Transport};
use strata_shared::keys::{
    KeyChangesResponse, KeysClaimRequest, KeysClaimResponse, KeysQueryRequest, KeysQueryResponse,
    KeysUploadRequest, KeysUploadResponse, SendToDeviceRequest, SigningKeysUploadRequest,
};
use strata_shared::sync::{MessagesResponse, SyncResponse};
use strata_shared::{EventId, RoomId, TransactionId};

/// Each endpoint answers from its queue, falling back to an empty success.
#[derive(Default)]
pub struct FakeTransport {
    upload: Mutex<VecDeque<Result<KeysUploadResponse>>>,
    claim: Mutex<VecDeque<Result<KeysClaimResponse>>>,
    query: Mutex<VecDeque<Result<KeysQueryResponse>>>,
    signing: Mutex<VecDeque<Result<()>>>,

    upload_requests: Mutex<Vec<KeysUploadRequest>>,
    claim_requests: Mutex<Vec<KeysClaimRequest>>,
    query_requests: Mutex<Vec<KeysQueryRequest>>,
    signing_requests: Mutex<Vec<SigningKeysUploadRequest>>,
    to_device_requests: Mutex<Vec<(String, String, SendToDeviceRequest)>>,
}

fn pop<T: Default>(queue: &Mutex<VecDeque<Result<T>>>) -> Result<T> {
    queue.lock().unwrap().pop_front().unwrap_or_else(|| Ok(T::default()))
}

impl FakeTransport {
    pub fn push_upload(&self, r: Result<KeysUploadResponse>) {
        self.upload.lock().unwrap().push_back(r);
    }

    pub fn push_claim(&self, r: Result<KeysClaimResponse>) {
        self.claim.lock().unwrap().push_back(r);
    }

    pub fn push_query(&self, r: Result<KeysQueryResponse>) {
        self.query.lock().unwrap().push_back(r);
    }

    pub fn push_signing(&self, r: Result<()>) {
        self.signing.lock().unwrap().push_back(r);
    }

    pub fn upload_requests(&self) -> Vec<KeysUploadRequest> {
        self.upload_requests.lock().unwrap().clone()
    }

    pub fn claim_requests(&self) -> Vec<KeysClaimRequest> {
        self.claim_requests.lock().unwrap().clone()
    }

    pub fn query_requests(&self) -> Vec<KeysQueryRequest> {
        self.query_requests.lock().unwrap().clone()
    }

    pub fn signing_requests(&self) -> Vec<SigningKeysUploadRequest> {
        self.signing_requests.lock().unwrap().clone()
    }

    pub fn to_device_requests(&self) -> Vec<(String, String, SendToDeviceRequest)> {
        self.to_device_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn sync(&self, _request: &SyncRequest) -> Result<SyncResponse> {
        Err(NetError::Network("sync is not scripted".into()))
    }

    async fn upload_keys(&self, request: &KeysUploadRequest) -> Result<KeysUploadResponse> {
        self.upload_requests.lock().unwrap().push(request.clone());
        pop(&self.upload)
    }

    async fn claim_keys(&self, request: &KeysClaimRequest) -> Result<KeysClaimResponse> {
        self.claim_requests.lock().unwrap().push(request.clone());
        pop(&self.claim)
    }

    async fn query_keys(&self, request: &KeysQueryRequest) -> Result<KeysQueryResponse> {
        self.query_requests.lock().unwrap().push(request.clone());
        pop(&self.query)
    }

    async fn key_changes(&self, _from: &str, _to: &str) -> Result<KeyChangesResponse> {
        Ok(KeyChangesResponse::default())
    }

    async fn send_to_device(
        &self,
        event_type: &str,
        txn_id: &TransactionId,
        request: &SendToDeviceRequest,
    ) -> Result<()> {
        self.to_device_requests.lock().unwrap().push((
            event_type.to_string(),
            txn_id.to_string(),
            request.clone(),
        ));
        Ok(())
    }

    async fn upload_signing_keys(&self, request: &SigningKeysUploadRequest) -> Result<()> {
        self.signing_requests.lock().unwrap().push(request.clone());
        pop(&self.signing)
    }

    async fn room_messages(&self, _request: &MessagesRequest) -> Result<MessagesResponse> {
        Err(NetError::Network("messages are not scripted".into()))
    }

    async fn send_event(
        &self,
        _room_id: &RoomId,
        _event_type: &str,
        _txn_id: &TransactionId,
        _content: &Value,
    ) -> Result<EventId> {
        Err(NetError::Network("send is not scripted".into()))
    }
}
