//! The transport seam.
//!
//! Everything above this crate talks to the homeserver through [`Transport`]
//! so that tests can script responses without a server.

use async_trait::async_trait;
use serde_json::Value;

use strata_shared::keys::{
    KeyChangesResponse, KeysClaimRequest, KeysClaimResponse, KeysQueryRequest, KeysQueryResponse,
    KeysUploadRequest, KeysUploadResponse, SendToDeviceRequest, SigningKeysUploadRequest,
};
use strata_shared::sync::{Direction, MessagesResponse, SyncResponse};
use strata_shared::{EventId, RoomId, TransactionId};

use crate::error::Result;

/// Parameters of one sync request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncRequest {
    pub since: Option<String>,
    /// Long-poll timeout; 0 returns immediately.
    pub timeout_ms: u64,
    /// Filter id or inline JSON filter.
    pub filter: Option<String>,
    pub full_state: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagesRequest {
    pub room_id: RoomId,
    pub from: String,
    pub dir: Direction,
    pub limit: u32,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse>;

    async fn upload_keys(&self, request: &KeysUploadRequest) -> Result<KeysUploadResponse>;

    async fn claim_keys(&self, request: &KeysClaimRequest) -> Result<KeysClaimResponse>;

    async fn query_keys(&self, request: &KeysQueryRequest) -> Result<KeysQueryResponse>;

    async fn key_changes(&self, from: &str, to: &str) -> Result<KeyChangesResponse>;

    async fn send_to_device(
        &self,
        event_type: &str,
        txn_id: &TransactionId,
        request: &SendToDeviceRequest,
    ) -> Result<()>;

    async fn upload_signing_keys(&self, request: &SigningKeysUploadRequest) -> Result<()>;

    async fn room_messages(&self, request: &MessagesRequest) -> Result<MessagesResponse>;

    async fn send_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        txn_id: &TransactionId,
        content: &Value,
    ) -> Result<EventId>;
}
