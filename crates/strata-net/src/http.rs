//! reqwest implementation of [`Transport`] against the client-server API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use strata_shared::constants::DEFAULT_REQUEST_TIMEOUT_MS;
use strata_shared::keys::{
    KeyChangesResponse, KeysClaimRequest, KeysClaimResponse, KeysQueryRequest, KeysQueryResponse,
    KeysUploadRequest, KeysUploadResponse, SendToDeviceRequest, SigningKeysUploadRequest,
};
use strata_shared::sync::{MessagesResponse, SyncResponse};
use strata_shared::{EventId, RoomId, TransactionId};

use crate::error::{error_from_response, NetError, Result};
use crate::transport::{MessagesRequest, SyncRequest, Transport};

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub homeserver: Url,
    pub access_token: String,
    /// Timeout for ordinary requests. A sync request gets its long-poll
    /// timeout on top of this.
    pub request_timeout: Duration,
}

impl HttpConfig {
    pub fn new(homeserver: Url, access_token: impl Into<String>) -> Self {
        Self {
            homeserver,
            access_token: access_token.into(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    config: HttpConfig,
    client: Client,
}

#[derive(Deserialize)]
struct SendEventResponse {
    event_id: EventId,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("strata/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, client })
    }

    /// `{homeserver}/_matrix/client/v3/{segments...}` with each segment
    /// percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.config.homeserver.clone();
        url.path_segments_mut()
            .map_err(|_| NetError::Url(self.config.homeserver.to_string()))?
            .pop_if_empty()
            .extend(["_matrix", "client", "v3"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.config.access_token)
            .timeout(self.config.request_timeout)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let err = error_from_response(status.as_u16(), &body);
            debug!(status = status.as_u16(), error = %err, "request failed");
            return Err(err);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(level = "debug", skip(self), fields(since = ?request.since))]
    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse> {
        let mut url = self.endpoint(&["sync"])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(since) = &request.since {
                query.append_pair("since", since);
            }
            if let Some(filter) = &request.filter {
                query.append_pair("filter", filter);
            }
            if request.full_state {
                query.append_pair("full_state", "true");
            }
            query.append_pair("timeout", &request.timeout_ms.to_string());
        }

        let builder = self
            .request(Method::GET, url)
            .timeout(self.config.request_timeout + Duration::from_millis(request.timeout_ms));
        self.send(builder).await
    }

    async fn upload_keys(&self, request: &KeysUploadRequest) -> Result<KeysUploadResponse> {
        let url = self.endpoint(&["keys", "upload"])?;
        self.send(self.request(Method::POST, url).json(request)).await
    }

    async fn claim_keys(&self, request: &KeysClaimRequest) -> Result<KeysClaimResponse> {
        let url = self.endpoint(&["keys", "claim"])?;
        self.send(self.request(Method::POST, url).json(request)).await
    }

    async fn query_keys(&self, request: &KeysQueryRequest) -> Result<KeysQueryResponse> {
        let url = self.endpoint(&["keys", "query"])?;
        self.send(self.request(Method::POST, url).json(request)).await
    }

    async fn key_changes(&self, from: &str, to: &str) -> Result<KeyChangesResponse> {
        let mut url = self.endpoint(&["keys", "changes"])?;
        url.query_pairs_mut()
            .append_pair("from", from)
            .append_pair("to", to);
        self.send(self.request(Method::GET, url)).await
    }

    async fn send_to_device(
        &self,
        event_type: &str,
        txn_id: &TransactionId,
        request: &SendToDeviceRequest,
    ) -> Result<()> {
        let url = self.endpoint(&["sendToDevice", event_type, txn_id.as_str()])?;
        let _: Value = self.send(self.request(Method::PUT, url).json(request)).await?;
        Ok(())
    }

    async fn upload_signing_keys(&self, request: &SigningKeysUploadRequest) -> Result<()> {
        let url = self.endpoint(&["keys", "device_signing", "upload"])?;
        let _: Value = self.send(self.request(Method::POST, url).json(request)).await?;
        Ok(())
    }

    async fn room_messages(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        let mut url = self.endpoint(&["rooms", request.room_id.as_str(), "messages"])?;
        url.query_pairs_mut()
            .append_pair("from", &request.from)
            .append_pair("dir", request.dir.as_str())
            .append_pair("limit", &request.limit.to_string());
        self.send(self.request(Method::GET, url)).await
    }

    async fn send_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        txn_id: &TransactionId,
        content: &Value,
    ) -> Result<EventId> {
        let url = self.endpoint(&["rooms", room_id.as_str(), "send", event_type, txn_id.as_str()])?;
        let response: SendEventResponse =
            self.send(self.request(Method::PUT, url).json(content)).await?;
        Ok(response.event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base: &str) -> HttpTransport {
        HttpTransport::new(HttpConfig::new(Url::parse(base).unwrap(), "token")).unwrap()
    }

    #[test]
    fn test_endpoint_segments_are_encoded() {
        let t = transport("https://hs.example.org");
        let url = t
            .endpoint(&["rooms", "!abc:example.org", "messages"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://hs.example.org/_matrix/client/v3/rooms/!abc:example.org/messages"
        );

        let url = t.endpoint(&["sendToDevice", "m.room.encrypted", "tx/1"]).unwrap();
        assert!(url.as_str().ends_with("/sendToDevice/m.room.encrypted/tx%2F1"));
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let t = transport("https://example.org/matrix/");
        let url = t.endpoint(&["sync"]).unwrap();
        assert_eq!(url.as_str(), "https://example.org/matrix/_matrix/client/v3/sync");
    }
}
