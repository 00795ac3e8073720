use std::collections::BTreeMap;

use tracing::debug;

use strata_net::Transport;
use strata_shared::keys::KeysUploadRequest;

use crate::error::Result;

/// Upload device keys and/or one-time keys. Returns the server's one-time key
/// counts per algorithm. Re-uploading identical keys is a no-op server side.
pub async fn upload_keys(
    transport: &dyn Transport,
    request: &KeysUploadRequest,
) -> Result<BTreeMap<String, u64>> {
    debug!(
        device_keys = request.device_keys.is_some(),
        one_time_keys = request.one_time_keys.len(),
        "uploading keys"
    );
    let response = transport.upload_keys(request).await?;
    Ok(response.one_time_key_counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTransport;
    use strata_shared::keys::KeysUploadResponse;

    #[tokio::test]
    async fn test_returns_counts() {
        let transport = FakeTransport::default();
        transport.push_upload(Ok(KeysUploadResponse {
            one_time_key_counts: [("signed_curve25519".to_string(), 42)].into(),
        }));

        let counts = upload_keys(&transport, &KeysUploadRequest::default())
            .await
            .unwrap();
        assert_eq!(counts.get("signed_curve25519"), Some(&42));
        assert_eq!(transport.upload_requests().len(), 1);
    }
}
