use tracing::debug;

use strata_net::Transport;
use strata_shared::keys::SendToDeviceRequest;
use strata_shared::TransactionId;

use crate::error::Result;

/// Send to-device messages. The caller owns `txn_id` and reuses it on retry
/// so the server drops duplicates. Nothing is sent for an empty request.
pub async fn send_to_device(
    transport: &dyn Transport,
    event_type: &str,
    txn_id: &TransactionId,
    request: &SendToDeviceRequest,
) -> Result<()> {
    if request.is_empty() {
        debug!(event_type, "no to-device recipients");
        return Ok(());
    }
    debug!(event_type, txn_id = %txn_id, users = request.messages.len(), "sending to-device");
    transport.send_to_device(event_type, txn_id, request).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTransport;
    use serde_json::json;

    #[tokio::test]
    async fn test_empty_request_is_not_sent() {
        let transport = FakeTransport::default();
        let txn = TransactionId::generate();
        send_to_device(&transport, "m.dummy", &txn, &SendToDeviceRequest::default())
            .await
            .unwrap();
        assert!(transport.to_device_requests().is_empty());
    }

    #[tokio::test]
    async fn test_sends_with_transaction_id() {
        let transport = FakeTransport::default();
        let txn = TransactionId::parse("tx1").unwrap();
        let mut request = SendToDeviceRequest::default();
        request
            .messages
            .entry("@bob:example.org".into())
            .or_default()
            .insert("BOB".into(), json!({ "a": 1 }));

        send_to_device(&transport, "m.dummy", &txn, &request).await.unwrap();
        let sent = transport.to_device_requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "m.dummy");
        assert_eq!(sent[0].1, "tx1");
    }
}
