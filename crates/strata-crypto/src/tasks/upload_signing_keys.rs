use tracing::info;

use strata_net::Transport;
use strata_shared::keys::SigningKeysUploadRequest;

use crate::error::Result;
use crate::tasks::uia::{with_interactive_auth, PasswordAuth};

/// Upload the cross-signing key triple, answering one interactive-auth
/// challenge with `credentials` when given.
pub async fn upload_signing_keys(
    transport: &dyn Transport,
    request: &SigningKeysUploadRequest,
    credentials: Option<&PasswordAuth>,
) -> Result<()> {
    with_interactive_auth(credentials, |auth| {
        let mut body = request.clone();
        body.auth = auth;
        async move { transport.upload_signing_keys(&body).await }
    })
    .await?;
    info!("uploaded cross-signing keys");
    Ok(())
}
