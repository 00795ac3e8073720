//! Single-retry interactive authentication.

use std::future::Future;

use serde_json::json;
use tracing::{debug, warn};

use strata_net::NetError;
use strata_shared::constants::{AUTH_TYPE_PASSWORD, IDENTIFIER_TYPE_USER};
use strata_shared::keys::AuthData;
use strata_shared::UserId;

use crate::error::{KeyExchangeError, Result};

/// Password credentials used to answer an interactive-auth challenge.
#[derive(Debug, Clone)]
pub struct PasswordAuth {
    pub user_id: UserId,
    pub password: String,
}

impl PasswordAuth {
    pub fn new(user_id: UserId, password: impl Into<String>) -> Self {
        Self {
            user_id,
            password: password.into(),
        }
    }

    pub fn auth_data(&self, session: Option<String>) -> AuthData {
        AuthData {
            kind: AUTH_TYPE_PASSWORD.to_string(),
            session,
            identifier: Some(json!({ "type": IDENTIFIER_TYPE_USER, "user": self.user_id })),
            password: Some(self.password.clone()),
        }
    }
}

/// Run `attempt` without auth; on a challenge offering password auth, run it
/// exactly once more with credentials. A second challenge is terminal.
pub async fn with_interactive_auth<T, F, Fut>(
    credentials: Option<&PasswordAuth>,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(Option<AuthData>) -> Fut,
    Fut: Future<Output = strata_net::Result<T>>,
{
    let challenge = match attempt(None).await {
        Ok(value) => return Ok(value),
        Err(NetError::InteractiveAuth(challenge)) => challenge,
        Err(e) => return Err(e.into()),
    };

    let Some(credentials) = credentials else {
        debug!("interactive auth requested but no credentials configured");
        return Err(KeyExchangeError::InteractiveAuthRequired(challenge));
    };
    if !challenge.offers_stage(AUTH_TYPE_PASSWORD) {
        warn!(flows = ?challenge.flows, "no password flow offered");
        return Err(KeyExchangeError::InteractiveAuthRequired(challenge));
    }

    match attempt(Some(credentials.auth_data(challenge.session.clone()))).await {
        Ok(value) => Ok(value),
        Err(NetError::InteractiveAuth(again)) => {
            warn!(errcode = ?again.errcode, "interactive auth rejected");
            Err(KeyExchangeError::InteractiveAuthFailed(again))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strata_shared::keys::{AuthFlow, UiaChallenge};

    fn challenge() -> NetError {
        NetError::InteractiveAuth(Box::new(UiaChallenge {
            flows: vec![AuthFlow {
                stages: vec![AUTH_TYPE_PASSWORD.to_string()],
            }],
            session: Some("sess".into()),
            ..Default::default()
        }))
    }

    fn creds() -> PasswordAuth {
        PasswordAuth::new(UserId::parse("@alice:example.org").unwrap(), "hunter2")
    }

    #[tokio::test]
    async fn test_retries_once_with_session() {
        let calls = AtomicUsize::new(0);
        let result = with_interactive_auth(Some(&creds()), |auth| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match (n, auth) {
                    (0, None) => Err(challenge()),
                    (1, Some(auth)) => {
                        assert_eq!(auth.session.as_deref(), Some("sess"));
                        Ok(7)
                    }
                    _ => panic!("unexpected attempt"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_challenge_is_terminal() {
        let calls = AtomicUsize::new(0);
        let err = with_interactive_auth::<(), _, _>(Some(&creds()), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(challenge()) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, KeyExchangeError::InteractiveAuthFailed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_without_credentials() {
        let err = with_interactive_auth::<(), _, _>(None, |_| async { Err(challenge()) })
            .await
            .unwrap_err();
        assert!(matches!(err, KeyExchangeError::InteractiveAuthRequired(_)));
    }

    #[tokio::test]
    async fn test_other_errors_pass_through() {
        let err = with_interactive_auth::<(), _, _>(Some(&creds()), |_| async {
            Err(NetError::Network("down".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, KeyExchangeError::Net(NetError::Network(_))));
    }
}
