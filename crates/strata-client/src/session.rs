//! A logged-in device: the store, the homeserver transport and every
//! handler wired together.

use std::sync::Arc;

use tracing::info;

use strata_crypto::{KeyManager, LocalCryptoService, PasswordAuth};
use strata_net::{HttpConfig, HttpTransport, Transport};
use strata_shared::{DeviceId, UserId};
use strata_store::{Database, SharedDatabase, StoreError};
use strata_sync::{
    LocalEchoes, Paginator, Processors, RoomLocks, SyncResponseHandler, VerificationTracker,
};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::sync_loop::{SyncLoop, SyncLoopConfig};

pub struct Session {
    config: ClientConfig,
    user_id: UserId,
    device_id: DeviceId,
    db: SharedDatabase,
    transport: Arc<dyn Transport>,
    crypto: Arc<LocalCryptoService>,
    key_manager: Arc<KeyManager>,
    handler: Arc<SyncResponseHandler>,
    paginator: Paginator,
    local_echoes: LocalEchoes,
}

impl Session {
    /// Open the configured store and connect to the homeserver over HTTP.
    pub fn open(config: ClientConfig, processors: Processors) -> Result<Self> {
        let db = match &config.database_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(StoreError::from)?;
                }
                Database::open_at(path)?
            }
            None => Database::new()?,
        };

        let mut http = HttpConfig::new(config.homeserver()?, config.access_token()?);
        http.request_timeout = config.request_timeout();
        let transport = Arc::new(HttpTransport::new(http)?);

        Self::with_transport(config, db.into_shared(), transport, processors)
    }

    /// Wire a session over an already opened store and any transport.
    pub fn with_transport(
        config: ClientConfig,
        db: SharedDatabase,
        transport: Arc<dyn Transport>,
        processors: Processors,
    ) -> Result<Self> {
        let user_id = config.user_id()?;
        let device_id = config.device_id()?;

        let account = LocalCryptoService::load_account(&db, &user_id, &device_id)?;
        let crypto = Arc::new(LocalCryptoService::new(db.clone(), account.clone())?);
        let credentials = config
            .account_password
            .as_ref()
            .map(|password| PasswordAuth::new(user_id.clone(), password.clone()));
        let key_manager = Arc::new(KeyManager::new(
            transport.clone(),
            crypto.clone(),
            account,
            db.clone(),
            credentials,
        )?);

        let locks = RoomLocks::new();
        let verification = Arc::new(VerificationTracker::new(user_id.clone(), device_id.clone()));
        let handler = SyncResponseHandler::new(
            db.clone(),
            crypto.clone(),
            verification,
            user_id.clone(),
            locks.clone(),
            processors.clone(),
        )
        .with_key_manager(key_manager.clone());
        let paginator = Paginator::new(
            transport.clone(),
            db.clone(),
            handler.crypto_sync().clone(),
            locks,
            processors.clone(),
        );
        let local_echoes = LocalEchoes::new(
            db.clone(),
            transport.clone(),
            crypto.clone(),
            user_id.clone(),
            processors,
        )
        .with_key_manager(key_manager.clone());

        info!(user_id = %user_id, device_id = %device_id, "session opened");

        Ok(Self {
            config,
            user_id,
            device_id,
            db,
            transport,
            crypto,
            key_manager,
            handler: Arc::new(handler),
            paginator,
            local_echoes,
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn database(&self) -> &SharedDatabase {
        &self.db
    }

    pub fn crypto(&self) -> &Arc<LocalCryptoService> {
        &self.crypto
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.key_manager
    }

    pub fn paginator(&self) -> &Paginator {
        &self.paginator
    }

    pub fn local_echoes(&self) -> &LocalEchoes {
        &self.local_echoes
    }

    /// A sync loop over this session. Only one should run at a time.
    pub fn sync_loop(&self) -> SyncLoop {
        SyncLoop::new(
            self.transport.clone(),
            self.db.clone(),
            self.handler.clone(),
            SyncLoopConfig::from(&self.config),
        )
        .with_key_manager(self.key_manager.clone())
    }
}
