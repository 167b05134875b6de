//! The client's shared services, built once at startup and handed to callers.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::api::{ApiGateway, RetryPolicy};
use crate::auth::{KeyValueStore, SessionManager};
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::handling::ErrorHandler;
use crate::notifications::NotificationCenter;
use crate::signals::SignalBus;

/// Every long-lived service the client needs, wired together.
///
/// Clone shares the same underlying services.
#[derive(Clone)]
pub struct ClientContext {
    pub config: ClientConfig,
    pub signals: SignalBus,
    pub store: Arc<dyn KeyValueStore>,
    pub gateway: ApiGateway,
    pub session: SessionManager,
    pub notifications: NotificationCenter,
    pub errors: ErrorHandler,
}

impl ClientContext {
    /// Validate `config` and build the services on top of `store`.
    ///
    /// The session manager is subscribed to credential rejections before
    /// this returns, so the first request is already covered.
    pub fn new(config: ClientConfig, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let signals = SignalBus::new();
        let gateway = ApiGateway::from_config(&config, store.clone(), signals.clone())?;
        let session = SessionManager::new(
            gateway.clone(),
            store.clone(),
            signals.clone(),
            clock.clone(),
            config.session.refresh_buffer(),
        );
        let notifications = NotificationCenter::new(&config.notifications, clock);
        let errors = ErrorHandler::new(RetryPolicy::from_config(&config.retry), notifications.clone());

        debug!(base_url = %gateway.base_url(), "Client context ready");

        Ok(Self {
            config,
            signals,
            store,
            gateway,
            session,
            notifications,
            errors,
        })
    }

    /// Adopt a persisted session, if one is still valid.
    pub fn restore_session(&self) -> bool {
        let restored = self.session.restore();
        if restored {
            info!("Restored persisted session");
        }
        restored
    }
}
