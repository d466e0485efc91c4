//! Persistent connections that survive configuration changes.
//!
//! This module provides [`ConnectionManager`], which owns at most one live
//! [`SubprocessTransport`] and rebuilds it when settings change. The CLI reads
//! its settings only at launch, so a live change means: terminate the
//! process, derive a new configuration that resumes the same session, and
//! connect again.
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use claude_transport::{ConnectionManager, Model, TransportConfig};
//!
//! let manager = ConnectionManager::new(TransportConfig::default());
//! manager.connect().await?;
//! let mut messages = manager.take_stream().await.expect("fresh connection");
//!
//! manager.send_message("Remember the number 7").await?;
//! // ... read until the result ...
//!
//! // Switches model and resumes the conversation in a new process.
//! manager.set_model(Model::Opus).await?;
//! let mut messages = manager.take_stream().await.expect("reconnected");
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{Model, PermissionMode, SessionId, TransportConfig, TransportConfigBuilder};
use crate::protocol;
use crate::transport::{MessageStream, SubprocessTransport};
use crate::{Error, Result};

/// Derive the configuration for reconnecting to a conversation.
///
/// With a session id the new process resumes that session; without one it
/// continues the most recent conversation. Every other field is unchanged.
pub fn derive_reconnect_config(
    config: &TransportConfig,
    session: Option<&SessionId>,
) -> TransportConfig {
    let builder = config.to_builder();
    let builder = match session {
        Some(id) => builder.resume(id.clone()).continue_conversation(false),
        None => builder.clear_resume().continue_conversation(true),
    };
    builder.build()
}

#[derive(Debug)]
struct Active {
    transport: Arc<SubprocessTransport>,
    stream: Option<MessageStream>,
}

#[derive(Debug)]
struct Inner {
    config: Arc<TransportConfig>,
    active: Option<Active>,
    /// Session of the last disconnected transport.
    last_session: Option<SessionId>,
}

/// Holds one persistent connection and reconnects it on demand.
///
/// # Thread Safety
///
/// `ConnectionManager` is `Send + Sync`. Connects, disconnects and
/// reconnects are serialized; sends go straight to the current transport.
#[derive(Debug)]
pub struct ConnectionManager {
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    pub fn new(config: TransportConfig) -> Self {
        Self::with_shared_config(Arc::new(config))
    }

    pub(crate) fn with_shared_config(config: Arc<TransportConfig>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                active: None,
                last_session: None,
            }),
        }
    }

    /// The configuration the next connection will use.
    pub async fn config(&self) -> Arc<TransportConfig> {
        Arc::clone(&self.inner.lock().await.config)
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.active.is_some()
    }

    /// Open a persistent connection with the current configuration.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if already connected, or the launch error.
    pub async fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.active.is_some() {
            return Err(Error::invalid_state("already connected"));
        }
        Self::connect_locked(&mut inner).await
    }

    async fn connect_locked(inner: &mut Inner) -> Result<()> {
        let transport = Arc::new(SubprocessTransport::with_shared_config(Arc::clone(
            &inner.config,
        )));
        let stream = transport.connect().await?;
        info!(pid = ?transport.supervisor().pid(), "connected");
        inner.active = Some(Active {
            transport,
            stream: Some(stream),
        });
        Ok(())
    }

    /// Take the message stream of the current connection.
    ///
    /// Returns `None` when disconnected or when the stream was already taken.
    pub async fn take_stream(&self) -> Option<MessageStream> {
        self.inner
            .lock()
            .await
            .active
            .as_mut()
            .and_then(|active| active.stream.take())
    }

    /// The current transport, if connected.
    pub async fn transport(&self) -> Option<Arc<SubprocessTransport>> {
        self.inner
            .lock()
            .await
            .active
            .as_ref()
            .map(|active| Arc::clone(&active.transport))
    }

    /// Session id of the current connection, or of the last one.
    pub async fn session_id(&self) -> Option<SessionId> {
        let inner = self.inner.lock().await;
        Self::known_session(&inner)
    }

    fn known_session(inner: &Inner) -> Option<SessionId> {
        inner
            .active
            .as_ref()
            .and_then(|active| active.transport.session_id())
            .or_else(|| inner.last_session.clone())
    }

    /// Terminate the current connection. Does nothing when disconnected.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        Self::disconnect_locked(&mut inner).await;
    }

    async fn disconnect_locked(inner: &mut Inner) {
        let Some(active) = inner.active.take() else {
            return;
        };
        if let Some(id) = active.transport.session_id() {
            inner.last_session = Some(id);
        }
        active.transport.close().await;
        debug!("disconnected");
    }

    /// Replace the connection with one that picks up the same conversation.
    ///
    /// Resumes `session_override`, else the known session id, else continues
    /// the most recent conversation.
    pub async fn reconnect(&self, session_override: Option<SessionId>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::reconnect_locked(&mut inner, session_override).await
    }

    async fn reconnect_locked(inner: &mut Inner, session_override: Option<SessionId>) -> Result<()> {
        Self::disconnect_locked(inner).await;
        let session = session_override.or_else(|| Self::known_session(inner));
        info!(session_id = ?session.as_ref().map(SessionId::as_str), "reconnecting");
        inner.config = Arc::new(derive_reconnect_config(&inner.config, session.as_ref()));
        Self::connect_locked(inner).await
    }

    /// Change the configuration, reconnecting if a connection is live.
    pub async fn update_config<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(TransportConfigBuilder) -> TransportConfigBuilder,
    {
        let mut inner = self.inner.lock().await;
        inner.config = Arc::new(update(inner.config.to_builder()).build());
        if inner.active.is_some() {
            Self::reconnect_locked(&mut inner, None).await?;
        }
        Ok(())
    }

    pub async fn set_model(&self, model: impl Into<Model>) -> Result<()> {
        let model = model.into();
        self.update_config(|builder| builder.model(model)).await
    }

    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.update_config(|builder| builder.permission_mode(mode))
            .await
    }

    async fn connected_transport(&self) -> Result<Arc<SubprocessTransport>> {
        self.transport()
            .await
            .ok_or_else(|| Error::invalid_state("not connected"))
    }

    /// Send a user message threaded with the known session id.
    pub async fn send_message(&self, content: impl Into<Value>) -> Result<()> {
        let transport = self.connected_transport().await?;
        let session = match transport.session_id() {
            Some(id) => Some(id),
            None => self.inner.lock().await.last_session.clone(),
        };
        let session = session
            .as_ref()
            .map_or(protocol::DEFAULT_SESSION_ID, SessionId::as_str);
        transport
            .send(&protocol::user_message(content, session))
            .await
    }

    /// Send a raw message object.
    pub async fn send(&self, message: &Value) -> Result<()> {
        self.connected_transport().await?.send(message).await
    }

    pub async fn interrupt(&self) -> Result<()> {
        self.connected_transport().await?.interrupt().await
    }

    pub async fn send_control_request(
        &self,
        request: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.connected_transport()
            .await?
            .send_control_request(request, timeout)
            .await
    }
}
