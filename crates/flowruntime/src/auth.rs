use crate::registry::AppRegistry;
use crate::store::{ConnectionCredentials, ConnectionStore};
use flowcore::{App, AuthError, AuthHandle, ConnectionId, HttpClient, JsonObject, RunContext, StoreError};
use std::sync::Arc;

/// Drives the credential lifecycle of connections: initial connect,
/// reconnect with new fields and the pre-run staleness check.
pub struct AuthenticationManager {
    registry: Arc<AppRegistry>,
    connections: Arc<dyn ConnectionStore>,
    client: reqwest::Client,
}

impl AuthenticationManager {
    pub fn new(registry: Arc<AppRegistry>, connections: Arc<dyn ConnectionStore>) -> Self {
        Self {
            registry,
            connections,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Credential handle for a step; detached when no connection is bound
    pub async fn auth_handle(
        &self,
        connection_id: Option<ConnectionId>,
    ) -> Result<AuthHandle, AuthError> {
        match connection_id {
            Some(id) => {
                let data = self.connections.credentials(id).await.map_err(store_error)?;
                Ok(AuthHandle::new(
                    id,
                    data,
                    Arc::new(ConnectionCredentials(self.connections.clone())),
                ))
            }
            None => Ok(AuthHandle::detached(JsonObject::new())),
        }
    }

    /// HTTP client bound to the app's base URL, hooks and credentials
    pub fn http_client(&self, app: &App, auth: AuthHandle) -> HttpClient {
        HttpClient::new(
            self.client.clone(),
            Some(app.descriptor.api_base_url.clone()),
            app.before_request.clone(),
            auth,
        )
    }

    /// Minimal context for running an app's authentication code
    pub async fn context_for(
        &self,
        app: &App,
        connection_id: Option<ConnectionId>,
    ) -> Result<RunContext, AuthError> {
        let auth = self.auth_handle(connection_id).await?;
        let http = self.http_client(app, auth.clone());
        Ok(RunContext::new(app.descriptor.clone(), auth).with_http(http))
    }

    async fn app_for(&self, connection_id: ConnectionId) -> Result<Arc<App>, AuthError> {
        let connection = self
            .connections
            .get_connection(connection_id)
            .await
            .map_err(store_error)?;
        self.registry
            .app(&connection.key)
            .map_err(|e| AuthError::Authentication(e.to_string()))
    }

    /// Verify freshly entered credentials and mark the connection verified
    pub async fn connect(&self, connection_id: ConnectionId) -> Result<(), AuthError> {
        let app = self.app_for(connection_id).await?;
        let auth = app
            .auth
            .clone()
            .ok_or_else(|| AuthError::NotSupported(app.key().to_string()))?;
        let ctx = self.context_for(&app, Some(connection_id)).await?;

        let verified = match auth.verify_credentials(&ctx).await {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, app = app.key(), error = %e, "credential verification failed");
                self.set_verified(connection_id, false).await?;
                return Err(AuthError::Authentication(e.message));
            }
        };

        ctx.auth.set(verified).await?;

        if let Err(e) = auth.create_auth_data(&ctx).await {
            tracing::warn!(connection_id = %connection_id, app = app.key(), error = %e, "creating auth data failed");
            self.set_verified(connection_id, false).await?;
            return Err(AuthError::Authentication(e.message));
        }

        self.set_verified(connection_id, true).await?;
        tracing::info!(connection_id = %connection_id, app = app.key(), "connection verified");
        Ok(())
    }

    /// Store new credential fields, then run the connect sequence
    pub async fn reconnect(
        &self,
        connection_id: ConnectionId,
        fields: JsonObject,
    ) -> Result<(), AuthError> {
        self.connections
            .merge_credentials(connection_id, fields)
            .await
            .map_err(|e| AuthError::CredentialPersist(e.to_string()))?;
        self.connect(connection_id).await
    }

    /// Ask the app whether the stored credentials still work and persist the
    /// answer. Apps without authentication are always verified.
    pub async fn check_still_verified(&self, connection_id: ConnectionId) -> Result<bool, AuthError> {
        let app = self.app_for(connection_id).await?;
        let Some(auth) = app.auth.clone() else {
            return Ok(true);
        };
        let ctx = self.context_for(&app, Some(connection_id)).await?;

        let verified = auth
            .is_still_verified(&ctx)
            .await
            .map_err(|e| AuthError::Transport(e.message))?;

        self.set_verified(connection_id, verified).await?;
        if !verified {
            tracing::warn!(connection_id = %connection_id, app = app.key(), "connection is no longer verified");
        }
        Ok(verified)
    }

    async fn set_verified(&self, connection_id: ConnectionId, verified: bool) -> Result<(), AuthError> {
        self.connections
            .set_verified(connection_id, verified)
            .await
            .map_err(|e| AuthError::CredentialPersist(e.to_string()))
    }
}

fn store_error(err: StoreError) -> AuthError {
    match err {
        StoreError::NotFound(what) => AuthError::Authentication(format!("{} not found", what)),
        other => AuthError::Transport(other.to_string()),
    }
}
