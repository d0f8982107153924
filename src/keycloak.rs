use crate::{
    config::KeycloakConfig, constants::SERVICE_KEYCLOAK, error::SyncError, models::Group,
    sync::IdentityService,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }
}

/// Keycloak admin API client authenticating with the client credentials
/// grant.
#[derive(Debug)]
pub struct KeycloakClient {
    base_url: String,
    realm: String,
    client_id: String,
    client_secret: String,
    client: Client,
    token: RwLock<Option<CachedToken>>,
}

impl KeycloakClient {
    pub fn new(cfg: &KeycloakConfig) -> Result<Self, SyncError> {
        let base_url = cfg.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SyncError::config("KEYCLOAK_BASE_URL is required"));
        }
        if cfg.client_secret.is_empty() {
            return Err(SyncError::config("KEYCLOAK_CLIENT_SECRET is required"));
        }

        let client = Client::builder()
            .connect_timeout(cfg.timeout.min(Duration::from_secs(10)))
            .timeout(cfg.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|err| SyncError::config(format!("couldn't build keycloak client: {err}")))?;

        debug!(base_url, realm = cfg.realm, client_id = cfg.client_id, "initialized keycloak client");
        Ok(Self {
            base_url,
            realm: cfg.realm.clone(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            client,
            token: RwLock::new(None),
        })
    }

    fn token_url(&self) -> String {
        format!(
            "{}/auth/realms/{}/protocol/openid-connect/token",
            self.base_url,
            urlencoding::encode(&self.realm)
        )
    }

    fn groups_url(&self) -> String {
        format!(
            "{}/auth/admin/realms/{}/groups?briefRepresentation=false",
            self.base_url,
            urlencoding::encode(&self.realm)
        )
    }

    async fn access_token(&self) -> Result<String, SyncError> {
        {
            let cache = self.token.read().await;
            if let Some(cached) = cache.as_ref()
                && !cached.is_expired()
            {
                return Ok(cached.access_token.clone());
            }
        }

        debug!(client_id = self.client_id, "requesting keycloak access token");
        let response = self
            .client
            .post(self.token_url())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|err| SyncError::transport(SERVICE_KEYCLOAK, err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::status(SERVICE_KEYCLOAK, status, body));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| SyncError::decode(SERVICE_KEYCLOAK, err))?;

        let expires_at = token
            .expires_in
            .map(|secs| Instant::now() + Duration::from_secs(secs.saturating_sub(30)));
        let access_token = token.access_token.clone();
        *self.token.write().await = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });
        Ok(access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    #[instrument(skip(self), fields(realm = self.realm))]
    pub async fn groups(&self) -> Result<Vec<Group>, SyncError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.groups_url())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| SyncError::transport(SERVICE_KEYCLOAK, err))?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("keycloak rejected access token, discarding it");
            self.invalidate_token().await;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::status(SERVICE_KEYCLOAK, status, body));
        }
        let groups: Vec<Group> = response
            .json()
            .await
            .map_err(|err| SyncError::decode(SERVICE_KEYCLOAK, err))?;
        if groups.is_empty() {
            return Err(SyncError::EmptyGroups);
        }
        let groups = flatten_groups(groups);
        debug!(groups = groups.len(), "fetched keycloak groups");
        Ok(groups)
    }
}

/// Depth-first flattening of nested sub-groups.
pub fn flatten_groups(groups: Vec<Group>) -> Vec<Group> {
    let mut flat = Vec::with_capacity(groups.len());
    let mut stack = groups.into_iter().rev().collect::<Vec<_>>();
    while let Some(mut group) = stack.pop() {
        let children = std::mem::take(&mut group.sub_groups);
        flat.push(group);
        stack.extend(children.into_iter().rev());
    }
    flat
}

#[async_trait]
impl IdentityService for KeycloakClient {
    async fn groups(&self) -> Result<Vec<Group>, SyncError> {
        KeycloakClient::groups(self).await
    }
}
