use crate::{
    config::{DashboardsConfig, OpensearchConfig},
    constants::{
        GLOBAL_TENANT, HEADER_OSD_XSRF, HEADER_SECURITY_TENANT, SERVICE_DASHBOARDS,
        TIME_FIELD_NAME,
    },
    error::SyncError,
    opensearch::{check_status, http_client},
    sync::DashboardsService,
};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::json;
use tracing::{debug, instrument};

const INDEX_PATTERN_API: &str = "/api/saved_objects/index-pattern";

/// Opensearch Dashboards saved objects client. Authenticates with the
/// Opensearch credentials and addresses tenants through the
/// `securitytenant` header.
#[derive(Debug, Clone)]
pub struct DashboardsClient {
    base_url: String,
    username: String,
    password: String,
    client: Client,
}

impl DashboardsClient {
    pub fn new(cfg: &DashboardsConfig, opensearch: &OpensearchConfig) -> Result<Self, SyncError> {
        let base_url = cfg.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SyncError::config("OPENSEARCH_DASHBOARDS_BASE_URL is required"));
        }
        let client = http_client(opensearch.timeout, opensearch.ca_certificate.as_deref())?;
        debug!(base_url, "initialized dashboards client");
        Ok(Self {
            base_url,
            username: opensearch.username.clone(),
            password: opensearch.password.clone(),
            client,
        })
    }

    fn request(&self, method: Method, tenant: &str, path: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password))
            .header(HEADER_OSD_XSRF, "true");
        // the global tenant is the default and has no header value
        if tenant == GLOBAL_TENANT {
            request
        } else {
            request.header(HEADER_SECURITY_TENANT, tenant)
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<(), SyncError> {
        let response = request
            .send()
            .await
            .map_err(|err| SyncError::transport(SERVICE_DASHBOARDS, err))?;
        check_status(SERVICE_DASHBOARDS, response).await.map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn create_index_pattern(&self, tenant: &str, title: &str) -> Result<(), SyncError> {
        let path = format!("{INDEX_PATTERN_API}/{}", urlencoding::encode(title));
        let body = json!({
            "attributes": {
                "title": title,
                "timeFieldName": TIME_FIELD_NAME,
            }
        });
        self.send(self.request(Method::POST, tenant, &path).json(&body))
            .await
    }

    #[instrument(skip(self))]
    pub async fn delete_index_pattern(&self, tenant: &str, id: &str) -> Result<(), SyncError> {
        let path = format!("{INDEX_PATTERN_API}/{}", urlencoding::encode(id));
        self.send(self.request(Method::DELETE, tenant, &path)).await
    }
}

#[async_trait]
impl DashboardsService for DashboardsClient {
    async fn create_index_pattern(&self, tenant: &str, title: &str) -> Result<(), SyncError> {
        DashboardsClient::create_index_pattern(self, tenant, title).await
    }

    async fn delete_index_pattern(&self, tenant: &str, id: &str) -> Result<(), SyncError> {
        DashboardsClient::delete_index_pattern(self, tenant, id).await
    }
}
