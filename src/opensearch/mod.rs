pub mod index_patterns;

use crate::{
    config::OpensearchConfig,
    constants::{MAX_SEARCH_SIZE, SERVICE_OPENSEARCH},
    error::SyncError,
    models::{IndexPatterns, IndexTemplate, IndexTemplateDefinition, Role, RoleMapping, Tenant},
    sync::OpensearchService,
};
use async_trait::async_trait;
use index_patterns::{HitCollector, IndexPatternHit, SearchRequest, SearchResponse};
use reqwest::{Certificate, Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{collections::BTreeMap, time::Duration};
use tracing::{debug, instrument, warn};

const SECURITY_API: &str = "/_plugins/_security/api";
const INDEX_TEMPLATE_API: &str = "/_index_template";
const SAVED_OBJECTS_SEARCH: &str = "/.kibana*/_search";

#[derive(Debug, Deserialize)]
struct IndexTemplatesResponse {
    #[serde(default)]
    index_templates: Vec<IndexTemplate>,
}

/// Opensearch security plugin, index template and search API client.
#[derive(Debug, Clone)]
pub struct OpensearchClient {
    base_url: String,
    username: String,
    password: String,
    search_size: usize,
    client: Client,
}

/// Builds an HTTP client trusting the optional CA in addition to the
/// platform roots.
pub(crate) fn http_client(
    timeout: Duration,
    ca_certificate: Option<&str>,
) -> Result<Client, SyncError> {
    let mut builder = Client::builder()
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(30));
    if let Some(pem) = ca_certificate {
        let cert = Certificate::from_pem(pem.as_bytes())
            .map_err(|err| SyncError::config(format!("invalid CA certificate: {err}")))?;
        builder = builder.add_root_certificate(cert);
    }
    builder
        .build()
        .map_err(|err| SyncError::config(format!("couldn't build HTTP client: {err}")))
}

/// Maps non-2xx responses to [`SyncError::Status`] with the response body.
pub(crate) async fn check_status(
    service: &'static str,
    response: Response,
) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(service, status = status.as_u16(), "request failed");
    Err(SyncError::status(service, status, body))
}

impl OpensearchClient {
    pub fn new(cfg: &OpensearchConfig) -> Result<Self, SyncError> {
        let base_url = cfg.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SyncError::config("OPENSEARCH_BASE_URL is required"));
        }
        let client = http_client(cfg.timeout, cfg.ca_certificate.as_deref())?;
        debug!(base_url, "initialized opensearch client");
        Ok(Self {
            base_url,
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            search_size: cfg.search_size.clamp(1, MAX_SEARCH_SIZE),
            client,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SyncError> {
        let response = request
            .send()
            .await
            .map_err(|err| SyncError::transport(SERVICE_OPENSEARCH, err))?;
        check_status(SERVICE_OPENSEARCH, response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        response
            .json()
            .await
            .map_err(|err| SyncError::decode(SERVICE_OPENSEARCH, err))
    }

    #[instrument(skip(self, body))]
    async fn put_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), SyncError> {
        self.send(self.request(Method::PUT, path).json(body))
            .await
            .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> Result<(), SyncError> {
        self.send(self.request(Method::DELETE, path))
            .await
            .map(|_| ())
    }

    fn security_path(resource: &str, name: Option<&str>) -> String {
        match name {
            Some(name) => format!("{SECURITY_API}/{resource}/{}", urlencoding::encode(name)),
            None => format!("{SECURITY_API}/{resource}/"),
        }
    }

    fn template_path(name: &str) -> String {
        format!("{INDEX_TEMPLATE_API}/{}", urlencoding::encode(name))
    }

    pub async fn tenants(&self) -> Result<BTreeMap<String, Tenant>, SyncError> {
        self.get_json(&Self::security_path("tenants", None)).await
    }

    pub async fn roles(&self) -> Result<BTreeMap<String, Role>, SyncError> {
        self.get_json(&Self::security_path("roles", None)).await
    }

    pub async fn roles_mapping(&self) -> Result<BTreeMap<String, RoleMapping>, SyncError> {
        self.get_json(&Self::security_path("rolesmapping", None))
            .await
    }

    pub async fn index_templates(&self) -> Result<BTreeMap<String, IndexTemplate>, SyncError> {
        let response: IndexTemplatesResponse = self.get_json(INDEX_TEMPLATE_API).await?;
        Ok(response
            .index_templates
            .into_iter()
            .map(|template| (template.name.clone(), template))
            .collect())
    }

    /// One page of raw index pattern search hits.
    #[instrument(skip(self, search_after))]
    pub async fn search_index_patterns(
        &self,
        size: usize,
        search_after: Option<Vec<Value>>,
    ) -> Result<Vec<IndexPatternHit>, SyncError> {
        let body = SearchRequest::index_patterns(size.clamp(1, MAX_SEARCH_SIZE), search_after);
        let response = self
            .send(self.request(Method::GET, SAVED_OBJECTS_SEARCH).json(&body))
            .await?;
        let response: SearchResponse = response
            .json()
            .await
            .map_err(|err| SyncError::decode(SERVICE_OPENSEARCH, err))?;
        Ok(response.hits.hits)
    }

    /// All index patterns of the latest saved object index of every tenant.
    #[instrument(skip(self), fields(size = self.search_size))]
    pub async fn index_patterns(&self) -> Result<IndexPatterns, SyncError> {
        let mut collector = HitCollector::default();
        let mut cursor: Option<Vec<Value>> = None;
        let mut pages = 0usize;
        loop {
            let page = self
                .search_index_patterns(self.search_size, cursor.clone())
                .await?;
            pages += 1;
            match collector.push_page(page, self.search_size, cursor.as_deref())? {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        let patterns = collector.finish()?;
        debug!(pages, tenants = patterns.len(), "fetched index patterns");
        Ok(patterns)
    }
}

#[async_trait]
impl OpensearchService for OpensearchClient {
    async fn tenants(&self) -> Result<BTreeMap<String, Tenant>, SyncError> {
        OpensearchClient::tenants(self).await
    }

    async fn create_tenant(&self, name: &str, tenant: &Tenant) -> Result<(), SyncError> {
        self.put_json(&Self::security_path("tenants", Some(name)), &tenant.details)
            .await
    }

    async fn delete_tenant(&self, name: &str) -> Result<(), SyncError> {
        self.delete(&Self::security_path("tenants", Some(name)))
            .await
    }

    async fn roles(&self) -> Result<BTreeMap<String, Role>, SyncError> {
        OpensearchClient::roles(self).await
    }

    async fn create_role(&self, name: &str, role: &Role) -> Result<(), SyncError> {
        self.put_json(&Self::security_path("roles", Some(name)), &role.permissions)
            .await
    }

    async fn delete_role(&self, name: &str) -> Result<(), SyncError> {
        self.delete(&Self::security_path("roles", Some(name))).await
    }

    async fn roles_mapping(&self) -> Result<BTreeMap<String, RoleMapping>, SyncError> {
        OpensearchClient::roles_mapping(self).await
    }

    async fn create_role_mapping(
        &self,
        name: &str,
        mapping: &RoleMapping,
    ) -> Result<(), SyncError> {
        self.put_json(
            &Self::security_path("rolesmapping", Some(name)),
            &mapping.permissions,
        )
        .await
    }

    async fn delete_role_mapping(&self, name: &str) -> Result<(), SyncError> {
        self.delete(&Self::security_path("rolesmapping", Some(name)))
            .await
    }

    async fn index_templates(&self) -> Result<BTreeMap<String, IndexTemplate>, SyncError> {
        OpensearchClient::index_templates(self).await
    }

    async fn create_index_template(
        &self,
        name: &str,
        template: &IndexTemplate,
    ) -> Result<(), SyncError> {
        let definition: &IndexTemplateDefinition = &template.index_template;
        self.put_json(&Self::template_path(name), definition).await
    }

    async fn delete_index_template(&self, name: &str) -> Result<(), SyncError> {
        self.delete(&Self::template_path(name)).await
    }

    async fn index_patterns(&self) -> Result<IndexPatterns, SyncError> {
        OpensearchClient::index_patterns(self).await
    }
}
