use crate::sync::{
    ObjectKind, SyncOptions,
    groups::{GeneratorConfig, ProjectIdSource},
    parse_object_kinds,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use config::{Config as SettingsLoader, Environment};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagoonDbConfig {
    /// `host[:port]` of the Lagoon API database.
    pub address: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeycloakConfig {
    pub base_url: String,
    pub realm: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpensearchConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// PEM encoded CA certificate trusted in addition to the system roots.
    pub ca_certificate: Option<String>,
    pub timeout: Duration,
    pub search_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardsConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: String,
    pub lagoon_db: LagoonDbConfig,
    pub keycloak: KeycloakConfig,
    pub opensearch: OpensearchConfig,
    pub dashboards: DashboardsConfig,
    pub sync: SyncOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlConfig {
    log_level: Option<String>,
    lagoon_db: Option<YamlLagoonDb>,
    keycloak: Option<YamlKeycloak>,
    opensearch: Option<YamlOpensearch>,
    dashboards: Option<YamlDashboards>,
    sync: Option<YamlSync>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlLagoonDb {
    address: Option<String>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlKeycloak {
    base_url: Option<String>,
    realm: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    timeout: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlOpensearch {
    base_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    ca_certificate: Option<String>,
    timeout: Option<String>,
    search_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlDashboards {
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlSync {
    dry_run: Option<bool>,
    once: Option<bool>,
    period: Option<String>,
    objects: Option<StringOrVec>,
    legacy_index_pattern_delimiter: Option<bool>,
    project_id_source: Option<String>,
    tenantless_groups: Option<Vec<String>>,
    platform_groups: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrVec {
    String(String),
    Vec(Vec<String>),
}

#[derive(Debug, Default)]
struct RawEnvConfig {
    config: Option<String>,
    config_base64: Option<String>,
    log_level: Option<String>,
    debug: Option<String>,
    db_address: Option<String>,
    db_ro_address: Option<String>,
    db_database: Option<String>,
    db_username: Option<String>,
    db_ro_username: Option<String>,
    db_password: Option<String>,
    db_ro_password: Option<String>,
    keycloak_base_url: Option<String>,
    keycloak_realm: Option<String>,
    keycloak_client_id: Option<String>,
    keycloak_client_secret: Option<String>,
    opensearch_base_url: Option<String>,
    opensearch_username: Option<String>,
    opensearch_password: Option<String>,
    opensearch_ca_certificate: Option<String>,
    opensearch_timeout: Option<String>,
    dashboards_base_url: Option<String>,
    dry_run: Option<String>,
    sync_once: Option<String>,
    sync_period: Option<String>,
    sync_objects: Option<String>,
    legacy_index_pattern_delimiter: Option<String>,
    project_id_source: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let env_cfg = load_process_env()?;
        let mut cfg = Self::defaults();
        cfg.apply_env_config_sources_if_present(&env_cfg)?;
        cfg.apply_env_overrides(&env_cfg)?;
        Ok(cfg)
    }

    pub fn from_env_with_config_file(config_path: PathBuf) -> Result<Self, String> {
        let env_cfg = load_process_env()?;
        let mut cfg = Self::defaults();
        cfg.apply_env_config_sources_if_present(&env_cfg)?;
        cfg.apply_yaml_overrides(Self::from_yaml_file(config_path)?);
        cfg.apply_env_overrides(&env_cfg)?;
        Ok(cfg)
    }

    pub fn defaults() -> Self {
        let timeout = Duration::from_secs(30);
        Self {
            log_level: "info".to_string(),
            lagoon_db: LagoonDbConfig {
                address: String::new(),
                database: "infrastructure".to_string(),
                username: "api".to_string(),
                password: String::new(),
            },
            keycloak: KeycloakConfig {
                base_url: String::new(),
                realm: "lagoon".to_string(),
                client_id: "lagoon-opensearch-sync".to_string(),
                client_secret: String::new(),
                timeout,
            },
            opensearch: OpensearchConfig {
                base_url: String::new(),
                username: "admin".to_string(),
                password: String::new(),
                ca_certificate: None,
                timeout,
                search_size: crate::constants::MAX_SEARCH_SIZE,
            },
            dashboards: DashboardsConfig {
                base_url: String::new(),
            },
            sync: SyncOptions::default(),
        }
    }

    fn apply_env_config_sources_if_present(
        &mut self,
        env_cfg: &RawEnvConfig,
    ) -> Result<(), String> {
        let config_path = non_empty(env_cfg.config.as_deref());
        let config_b64 = non_empty(env_cfg.config_base64.as_deref());

        match (config_path, config_b64) {
            (Some(_), Some(_)) => Err(
                "OPENSEARCH_SYNC_CONFIG and OPENSEARCH_SYNC_CONFIG_BASE64 are both set; use only one"
                    .to_string(),
            ),
            (Some(path), None) => {
                let loaded = Self::from_yaml_file(PathBuf::from(path))
                    .map_err(|err| format!("failed to load OPENSEARCH_SYNC_CONFIG={path}: {err}"))?;
                self.apply_yaml_overrides(loaded);
                Ok(())
            }
            (None, Some(value)) => {
                let compact = value
                    .chars()
                    .filter(|ch| !ch.is_ascii_whitespace())
                    .collect::<String>();
                let decoded = B64.decode(compact).map_err(|err| {
                    format!("failed to decode OPENSEARCH_SYNC_CONFIG_BASE64: {err}")
                })?;
                let yaml = String::from_utf8(decoded).map_err(|err| {
                    format!(
                        "failed to decode OPENSEARCH_SYNC_CONFIG_BASE64: decoded bytes are not UTF-8 ({err})"
                    )
                })?;
                let loaded = Self::from_yaml_str("OPENSEARCH_SYNC_CONFIG_BASE64", &yaml)
                    .map_err(|err| format!("failed to load OPENSEARCH_SYNC_CONFIG_BASE64: {err}"))?;
                self.apply_yaml_overrides(loaded);
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    fn apply_env_overrides(&mut self, env_cfg: &RawEnvConfig) -> Result<(), String> {
        if let Some(value) = non_empty(env_cfg.log_level.as_deref()) {
            self.log_level = value.to_string();
        }
        if parse_env_bool("DEBUG", env_cfg.debug.as_deref())? == Some(true) {
            self.log_level = "debug".to_string();
        }

        // The read-only replica is preferred when both are configured.
        if let Some(value) = non_empty(env_cfg.db_ro_address.as_deref())
            .or_else(|| non_empty(env_cfg.db_address.as_deref()))
        {
            self.lagoon_db.address = value.to_string();
        }
        if let Some(value) = non_empty(env_cfg.db_database.as_deref()) {
            self.lagoon_db.database = value.to_string();
        }
        if let Some(value) = non_empty(env_cfg.db_ro_username.as_deref())
            .or_else(|| non_empty(env_cfg.db_username.as_deref()))
        {
            self.lagoon_db.username = value.to_string();
        }
        if let Some(value) = non_empty(env_cfg.db_ro_password.as_deref())
            .or_else(|| non_empty(env_cfg.db_password.as_deref()))
        {
            self.lagoon_db.password = value.to_string();
        }

        if let Some(value) = non_empty(env_cfg.keycloak_base_url.as_deref()) {
            self.keycloak.base_url = normalize_base_url(value);
        }
        if let Some(value) = non_empty(env_cfg.keycloak_realm.as_deref()) {
            self.keycloak.realm = value.to_string();
        }
        if let Some(value) = non_empty(env_cfg.keycloak_client_id.as_deref()) {
            self.keycloak.client_id = value.to_string();
        }
        if let Some(value) = env_cfg.keycloak_client_secret.as_deref() {
            self.keycloak.client_secret = value.to_string();
        }

        if let Some(value) = non_empty(env_cfg.opensearch_base_url.as_deref()) {
            self.opensearch.base_url = normalize_base_url(value);
        }
        if let Some(value) = non_empty(env_cfg.opensearch_username.as_deref()) {
            self.opensearch.username = value.to_string();
        }
        if let Some(value) = env_cfg.opensearch_password.as_deref() {
            self.opensearch.password = value.to_string();
        }
        if let Some(value) = env_cfg.opensearch_ca_certificate.as_deref() {
            self.opensearch.ca_certificate = non_empty(Some(value)).map(str::to_string);
        }
        if let Some(value) = non_empty(env_cfg.opensearch_timeout.as_deref()) {
            let timeout = parse_duration(value)
                .map_err(|err| format!("invalid OPENSEARCH_CLIENT_TIMEOUT: {err}"))?;
            self.opensearch.timeout = timeout;
            self.keycloak.timeout = timeout;
        }
        if let Some(value) = non_empty(env_cfg.dashboards_base_url.as_deref()) {
            self.dashboards.base_url = normalize_base_url(value);
        }

        if let Some(parsed) = parse_env_bool("DRY_RUN", env_cfg.dry_run.as_deref())? {
            self.sync.dry_run = parsed;
        }
        if let Some(parsed) = parse_env_bool("SYNC_ONCE", env_cfg.sync_once.as_deref())? {
            self.sync.once = parsed;
        }
        if let Some(value) = non_empty(env_cfg.sync_period.as_deref()) {
            self.sync.period =
                parse_duration(value).map_err(|err| format!("invalid SYNC_PERIOD: {err}"))?;
        }
        if let Some(value) = non_empty(env_cfg.sync_objects.as_deref()) {
            self.sync.objects =
                parse_object_kinds(value).map_err(|err| format!("invalid SYNC_OBJECTS: {err}"))?;
        }
        if let Some(parsed) = parse_env_bool(
            "LEGACY_INDEX_PATTERN_DELIMITER",
            env_cfg.legacy_index_pattern_delimiter.as_deref(),
        )? {
            self.sync.generator.legacy_index_pattern_delimiter = parsed;
        }
        if let Some(value) = non_empty(env_cfg.project_id_source.as_deref()) {
            self.sync.generator.project_id_source = value
                .parse::<ProjectIdSource>()
                .map_err(|err| format!("invalid PROJECT_ID_SOURCE: {err}"))?;
        }
        Ok(())
    }

    fn apply_yaml_overrides(&mut self, loaded: Self) {
        self.log_level = loaded.log_level;
        self.lagoon_db = loaded.lagoon_db;
        self.keycloak = loaded.keycloak;
        self.opensearch = loaded.opensearch;
        self.dashboards = loaded.dashboards;
        self.sync = loaded.sync;
    }

    pub fn from_yaml_file(path: PathBuf) -> Result<Self, String> {
        let parsed = load_yaml_config(&path)?;
        Self::from_yaml_config(parsed)
    }

    fn from_yaml_str(source: &str, text: &str) -> Result<Self, String> {
        let parsed = load_yaml_config_from_str(source, text)?;
        Self::from_yaml_config(parsed)
    }

    fn from_yaml_config(parsed: YamlConfig) -> Result<Self, String> {
        let mut cfg = Self::defaults();
        if let Some(value) = parsed.log_level {
            cfg.log_level = value;
        }

        if let Some(db) = parsed.lagoon_db {
            set_if_some(&mut cfg.lagoon_db.address, db.address);
            set_if_some(&mut cfg.lagoon_db.database, db.database);
            set_if_some(&mut cfg.lagoon_db.username, db.username);
            set_if_some(&mut cfg.lagoon_db.password, db.password);
        }

        if let Some(keycloak) = parsed.keycloak {
            set_if_some(
                &mut cfg.keycloak.base_url,
                keycloak.base_url.as_deref().map(normalize_base_url),
            );
            set_if_some(&mut cfg.keycloak.realm, keycloak.realm);
            set_if_some(&mut cfg.keycloak.client_id, keycloak.client_id);
            set_if_some(&mut cfg.keycloak.client_secret, keycloak.client_secret);
            if let Some(raw) = keycloak.timeout.as_deref() {
                cfg.keycloak.timeout =
                    parse_duration(raw).map_err(|err| format!("keycloak.timeout: {err}"))?;
            }
        }

        if let Some(opensearch) = parsed.opensearch {
            set_if_some(
                &mut cfg.opensearch.base_url,
                opensearch.base_url.as_deref().map(normalize_base_url),
            );
            set_if_some(&mut cfg.opensearch.username, opensearch.username);
            set_if_some(&mut cfg.opensearch.password, opensearch.password);
            cfg.opensearch.ca_certificate = opensearch
                .ca_certificate
                .filter(|value| !value.trim().is_empty());
            if let Some(raw) = opensearch.timeout.as_deref() {
                cfg.opensearch.timeout =
                    parse_duration(raw).map_err(|err| format!("opensearch.timeout: {err}"))?;
            }
            if let Some(size) = opensearch.search_size {
                cfg.opensearch.search_size = size;
            }
        }

        if let Some(dashboards) = parsed.dashboards {
            set_if_some(
                &mut cfg.dashboards.base_url,
                dashboards.base_url.as_deref().map(normalize_base_url),
            );
        }

        if let Some(sync) = parsed.sync {
            cfg.sync = parse_sync_options(sync)?;
        }
        Ok(cfg)
    }
}

fn parse_sync_options(sync: YamlSync) -> Result<SyncOptions, String> {
    let mut options = SyncOptions::default();
    if let Some(value) = sync.dry_run {
        options.dry_run = value;
    }
    if let Some(value) = sync.once {
        options.once = value;
    }
    if let Some(raw) = sync.period.as_deref() {
        options.period = parse_duration(raw).map_err(|err| format!("sync.period: {err}"))?;
    }
    if let Some(objects) = sync.objects {
        options.objects = match objects {
            StringOrVec::String(raw) => parse_object_kinds(&raw),
            StringOrVec::Vec(values) => values
                .iter()
                .map(|value| value.parse::<ObjectKind>())
                .collect(),
        }
        .map_err(|err| format!("sync.objects: {err}"))?;
    }
    let generator: &mut GeneratorConfig = &mut options.generator;
    if let Some(value) = sync.legacy_index_pattern_delimiter {
        generator.legacy_index_pattern_delimiter = value;
    }
    if let Some(raw) = sync.project_id_source.as_deref() {
        generator.project_id_source = raw
            .parse()
            .map_err(|err| format!("sync.project_id_source: {err}"))?;
    }
    set_if_some(&mut generator.tenantless_groups, sync.tenantless_groups);
    set_if_some(&mut generator.platform_groups, sync.platform_groups);
    Ok(options)
}

/// Parses durations like `8m`, `1h30m`, `250ms` or bare seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let value = raw.trim();
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        return value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|err| format!("invalid duration {raw:?}: {err}"));
    }
    humantime::parse_duration(value).map_err(|err| format!("invalid duration {raw:?}: {err}"))
}

fn load_yaml_config(path: &Path) -> Result<YamlConfig, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
    let source = path.display().to_string();
    load_yaml_config_from_str(&source, &text)
}

fn load_yaml_config_from_str(source: &str, text: &str) -> Result<YamlConfig, String> {
    if text.trim().is_empty() {
        return Ok(YamlConfig::default());
    }
    serde_yaml::from_str::<YamlConfig>(text).map_err(|err| format!("failed to parse {source}: {err}"))
}

fn load_process_env() -> Result<RawEnvConfig, String> {
    let settings = SettingsLoader::builder()
        .add_source(Environment::default().try_parsing(false))
        .build()
        .map_err(|err| format!("failed to load process environment: {err}"))?;

    Ok(RawEnvConfig {
        config: env_value_for_var(&settings, "OPENSEARCH_SYNC_CONFIG"),
        config_base64: env_value_for_var(&settings, "OPENSEARCH_SYNC_CONFIG_BASE64"),
        log_level: env_value_for_var(&settings, "LOG_LEVEL"),
        debug: env_value_for_var(&settings, "DEBUG"),
        db_address: env_value_for_var(&settings, "API_DB_ADDRESS"),
        db_ro_address: env_value_for_var(&settings, "API_DB_RO_ADDRESS"),
        db_database: env_value_for_var(&settings, "API_DB_DATABASE"),
        db_username: env_value_for_var(&settings, "API_DB_USERNAME"),
        db_ro_username: env_value_for_var(&settings, "API_DB_RO_USERNAME"),
        db_password: env_value_for_var(&settings, "API_DB_PASSWORD"),
        db_ro_password: env_value_for_var(&settings, "API_DB_RO_PASSWORD"),
        keycloak_base_url: env_value_for_var(&settings, "KEYCLOAK_BASE_URL"),
        keycloak_realm: env_value_for_var(&settings, "KEYCLOAK_REALM"),
        keycloak_client_id: env_value_for_var(&settings, "KEYCLOAK_CLIENT_ID"),
        keycloak_client_secret: env_value_for_var(&settings, "KEYCLOAK_CLIENT_SECRET"),
        opensearch_base_url: env_value_for_var(&settings, "OPENSEARCH_BASE_URL"),
        opensearch_username: env_value_for_var(&settings, "OPENSEARCH_ADMIN_USERNAME"),
        opensearch_password: env_value_for_var(&settings, "OPENSEARCH_ADMIN_PASSWORD"),
        opensearch_ca_certificate: env_value_for_var(&settings, "OPENSEARCH_CA_CERTIFICATE"),
        opensearch_timeout: env_value_for_var(&settings, "OPENSEARCH_CLIENT_TIMEOUT"),
        dashboards_base_url: env_value_for_var(&settings, "OPENSEARCH_DASHBOARDS_BASE_URL"),
        dry_run: env_value_for_var(&settings, "DRY_RUN"),
        sync_once: env_value_for_var(&settings, "SYNC_ONCE"),
        sync_period: env_value_for_var(&settings, "SYNC_PERIOD"),
        sync_objects: env_value_for_var(&settings, "SYNC_OBJECTS"),
        legacy_index_pattern_delimiter: env_value_for_var(
            &settings,
            "LEGACY_INDEX_PATTERN_DELIMITER",
        ),
        project_id_source: env_value_for_var(&settings, "PROJECT_ID_SOURCE"),
    })
}

fn env_value(settings: &SettingsLoader, key: &str) -> Option<String> {
    settings
        .get_string(key)
        .ok()
        .or_else(|| settings.get_string(&key.to_ascii_uppercase()).ok())
}

fn env_value_for_var(settings: &SettingsLoader, env_var: &str) -> Option<String> {
    env_value(settings, &env_var.to_ascii_lowercase())
}

/// Accepts the boolean spellings operators already use in deployment
/// manifests. Unset or empty means "not configured".
fn parse_env_bool(key: &str, raw: Option<&str>) -> Result<Option<bool>, String> {
    match non_empty(raw) {
        None => Ok(None),
        Some("1" | "t" | "T" | "TRUE" | "true" | "True") => Ok(Some(true)),
        Some("0" | "f" | "F" | "FALSE" | "false" | "False") => Ok(Some(false)),
        Some(other) => Err(format!("invalid {key}: expected a boolean, got {other:?}")),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn set_if_some<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}
