pub const GLOBAL_TENANT: &str = "global_tenant";
pub const ADMIN_TENANT: &str = "admin_tenant";
pub const SYSTEM_TENANTS: [&str; 2] = [GLOBAL_TENANT, ADMIN_TENANT];

pub const PROJECT_GROUP_TYPE: &str = "project-default-group";
pub const GROUP_TYPE_ATTRIBUTE: &str = "type";
pub const LAGOON_PROJECTS_ATTRIBUTE: &str = "lagoon-projects";
pub const DEFAULT_TENANTLESS_GROUP: &str = "global";
pub const DEFAULT_PLATFORM_GROUP: &str = "lagoonadmin";

pub const LOG_KINDS: [&str; 4] = ["application", "container", "lagoon", "router"];
pub const GLOBAL_INDEX_PATTERNS: [&str; 4] = [
    "application-logs-*",
    "container-logs-*",
    "lagoon-logs-*",
    "router-logs-*",
];

pub const REPORT_PERMISSIONS: [&str; 5] = [
    "cluster:admin/opendistro/reports/definition/get",
    "cluster:admin/opendistro/reports/definition/list",
    "cluster:admin/opendistro/reports/instance/get",
    "cluster:admin/opendistro/reports/instance/list",
    "cluster:admin/opendistro/reports/menu/download",
];
pub const INDEX_READ_ACTIONS: [&str; 2] = ["read", "indices:monitor/settings/get"];
pub const TENANT_READ: &str = "kibana_all_read";
pub const TENANT_WRITE: &str = "kibana_all_write";

pub const ROUTER_LOGS_TEMPLATE: &str = "routerlogs";

pub const INDEX_PATTERN_ID_PREFIX: &str = "index-pattern:";
pub const MAX_SEARCH_SIZE: usize = 10_000;
pub const TIME_FIELD_NAME: &str = "@timestamp";

pub const HEADER_OSD_XSRF: &str = "osd-xsrf";
pub const HEADER_SECURITY_TENANT: &str = "securitytenant";

pub const SERVICE_KEYCLOAK: &str = "keycloak";
pub const SERVICE_OPENSEARCH: &str = "opensearch";
pub const SERVICE_DASHBOARDS: &str = "dashboards";
