use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Backing index name -> index pattern title -> saved object ids.
pub type IndexPatterns = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Group id -> ids of the projects the group has access to.
pub type GroupProjects = BTreeMap<String, Vec<i64>>;

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub attributes: BTreeMap<String, Vec<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub sub_groups: Vec<Group>,
}

impl Group {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, key: &str, values: &[&str]) -> Self {
        self.attributes.insert(
            key.to_string(),
            values.iter().map(|value| value.to_string()).collect(),
        );
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDescription {
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    #[serde(flatten)]
    pub details: TenantDescription,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub reserved: bool,
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPermission {
    #[serde(default, deserialize_with = "nullable")]
    pub allowed_actions: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub fls: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub index_patterns: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub masked_fields: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantPermission {
    #[serde(default, deserialize_with = "nullable")]
    pub allowed_actions: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub tenant_patterns: Vec<String>,
}

/// The writable part of a role, sent as-is on create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissions {
    #[serde(default, deserialize_with = "nullable")]
    pub cluster_permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub index_permissions: Vec<IndexPermission>,
    #[serde(default, deserialize_with = "nullable")]
    pub tenant_permissions: Vec<TenantPermission>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    #[serde(flatten)]
    pub permissions: RolePermissions,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub reserved: bool,
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

/// The writable part of a role mapping, sent as-is on create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMappingPermissions {
    #[serde(default, deserialize_with = "nullable")]
    pub and_backend_roles: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub backend_roles: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub hosts: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMapping {
    #[serde(flatten)]
    pub permissions: RoleMappingPermissions,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub reserved: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(
        rename = "type",
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "String::is_empty"
    )]
    pub mapping_type: String,
    #[serde(default, deserialize_with = "nullable")]
    pub ignore_malformed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_mapping_type: Option<String>,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_field: Option<String>,
    #[serde(default)]
    pub mapping: Mapping,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mappings {
    #[serde(default, deserialize_with = "nullable")]
    pub dynamic_templates: Vec<BTreeMap<String, DynamicTemplate>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings: Option<Mappings>,
}

/// The writable part of an index template, sent as-is on create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexTemplateDefinition {
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub composed_of: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub index_patterns: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub template: Template,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexTemplate {
    pub name: String,
    pub index_template: IndexTemplateDefinition,
}
