use crate::{
    constants::{
        DEFAULT_PLATFORM_GROUP, DEFAULT_TENANTLESS_GROUP, GROUP_TYPE_ATTRIBUTE,
        LAGOON_PROJECTS_ATTRIBUTE, PROJECT_GROUP_TYPE, SYSTEM_TENANTS,
    },
    error::SyncError,
    models::{Group, GroupProjects, Project},
};
use std::{collections::BTreeMap, str::FromStr};
use tracing::{debug, warn};

/// Where a group's associated project ids come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProjectIdSource {
    /// The `kc_group_projects` table in the Lagoon database.
    #[default]
    JoinTable,
    /// The deprecated comma separated `lagoon-projects` group attribute.
    GroupAttribute,
}

impl FromStr for ProjectIdSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "table" | "jointable" | "join-table" => Ok(Self::JoinTable),
            "attribute" | "groupattribute" | "group-attribute" => Ok(Self::GroupAttribute),
            other => Err(format!("unknown project id source: {other}")),
        }
    }
}

/// Parameters for required state generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub legacy_index_pattern_delimiter: bool,
    pub project_id_source: ProjectIdSource,
    /// Groups that get roles but no tenant and no index patterns. Their users
    /// work in the global tenant.
    pub tenantless_groups: Vec<String>,
    /// Platform administration groups. Their roles carry no index
    /// permissions.
    pub platform_groups: Vec<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            legacy_index_pattern_delimiter: false,
            project_id_source: ProjectIdSource::default(),
            tenantless_groups: vec![DEFAULT_TENANTLESS_GROUP.to_string()],
            platform_groups: vec![DEFAULT_PLATFORM_GROUP.to_string()],
        }
    }
}

impl GeneratorConfig {
    pub fn is_tenantless(&self, group: &Group) -> bool {
        self.tenantless_groups.iter().any(|name| *name == group.name)
    }

    pub fn is_platform_group(&self, group: &Group) -> bool {
        self.platform_groups.iter().any(|name| *name == group.name)
    }

    /// Whether a group gets its own tenant and index patterns.
    pub fn has_tenant(&self, group: &Group) -> bool {
        !is_project_group(group)
            && !self.is_tenantless(group)
            && !SYSTEM_TENANTS.contains(&group.name.as_str())
    }
}

/// Lowercases a project name and replaces every character outside
/// `[0-9a-z-]` with `-`, the way Lagoon names project log indices.
pub fn munge_project_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' {
                ch
            } else {
                '-'
            }
        })
        .collect()
}

pub fn project_names(projects: &[Project]) -> BTreeMap<i64, String> {
    projects
        .iter()
        .map(|project| (project.id, munge_project_name(&project.name)))
        .collect()
}

pub fn is_project_group(group: &Group) -> bool {
    let Some(values) = group.attributes.get(GROUP_TYPE_ATTRIBUTE) else {
        return false;
    };
    match values.as_slice() {
        [value] if value == PROJECT_GROUP_TYPE => true,
        [value] => {
            debug!(group = group.name, group_type = value, "unknown group type");
            false
        }
        _ => {
            debug!(
                group = group.name,
                values = values.len(),
                "invalid group type attribute"
            );
            false
        }
    }
}

/// Resolves project ids for groups from the configured source.
#[derive(Debug, Clone, Copy)]
pub struct ProjectResolver<'a> {
    source: ProjectIdSource,
    group_projects: &'a GroupProjects,
    project_names: &'a BTreeMap<i64, String>,
}

impl<'a> ProjectResolver<'a> {
    pub fn new(
        source: ProjectIdSource,
        group_projects: &'a GroupProjects,
        project_names: &'a BTreeMap<i64, String>,
    ) -> Self {
        Self {
            source,
            group_projects,
            project_names,
        }
    }

    pub fn project_ids(&self, group: &Group) -> Result<Vec<i64>, SyncError> {
        match self.source {
            ProjectIdSource::JoinTable => Ok(self
                .group_projects
                .get(&group.id)
                .cloned()
                .unwrap_or_default()),
            ProjectIdSource::GroupAttribute => parse_lagoon_projects(group),
        }
    }

    /// Returns `(id, munged name)` for each associated project with a known
    /// name. Unknown ids are logged and dropped.
    pub fn projects(&self, group: &Group) -> Result<Vec<(i64, &'a str)>, SyncError> {
        let ids = self.project_ids(group)?;
        Ok(ids
            .into_iter()
            .filter_map(|id| match self.project_names.get(&id) {
                Some(name) => Some((id, name.as_str())),
                None => {
                    warn!(group = group.name, project_id = id, "unknown project id");
                    None
                }
            })
            .collect())
    }
}

fn parse_lagoon_projects(group: &Group) -> Result<Vec<i64>, SyncError> {
    let values = group
        .attributes
        .get(LAGOON_PROJECTS_ATTRIBUTE)
        .ok_or_else(|| SyncError::group_attribute(&group.name, "missing lagoon-projects"))?;
    let [value] = values.as_slice() else {
        return Err(SyncError::group_attribute(
            &group.name,
            format!("lagoon-projects has {} values, expected 1", values.len()),
        ));
    };
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(',')
        .map(|raw| {
            raw.trim().parse::<i64>().map_err(|err| {
                SyncError::group_attribute(
                    &group.name,
                    format!("invalid project id {raw:?} in lagoon-projects: {err}"),
                )
            })
        })
        .collect()
}
