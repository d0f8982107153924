use super::{
    ReconcileReport, SyncInputs, Syncer,
    diff::{ReplaceMode, SemanticEq, list_eq, list_eq_by},
    groups::{GeneratorConfig, ProjectResolver, is_project_group},
};
use crate::{
    constants::{
        GLOBAL_TENANT, INDEX_READ_ACTIONS, LOG_KINDS, REPORT_PERMISSIONS, TENANT_READ,
        TENANT_WRITE,
    },
    error::SyncError,
    models::{Group, IndexPermission, Role, RolePermissions, TenantPermission},
};
use std::collections::BTreeMap;
use tracing::warn;

fn index_permission_eq(a: &IndexPermission, b: &IndexPermission) -> bool {
    list_eq(&a.allowed_actions, &b.allowed_actions)
        && list_eq(&a.fls, &b.fls)
        && list_eq(&a.index_patterns, &b.index_patterns)
        && list_eq(&a.masked_fields, &b.masked_fields)
}

fn tenant_permission_eq(a: &TenantPermission, b: &TenantPermission) -> bool {
    list_eq(&a.allowed_actions, &b.allowed_actions)
        && list_eq(&a.tenant_patterns, &b.tenant_patterns)
}

impl SemanticEq for Role {
    fn semantic_eq(&self, other: &Self) -> bool {
        let (a, b) = (&self.permissions, &other.permissions);
        list_eq(&a.cluster_permissions, &b.cluster_permissions)
            && list_eq_by(&a.index_permissions, &b.index_permissions, index_permission_eq)
            && list_eq_by(
                &a.tenant_permissions,
                &b.tenant_permissions,
                tenant_permission_eq,
            )
            && self.hidden == other.hidden
    }
}

/// Regex matching every log index of a project.
pub fn project_index_regex(project: &str) -> String {
    format!("/^({})-logs-{project}-_-.+/", LOG_KINDS.join("|"))
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn log_read_permission(index_patterns: Vec<String>) -> IndexPermission {
    IndexPermission {
        allowed_actions: strings(&INDEX_READ_ACTIONS),
        fls: Vec::new(),
        index_patterns,
        masked_fields: Vec::new(),
    }
}

fn role(index_permissions: Vec<IndexPermission>, tenant_permission: TenantPermission) -> Role {
    Role {
        permissions: RolePermissions {
            cluster_permissions: strings(&REPORT_PERMISSIONS),
            description: None,
            index_permissions,
            tenant_permissions: vec![tenant_permission],
        },
        ..Role::default()
    }
}

fn project_group_role(
    group: &Group,
    resolver: &ProjectResolver<'_>,
) -> Result<(String, Role), SyncError> {
    let projects = resolver.projects(group)?;
    let [(id, name)] = projects.as_slice() else {
        return Err(SyncError::group_attribute(
            &group.name,
            format!(
                "project group must resolve to exactly one known project, found {}",
                projects.len()
            ),
        ));
    };
    Ok((
        format!("p{id}"),
        role(
            vec![log_read_permission(vec![project_index_regex(name)])],
            TenantPermission {
                allowed_actions: vec![TENANT_READ.to_string()],
                tenant_patterns: vec![GLOBAL_TENANT.to_string()],
            },
        ),
    ))
}

fn regular_group_role(
    group: &Group,
    resolver: &ProjectResolver<'_>,
    config: &GeneratorConfig,
) -> Result<(String, Role), SyncError> {
    let index_patterns = if config.is_platform_group(group) {
        Vec::new()
    } else {
        resolver
            .projects(group)?
            .into_iter()
            .map(|(_, name)| project_index_regex(name))
            .collect::<Vec<_>>()
    };
    // Opensearch rejects an index permission without patterns, but the list
    // itself must be present.
    let index_permissions = if index_patterns.is_empty() {
        Vec::new()
    } else {
        vec![log_read_permission(index_patterns)]
    };
    Ok((
        group.name.clone(),
        role(
            index_permissions,
            TenantPermission {
                allowed_actions: vec![TENANT_WRITE.to_string()],
                tenant_patterns: vec![group.name.clone()],
            },
        ),
    ))
}

pub fn generate_roles(
    groups: &[Group],
    resolver: &ProjectResolver<'_>,
    config: &GeneratorConfig,
) -> BTreeMap<String, Role> {
    let mut roles = BTreeMap::new();
    for group in groups {
        let generated = if is_project_group(group) {
            project_group_role(group, resolver)
        } else {
            regular_group_role(group, resolver, config)
        };
        match generated {
            Ok((name, role)) => {
                roles.insert(name, role);
            }
            Err(err) => {
                warn!(group = group.name, error = %err, "couldn't generate role for group");
            }
        }
    }
    roles
}

/// Drops roles Opensearch ships with.
pub fn filter_roles(roles: &BTreeMap<String, Role>) -> BTreeMap<String, Role> {
    roles
        .iter()
        .filter(|(_, role)| !role.is_static && !role.reserved)
        .map(|(name, role)| (name.clone(), role.clone()))
        .collect()
}

impl Syncer {
    pub(super) async fn sync_roles(&self, inputs: &SyncInputs) -> Result<ReconcileReport, SyncError> {
        let existing = filter_roles(&inputs.roles);
        let required = generate_roles(&inputs.groups, &inputs.resolver(), &self.options.generator);
        self.reconcile(&existing, &required, ReplaceMode::CreateOrReplace)
            .await
    }
}
