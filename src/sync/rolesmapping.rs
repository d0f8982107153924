use super::{
    ReconcileReport, SyncInputs, Syncer,
    diff::{ReplaceMode, SemanticEq, list_eq},
    roles::generate_roles,
};
use crate::{
    error::SyncError,
    models::{Role, RoleMapping, RoleMappingPermissions},
};
use std::collections::BTreeMap;

impl SemanticEq for RoleMapping {
    fn semantic_eq(&self, other: &Self) -> bool {
        list_eq(
            &self.permissions.backend_roles,
            &other.permissions.backend_roles,
        ) && self.hidden == other.hidden
            && self.reserved == other.reserved
    }
}

/// One mapping per role, binding the backend role of the same name.
pub fn generate_roles_mapping(roles: &BTreeMap<String, Role>) -> BTreeMap<String, RoleMapping> {
    roles
        .keys()
        .map(|name| {
            (
                name.clone(),
                RoleMapping {
                    permissions: RoleMappingPermissions {
                        backend_roles: vec![name.clone()],
                        ..RoleMappingPermissions::default()
                    },
                    ..RoleMapping::default()
                },
            )
        })
        .collect()
}

/// Drops hidden or reserved mappings, and mappings of built-in roles since
/// some of those report `reserved: false`.
pub fn filter_roles_mapping(
    mappings: BTreeMap<String, RoleMapping>,
    roles: &BTreeMap<String, Role>,
) -> BTreeMap<String, RoleMapping> {
    mappings
        .into_iter()
        .filter(|(name, mapping)| {
            !mapping.hidden
                && !mapping.reserved
                && roles
                    .get(name)
                    .is_none_or(|role| !role.reserved && !role.is_static)
        })
        .collect()
}

impl Syncer {
    pub(super) async fn sync_roles_mapping(
        &self,
        inputs: &SyncInputs,
    ) -> Result<ReconcileReport, SyncError> {
        let existing = filter_roles_mapping(
            self.guard(self.opensearch.roles_mapping()).await?,
            &inputs.roles,
        );
        let roles = generate_roles(&inputs.groups, &inputs.resolver(), &self.options.generator);
        let required = generate_roles_mapping(&roles);
        self.reconcile(&existing, &required, ReplaceMode::CreateOrReplace)
            .await
    }
}
