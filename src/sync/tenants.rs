use super::{
    ReconcileReport, SyncInputs, Syncer,
    diff::{ReplaceMode, SemanticEq},
    groups::GeneratorConfig,
};
use crate::{
    constants::SYSTEM_TENANTS,
    error::SyncError,
    models::{Group, Tenant, TenantDescription},
};
use std::collections::BTreeMap;

impl SemanticEq for Tenant {
    fn semantic_eq(&self, other: &Self) -> bool {
        self.details.description == other.details.description && self.hidden == other.hidden
    }
}

/// One tenant per regular group, described by the group name.
pub fn generate_tenants(groups: &[Group], config: &GeneratorConfig) -> BTreeMap<String, Tenant> {
    groups
        .iter()
        .filter(|group| config.has_tenant(group))
        .map(|group| {
            (
                group.name.clone(),
                Tenant {
                    details: TenantDescription {
                        description: group.name.clone(),
                    },
                    ..Tenant::default()
                },
            )
        })
        .collect()
}

/// Drops built-in tenants and the system tenants.
pub fn filter_tenants(tenants: BTreeMap<String, Tenant>) -> BTreeMap<String, Tenant> {
    tenants
        .into_iter()
        .filter(|(name, tenant)| {
            !tenant.is_static && !tenant.reserved && !SYSTEM_TENANTS.contains(&name.as_str())
        })
        .collect()
}

impl Syncer {
    pub(super) async fn sync_tenants(
        &self,
        inputs: &SyncInputs,
    ) -> Result<ReconcileReport, SyncError> {
        let existing = filter_tenants(self.guard(self.opensearch.tenants()).await?);
        let required = generate_tenants(&inputs.groups, &self.options.generator);
        self.reconcile(&existing, &required, ReplaceMode::CreateOrReplace)
            .await
    }
}
