use super::{ObjectKind, ReconcileReport, SyncInputs, Syncer, groups::GeneratorConfig};
use crate::{
    constants::{ADMIN_TENANT, GLOBAL_INDEX_PATTERNS, GLOBAL_TENANT, LOG_KINDS, SYSTEM_TENANTS},
    error::SyncError,
    hashcode::hash_prefix,
    models::{Group, IndexPatterns},
    sync::groups::ProjectResolver,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Tenant name -> required index pattern titles, in creation order.
pub type RequiredIndexPatterns = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPatternDiff {
    /// Tenant -> titles to create.
    pub to_create: BTreeMap<String, Vec<String>>,
    /// Tenant -> title -> saved object ids to delete.
    pub to_delete: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl IndexPatternDiff {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Name of the index holding a tenant's saved objects, without the migration
/// suffix.
pub fn tenant_index(tenant: &str) -> String {
    if tenant == GLOBAL_TENANT {
        GLOBAL_TENANT.to_string()
    } else {
        hash_prefix(tenant)
    }
}

fn project_patterns(project: &str, legacy_delimiter: bool) -> impl Iterator<Item = String> + '_ {
    LOG_KINDS.iter().map(move |kind| {
        if legacy_delimiter {
            format!("{kind}-logs-{project}-*")
        } else {
            format!("{kind}-logs-{project}-_-*")
        }
    })
}

fn push_unique(patterns: &mut Vec<String>, pattern: String) {
    if !patterns.contains(&pattern) {
        patterns.push(pattern);
    }
}

fn group_patterns(
    group: &Group,
    resolver: &ProjectResolver<'_>,
    config: &GeneratorConfig,
) -> Result<Vec<String>, SyncError> {
    let mut patterns = Vec::new();
    for (_, project) in resolver.projects(group)? {
        for pattern in project_patterns(project, config.legacy_index_pattern_delimiter) {
            push_unique(&mut patterns, pattern);
        }
    }
    for pattern in GLOBAL_INDEX_PATTERNS {
        push_unique(&mut patterns, pattern.to_string());
    }
    Ok(patterns)
}

/// Index patterns per tenant: every regular group's tenant gets its projects'
/// patterns plus the global set, and the system tenants get the global set.
pub fn generate_index_patterns(
    groups: &[Group],
    resolver: &ProjectResolver<'_>,
    config: &GeneratorConfig,
) -> RequiredIndexPatterns {
    let mut required = RequiredIndexPatterns::new();
    for group in groups.iter().filter(|group| config.has_tenant(group)) {
        match group_patterns(group, resolver, config) {
            Ok(patterns) => {
                required.insert(group.name.clone(), patterns);
            }
            Err(err) => {
                warn!(group = group.name, error = %err, "couldn't generate index patterns for group");
            }
        }
    }
    for tenant in SYSTEM_TENANTS {
        required.insert(
            tenant.to_string(),
            GLOBAL_INDEX_PATTERNS.iter().map(|p| p.to_string()).collect(),
        );
    }
    required
}

/// Diffs required titles per tenant against existing titles per backing
/// index. Index patterns in the admin tenant are left alone, and duplicated
/// titles keep their first id.
pub fn calculate_index_pattern_diff(
    existing: &IndexPatterns,
    required: &RequiredIndexPatterns,
) -> IndexPatternDiff {
    let mut diff = IndexPatternDiff::default();
    let mut index_tenants = BTreeMap::new();
    for (tenant, patterns) in required {
        let index = tenant_index(tenant);
        let existing_patterns = existing.get(&index);
        let missing = patterns
            .iter()
            .filter(|pattern| existing_patterns.is_none_or(|titles| !titles.contains_key(*pattern)))
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            diff.to_create.insert(tenant.clone(), missing);
        }
        index_tenants.insert(index, tenant.as_str());
    }

    let admin_index = hash_prefix(ADMIN_TENANT);
    for (index, patterns) in existing {
        if *index == admin_index {
            continue;
        }
        let Some(tenant) = index_tenants.get(index) else {
            debug!(index, "no required tenant for index, skipping");
            continue;
        };
        let required_patterns = required.get(*tenant).map(Vec::as_slice).unwrap_or_default();
        for (pattern, ids) in patterns {
            let stale = if !required_patterns.contains(pattern) {
                ids.clone()
            } else if ids.len() > 1 {
                ids[1..].to_vec()
            } else {
                continue;
            };
            diff.to_delete
                .entry(tenant.to_string())
                .or_default()
                .insert(pattern.clone(), stale);
        }
    }
    diff
}

impl Syncer {
    pub(super) async fn sync_index_patterns(
        &self,
        inputs: &SyncInputs,
    ) -> Result<ReconcileReport, SyncError> {
        let existing = self.guard(self.opensearch.index_patterns()).await?;
        let required =
            generate_index_patterns(&inputs.groups, &inputs.resolver(), &self.options.generator);
        let diff = calculate_index_pattern_diff(&existing, &required);
        let kind = ObjectKind::IndexPatterns;
        let mut report = ReconcileReport::new(self.options.dry_run);

        for (tenant, patterns) in &diff.to_delete {
            for (pattern, ids) in patterns {
                for id in ids {
                    let name = format!("{tenant}/{id}");
                    if self.options.dry_run {
                        info!(%kind, tenant, pattern, pattern_id = id, "dry run mode: not deleting");
                        report.deleted.push(name);
                        continue;
                    }
                    match self
                        .guard(self.dashboards.delete_index_pattern(tenant, id))
                        .await
                    {
                        Ok(()) => {
                            info!(%kind, tenant, pattern, pattern_id = id, "deleted");
                            report.deleted.push(name);
                        }
                        Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                        Err(err) => {
                            warn!(%kind, tenant, pattern, pattern_id = id, error = %err, "couldn't delete");
                            report.failed.push(name);
                        }
                    }
                }
            }
        }

        for (tenant, patterns) in &diff.to_create {
            for pattern in patterns {
                let name = format!("{tenant}/{pattern}");
                if self.options.dry_run {
                    info!(%kind, tenant, pattern, "dry run mode: not creating");
                    report.created.push(name);
                    continue;
                }
                match self
                    .guard(self.dashboards.create_index_pattern(tenant, pattern))
                    .await
                {
                    Ok(()) => {
                        info!(%kind, tenant, pattern, "created");
                        report.created.push(name);
                    }
                    Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                    Err(err) => {
                        warn!(%kind, tenant, pattern, error = %err, "couldn't create");
                        report.failed.push(name);
                    }
                }
            }
        }
        Ok(report)
    }
}
