//! Reconciliation of Opensearch and Dashboards state with Lagoon.
//!
//! Every cycle derives the required objects from Keycloak groups and Lagoon
//! projects, reads back what exists, and applies the difference one object
//! kind at a time. Nothing is carried over between cycles.

pub mod diff;
pub mod groups;
pub mod index_patterns;
pub mod index_templates;
pub mod roles;
pub mod rolesmapping;
pub mod tenants;

use crate::{
    error::SyncError,
    models::{Group, GroupProjects, IndexPatterns, IndexTemplate, Project, Role, RoleMapping, Tenant},
};
use async_trait::async_trait;
use diff::{ReplaceMode, SemanticEq, calculate_diff};
use groups::{GeneratorConfig, ProjectIdSource, ProjectResolver};
use serde::Serialize;
use std::{collections::BTreeMap, fmt, future::Future, str::FromStr, sync::Arc, time::Duration};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// All groups, with sub-groups flattened. An empty result is
    /// [`SyncError::EmptyGroups`].
    async fn groups(&self) -> Result<Vec<Group>, SyncError>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn projects(&self) -> Result<Vec<Project>, SyncError>;
    async fn group_projects(&self) -> Result<GroupProjects, SyncError>;
}

#[async_trait]
pub trait OpensearchService: Send + Sync {
    async fn tenants(&self) -> Result<BTreeMap<String, Tenant>, SyncError>;
    async fn create_tenant(&self, name: &str, tenant: &Tenant) -> Result<(), SyncError>;
    async fn delete_tenant(&self, name: &str) -> Result<(), SyncError>;

    async fn roles(&self) -> Result<BTreeMap<String, Role>, SyncError>;
    async fn create_role(&self, name: &str, role: &Role) -> Result<(), SyncError>;
    async fn delete_role(&self, name: &str) -> Result<(), SyncError>;

    async fn roles_mapping(&self) -> Result<BTreeMap<String, RoleMapping>, SyncError>;
    async fn create_role_mapping(&self, name: &str, mapping: &RoleMapping)
    -> Result<(), SyncError>;
    async fn delete_role_mapping(&self, name: &str) -> Result<(), SyncError>;

    async fn index_templates(&self) -> Result<BTreeMap<String, IndexTemplate>, SyncError>;
    async fn create_index_template(
        &self,
        name: &str,
        template: &IndexTemplate,
    ) -> Result<(), SyncError>;
    async fn delete_index_template(&self, name: &str) -> Result<(), SyncError>;

    async fn index_patterns(&self) -> Result<IndexPatterns, SyncError>;
}

#[async_trait]
pub trait DashboardsService: Send + Sync {
    async fn create_index_pattern(&self, tenant: &str, title: &str) -> Result<(), SyncError>;
    async fn delete_index_pattern(&self, tenant: &str, id: &str) -> Result<(), SyncError>;
}

/// An Opensearch object kind reconciled through create and delete by name.
#[async_trait]
pub trait ManagedObject: SemanticEq + Clone + Send + Sync + 'static {
    const KIND: ObjectKind;

    async fn create(
        opensearch: &dyn OpensearchService,
        name: &str,
        object: &Self,
    ) -> Result<(), SyncError>;

    async fn delete(opensearch: &dyn OpensearchService, name: &str) -> Result<(), SyncError>;
}

#[async_trait]
impl ManagedObject for Tenant {
    const KIND: ObjectKind = ObjectKind::Tenants;

    async fn create(
        opensearch: &dyn OpensearchService,
        name: &str,
        object: &Self,
    ) -> Result<(), SyncError> {
        opensearch.create_tenant(name, object).await
    }

    async fn delete(opensearch: &dyn OpensearchService, name: &str) -> Result<(), SyncError> {
        opensearch.delete_tenant(name).await
    }
}

#[async_trait]
impl ManagedObject for Role {
    const KIND: ObjectKind = ObjectKind::Roles;

    async fn create(
        opensearch: &dyn OpensearchService,
        name: &str,
        object: &Self,
    ) -> Result<(), SyncError> {
        opensearch.create_role(name, object).await
    }

    async fn delete(opensearch: &dyn OpensearchService, name: &str) -> Result<(), SyncError> {
        opensearch.delete_role(name).await
    }
}

#[async_trait]
impl ManagedObject for RoleMapping {
    const KIND: ObjectKind = ObjectKind::RolesMapping;

    async fn create(
        opensearch: &dyn OpensearchService,
        name: &str,
        object: &Self,
    ) -> Result<(), SyncError> {
        opensearch.create_role_mapping(name, object).await
    }

    async fn delete(opensearch: &dyn OpensearchService, name: &str) -> Result<(), SyncError> {
        opensearch.delete_role_mapping(name).await
    }
}

#[async_trait]
impl ManagedObject for IndexTemplate {
    const KIND: ObjectKind = ObjectKind::IndexTemplates;

    async fn create(
        opensearch: &dyn OpensearchService,
        name: &str,
        object: &Self,
    ) -> Result<(), SyncError> {
        opensearch.create_index_template(name, object).await
    }

    async fn delete(opensearch: &dyn OpensearchService, name: &str) -> Result<(), SyncError> {
        opensearch.delete_index_template(name).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Tenants,
    Roles,
    RolesMapping,
    IndexPatterns,
    IndexTemplates,
}

impl ObjectKind {
    /// Every kind, in reconciliation order.
    pub const ALL: [ObjectKind; 5] = [
        Self::Tenants,
        Self::Roles,
        Self::RolesMapping,
        Self::IndexPatterns,
        Self::IndexTemplates,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tenants => "tenants",
            Self::Roles => "roles",
            Self::RolesMapping => "rolesmapping",
            Self::IndexPatterns => "indexpatterns",
            Self::IndexTemplates => "indextemplates",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| format!("unknown object kind: {value}"))
    }
}

/// Parses a comma separated kind list.
pub fn parse_object_kinds(raw: &str) -> Result<Vec<ObjectKind>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::parse)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub once: bool,
    pub period: Duration,
    pub objects: Vec<ObjectKind>,
    pub generator: GeneratorConfig,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            once: false,
            period: Duration::from_secs(8 * 60),
            objects: ObjectKind::ALL.to_vec(),
            generator: GeneratorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub dry_run: bool,
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

impl ReconcileReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum KindOutcome {
    Reconciled(ReconcileReport),
    Failed { error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub kinds: Vec<(ObjectKind, KindOutcome)>,
}

impl CycleReport {
    pub fn outcome(&self, kind: ObjectKind) -> Option<&KindOutcome> {
        self.kinds
            .iter()
            .find(|(candidate, _)| *candidate == kind)
            .map(|(_, outcome)| outcome)
    }

    pub fn failed_kinds(&self) -> usize {
        self.kinds
            .iter()
            .filter(|(_, outcome)| matches!(outcome, KindOutcome::Failed { .. }))
            .count()
    }
}

/// Inputs fetched once per cycle and shared by the kind reconcilers.
#[derive(Debug, Clone, Default)]
pub struct SyncInputs {
    pub groups: Vec<Group>,
    pub project_names: BTreeMap<i64, String>,
    pub group_projects: GroupProjects,
    pub roles: BTreeMap<String, Role>,
    pub project_id_source: ProjectIdSource,
}

impl SyncInputs {
    pub fn resolver(&self) -> ProjectResolver<'_> {
        ProjectResolver::new(
            self.project_id_source,
            &self.group_projects,
            &self.project_names,
        )
    }
}

#[derive(Clone)]
pub struct Services {
    pub identity: Arc<dyn IdentityService>,
    pub projects: Arc<dyn ProjectStore>,
    pub opensearch: Arc<dyn OpensearchService>,
    pub dashboards: Arc<dyn DashboardsService>,
}

pub struct Syncer {
    identity: Arc<dyn IdentityService>,
    projects: Arc<dyn ProjectStore>,
    opensearch: Arc<dyn OpensearchService>,
    dashboards: Arc<dyn DashboardsService>,
    options: SyncOptions,
    cancel: CancellationToken,
}

impl Syncer {
    pub fn new(services: Services, options: SyncOptions, cancel: CancellationToken) -> Self {
        Self {
            identity: services.identity,
            projects: services.projects,
            opensearch: services.opensearch,
            dashboards: services.dashboards,
            options,
            cancel,
        }
    }

    /// Races `fut` against cancellation.
    async fn guard<T>(
        &self,
        fut: impl Future<Output = Result<T, SyncError>>,
    ) -> Result<T, SyncError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            result = fut => result,
        }
    }

    /// Runs a cycle immediately, then on every period tick until cancelled.
    /// Returns after the first cycle in single-run mode.
    pub async fn run(&self) -> Result<(), SyncError> {
        if self.options.period.is_zero() {
            return Err(SyncError::config("sync period must be greater than zero"));
        }
        let mut ticker = tokio::time::interval(self.options.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("sync loop cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            match self.run_cycle().await {
                Ok(report) => {
                    info!(
                        kinds = report.kinds.len(),
                        failed_kinds = report.failed_kinds(),
                        dry_run = self.options.dry_run,
                        "sync cycle complete"
                    );
                }
                Err(SyncError::Cancelled) => {
                    info!("sync cycle cancelled");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
            if self.options.once {
                return Ok(());
            }
        }
    }

    #[instrument(skip(self), fields(dry_run = self.options.dry_run))]
    pub async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        let inputs = self.fetch_inputs().await?;
        let mut report = CycleReport::default();
        for kind in ObjectKind::ALL
            .into_iter()
            .filter(|kind| self.options.objects.contains(kind))
        {
            let result = match kind {
                ObjectKind::Tenants => self.sync_tenants(&inputs).await,
                ObjectKind::Roles => self.sync_roles(&inputs).await,
                ObjectKind::RolesMapping => self.sync_roles_mapping(&inputs).await,
                ObjectKind::IndexPatterns => self.sync_index_patterns(&inputs).await,
                ObjectKind::IndexTemplates => self.sync_index_templates().await,
            };
            let outcome = match result {
                Ok(kind_report) => KindOutcome::Reconciled(kind_report),
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(err) => {
                    error!(%kind, error = %err, "couldn't reconcile object kind");
                    KindOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            report.kinds.push((kind, outcome));
        }
        Ok(report)
    }

    async fn fetch_inputs(&self) -> Result<SyncInputs, SyncError> {
        let project_id_source = self.options.generator.project_id_source;
        let projects = self.guard(self.projects.projects()).await?;
        let group_projects = match project_id_source {
            ProjectIdSource::JoinTable => self.guard(self.projects.group_projects()).await?,
            ProjectIdSource::GroupAttribute => GroupProjects::new(),
        };
        let groups = self.guard(self.identity.groups()).await?;
        // Shared by the roles and rolesmapping reconcilers.
        let roles = self.guard(self.opensearch.roles()).await?;
        Ok(SyncInputs {
            groups,
            project_names: groups::project_names(&projects),
            group_projects,
            roles,
            project_id_source,
        })
    }

    /// Applies the difference between `existing` and `required`, deletes
    /// first. Failures of single objects are logged and recorded.
    async fn reconcile<T: ManagedObject>(
        &self,
        existing: &BTreeMap<String, T>,
        required: &BTreeMap<String, T>,
        mode: ReplaceMode,
    ) -> Result<ReconcileReport, SyncError> {
        let kind = T::KIND;
        let diff = calculate_diff(existing, required, mode);
        let opensearch = self.opensearch.as_ref();
        let mut report = ReconcileReport::new(self.options.dry_run);

        for name in diff.to_delete {
            if self.options.dry_run {
                info!(%kind, name, "dry run mode: not deleting");
                report.deleted.push(name);
                continue;
            }
            match self.guard(T::delete(opensearch, &name)).await {
                Ok(()) => {
                    info!(%kind, name, "deleted");
                    report.deleted.push(name);
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(err) => {
                    warn!(%kind, name, error = %err, "couldn't delete");
                    report.failed.push(name);
                }
            }
        }

        for (name, object) in diff.to_create {
            if self.options.dry_run {
                info!(%kind, name, "dry run mode: not creating");
                report.created.push(name);
                continue;
            }
            match self.guard(T::create(opensearch, &name, &object)).await {
                Ok(()) => {
                    info!(%kind, name, "created");
                    report.created.push(name);
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(err) => {
                    warn!(%kind, name, error = %err, "couldn't create");
                    report.failed.push(name);
                }
            }
        }
        Ok(report)
    }
}
