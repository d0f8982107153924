use async_trait::async_trait;
use lagoon_opensearch_sync::{
    error::SyncError,
    models::{Group, GroupProjects, IndexPatterns, IndexTemplate, Project, Role, RoleMapping, Tenant},
    sync::{
        DashboardsService, IdentityService, KindOutcome, ObjectKind, OpensearchService,
        ProjectStore, ReconcileReport, Services, SyncOptions, Syncer,
        index_patterns::tenant_index,
    },
};
use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct State {
    tenants: BTreeMap<String, Tenant>,
    roles: BTreeMap<String, Role>,
    mappings: BTreeMap<String, RoleMapping>,
    templates: BTreeMap<String, IndexTemplate>,
    index_patterns: IndexPatterns,
    next_id: usize,
}

#[derive(Default)]
struct FakeOpensearch {
    state: Mutex<State>,
    writes: Mutex<Vec<String>>,
    failing_reads: Mutex<HashSet<&'static str>>,
    failing_creates: Mutex<HashSet<String>>,
}

impl FakeOpensearch {
    fn record(&self, call: String) {
        self.writes.lock().expect("writes").push(call);
    }

    fn writes(&self) -> Vec<String> {
        self.writes.lock().expect("writes").clone()
    }

    fn fail_read(&self, resource: &'static str) {
        self.failing_reads.lock().expect("reads").insert(resource);
    }

    fn fail_create(&self, name: &str) {
        self.failing_creates
            .lock()
            .expect("creates")
            .insert(name.to_string());
    }

    fn check_read(&self, resource: &'static str) -> Result<(), SyncError> {
        if self.failing_reads.lock().expect("reads").contains(resource) {
            return Err(SyncError::transport("opensearch", "connection refused"));
        }
        Ok(())
    }

    fn check_create(&self, name: &str) -> Result<(), SyncError> {
        if self.failing_creates.lock().expect("creates").contains(name) {
            return Err(SyncError::transport("opensearch", "connection reset"));
        }
        Ok(())
    }
}

#[async_trait]
impl OpensearchService for FakeOpensearch {
    async fn tenants(&self) -> Result<BTreeMap<String, Tenant>, SyncError> {
        self.check_read("tenants")?;
        Ok(self.state.lock().expect("state").tenants.clone())
    }

    async fn create_tenant(&self, name: &str, tenant: &Tenant) -> Result<(), SyncError> {
        self.check_create(name)?;
        self.record(format!("create_tenant:{name}"));
        let mut state = self.state.lock().expect("state");
        state.tenants.insert(name.to_string(), tenant.clone());
        Ok(())
    }

    async fn delete_tenant(&self, name: &str) -> Result<(), SyncError> {
        self.record(format!("delete_tenant:{name}"));
        self.state.lock().expect("state").tenants.remove(name);
        Ok(())
    }

    async fn roles(&self) -> Result<BTreeMap<String, Role>, SyncError> {
        self.check_read("roles")?;
        Ok(self.state.lock().expect("state").roles.clone())
    }

    async fn create_role(&self, name: &str, role: &Role) -> Result<(), SyncError> {
        self.check_create(name)?;
        self.record(format!("create_role:{name}"));
        let mut state = self.state.lock().expect("state");
        state.roles.insert(name.to_string(), role.clone());
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> Result<(), SyncError> {
        self.record(format!("delete_role:{name}"));
        self.state.lock().expect("state").roles.remove(name);
        Ok(())
    }

    async fn roles_mapping(&self) -> Result<BTreeMap<String, RoleMapping>, SyncError> {
        self.check_read("rolesmapping")?;
        Ok(self.state.lock().expect("state").mappings.clone())
    }

    async fn create_role_mapping(
        &self,
        name: &str,
        mapping: &RoleMapping,
    ) -> Result<(), SyncError> {
        self.record(format!("create_role_mapping:{name}"));
        let mut state = self.state.lock().expect("state");
        state.mappings.insert(name.to_string(), mapping.clone());
        Ok(())
    }

    async fn delete_role_mapping(&self, name: &str) -> Result<(), SyncError> {
        self.record(format!("delete_role_mapping:{name}"));
        self.state.lock().expect("state").mappings.remove(name);
        Ok(())
    }

    async fn index_templates(&self) -> Result<BTreeMap<String, IndexTemplate>, SyncError> {
        self.check_read("index_templates")?;
        Ok(self.state.lock().expect("state").templates.clone())
    }

    async fn create_index_template(
        &self,
        name: &str,
        template: &IndexTemplate,
    ) -> Result<(), SyncError> {
        self.record(format!("create_index_template:{name}"));
        let mut state = self.state.lock().expect("state");
        state.templates.insert(name.to_string(), template.clone());
        Ok(())
    }

    async fn delete_index_template(&self, name: &str) -> Result<(), SyncError> {
        self.record(format!("delete_index_template:{name}"));
        self.state.lock().expect("state").templates.remove(name);
        Ok(())
    }

    async fn index_patterns(&self) -> Result<IndexPatterns, SyncError> {
        self.check_read("index_patterns")?;
        Ok(self.state.lock().expect("state").index_patterns.clone())
    }
}

/// Stores index patterns in the fake cluster's saved object indices.
struct FakeDashboards {
    opensearch: Arc<FakeOpensearch>,
}

#[async_trait]
impl DashboardsService for FakeDashboards {
    async fn create_index_pattern(&self, tenant: &str, title: &str) -> Result<(), SyncError> {
        self.opensearch
            .record(format!("create_index_pattern:{tenant}/{title}"));
        let mut state = self.opensearch.state.lock().expect("state");
        state.next_id += 1;
        let id = format!("id-{}", state.next_id);
        state
            .index_patterns
            .entry(tenant_index(tenant))
            .or_default()
            .entry(title.to_string())
            .or_default()
            .push(id);
        Ok(())
    }

    async fn delete_index_pattern(&self, tenant: &str, id: &str) -> Result<(), SyncError> {
        self.opensearch
            .record(format!("delete_index_pattern:{tenant}/{id}"));
        let mut state = self.opensearch.state.lock().expect("state");
        if let Some(titles) = state.index_patterns.get_mut(&tenant_index(tenant)) {
            for ids in titles.values_mut() {
                ids.retain(|existing| existing != id);
            }
            titles.retain(|_, ids| !ids.is_empty());
        }
        Ok(())
    }
}

enum Groups {
    Static(Vec<Group>),
    Empty,
    Hang,
}

struct FakeIdentity(Groups);

#[async_trait]
impl IdentityService for FakeIdentity {
    async fn groups(&self) -> Result<Vec<Group>, SyncError> {
        match &self.0 {
            Groups::Static(groups) => Ok(groups.clone()),
            Groups::Empty => Err(SyncError::EmptyGroups),
            Groups::Hang => std::future::pending().await,
        }
    }
}

struct FakeProjects;

#[async_trait]
impl ProjectStore for FakeProjects {
    async fn projects(&self) -> Result<Vec<Project>, SyncError> {
        Ok(vec![
            Project {
                id: 31,
                name: "drupal-example".to_string(),
            },
            Project {
                id: 34,
                name: "Drupal_Example2".to_string(),
            },
        ])
    }

    async fn group_projects(&self) -> Result<GroupProjects, SyncError> {
        Ok(GroupProjects::from([
            ("g-customer".to_string(), vec![31, 34]),
            ("g-project".to_string(), vec![31]),
        ]))
    }
}

fn groups() -> Vec<Group> {
    vec![
        Group::new("g-customer", "customer-a"),
        Group::new("g-project", "project-drupal-example")
            .with_attribute("type", &["project-default-group"]),
        Group::new("g-admin", "lagoonadmin"),
        Group::new("g-global", "global"),
    ]
}

struct Harness {
    opensearch: Arc<FakeOpensearch>,
    services: Services,
}

fn harness(groups: Groups) -> Harness {
    let opensearch = Arc::new(FakeOpensearch::default());
    let services = Services {
        identity: Arc::new(FakeIdentity(groups)),
        projects: Arc::new(FakeProjects),
        opensearch: opensearch.clone(),
        dashboards: Arc::new(FakeDashboards {
            opensearch: opensearch.clone(),
        }),
    };
    Harness {
        opensearch,
        services,
    }
}

impl Harness {
    fn syncer(&self, options: SyncOptions) -> Syncer {
        Syncer::new(self.services.clone(), options, CancellationToken::new())
    }
}

fn reconciled(outcome: Option<&KindOutcome>) -> &ReconcileReport {
    match outcome {
        Some(KindOutcome::Reconciled(report)) => report,
        other => panic!("expected reconciled outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn first_cycle_creates_everything_and_second_is_a_no_op() {
    let harness = harness(Groups::Static(groups()));
    let syncer = harness.syncer(SyncOptions::default());

    let report = syncer.run_cycle().await.expect("first cycle");
    let kinds = report.kinds.iter().map(|(kind, _)| *kind).collect::<Vec<_>>();
    assert_eq!(kinds, ObjectKind::ALL.to_vec());

    let tenants = reconciled(report.outcome(ObjectKind::Tenants));
    assert_eq!(tenants.created, vec!["customer-a", "lagoonadmin"]);

    let roles = reconciled(report.outcome(ObjectKind::Roles));
    assert_eq!(roles.created, vec!["customer-a", "global", "lagoonadmin", "p31"]);

    let mappings = reconciled(report.outcome(ObjectKind::RolesMapping));
    assert_eq!(mappings.created, roles.created);

    let patterns = reconciled(report.outcome(ObjectKind::IndexPatterns));
    assert_eq!(patterns.created.len(), 12 + 4 + 4 + 4);
    assert!(
        patterns
            .created
            .contains(&"customer-a/router-logs-drupal-example2-_-*".to_string())
    );
    assert!(
        patterns
            .created
            .contains(&"global_tenant/router-logs-*".to_string())
    );
    assert!(!patterns.created.iter().any(|name| name.starts_with("global/")));

    let templates = reconciled(report.outcome(ObjectKind::IndexTemplates));
    assert_eq!(templates.created, vec!["routerlogs"]);

    {
        let state = harness.opensearch.state.lock().expect("state");
        let admin = &state.roles["lagoonadmin"];
        assert!(admin.permissions.index_permissions.is_empty());
        let customer = &state.roles["customer-a"];
        assert_eq!(
            customer.permissions.index_permissions[0].index_patterns,
            vec![
                "/^(application|container|lagoon|router)-logs-drupal-example-_-.+/",
                "/^(application|container|lagoon|router)-logs-drupal-example2-_-.+/",
            ]
        );
    }

    let writes_after_first = harness.opensearch.writes().len();
    let report = syncer.run_cycle().await.expect("second cycle");
    for (kind, outcome) in &report.kinds {
        let kind_report = reconciled(Some(outcome));
        assert!(kind_report.created.is_empty(), "{kind} created objects");
        assert!(kind_report.deleted.is_empty(), "{kind} deleted objects");
    }
    assert_eq!(harness.opensearch.writes().len(), writes_after_first);
}

#[tokio::test]
async fn dry_run_reports_without_writing() {
    let harness = harness(Groups::Static(groups()));
    {
        let mut state = harness.opensearch.state.lock().expect("state");
        state
            .tenants
            .insert("stale-tenant".to_string(), Tenant::default());
    }
    let syncer = harness.syncer(SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    });

    let report = syncer.run_cycle().await.expect("cycle");
    let tenants = reconciled(report.outcome(ObjectKind::Tenants));
    assert!(tenants.dry_run);
    assert_eq!(tenants.created, vec!["customer-a", "lagoonadmin"]);
    assert_eq!(tenants.deleted, vec!["stale-tenant"]);
    assert!(harness.opensearch.writes().is_empty());
}

#[tokio::test]
async fn removes_stale_objects_and_leaves_builtin_ones() {
    let harness = harness(Groups::Static(groups()));
    {
        let mut state = harness.opensearch.state.lock().expect("state");
        state.tenants.insert(
            "global_tenant".to_string(),
            Tenant {
                reserved: true,
                ..Tenant::default()
            },
        );
        state
            .tenants
            .insert("stale-tenant".to_string(), Tenant::default());
        state.roles.insert(
            "all_access".to_string(),
            Role {
                reserved: true,
                ..Role::default()
            },
        );
        state.mappings.insert("all_access".to_string(), RoleMapping::default());
        state.mappings.insert("p99".to_string(), RoleMapping::default());
        state.index_patterns.insert(
            "global_tenant".to_string(),
            BTreeMap::from([
                (
                    "router-logs-*".to_string(),
                    vec!["keep".to_string(), "dup".to_string()],
                ),
                ("old-logs-*".to_string(), vec!["old".to_string()]),
            ]),
        );
    }
    let syncer = harness.syncer(SyncOptions::default());
    let report = syncer.run_cycle().await.expect("cycle");

    let tenants = reconciled(report.outcome(ObjectKind::Tenants));
    assert_eq!(tenants.deleted, vec!["stale-tenant"]);
    let mappings = reconciled(report.outcome(ObjectKind::RolesMapping));
    assert_eq!(mappings.deleted, vec!["p99"]);
    let patterns = reconciled(report.outcome(ObjectKind::IndexPatterns));
    assert_eq!(patterns.deleted, vec!["global_tenant/old", "global_tenant/dup"]);
    assert!(
        !patterns
            .created
            .contains(&"global_tenant/router-logs-*".to_string())
    );

    let writes = harness.opensearch.writes();
    assert!(!writes.contains(&"delete_tenant:global_tenant".to_string()));
    assert!(!writes.contains(&"delete_role:all_access".to_string()));
    assert!(!writes.contains(&"delete_role_mapping:all_access".to_string()));
}

#[tokio::test]
async fn changed_index_template_is_deleted_before_recreation() {
    let harness = harness(Groups::Static(groups()));
    {
        let mut state = harness.opensearch.state.lock().expect("state");
        let mut template = IndexTemplate {
            name: "routerlogs".to_string(),
            ..IndexTemplate::default()
        };
        template.index_template.index_patterns = vec!["router-logs-*".to_string()];
        state.templates.insert("routerlogs".to_string(), template);
    }
    let syncer = harness.syncer(SyncOptions {
        objects: vec![ObjectKind::IndexTemplates],
        ..SyncOptions::default()
    });
    syncer.run_cycle().await.expect("cycle");
    assert_eq!(
        harness.opensearch.writes(),
        vec![
            "delete_index_template:routerlogs",
            "create_index_template:routerlogs"
        ]
    );
}

#[tokio::test]
async fn selected_kinds_run_in_fixed_order() {
    let harness = harness(Groups::Static(groups()));
    let syncer = harness.syncer(SyncOptions {
        objects: vec![ObjectKind::IndexTemplates, ObjectKind::Tenants],
        ..SyncOptions::default()
    });
    let report = syncer.run_cycle().await.expect("cycle");
    let kinds = report.kinds.iter().map(|(kind, _)| *kind).collect::<Vec<_>>();
    assert_eq!(kinds, vec![ObjectKind::Tenants, ObjectKind::IndexTemplates]);
    assert_eq!(
        harness.opensearch.writes(),
        vec![
            "create_tenant:customer-a",
            "create_tenant:lagoonadmin",
            "create_index_template:routerlogs"
        ]
    );
}

#[tokio::test]
async fn failed_kind_does_not_stop_the_others() {
    let harness = harness(Groups::Static(groups()));
    harness.opensearch.fail_read("tenants");
    harness.opensearch.fail_create("p31");
    let syncer = harness.syncer(SyncOptions::default());

    let report = syncer.run_cycle().await.expect("cycle");
    assert_eq!(report.failed_kinds(), 1);
    assert!(matches!(
        report.outcome(ObjectKind::Tenants),
        Some(KindOutcome::Failed { error }) if error.contains("connection refused")
    ));

    let roles = reconciled(report.outcome(ObjectKind::Roles));
    assert_eq!(roles.failed, vec!["p31"]);
    assert_eq!(roles.created, vec!["customer-a", "global", "lagoonadmin"]);
    assert_eq!(
        reconciled(report.outcome(ObjectKind::IndexTemplates)).created,
        vec!["routerlogs"]
    );
}

#[tokio::test]
async fn input_errors_abort_the_cycle() {
    let harness = harness(Groups::Empty);
    let syncer = harness.syncer(SyncOptions::default());
    let err = syncer.run_cycle().await.expect_err("empty groups");
    assert!(matches!(err, SyncError::EmptyGroups));
    assert!(harness.opensearch.writes().is_empty());

    let err = syncer.run().await.expect_err("fatal error");
    assert!(matches!(err, SyncError::EmptyGroups));
}

#[tokio::test]
async fn single_run_mode_stops_after_one_cycle() {
    let harness = harness(Groups::Static(groups()));
    let syncer = harness.syncer(SyncOptions {
        once: true,
        objects: vec![ObjectKind::IndexTemplates],
        ..SyncOptions::default()
    });
    tokio::time::timeout(Duration::from_secs(5), syncer.run())
        .await
        .expect("run returned")
        .expect("run");
    assert_eq!(
        harness.opensearch.writes(),
        vec!["create_index_template:routerlogs"]
    );
}

#[tokio::test]
async fn cancellation_stops_an_in_flight_cycle() {
    let harness = harness(Groups::Hang);
    let cancel = CancellationToken::new();
    let syncer = Syncer::new(harness.services.clone(), SyncOptions::default(), cancel.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    tokio::time::timeout(Duration::from_secs(5), syncer.run())
        .await
        .expect("run returned")
        .expect("cancelled run is not an error");
    canceller.await.expect("canceller");
    assert!(harness.opensearch.writes().is_empty());
}

#[tokio::test]
async fn zero_period_is_rejected() {
    let harness = harness(Groups::Static(groups()));
    let syncer = harness.syncer(SyncOptions {
        period: Duration::ZERO,
        ..SyncOptions::default()
    });
    assert!(matches!(syncer.run().await, Err(SyncError::Config(_))));
}
