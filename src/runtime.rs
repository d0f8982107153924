use crate::{
    config::Config,
    dashboards::DashboardsClient,
    error::SyncError,
    keycloak::KeycloakClient,
    lagoondb::LagoonDbClient,
    observability,
    opensearch::OpensearchClient,
    sync::{Services, SyncOptions, Syncer},
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Objects printed by the dump commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpTarget {
    Projects,
    Groups,
    Roles,
    RolesMapping,
    Tenants,
    IndexTemplates,
    IndexPatterns,
    /// A single unprocessed search page.
    RawIndexPatterns {
        size: usize,
        search_after: Option<Vec<Value>>,
    },
}

pub fn version() -> String {
    serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    })
    .to_string()
}

pub fn init_tracing(config: &Config) {
    let tracing_settings = observability::init_from_env(&config.log_level);
    tracing::debug!(
        log_filter = tracing_settings.filter,
        log_format = tracing_settings.log_format.as_str(),
        "initialized tracing subscriber"
    );
}

#[instrument(skip(config))]
pub async fn build_services(config: &Config) -> Result<Services, SyncError> {
    let keycloak = KeycloakClient::new(&config.keycloak)?;
    let opensearch = OpensearchClient::new(&config.opensearch)?;
    let dashboards = DashboardsClient::new(&config.dashboards, &config.opensearch)?;
    let lagoondb = LagoonDbClient::connect(&config.lagoon_db).await?;
    Ok(Services {
        identity: Arc::new(keycloak),
        projects: Arc::new(lagoondb),
        opensearch: Arc::new(opensearch),
        dashboards: Arc::new(dashboards),
    })
}

/// Runs the sync loop until a shutdown signal arrives or a single run
/// completes.
pub async fn run_sync(config: Config) -> Result<(), SyncError> {
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));
    run_sync_until(config, cancel).await
}

pub async fn run_sync_until(config: Config, cancel: CancellationToken) -> Result<(), SyncError> {
    let services = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        services = build_services(&config) => services?,
    };
    let options: SyncOptions = config.sync;
    tracing::info!(
        dry_run = options.dry_run,
        once = options.once,
        period = ?options.period,
        objects = ?options.objects,
        "lagoon-opensearch-sync starting"
    );
    let syncer = Syncer::new(services, options, cancel);
    syncer.run().await
}

/// Fetches the requested objects and renders them as pretty printed JSON.
#[instrument(skip(config))]
pub async fn dump(config: &Config, target: DumpTarget) -> Result<String, SyncError> {
    match target {
        DumpTarget::Projects => {
            let lagoondb = LagoonDbClient::connect(&config.lagoon_db).await?;
            let projects = lagoondb.projects().await?;
            let group_projects = lagoondb.group_projects().await?;
            to_json(&serde_json::json!({
                "projects": projects,
                "groupProjects": group_projects,
            }))
        }
        DumpTarget::Groups => {
            let keycloak = KeycloakClient::new(&config.keycloak)?;
            to_json(&keycloak.groups().await?)
        }
        DumpTarget::Roles => to_json(&opensearch(config)?.roles().await?),
        DumpTarget::RolesMapping => to_json(&opensearch(config)?.roles_mapping().await?),
        DumpTarget::Tenants => to_json(&opensearch(config)?.tenants().await?),
        DumpTarget::IndexTemplates => to_json(&opensearch(config)?.index_templates().await?),
        DumpTarget::IndexPatterns => to_json(&opensearch(config)?.index_patterns().await?),
        DumpTarget::RawIndexPatterns { size, search_after } => to_json(
            &opensearch(config)?
                .search_index_patterns(size, search_after)
                .await?,
        ),
    }
}

fn opensearch(config: &Config) -> Result<OpensearchClient, SyncError> {
    OpensearchClient::new(&config.opensearch)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, SyncError> {
    Ok(serde_json::to_string_pretty(value)?)
}

async fn cancel_on_shutdown(cancel: CancellationToken) {
    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    cancel.cancel();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        let terminate = async {
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                let _ = sigterm.recv().await;
            }
        };
        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
