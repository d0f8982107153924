use crate::{
    config::LagoonDbConfig,
    error::SyncError,
    models::{GroupProjects, Project},
    sync::ProjectStore,
};
use async_trait::async_trait;
use sqlx::{
    MySqlPool,
    mysql::{MySqlConnectOptions, MySqlPoolOptions},
};
use std::time::Duration;
use tracing::{debug, instrument};

const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Read-only access to the Lagoon API database.
#[derive(Debug, Clone)]
pub struct LagoonDbClient {
    pool: MySqlPool,
}

#[derive(Debug, sqlx::FromRow)]
struct GroupProjectRow {
    group_id: String,
    project_id: i64,
}

/// Splits `host[:port]`, defaulting to the MySQL port.
pub fn parse_address(address: &str) -> Result<(String, u16), SyncError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(SyncError::config("API_DB_ADDRESS is required"));
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|err| SyncError::config(format!("invalid database port {port:?}: {err}")))?;
            Ok((host.to_string(), port))
        }
        Some(_) => Err(SyncError::config(format!("invalid database address {address:?}"))),
        None => Ok((address.to_string(), DEFAULT_MYSQL_PORT)),
    }
}

pub fn group_projects_from_rows(rows: impl IntoIterator<Item = (String, i64)>) -> GroupProjects {
    let mut group_projects = GroupProjects::new();
    for (group_id, project_id) in rows {
        group_projects.entry(group_id).or_default().push(project_id);
    }
    group_projects
}

impl LagoonDbClient {
    pub async fn connect(cfg: &LagoonDbConfig) -> Result<Self, SyncError> {
        let (host, port) = parse_address(&cfg.address)?;
        if cfg.password.is_empty() {
            return Err(SyncError::config("API_DB_PASSWORD is required"));
        }
        let options = MySqlConnectOptions::new()
            .host(&host)
            .port(port)
            .database(&cfg.database)
            .username(&cfg.username)
            .password(&cfg.password);
        let pool = MySqlPoolOptions::new()
            .max_connections(10)
            .max_lifetime(Duration::from_secs(4 * 60))
            .connect_with(options)
            .await?;
        debug!(host, port, database = cfg.database, "connected to lagoon database");
        Ok(Self { pool })
    }

    #[instrument(skip(self))]
    pub async fn projects(&self) -> Result<Vec<Project>, SyncError> {
        let projects = sqlx::query_as::<_, Project>("SELECT id, name FROM project")
            .fetch_all(&self.pool)
            .await?;
        debug!(projects = projects.len(), "fetched lagoon projects");
        Ok(projects)
    }

    #[instrument(skip(self))]
    pub async fn group_projects(&self) -> Result<GroupProjects, SyncError> {
        let rows = sqlx::query_as::<_, GroupProjectRow>(
            "SELECT group_id, project_id FROM kc_group_projects",
        )
        .fetch_all(&self.pool)
        .await?;
        debug!(rows = rows.len(), "fetched lagoon group projects");
        Ok(group_projects_from_rows(
            rows.into_iter().map(|row| (row.group_id, row.project_id)),
        ))
    }
}

#[async_trait]
impl ProjectStore for LagoonDbClient {
    async fn projects(&self) -> Result<Vec<Project>, SyncError> {
        LagoonDbClient::projects(self).await
    }

    async fn group_projects(&self) -> Result<GroupProjects, SyncError> {
        LagoonDbClient::group_projects(self).await
    }
}
