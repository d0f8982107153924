use clap::{Args, Parser, Subcommand};
use lagoon_opensearch_sync::{
    config::{Config, parse_duration},
    error::SyncError,
    runtime::{self, DumpTarget},
    sync::ObjectKind,
};
use serde_json::Value;
use std::{path::PathBuf, time::Duration};

/// Synchronizes Lagoon groups and projects into Opensearch.
#[derive(Debug, Parser)]
#[command(name = "lagoon-opensearch-sync", version, about, long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    /// Path to a YAML config file, overridden by environment variables
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Synchronize Lagoon state to Opensearch
    Sync(SyncArgs),
    /// Print Lagoon projects and group memberships
    DumpProjects,
    /// Print Keycloak groups
    DumpGroups,
    /// Print Opensearch roles
    DumpRoles,
    /// Print Opensearch role mappings
    #[command(name = "dump-rolesmapping")]
    DumpRolesMapping,
    /// Print Opensearch tenants
    DumpTenants,
    /// Print Opensearch index templates
    DumpIndexTemplates,
    /// Print Dashboards index patterns
    DumpIndexPatterns(DumpIndexPatternsArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Default, Args)]
struct SyncArgs {
    /// Log changes without applying them
    #[arg(long)]
    dry_run: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Time between sync cycles, e.g. 8m
    #[arg(long, value_parser = parse_duration)]
    period: Option<Duration>,

    /// Comma separated object kinds to synchronize
    #[arg(long, value_delimiter = ',')]
    objects: Option<Vec<ObjectKind>>,

    /// Use `-*` instead of `-_-*` in generated index patterns
    #[arg(long)]
    legacy_index_pattern_delimiter: bool,
}

#[derive(Debug, Default, Args)]
struct DumpIndexPatternsArgs {
    /// Print a single raw search page instead of the processed patterns
    #[arg(long)]
    raw: bool,

    /// Page size for the raw search
    #[arg(long, default_value_t = 10_000)]
    raw_search_size: usize,

    /// JSON sort cursor for the raw search, e.g. '[1680000000000]'
    #[arg(long, value_parser = parse_search_after)]
    raw_search_after: Option<SearchAfter>,
}

#[derive(Debug, Clone, PartialEq)]
struct SearchAfter(Vec<Value>);

fn parse_search_after(raw: &str) -> Result<SearchAfter, String> {
    serde_json::from_str(raw)
        .map(SearchAfter)
        .map_err(|err| format!("expected a JSON array: {err}"))
}

impl SyncArgs {
    fn apply(self, config: &mut Config) {
        let sync = &mut config.sync;
        sync.dry_run |= self.dry_run;
        sync.once |= self.once;
        if let Some(period) = self.period {
            sync.period = period;
        }
        if let Some(objects) = self.objects {
            sync.objects = objects;
        }
        sync.generator.legacy_index_pattern_delimiter |= self.legacy_index_pattern_delimiter;
    }
}

fn dump_target(command: &Command) -> Option<DumpTarget> {
    let target = match command {
        Command::DumpProjects => DumpTarget::Projects,
        Command::DumpGroups => DumpTarget::Groups,
        Command::DumpRoles => DumpTarget::Roles,
        Command::DumpRolesMapping => DumpTarget::RolesMapping,
        Command::DumpTenants => DumpTarget::Tenants,
        Command::DumpIndexTemplates => DumpTarget::IndexTemplates,
        Command::DumpIndexPatterns(args) if args.raw => DumpTarget::RawIndexPatterns {
            size: args.raw_search_size,
            search_after: args.raw_search_after.clone().map(|cursor| cursor.0),
        },
        Command::DumpIndexPatterns(_) => DumpTarget::IndexPatterns,
        Command::Sync(_) | Command::Version => return None,
    };
    Some(target)
}

fn load_config(cli: &Cli) -> Result<Config, String> {
    let mut config = match cli.config.clone() {
        Some(path) => Config::from_env_with_config_file(path)?,
        None => Config::from_env()?,
    };
    if cli.debug {
        config.log_level = "debug".to_string();
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if matches!(cli.command, Command::Version) {
        println!("{}", runtime::version());
        return;
    }

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("couldn't install TLS crypto provider");
        std::process::exit(1);
    }

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            std::process::exit(2);
        }
    };
    runtime::init_tracing(&config);

    let target = dump_target(&cli.command);
    let result = match (cli.command, target) {
        (_, Some(target)) => runtime::dump(&config, target).await.map(|json| {
            println!("{json}");
        }),
        (Command::Sync(args), None) => {
            args.apply(&mut config);
            runtime::run_sync(config).await
        }
        (_, None) => Ok(()),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "lagoon-opensearch-sync failed");
        eprintln!("error: {err}");
        std::process::exit(exit_code(&err));
    }
}

/// Configuration problems found while building clients exit like the ones
/// found while loading the config.
fn exit_code(err: &SyncError) -> i32 {
    match err {
        SyncError::Config(_) => 2,
        _ => 1,
    }
}
