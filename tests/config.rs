use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use lagoon_opensearch_sync::{
    config::Config,
    sync::{ObjectKind, groups::ProjectIdSource},
};
use std::{collections::HashSet, io::Write, sync::Mutex, time::Duration};

static ENV_LOCK: Mutex<()> = Mutex::new(());

const CONFIG_ENV_VARS: [&str; 27] = [
    "OPENSEARCH_SYNC_CONFIG",
    "OPENSEARCH_SYNC_CONFIG_BASE64",
    "LOG_LEVEL",
    "DEBUG",
    "API_DB_ADDRESS",
    "API_DB_RO_ADDRESS",
    "API_DB_DATABASE",
    "API_DB_USERNAME",
    "API_DB_RO_USERNAME",
    "API_DB_PASSWORD",
    "API_DB_RO_PASSWORD",
    "KEYCLOAK_BASE_URL",
    "KEYCLOAK_REALM",
    "KEYCLOAK_CLIENT_ID",
    "KEYCLOAK_CLIENT_SECRET",
    "OPENSEARCH_BASE_URL",
    "OPENSEARCH_ADMIN_USERNAME",
    "OPENSEARCH_ADMIN_PASSWORD",
    "OPENSEARCH_CA_CERTIFICATE",
    "OPENSEARCH_CLIENT_TIMEOUT",
    "OPENSEARCH_DASHBOARDS_BASE_URL",
    "DRY_RUN",
    "SYNC_ONCE",
    "SYNC_PERIOD",
    "SYNC_OBJECTS",
    "LEGACY_INDEX_PATTERN_DELIMITER",
    "PROJECT_ID_SOURCE",
];

#[test]
fn environment_populates_all_sections() {
    with_clean_env(
        &[
            ("API_DB_ADDRESS", Some("mariadb:3306")),
            ("API_DB_PASSWORD", Some("db-secret")),
            ("KEYCLOAK_BASE_URL", Some("https://keycloak.example.com/")),
            ("KEYCLOAK_CLIENT_SECRET", Some("kc-secret")),
            ("OPENSEARCH_BASE_URL", Some("https://opensearch:9200")),
            ("OPENSEARCH_ADMIN_PASSWORD", Some("os-secret")),
            ("OPENSEARCH_CLIENT_TIMEOUT", Some("45s")),
            ("OPENSEARCH_DASHBOARDS_BASE_URL", Some("https://dashboards:5601")),
            ("DRY_RUN", Some("true")),
            ("SYNC_PERIOD", Some("2m")),
            ("SYNC_OBJECTS", Some("tenants,indexpatterns")),
            ("PROJECT_ID_SOURCE", Some("attribute")),
            ("DEBUG", Some("true")),
        ],
        || {
            let cfg = Config::from_env().expect("config");
            assert_eq!(cfg.log_level, "debug");
            assert_eq!(cfg.lagoon_db.address, "mariadb:3306");
            assert_eq!(cfg.lagoon_db.password, "db-secret");
            assert_eq!(cfg.keycloak.base_url, "https://keycloak.example.com");
            assert_eq!(cfg.keycloak.client_secret, "kc-secret");
            assert_eq!(cfg.keycloak.timeout, Duration::from_secs(45));
            assert_eq!(cfg.opensearch.base_url, "https://opensearch:9200");
            assert_eq!(cfg.opensearch.timeout, Duration::from_secs(45));
            assert_eq!(cfg.dashboards.base_url, "https://dashboards:5601");
            assert!(cfg.sync.dry_run);
            assert_eq!(cfg.sync.period, Duration::from_secs(120));
            assert_eq!(
                cfg.sync.objects,
                vec![ObjectKind::Tenants, ObjectKind::IndexPatterns]
            );
            assert_eq!(
                cfg.sync.generator.project_id_source,
                ProjectIdSource::GroupAttribute
            );
        },
    );
}

#[test]
fn read_only_database_replica_is_preferred() {
    with_clean_env(
        &[
            ("API_DB_ADDRESS", Some("api-db")),
            ("API_DB_RO_ADDRESS", Some("api-db-ro")),
            ("API_DB_USERNAME", Some("api")),
            ("API_DB_RO_USERNAME", Some("reader")),
        ],
        || {
            let cfg = Config::from_env().expect("config");
            assert_eq!(cfg.lagoon_db.address, "api-db-ro");
            assert_eq!(cfg.lagoon_db.username, "reader");
        },
    );
}

#[test]
fn environment_overrides_config_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        r#"
opensearch:
  base_url: https://from-file:9200
sync:
  period: 10m
  dry_run: true
"#
    )
    .expect("write");
    let path = file.path().to_path_buf();

    with_clean_env(&[("OPENSEARCH_BASE_URL", Some("https://from-env:9200"))], || {
        let cfg = Config::from_env_with_config_file(path.clone()).expect("config");
        assert_eq!(cfg.opensearch.base_url, "https://from-env:9200");
        assert_eq!(cfg.sync.period, Duration::from_secs(600));
        assert!(cfg.sync.dry_run);
    });
}

#[test]
fn loads_base64_config_from_environment() {
    let yaml = "keycloak:\n  realm: custom\nsync:\n  once: true\n";
    let encoded = B64.encode(yaml);
    with_clean_env(
        &[("OPENSEARCH_SYNC_CONFIG_BASE64", Some(encoded.as_str()))],
        || {
            let cfg = Config::from_env().expect("config");
            assert_eq!(cfg.keycloak.realm, "custom");
            assert!(cfg.sync.once);
        },
    );
}

#[test]
fn rejects_invalid_environment_values() {
    for (key, value) in [
        ("SYNC_PERIOD", "often"),
        ("SYNC_OBJECTS", "tenants,widgets"),
        ("PROJECT_ID_SOURCE", "ldap"),
        ("OPENSEARCH_CLIENT_TIMEOUT", "soon"),
        ("DRY_RUN", "yes"),
        ("SYNC_ONCE", "maybe"),
        ("LEGACY_INDEX_PATTERN_DELIMITER", "on"),
        ("DEBUG", "verbose"),
    ] {
        with_clean_env(&[(key, Some(value))], || {
            let err = Config::from_env().expect_err("invalid value");
            assert!(err.contains(key), "{err} should name {key}");
        });
    }
}

#[test]
fn accepts_numeric_and_uppercase_booleans() {
    with_clean_env(
        &[
            ("DRY_RUN", Some("1")),
            ("SYNC_ONCE", Some("TRUE")),
            ("LEGACY_INDEX_PATTERN_DELIMITER", Some("t")),
            ("DEBUG", Some("1")),
        ],
        || {
            let cfg = Config::from_env().expect("config");
            assert!(cfg.sync.dry_run);
            assert!(cfg.sync.once);
            assert!(cfg.sync.generator.legacy_index_pattern_delimiter);
            assert_eq!(cfg.log_level, "debug");
        },
    );
    with_clean_env(&[("DRY_RUN", Some("0"))], || {
        let cfg = Config::from_env().expect("config");
        assert!(!cfg.sync.dry_run);
    });
}

#[test]
fn accepts_compound_sync_period() {
    with_clean_env(&[("SYNC_PERIOD", Some("1h30m"))], || {
        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.sync.period, std::time::Duration::from_secs(5400));
    });
}

#[test]
fn rejects_both_config_sources() {
    with_clean_env(
        &[
            ("OPENSEARCH_SYNC_CONFIG", Some("/tmp/sync.yaml")),
            ("OPENSEARCH_SYNC_CONFIG_BASE64", Some("c3luYzoge30K")),
        ],
        || {
            let err = Config::from_env().expect_err("conflicting sources");
            assert!(err.contains("both set"));
        },
    );
}

fn with_clean_env(vars: &[(&str, Option<&str>)], run: impl FnOnce()) {
    let overrides = vars.iter().map(|(key, _)| *key).collect::<HashSet<_>>();
    let mut all = CONFIG_ENV_VARS
        .iter()
        .filter(|key| !overrides.contains(*key))
        .map(|key| (*key, None))
        .collect::<Vec<_>>();
    all.extend_from_slice(vars);
    with_env_vars(&all, run);
}

fn with_env_vars(vars: &[(&str, Option<&str>)], run: impl FnOnce()) {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let previous = vars
        .iter()
        .map(|(key, _)| (key.to_string(), std::env::var(key).ok()))
        .collect::<Vec<_>>();

    for (key, value) in vars {
        unsafe {
            match value {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
    }

    let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(run));

    for (key, value) in previous {
        unsafe {
            match value {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }

    if let Err(payload) = run_result {
        std::panic::resume_unwind(payload);
    }
}
