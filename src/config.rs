use crate::domain::entities::{ServiceSpec, TargetSpec};
use crate::infrastructure::health_checker::{HealthCheckConfig, MAX_ATTEMPTS, MIN_ATTEMPTS};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Inputs
    pub services_file: String,
    pub db_path: String,

    // Proxy config files and control
    pub nginx_conf_dir: String,
    pub conf_extension: String,
    pub reload_command: String,
    pub skip_syntax_check: bool,

    // Archives
    pub backup_dir: String,
    pub snapshot_dir: String,

    // Probing
    pub probe_timeout_secs: u64,
    pub probe_retry_delay_ms: u64,

    // Logging
    pub debug: bool,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            services_file: "services.toml".to_string(),
            db_path: "/data/database.sqlite".to_string(),
            nginx_conf_dir: "/data/nginx/proxy_host".to_string(),
            conf_extension: "conf".to_string(),
            reload_command: "nginx -s reload".to_string(),
            skip_syntax_check: false,
            backup_dir: "backups".to_string(),
            snapshot_dir: "snapshots".to_string(),
            probe_timeout_secs: 10,
            probe_retry_delay_ms: 1000,
            debug: false,
            log_json: false,
        }
    }
}

impl Config {
    /// Where pre-patch copies of proxy config files go.
    pub fn config_backup_dir(&self) -> PathBuf {
        Path::new(&self.backup_dir).join("nginx")
    }

    pub fn health_check_config(&self) -> HealthCheckConfig {
        HealthCheckConfig {
            timeout: Duration::from_secs(self.probe_timeout_secs),
            retry_delay: Duration::from_millis(self.probe_retry_delay_ms),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

pub fn load_config() -> anyhow::Result<Config> {
    let defaults = Config::default();

    let services_file = std::env::var("FAILOVER_SERVICES_FILE")
        .unwrap_or(defaults.services_file);

    let db_path = std::env::var("FAILOVER_DB_PATH").unwrap_or(defaults.db_path);

    let nginx_conf_dir = std::env::var("FAILOVER_NGINX_CONF_DIR")
        .unwrap_or(defaults.nginx_conf_dir);

    let conf_extension = std::env::var("FAILOVER_CONF_EXTENSION")
        .unwrap_or(defaults.conf_extension);

    let reload_command = std::env::var("FAILOVER_RELOAD_CMD")
        .unwrap_or(defaults.reload_command);

    let skip_syntax_check = env_flag("FAILOVER_SKIP_SYNTAX_CHECK");

    let backup_dir = std::env::var("FAILOVER_BACKUP_DIR").unwrap_or(defaults.backup_dir);

    let snapshot_dir = std::env::var("FAILOVER_SNAPSHOT_DIR").unwrap_or(defaults.snapshot_dir);

    let probe_timeout_secs = std::env::var("FAILOVER_PROBE_TIMEOUT_SECS")
        .unwrap_or_else(|_| "10".to_string())
        .parse()
        .unwrap_or(defaults.probe_timeout_secs);

    let probe_retry_delay_ms = std::env::var("FAILOVER_PROBE_RETRY_DELAY_MS")
        .unwrap_or_else(|_| "1000".to_string())
        .parse()
        .unwrap_or(defaults.probe_retry_delay_ms);

    let debug = std::env::var("DEBUG").is_ok();
    let log_json = env_flag("FAILOVER_LOG_JSON");

    Ok(Config {
        services_file,
        db_path,
        nginx_conf_dir,
        conf_extension,
        reload_command,
        skip_syntax_check,
        backup_dir,
        snapshot_dir,
        probe_timeout_secs,
        probe_retry_delay_ms,
        debug,
        log_json,
    })
}

/// Services file validation errors. All are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read services file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid services file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no services configured")]
    NoServices,
    #[error("invalid service name {0:?}: must be non-empty and free of path separators")]
    InvalidName(String),
    #[error("service {0}: domain is required")]
    MissingDomain(String),
    #[error("service {service}: invalid check url {url:?}: {reason}")]
    InvalidCheckUrl {
        service: String,
        url: String,
        reason: String,
    },
    #[error("service {service}: {field} must be greater than zero")]
    ZeroInterval { service: String, field: &'static str },
    #[error("service {service}: invalid {which} target: {reason}")]
    InvalidTarget {
        service: String,
        which: &'static str,
        reason: String,
    },
    #[error("domain {domain} is configured by both {first} and {second}")]
    DuplicateDomain {
        domain: String,
        first: String,
        second: String,
    },
}

#[derive(Debug, Deserialize)]
struct ServicesFile {
    #[serde(default)]
    services: BTreeMap<String, ServiceSpec>,
}

/// Read and validate the services file.
pub fn load_services(path: impl AsRef<Path>) -> Result<Vec<ServiceSpec>, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_services(&text)
}

/// Parse and validate services TOML. Services come back ordered by name.
pub fn parse_services(text: &str) -> Result<Vec<ServiceSpec>, ConfigError> {
    let file: ServicesFile = toml::from_str(text)?;
    if file.services.is_empty() {
        return Err(ConfigError::NoServices);
    }

    let mut seen: HashMap<String, String> = HashMap::new();
    let mut services = Vec::with_capacity(file.services.len());

    for (name, mut spec) in file.services {
        spec.name = name;
        validate_service(&spec)?;

        let key = spec.domain.to_lowercase();
        if let Some(first) = seen.get(&key) {
            return Err(ConfigError::DuplicateDomain {
                domain: spec.domain.clone(),
                first: first.clone(),
                second: spec.name.clone(),
            });
        }
        seen.insert(key, spec.name.clone());
        services.push(spec);
    }

    Ok(services)
}

/// Validate a single service definition.
pub fn validate_service(spec: &ServiceSpec) -> Result<(), ConfigError> {
    // names become archive file names
    let name = spec.name.as_str();
    if name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
    {
        return Err(ConfigError::InvalidName(spec.name.clone()));
    }

    if spec.domain.trim().is_empty() {
        return Err(ConfigError::MissingDomain(spec.name.clone()));
    }

    let url = reqwest::Url::parse(&spec.check).map_err(|e| ConfigError::InvalidCheckUrl {
        service: spec.name.clone(),
        url: spec.check.clone(),
        reason: e.to_string(),
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidCheckUrl {
            service: spec.name.clone(),
            url: spec.check.clone(),
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }

    if spec.interval == 0 {
        return Err(ConfigError::ZeroInterval {
            service: spec.name.clone(),
            field: "interval",
        });
    }
    if spec.error_delay == 0 {
        return Err(ConfigError::ZeroInterval {
            service: spec.name.clone(),
            field: "error_delay",
        });
    }

    validate_target(&spec.name, "if_failed", &spec.if_failed)?;
    if let Some(target) = &spec.if_success {
        validate_target(&spec.name, "if_success", target)?;
    }

    if let Some(retries) = spec.retries {
        if !(MIN_ATTEMPTS..=MAX_ATTEMPTS).contains(&retries) {
            tracing::warn!(
                service = %spec.name,
                retries,
                "retries outside {}..={}, will be clamped",
                MIN_ATTEMPTS,
                MAX_ATTEMPTS
            );
        }
    }

    Ok(())
}

fn validate_target(service: &str, which: &'static str, target: &TargetSpec) -> Result<(), ConfigError> {
    let reason = if target.host.trim().is_empty() {
        "host is empty"
    } else if target.port == 0 {
        "port must be non-zero"
    } else {
        return Ok(());
    };
    Err(ConfigError::InvalidTarget {
        service: service.to_string(),
        which,
        reason: reason.to_string(),
    })
}
