use crate::domain::error::{AgentError, Result};
use crate::domain::services::InstanceTimings;
use crate::domain::value_objects::{LifecycleEvent, SelfHealingPolicy};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SHARED_DIR: &str = "/var/lib/svcmgr/cluster";

/// Service recipe, loaded from the YAML file named by `SVCMGR_CONFIG_FILE`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceRecipe {
    pub application: String,
    pub service: String,
    /// Start command. Empty means the service manages its own processes.
    #[serde(default)]
    pub start: Vec<String>,
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub storage_allocate: Vec<String>,
    #[serde(default)]
    pub storage_deallocate: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub custom_commands: BTreeMap<String, Vec<String>>,
    /// Hook commands keyed by lifecycle event name (`pre_start`, …).
    #[serde(default)]
    pub lifecycle: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub liveness_detectors: Vec<DetectorSpec>,
    #[serde(default)]
    pub stop_detectors: Vec<DetectorSpec>,
    #[serde(default)]
    pub timeouts: RecipeTimeouts,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectorSpec {
    TcpPort {
        #[serde(default = "default_probe_host")]
        host: String,
        port: u16,
        #[serde(default = "default_probe_timeout_millis")]
        timeout_millis: u64,
    },
    LogPattern {
        /// Defaults to the instance's captured output file.
        file: Option<PathBuf>,
        pattern: String,
    },
    ProcessName {
        name: String,
    },
}

fn default_probe_host() -> String {
    "127.0.0.1".to_string()
}

fn default_probe_timeout_millis() -> u64 {
    1000
}

/// Optional overrides for the built-in timing defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecipeTimeouts {
    pub post_launch_wait_millis: Option<u64>,
    pub post_death_wait_millis: Option<u64>,
    pub drain_period_secs: Option<u64>,
    pub start_detection_timeout_secs: Option<u64>,
    pub start_detection_interval_secs: Option<u64>,
    pub stop_detection_interval_secs: Option<u64>,
    pub process_poll_interval_secs: Option<u64>,
    pub tailer_interval_secs: Option<u64>,
    pub dependency_timeout_secs: Option<u64>,
    pub dependency_poll_secs: Option<u64>,
    pub metrics_cache_window_millis: Option<u64>,
}

impl RecipeTimeouts {
    pub fn timings(&self) -> InstanceTimings {
        let defaults = InstanceTimings::default();
        let secs = |v: Option<u64>, d: Duration| v.map(Duration::from_secs).unwrap_or(d);
        let millis = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);
        InstanceTimings {
            post_launch_wait: millis(self.post_launch_wait_millis, defaults.post_launch_wait),
            post_death_wait: millis(self.post_death_wait_millis, defaults.post_death_wait),
            drain_period: secs(self.drain_period_secs, defaults.drain_period),
            start_detection_timeout: secs(
                self.start_detection_timeout_secs,
                defaults.start_detection_timeout,
            ),
            start_detection_interval: secs(
                self.start_detection_interval_secs,
                defaults.start_detection_interval,
            ),
            stop_detection_interval: secs(
                self.stop_detection_interval_secs,
                defaults.stop_detection_interval,
            ),
            process_poll_interval: secs(
                self.process_poll_interval_secs,
                defaults.process_poll_interval,
            ),
            tailer_interval: secs(self.tailer_interval_secs, defaults.tailer_interval),
            dependency_timeout: secs(self.dependency_timeout_secs, defaults.dependency_timeout),
            dependency_poll_interval: secs(
                self.dependency_poll_secs,
                defaults.dependency_poll_interval,
            ),
            metrics_window: millis(self.metrics_cache_window_millis, defaults.metrics_window),
        }
    }
}

pub fn load_recipe(path: &Path) -> Result<ServiceRecipe> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AgentError::Configuration(format!("reading recipe {}: {e}", path.display()))
    })?;
    let recipe: ServiceRecipe = serde_yaml::from_str(&raw).map_err(|e| {
        AgentError::Configuration(format!("parsing recipe {}: {e}", path.display()))
    })?;
    recipe.validate()?;
    Ok(recipe)
}

impl ServiceRecipe {
    pub fn validate(&self) -> Result<()> {
        for (label, value) in [("application", &self.application), ("service", &self.service)] {
            if value.is_empty() || value.contains(['/', '\\']) || value.contains(char::is_whitespace)
            {
                return Err(AgentError::Configuration(format!(
                    "{label} name '{value}' is empty or contains invalid characters"
                )));
            }
        }
        for (name, command) in &self.custom_commands {
            if command.is_empty() {
                return Err(AgentError::Configuration(format!(
                    "custom command '{name}' has no command line"
                )));
            }
        }
        self.lifecycle_hooks()?;
        Ok(())
    }

    /// Resolve the `lifecycle` section into event/command pairs.
    pub fn lifecycle_hooks(&self) -> Result<Vec<(LifecycleEvent, Vec<String>)>> {
        let mut hooks = Vec::new();
        for (key, command) in &self.lifecycle {
            let event = lifecycle_event_from_key(key).ok_or_else(|| {
                AgentError::Configuration(format!("unknown lifecycle hook '{key}'"))
            })?;
            if command.is_empty() {
                return Err(AgentError::Configuration(format!(
                    "lifecycle hook '{key}' has no command line"
                )));
            }
            hooks.push((event, command.clone()));
        }
        Ok(hooks)
    }
}

fn lifecycle_event_from_key(key: &str) -> Option<LifecycleEvent> {
    Some(match key {
        "pre_service_start" => LifecycleEvent::PreServiceStart,
        "init" => LifecycleEvent::Init,
        "pre_install" => LifecycleEvent::PreInstall,
        "install" => LifecycleEvent::Install,
        "post_install" => LifecycleEvent::PostInstall,
        "pre_start" => LifecycleEvent::PreStart,
        "post_start" => LifecycleEvent::PostStart,
        "pre_stop" => LifecycleEvent::PreStop,
        "stop" => LifecycleEvent::Stop,
        "post_stop" => LifecycleEvent::PostStop,
        "shutdown" => LifecycleEvent::Shutdown,
        "pre_service_stop" => LifecycleEvent::PreServiceStop,
        _ => return None,
    })
}

/// Agent-level options from `SVCMGR_*` environment variables.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub config_file: PathBuf,
    pub work_dir: Option<PathBuf>,
    pub shared_dir: PathBuf,
    pub instance_id: u32,
    pub self_healing: bool,
    pub retry_limit: i64,
    pub async_install: bool,
    pub depends_on: Vec<String>,
    pub log_level: String,
}

impl AgentOptions {
    pub fn from_env() -> Result<Self> {
        let config_file = env_var("SVCMGR_CONFIG_FILE").ok_or_else(|| {
            AgentError::Configuration("SVCMGR_CONFIG_FILE must point at a service recipe".into())
        })?;
        let options = AgentOptions {
            config_file: PathBuf::from(config_file),
            work_dir: env_var("SVCMGR_WORK_DIR").map(PathBuf::from),
            shared_dir: PathBuf::from(
                env_var("SVCMGR_SHARED_DIR").unwrap_or_else(|| DEFAULT_SHARED_DIR.to_string()),
            ),
            instance_id: parse_u32("SVCMGR_INSTANCE_ID", 1)?,
            self_healing: parse_bool("SVCMGR_SELF_HEALING", true)?,
            retry_limit: parse_i64("SVCMGR_RETRY_LIMIT", -1)?,
            async_install: parse_bool("SVCMGR_ASYNC_INSTALL", false)?,
            depends_on: parse_dependency_list(
                &env_var("SVCMGR_DEPENDS_ON").unwrap_or_default(),
            ),
            log_level: parse_log_level("SVCMGR_LOG_LEVEL", "info")?,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn policy(&self) -> SelfHealingPolicy {
        SelfHealingPolicy {
            enabled: self.self_healing,
            retry_limit: self.retry_limit,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.instance_id == 0 {
            return Err(AgentError::Configuration(
                "SVCMGR_INSTANCE_ID must be at least 1".into(),
            ));
        }
        if self.retry_limit < -1 {
            return Err(AgentError::Configuration(
                "SVCMGR_RETRY_LIMIT must be -1 (unlimited) or non-negative".into(),
            ));
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(key: &str, default: bool) -> Result<bool> {
    match env_var(key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(AgentError::Configuration(format!(
                "{key} must be a boolean, got '{raw}'"
            ))),
        },
    }
}

fn parse_u32(key: &str, default: u32) -> Result<u32> {
    match env_var(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            AgentError::Configuration(format!("{key} must be a positive integer, got '{raw}'"))
        }),
    }
}

fn parse_i64(key: &str, default: i64) -> Result<i64> {
    match env_var(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            AgentError::Configuration(format!("{key} must be an integer, got '{raw}'"))
        }),
    }
}

fn parse_log_level(key: &str, default: &str) -> Result<String> {
    let raw = env_var(key).unwrap_or_else(|| default.to_string());
    match raw.to_ascii_lowercase().as_str() {
        level @ ("trace" | "debug" | "info" | "warn" | "error") => Ok(level.to_string()),
        _ => Err(AgentError::Configuration(format!(
            "{key} must be one of trace/debug/info/warn/error, got '{raw}'"
        ))),
    }
}

/// Dependency lists come in both `a,b` and `[a, b]` shapes.
pub fn parse_dependency_list(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SAMPLE: &str = r#"
application: petclinic
service: tomcat
start: ["/opt/tomcat/bin/catalina.sh", "run"]
install: ["/opt/tomcat/install.sh"]
env:
  CATALINA_OPTS: "-Xmx512m"
custom_commands:
  dump-threads: ["/opt/tomcat/bin/jstack.sh"]
lifecycle:
  pre_start: ["/opt/tomcat/hooks/pre-start.sh"]
liveness_detectors:
  - type: tcp_port
    port: 8080
  - type: log_pattern
    pattern: "Server startup in"
stop_detectors:
  - type: tcp_port
    port: 8080
timeouts:
  start_detection_timeout_secs: 120
"#;

    #[test]
    fn test_sample_recipe_parses() {
        let recipe: ServiceRecipe = serde_yaml::from_str(SAMPLE).unwrap();
        recipe.validate().unwrap();
        assert_eq!(recipe.application, "petclinic");
        assert_eq!(recipe.liveness_detectors.len(), 2);
        match &recipe.liveness_detectors[0] {
            DetectorSpec::TcpPort { host, port, timeout_millis } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(*port, 8080);
                assert_eq!(*timeout_millis, 1000);
            }
            other => panic!("unexpected detector {other:?}"),
        }
        let timings = recipe.timeouts.timings();
        assert_eq!(timings.start_detection_timeout, Duration::from_secs(120));
        assert_eq!(
            timings.stop_detection_interval,
            InstanceTimings::default().stop_detection_interval
        );
        let hooks = recipe.lifecycle_hooks().unwrap();
        assert_eq!(hooks, vec![(
            LifecycleEvent::PreStart,
            vec!["/opt/tomcat/hooks/pre-start.sh".to_string()]
        )]);
    }

    #[test]
    fn test_unknown_lifecycle_hook_rejected() {
        let raw = "application: a\nservice: b\nlifecycle:\n  before_launch: [\"x\"]\n";
        let recipe: ServiceRecipe = serde_yaml::from_str(raw).unwrap();
        assert!(matches!(
            recipe.validate().unwrap_err(),
            AgentError::Configuration(_)
        ));
    }

    #[test]
    fn test_unknown_recipe_field_rejected() {
        let raw = "application: a\nservice: b\nlaunch: [\"x\"]\n";
        assert!(serde_yaml::from_str::<ServiceRecipe>(raw).is_err());
    }

    #[test]
    fn test_service_name_with_path_separator_rejected() {
        let raw = "application: a\nservice: \"b/c\"\n";
        let recipe: ServiceRecipe = serde_yaml::from_str(raw).unwrap();
        assert!(recipe.validate().is_err());
    }

    #[test]
    fn test_parse_dependency_list_shapes() {
        assert!(parse_dependency_list("").is_empty());
        assert_eq!(parse_dependency_list("db"), vec!["db"]);
        assert_eq!(parse_dependency_list("db, cache"), vec!["db", "cache"]);
        assert_eq!(parse_dependency_list("[db, cache]"), vec!["db", "cache"]);
    }

    fn clear_env() {
        for key in [
            "SVCMGR_CONFIG_FILE",
            "SVCMGR_WORK_DIR",
            "SVCMGR_SHARED_DIR",
            "SVCMGR_INSTANCE_ID",
            "SVCMGR_SELF_HEALING",
            "SVCMGR_RETRY_LIMIT",
            "SVCMGR_ASYNC_INSTALL",
            "SVCMGR_DEPENDS_ON",
            "SVCMGR_LOG_LEVEL",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_options_defaults() {
        clear_env();
        std::env::set_var("SVCMGR_CONFIG_FILE", "/etc/svcmgr/tomcat.yaml");
        let options = AgentOptions::from_env().unwrap();
        assert_eq!(options.instance_id, 1);
        assert!(options.self_healing);
        assert_eq!(options.retry_limit, -1);
        assert!(!options.async_install);
        assert!(options.depends_on.is_empty());
        assert_eq!(options.log_level, "info");
        assert_eq!(options.shared_dir, PathBuf::from(DEFAULT_SHARED_DIR));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_options_require_config_file() {
        clear_env();
        assert!(matches!(
            AgentOptions::from_env().unwrap_err(),
            AgentError::Configuration(_)
        ));
    }

    #[test]
    #[serial]
    fn test_options_parse_overrides() {
        clear_env();
        std::env::set_var("SVCMGR_CONFIG_FILE", "/etc/svcmgr/tomcat.yaml");
        std::env::set_var("SVCMGR_INSTANCE_ID", "3");
        std::env::set_var("SVCMGR_SELF_HEALING", "no");
        std::env::set_var("SVCMGR_RETRY_LIMIT", "5");
        std::env::set_var("SVCMGR_DEPENDS_ON", "[db, cache]");
        std::env::set_var("SVCMGR_LOG_LEVEL", "DEBUG");
        let options = AgentOptions::from_env().unwrap();
        assert_eq!(options.instance_id, 3);
        assert!(!options.self_healing);
        assert_eq!(options.retry_limit, 5);
        assert_eq!(options.depends_on, vec!["db", "cache"]);
        assert_eq!(options.log_level, "debug");
        assert_eq!(
            options.policy(),
            SelfHealingPolicy {
                enabled: false,
                retry_limit: 5
            }
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_retry_limit_rejected() {
        clear_env();
        std::env::set_var("SVCMGR_CONFIG_FILE", "/etc/svcmgr/tomcat.yaml");
        std::env::set_var("SVCMGR_RETRY_LIMIT", "-2");
        assert!(AgentOptions::from_env().is_err());
        clear_env();
    }
}
