use crate::cron::CronSchedule;
use crate::error::{OverseerError, Result};
use crate::logs::{DateFormat, DEFAULT_DATE_FORMAT};
use crate::process::StopSignal;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub mod units;

/// Declarative description of one supervised app
///
/// Field names follow the PM2 ecosystem format. Durations accept integer milliseconds
/// or suffixed strings (`"10s"`), sizes accept integer bytes or suffixed strings (`"1G"`).
/// Unknown keys are rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppSpec {
    /// App name (unique identifier)
    pub name: String,

    /// Path to the script or executable to run
    pub script: PathBuf,

    /// Command-line arguments (list, or one whitespace-separated string)
    #[serde(default, deserialize_with = "units::deserialize_args")]
    pub args: Vec<String>,

    /// Interpreter the script is passed to; `none` or absent runs the script directly
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Working directory for the process
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Environment overlay applied on top of the supervisor's environment
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Stdout log file (defaults to `<log_dir>/<name>-out.log`)
    #[serde(default)]
    pub out_file: Option<PathBuf>,

    /// Stderr log file (defaults to `<log_dir>/<name>-error.log`)
    #[serde(default)]
    pub error_file: Option<PathBuf>,

    /// Accepted for PM2 compatibility. Every app runs a single instance, so log file
    /// names never carry an instance suffix and there is nothing to merge.
    #[serde(default)]
    pub merge_logs: bool,

    /// Timestamp format for captured lines (strftime or moment tokens)
    #[serde(default = "default_log_date_format")]
    pub log_date_format: String,

    /// Resident memory ceiling in bytes; exceeding it triggers a restart
    #[serde(default, deserialize_with = "units::deserialize_size")]
    pub max_memory_restart: Option<u64>,

    /// Whether to restart automatically after a crash
    #[serde(default = "default_autorestart")]
    pub autorestart: bool,

    /// Consecutive crash restarts allowed before giving up
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Running time after which the process counts as stable
    #[serde(
        default = "default_min_uptime",
        deserialize_with = "units::deserialize_duration"
    )]
    pub min_uptime: Duration,

    /// Startup window for the readiness signal
    #[serde(
        default = "default_listen_timeout",
        deserialize_with = "units::deserialize_duration"
    )]
    pub listen_timeout: Duration,

    /// Grace period between the stop signal and a forced kill
    #[serde(
        default = "default_kill_timeout",
        deserialize_with = "units::deserialize_duration"
    )]
    pub kill_timeout: Duration,

    /// Fixed delay before a crash restart
    #[serde(default, deserialize_with = "units::deserialize_duration")]
    pub restart_delay: Duration,

    /// Initial delay of an exponential crash backoff; overrides `restart_delay`
    #[serde(default, deserialize_with = "units::deserialize_opt_duration")]
    pub exp_backoff_restart_delay: Option<Duration>,

    /// Cron expression for scheduled restarts
    #[serde(default)]
    pub cron_restart: Option<String>,

    /// Signal sent on graceful stop
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// `host:port` that must accept a TCP connection before the app counts as ready
    #[serde(default)]
    pub ready_address: Option<String>,
}

// Default value functions for serde
fn default_log_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

fn default_autorestart() -> bool {
    true
}

fn default_max_restarts() -> u32 {
    16
}

fn default_min_uptime() -> Duration {
    Duration::from_millis(1000)
}

fn default_listen_timeout() -> Duration {
    Duration::from_millis(3000)
}

fn default_kill_timeout() -> Duration {
    Duration::from_millis(1600)
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_memory_check_interval() -> Duration {
    Duration::from_secs(30)
}

impl AppSpec {
    /// Minimal spec for `script`, with every other option at its default
    pub fn new(name: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            args: Vec::new(),
            interpreter: None,
            cwd: None,
            env: HashMap::new(),
            out_file: None,
            error_file: None,
            merge_logs: false,
            log_date_format: default_log_date_format(),
            max_memory_restart: None,
            autorestart: default_autorestart(),
            max_restarts: default_max_restarts(),
            min_uptime: default_min_uptime(),
            listen_timeout: default_listen_timeout(),
            kill_timeout: default_kill_timeout(),
            restart_delay: Duration::ZERO,
            exp_backoff_restart_delay: None,
            cron_restart: None,
            stop_signal: default_stop_signal(),
            ready_address: None,
        }
    }

    /// Validate this app on its own (cross-app checks live in [`load_apps`])
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OverseerError::MissingConfigField("name".to_string()));
        }

        if self.script.as_os_str().is_empty() {
            return Err(OverseerError::MissingConfigField("script".to_string()));
        }

        if self.listen_timeout.is_zero() {
            return Err(OverseerError::ConfigValidationError(
                "listen_timeout must be positive".to_string(),
            ));
        }

        if self.kill_timeout.is_zero() {
            return Err(OverseerError::ConfigValidationError(
                "kill_timeout must be positive".to_string(),
            ));
        }

        if self.max_memory_restart == Some(0) {
            return Err(OverseerError::ConfigValidationError(
                "max_memory_restart must be positive".to_string(),
            ));
        }

        self.stop_signal()?;
        self.date_format()?;
        self.cron_schedule()?;
        self.ready_socket()?;

        if let Some(ref cwd) = self.cwd {
            if !cwd.exists() {
                return Err(OverseerError::ConfigValidationError(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                )));
            }
            if !cwd.is_dir() {
                return Err(OverseerError::ConfigValidationError(format!(
                    "Working directory is not a directory: {}",
                    cwd.display()
                )));
            }
        }

        Ok(())
    }

    pub fn stop_signal(&self) -> Result<StopSignal> {
        StopSignal::from_str(&self.stop_signal)
    }

    pub fn date_format(&self) -> Result<DateFormat> {
        DateFormat::parse(&self.log_date_format)
    }

    /// Parsed `cron_restart`, if configured
    pub fn cron_schedule(&self) -> Result<Option<CronSchedule>> {
        self.cron_restart
            .as_deref()
            .map(CronSchedule::parse)
            .transpose()
    }

    pub fn ready_socket(&self) -> Result<Option<SocketAddr>> {
        self.ready_address
            .as_deref()
            .map(|addr| {
                addr.parse::<SocketAddr>().map_err(|e| {
                    OverseerError::ConfigValidationError(format!(
                        "Invalid ready_address '{}': {}",
                        addr, e
                    ))
                })
            })
            .transpose()
    }

    /// Program and arguments as they will be executed
    pub fn command_line(&self) -> (PathBuf, Vec<String>) {
        match self.interpreter.as_deref() {
            None | Some("none") | Some("") => (self.script.clone(), self.args.clone()),
            Some(interpreter) => {
                let mut args = Vec::with_capacity(self.args.len() + 1);
                args.push(self.script.to_string_lossy().into_owned());
                args.extend(self.args.iter().cloned());
                (PathBuf::from(interpreter), args)
            }
        }
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.out_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}-out.log", self.name)))
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.error_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}-error.log", self.name)))
    }

    /// Fill in default log paths under `log_dir`
    fn resolve_log_paths(&mut self, log_dir: &Path) {
        if self.out_file.is_none() {
            self.out_file = Some(log_dir.join(format!("{}-out.log", self.name)));
        }
        if self.error_file.is_none() {
            self.error_file = Some(log_dir.join(format!("{}-error.log", self.name)));
        }
    }

    /// Expand environment variables in configuration fields
    fn expand_env_vars(&mut self) {
        self.script = expand_env_in_path(&self.script);

        if let Some(ref cwd) = self.cwd {
            self.cwd = Some(expand_env_in_path(cwd));
        }
        if let Some(ref out) = self.out_file {
            self.out_file = Some(expand_env_in_path(out));
        }
        if let Some(ref err) = self.error_file {
            self.error_file = Some(expand_env_in_path(err));
        }

        self.args = self
            .args
            .iter()
            .map(|arg| expand_env_in_string(arg))
            .collect();

        // Values only
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }
}

/// Supervisor-wide settings (`[supervisor]` table)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorSettings {
    /// Directory for log files of apps without explicit `out_file`/`error_file`
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// How often running processes are sampled for memory usage
    #[serde(
        default = "default_memory_check_interval",
        deserialize_with = "units::deserialize_duration"
    )]
    pub memory_check_interval: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            memory_check_interval: default_memory_check_interval(),
        }
    }
}

/// An app entry that failed validation and will never be started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedApp {
    /// Name from the entry, or `#<index>` when it has none
    pub name: String,
    pub reason: String,
}

/// Result of loading a configuration file
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub settings: SupervisorSettings,
    pub apps: Vec<AppSpec>,
    pub rejected: Vec<RejectedApp>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile<V> {
    #[serde(default)]
    supervisor: SupervisorSettings,
    #[serde(default = "Vec::new")]
    apps: Vec<V>,
}

/// One app entry before typed deserialization, so a bad entry only rejects itself
struct RawApp {
    name: Option<String>,
    spec: Result<AppSpec>,
}

/// Load app specs from a file (supports TOML and JSON)
///
/// File-level problems (unreadable file, syntax errors, unknown top-level keys) fail the
/// whole load. Problems with a single app entry only reject that entry.
pub fn load_apps(path: &Path) -> Result<LoadedConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| OverseerError::ConfigError(format!("Failed to read config file: {}", e)))?;

    let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

    let (settings, raw) = match extension {
        "toml" => parse_toml(&contents)?,
        "json" => parse_json(&contents)?,
        _ => {
            return Err(OverseerError::InvalidConfig(format!(
                "Unsupported file format: {}. Use .toml or .json",
                extension
            )))
        }
    };

    Ok(build_loaded_config(settings, raw))
}

fn parse_toml(contents: &str) -> Result<(SupervisorSettings, Vec<RawApp>)> {
    let file: ConfigFile<toml::Value> = toml::from_str(contents)
        .map_err(|e| OverseerError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

    let raw = file
        .apps
        .into_iter()
        .map(|value| RawApp {
            name: value
                .get("name")
                .and_then(|n| n.as_str())
                .map(str::to_string),
            spec: value
                .try_into::<AppSpec>()
                .map_err(|e| OverseerError::InvalidConfig(e.to_string())),
        })
        .collect();

    Ok((file.supervisor, raw))
}

fn parse_json(contents: &str) -> Result<(SupervisorSettings, Vec<RawApp>)> {
    let file: ConfigFile<serde_json::Value> = serde_json::from_str(contents)
        .map_err(|e| OverseerError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?;

    let raw = file
        .apps
        .into_iter()
        .map(|value| RawApp {
            name: value
                .get("name")
                .and_then(|n| n.as_str())
                .map(str::to_string),
            spec: serde_json::from_value::<AppSpec>(value)
                .map_err(|e| OverseerError::InvalidConfig(e.to_string())),
        })
        .collect();

    Ok((file.supervisor, raw))
}

fn build_loaded_config(settings: SupervisorSettings, raw: Vec<RawApp>) -> LoadedConfig {
    let mut apps: Vec<AppSpec> = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();
    let mut names = HashSet::new();
    let mut log_owners: HashMap<PathBuf, String> = HashMap::new();

    for (index, entry) in raw.into_iter().enumerate() {
        let label = entry.name.unwrap_or_else(|| format!("#{}", index));

        let checked = entry.spec.and_then(|mut spec| {
            spec.expand_env_vars();
            spec.resolve_log_paths(&settings.log_dir);
            spec.validate()?;

            if names.contains(&spec.name) {
                return Err(OverseerError::ConfigValidationError(format!(
                    "Duplicate app name: {}",
                    spec.name
                )));
            }

            for path in [spec.stdout_path(), spec.stderr_path()] {
                if let Some(owner) = log_owners.get(&path) {
                    if owner != &spec.name {
                        return Err(OverseerError::ConfigValidationError(format!(
                            "Log file {} is already used by app {}",
                            path.display(),
                            owner
                        )));
                    }
                }
            }

            Ok(spec)
        });

        match checked {
            Ok(spec) => {
                names.insert(spec.name.clone());
                for path in [spec.stdout_path(), spec.stderr_path()] {
                    log_owners.insert(path, spec.name.clone());
                }
                apps.push(spec);
            }
            Err(e) => {
                warn!("Rejecting app {}: {}", label, e);
                rejected.push(RejectedApp {
                    name: label,
                    reason: e.to_string(),
                });
            }
        }
    }

    LoadedConfig {
        settings,
        apps,
        rejected,
    }
}

/// Expand environment variables in a string ($VAR and ${VAR})
fn expand_env_in_string(s: &str) -> String {
    let mut result = s.to_string();

    // Longest names first so $HOME_DIR is not clobbered by $HOME
    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    vars.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    for (key, value) in vars {
        result = result.replace(&format!("${{{}}}", key), &value);
        result = result.replace(&format!("${}", key), &value);
    }

    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(expand_env_in_string(&path_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, file: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(file);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_app_spec_defaults() {
        let spec = AppSpec::new("test", "/bin/echo");

        assert!(spec.autorestart);
        assert_eq!(spec.max_restarts, 16);
        assert_eq!(spec.min_uptime, Duration::from_secs(1));
        assert_eq!(spec.listen_timeout, Duration::from_secs(3));
        assert_eq!(spec.kill_timeout, Duration::from_millis(1600));
        assert_eq!(spec.restart_delay, Duration::ZERO);
        assert_eq!(spec.stop_signal, "SIGTERM");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_name() {
        let spec = AppSpec::new("", "/bin/echo");
        assert!(matches!(
            spec.validate(),
            Err(OverseerError::MissingConfigField(_))
        ));
    }

    #[test]
    fn test_validate_zero_timeouts() {
        let mut spec = AppSpec::new("test", "/bin/echo");
        spec.kill_timeout = Duration::ZERO;
        assert!(matches!(
            spec.validate(),
            Err(OverseerError::ConfigValidationError(_))
        ));

        let mut spec = AppSpec::new("test", "/bin/echo");
        spec.listen_timeout = Duration::ZERO;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_signal() {
        let mut spec = AppSpec::new("test", "/bin/echo");
        spec.stop_signal = "INVALID".to_string();
        assert!(matches!(
            spec.validate(),
            Err(OverseerError::SignalError(_))
        ));
    }

    #[test]
    fn test_validate_bad_cron() {
        let mut spec = AppSpec::new("test", "/bin/echo");
        spec.cron_restart = Some("every six hours".to_string());
        assert!(matches!(
            spec.validate(),
            Err(OverseerError::SchedulingError(_, _))
        ));
    }

    #[test]
    fn test_validate_missing_cwd() {
        let mut spec = AppSpec::new("test", "/bin/echo");
        spec.cwd = Some(PathBuf::from("/nonexistent/directory"));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_validate_ready_address() {
        let mut spec = AppSpec::new("test", "/bin/echo");
        spec.ready_address = Some("127.0.0.1:8800".to_string());
        assert!(spec.validate().is_ok());

        spec.ready_address = Some("localhost".to_string());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_command_line_with_interpreter() {
        let mut spec = AppSpec::new("scraper", "xvfb-run");
        spec.args = vec!["-a".to_string(), "python".to_string()];

        let (program, args) = spec.command_line();
        assert_eq!(program, PathBuf::from("xvfb-run"));
        assert_eq!(args, vec!["-a", "python"]);

        spec.interpreter = Some("bash".to_string());
        let (program, args) = spec.command_line();
        assert_eq!(program, PathBuf::from("bash"));
        assert_eq!(args, vec!["xvfb-run", "-a", "python"]);

        spec.interpreter = Some("none".to_string());
        assert_eq!(spec.command_line().0, PathBuf::from("xvfb-run"));
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("OVERSEER_TEST_VAR", "test_value");
        std::env::set_var("OVERSEER_TEST_PATH", "/tmp");

        let mut spec = AppSpec::new("test", "$OVERSEER_TEST_PATH/script.sh");
        spec.args = vec!["--arg=${OVERSEER_TEST_VAR}".to_string()];
        spec.cwd = Some(PathBuf::from("${OVERSEER_TEST_PATH}"));
        spec.out_file = Some(PathBuf::from("$OVERSEER_TEST_PATH/out.log"));
        spec.env
            .insert("KEY".to_string(), "$OVERSEER_TEST_VAR".to_string());

        spec.expand_env_vars();

        assert_eq!(spec.script, PathBuf::from("/tmp/script.sh"));
        assert_eq!(spec.args[0], "--arg=test_value");
        assert_eq!(spec.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(spec.out_file, Some(PathBuf::from("/tmp/out.log")));
        assert_eq!(spec.env.get("KEY"), Some(&"test_value".to_string()));
    }

    #[test]
    fn test_load_toml_with_pm2_values() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            "apps.toml",
            r#"
            [supervisor]
            log_dir = "/var/log/workers"
            memory_check_interval = "5s"

            [[apps]]
            name = "mesh-api"
            script = "/usr/bin/uv"
            args = "run python -m uvicorn mesh.mesh_api:app --port 8800"
            max_memory_restart = "2G"
            max_restarts = 10
            min_uptime = "10s"
            listen_timeout = 5000
            kill_timeout = 5000
            log_date_format = "YYYY-MM-DD HH:mm:ss Z"
            merge_logs = true

            [apps.env]
            PYTHONUNBUFFERED = "1"

            [[apps]]
            name = "trending-tokens-scraper"
            script = "xvfb-run"
            interpreter = "bash"
            cron_restart = "0 */6 * * *"
            max_memory_restart = "1G"
            out_file = "/tmp/trending-out.log"
            error_file = "/tmp/trending-error.log"
            "#,
        );

        let loaded = load_apps(&path).unwrap();
        assert!(loaded.rejected.is_empty(), "{:?}", loaded.rejected);
        assert_eq!(loaded.settings.memory_check_interval, Duration::from_secs(5));
        assert_eq!(loaded.apps.len(), 2);

        let api = &loaded.apps[0];
        assert_eq!(api.name, "mesh-api");
        assert_eq!(api.args.len(), 8);
        assert_eq!(api.max_memory_restart, Some(2 * 1024 * 1024 * 1024));
        assert_eq!(api.max_restarts, 10);
        assert_eq!(api.min_uptime, Duration::from_secs(10));
        assert_eq!(api.listen_timeout, Duration::from_secs(5));
        assert_eq!(api.kill_timeout, Duration::from_secs(5));
        assert_eq!(api.env.get("PYTHONUNBUFFERED"), Some(&"1".to_string()));
        assert!(api.merge_logs);
        assert_eq!(
            api.stdout_path(),
            PathBuf::from("/var/log/workers/mesh-api-out.log")
        );
        assert_eq!(
            api.stderr_path(),
            PathBuf::from("/var/log/workers/mesh-api-error.log")
        );

        let scraper = &loaded.apps[1];
        assert_eq!(scraper.cron_restart.as_deref(), Some("0 */6 * * *"));
        assert_eq!(scraper.stdout_path(), PathBuf::from("/tmp/trending-out.log"));
    }

    #[test]
    fn test_load_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            "apps.json",
            r#"
            {
                "apps": [
                    { "name": "app1", "script": "/usr/bin/node", "args": ["server.js"] },
                    { "name": "app2", "script": "/usr/bin/python", "args": ["worker.py"] }
                ]
            }
            "#,
        );

        let loaded = load_apps(&path).unwrap();
        assert_eq!(loaded.apps.len(), 2);
        assert_eq!(loaded.apps[0].name, "app1");
        assert_eq!(loaded.apps[1].args, vec!["worker.py"]);
        assert_eq!(loaded.settings.log_dir, PathBuf::from("logs"));
    }

    #[test]
    fn test_unknown_key_rejects_only_that_app() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            "apps.toml",
            r#"
            [[apps]]
            name = "good"
            script = "/bin/sleep"

            [[apps]]
            name = "typo"
            script = "/bin/sleep"
            autorestrat = false
            "#,
        );

        let loaded = load_apps(&path).unwrap();
        assert_eq!(loaded.apps.len(), 1);
        assert_eq!(loaded.apps[0].name, "good");
        assert_eq!(loaded.rejected.len(), 1);
        assert_eq!(loaded.rejected[0].name, "typo");
        assert!(loaded.rejected[0].reason.contains("autorestrat"));
    }

    #[test]
    fn test_bad_cron_rejects_only_that_app() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            "apps.json",
            r#"
            { "apps": [
                { "name": "scheduled", "script": "/bin/sleep", "cron_restart": "61 * * * *" },
                { "name": "plain", "script": "/bin/sleep" }
            ] }
            "#,
        );

        let loaded = load_apps(&path).unwrap();
        assert_eq!(loaded.apps.len(), 1);
        assert_eq!(loaded.apps[0].name, "plain");
        assert_eq!(loaded.rejected[0].name, "scheduled");
    }

    #[test]
    fn test_duplicate_names_and_shared_logs_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            "apps.toml",
            r#"
            [[apps]]
            name = "a"
            script = "/bin/sleep"
            out_file = "/tmp/shared.log"

            [[apps]]
            name = "a"
            script = "/bin/sleep"

            [[apps]]
            name = "b"
            script = "/bin/sleep"
            out_file = "/tmp/shared.log"
            "#,
        );

        let loaded = load_apps(&path).unwrap();
        assert_eq!(loaded.apps.len(), 1);
        assert_eq!(loaded.rejected.len(), 2);
        assert!(loaded.rejected[0].reason.contains("Duplicate"));
        assert!(loaded.rejected[1].reason.contains("already used"));
    }

    #[test]
    fn test_unknown_top_level_key_fails_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, "apps.toml", "[daemon]\nport = 1\n");

        assert!(matches!(
            load_apps(&path),
            Err(OverseerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, "apps.yaml", "name: test");

        assert!(matches!(
            load_apps(&path),
            Err(OverseerError::InvalidConfig(_))
        ));
    }
}
