//! Configuration loader and validator for the listing watcher.
use crate::model::{NotificationMethod, SearchCriteria};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub source: Source,
    pub criteria: SearchCriteria,
    pub schedule: Schedule,
    pub notify: Notify,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Write fetched markup to `<data_dir>/debug/` when it yields no listings.
    #[serde(default)]
    pub dump_empty_pages: bool,
}

/// The listings page being watched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub url: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Polling cadence. All durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    pub normal_interval_secs: u64,
    pub normal_jitter_secs: u64,
    pub short_interval_secs: u64,
    pub short_jitter_secs: u64,
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
    pub quiet_hours: QuietHoursConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuietHoursConfig {
    pub enabled: bool,
    pub start_hour: u32,
    pub end_hour: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notify {
    pub method: NotificationMethod,
    /// When false a failed send leaves the listing unseen so the next cycle
    /// retries it.
    #[serde(default)]
    pub mark_seen_on_failure: bool,
    #[serde(default)]
    pub email: Option<Email>,
    #[serde(default)]
    pub push: Option<Push>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Email {
    #[serde(default)]
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Push {
    #[serde(default = "default_push_server")]
    pub server: String,
    #[serde(default)]
    pub topic: String,
}

impl Default for Push {
    fn default() -> Self {
        Self {
            server: default_push_server(),
            topic: String::new(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_min_interval_secs() -> u64 {
    60
}

fn default_smtp_port() -> u16 {
    587
}

fn default_push_server() -> String {
    "https://ntfy.sh".to_string()
}

impl App {
    /// `data_dir` with a leading `~/` expanded to `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        if let Some(rest) = self.data_dir.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return format!("{}/{}", home.trim_end_matches('/'), rest);
            }
        }
        self.data_dir.clone()
    }
}

impl Source {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// `DATABASE_URL` if set, otherwise a SQLite file inside the data dir.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/flat-watch.db", self.app.resolved_data_dir()))
    }

    /// Directory for markup dumps, if enabled.
    pub fn debug_dir(&self) -> Option<std::path::PathBuf> {
        self.app
            .dump_empty_pages
            .then(|| Path::new(&self.app.resolved_data_dir()).join("debug"))
    }
}

/// Upper bound for any configured duration: one week.
const MAX_SECS: u64 = 7 * 24 * 3600;

/// Load configuration from a YAML file, apply environment overrides and
/// validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let cfg = read(path)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Parse the file and apply environment overrides without validating.
/// Callers check whichever sections they use.
pub fn read(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    apply_overrides(&mut cfg, |key| std::env::var(key).ok())?;
    Ok(cfg)
}

/// Overlay secrets and the transport choice from the environment. `lookup`
/// is `std::env::var` outside of tests.
pub fn apply_overrides<F>(cfg: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(method) = lookup("NOTIFICATION_METHOD") {
        cfg.notify.method = NotificationMethod::parse_method(&method)
            .ok_or(ConfigError::Invalid("NOTIFICATION_METHOD must be email or push"))?;
    }

    let email_keys = [
        "EMAIL_SMTP_SERVER",
        "EMAIL_SMTP_PORT",
        "EMAIL_USERNAME",
        "EMAIL_PASSWORD",
        "EMAIL_TO",
    ];
    if email_keys.iter().any(|k| lookup(k).is_some()) {
        let email = cfg.notify.email.get_or_insert_with(|| Email {
            smtp_port: default_smtp_port(),
            ..Default::default()
        });
        if let Some(v) = lookup("EMAIL_SMTP_SERVER") {
            email.smtp_server = v;
        }
        if let Some(v) = lookup("EMAIL_SMTP_PORT") {
            email.smtp_port = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid("EMAIL_SMTP_PORT must be a port number"))?;
        }
        if let Some(v) = lookup("EMAIL_USERNAME") {
            email.username = v;
        }
        if let Some(v) = lookup("EMAIL_PASSWORD") {
            email.password = v;
        }
        if let Some(v) = lookup("EMAIL_TO") {
            email.to = v;
        }
    }

    if let Some(topic) = lookup("NTFY_TOPIC") {
        cfg.notify.push.get_or_insert_with(Push::default).topic = topic;
    }
    Ok(())
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    validate_source(cfg)?;
    validate_schedule(&cfg.schedule)?;
    validate_notify(&cfg.notify)
}

/// Checks only the `source` and `criteria` sections, enough for reading and
/// filtering a page.
pub fn validate_source(cfg: &Config) -> Result<(), ConfigError> {
    if reqwest::Url::parse(&cfg.source.url).is_err() {
        return Err(ConfigError::Invalid("source.url must be an absolute URL"));
    }
    if cfg.source.fetch_timeout_secs == 0 || cfg.source.fetch_timeout_secs > MAX_SECS {
        return Err(ConfigError::Invalid(
            "source.fetch_timeout_secs must be in 1..=604800",
        ));
    }

    let c = &cfg.criteria;
    let bounds = [c.max_cold_rent, c.min_rooms, c.max_rooms, c.max_area];
    if bounds.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(ConfigError::Invalid(
            "criteria values must be finite and non-negative",
        ));
    }
    if c.min_rooms > c.max_rooms {
        return Err(ConfigError::Invalid("criteria.min_rooms must be <= criteria.max_rooms"));
    }
    Ok(())
}

fn validate_schedule(s: &Schedule) -> Result<(), ConfigError> {
    let durations = [
        s.normal_interval_secs,
        s.normal_jitter_secs,
        s.short_interval_secs,
        s.short_jitter_secs,
        s.min_interval_secs,
    ];
    if durations.iter().any(|v| *v > MAX_SECS) {
        return Err(ConfigError::Invalid(
            "schedule intervals and jitters must be <= 604800 seconds",
        ));
    }
    if s.normal_interval_secs == 0 {
        return Err(ConfigError::Invalid("schedule.normal_interval_secs must be > 0"));
    }
    if s.short_interval_secs == 0 {
        return Err(ConfigError::Invalid("schedule.short_interval_secs must be > 0"));
    }
    if s.short_interval_secs > s.normal_interval_secs {
        return Err(ConfigError::Invalid(
            "schedule.short_interval_secs must be <= schedule.normal_interval_secs",
        ));
    }
    let q = &s.quiet_hours;
    if q.start_hour > 23 || q.end_hour > 23 {
        return Err(ConfigError::Invalid("schedule.quiet_hours hours must be in 0..=23"));
    }
    if q.enabled && q.start_hour == q.end_hour {
        return Err(ConfigError::Invalid(
            "schedule.quiet_hours.start_hour must differ from end_hour",
        ));
    }
    Ok(())
}

fn validate_notify(notify: &Notify) -> Result<(), ConfigError> {
    match notify.method {
        NotificationMethod::Email => {
            let Some(email) = notify.email.as_ref() else {
                return Err(ConfigError::Invalid("notify.email is required for method email"));
            };
            if email.smtp_server.trim().is_empty() {
                return Err(ConfigError::Invalid("notify.email.smtp_server must be non-empty"));
            }
            if email.smtp_port == 0 {
                return Err(ConfigError::Invalid("notify.email.smtp_port must be > 0"));
            }
            if email.username.trim().is_empty() {
                return Err(ConfigError::Invalid("notify.email.username must be non-empty"));
            }
            if email.password.is_empty() {
                return Err(ConfigError::Invalid("notify.email.password must be non-empty"));
            }
            if email.to.trim().is_empty() {
                return Err(ConfigError::Invalid("notify.email.to must be non-empty"));
            }
        }
        NotificationMethod::Push => {
            let Some(push) = notify.push.as_ref() else {
                return Err(ConfigError::Invalid("notify.push is required for method push"));
            };
            if reqwest::Url::parse(&push.server).is_err() {
                return Err(ConfigError::Invalid("notify.push.server must be an absolute URL"));
            }
            if push.topic.trim().is_empty() {
                return Err(ConfigError::Invalid("notify.push.topic must be non-empty"));
            }
        }
    }

    Ok(())
}

/// Returns the example YAML shipped with the project.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  dump_empty_pages: true

source:
  url: "https://www.inberlinwohnen.de/wohnungsfinder"
  fetch_timeout_secs: 30

criteria:
  max_cold_rent: 440
  min_rooms: 1
  max_rooms: 2
  max_area: 50

schedule:
  normal_interval_secs: 300
  normal_jitter_secs: 180
  short_interval_secs: 60
  short_jitter_secs: 30
  min_interval_secs: 60
  quiet_hours:
    enabled: true
    start_hour: 21
    end_hour: 8

notify:
  method: push
  mark_seen_on_failure: false
  email:
    smtp_server: "smtp.gmail.com"
    smtp_port: 587
    username: "watcher@example.com"
    password: "APP_PASSWORD"
    to: "me@example.com"
  push:
    server: "https://ntfy.sh"
    topic: "flat-watch-demo"
"#
}
