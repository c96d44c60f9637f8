//! Engine configuration with layered loading.
//!
//! TOML file first, then `SPINDLE_` environment variables (`__` separates
//! nested keys, e.g. `SPINDLE_SSH__USER=deploy`). Durations are written as
//! `"500ms"`, `"30s"`, `"5m"`, `"72h"` or `"7d"`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(Box<figment::Error>),

    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding `jobs.json`.
    pub state_dir: PathBuf,

    /// Directory holding one `<job_id>.log` artifact per job.
    pub log_dir: PathBuf,

    /// Size of the in-memory recent-lines buffer per job.
    pub recent_log_capacity: usize,

    /// Log artifacts older than this are deleted by the sweep.
    #[serde(with = "duration_str")]
    pub log_retention: Duration,

    /// Terminal jobs older than this are removed by the retention sweep.
    #[serde(with = "duration_str")]
    pub job_retention: Duration,

    /// How often the background sweeps run.
    #[serde(with = "duration_str")]
    pub sweep_interval: Duration,

    /// Per-stream cap on captured command output.
    pub output_cap_bytes: usize,

    /// Used when a remote-exec job does not specify a timeout.
    #[serde(with = "duration_str")]
    pub default_command_timeout: Duration,

    /// How long `shutdown` waits for running jobs.
    #[serde(with = "duration_str")]
    pub shutdown_grace: Duration,

    /// Worker threads of the dedicated job runtime (CLI).
    pub job_worker_threads: usize,

    pub ssh: SshConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("./spindle-data"),
            log_dir: PathBuf::from("./spindle-data/logs"),
            recent_log_capacity: 100,
            log_retention: Duration::from_secs(72 * 3600),
            job_retention: Duration::from_secs(7 * 24 * 3600),
            sweep_interval: Duration::from_secs(3600),
            output_cap_bytes: 10 * 1024,
            default_command_timeout: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(30),
            job_worker_threads: 4,
            ssh: SshConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub port: u16,
    #[serde(with = "duration_str")]
    pub connect_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from the specified file path.
    ///
    /// Environment variables prefixed with `SPINDLE_` override file settings.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let figment = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SPINDLE_").split("__"));
        figment.extract::<Self>()?.validated()
    }

    /// Defaults plus environment overrides, no file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Env::prefixed("SPINDLE_").split("__"));
        figment.extract::<Self>()?.validated()
    }

    /// Parses configuration from a TOML string (defaults fill the gaps).
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::string(content));
        figment.extract::<Self>()?.validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.recent_log_capacity == 0 {
            return Err(ConfigError::Invalid(
                "recent_log_capacity must be at least 1".to_string(),
            ));
        }
        if self.output_cap_bytes == 0 {
            return Err(ConfigError::Invalid(
                "output_cap_bytes must be at least 1".to_string(),
            ));
        }
        if self.job_worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "job_worker_threads must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}

pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("Invalid duration (missing unit): {s}"))?;
    let (value, unit) = s.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| format!("Invalid duration: {s}"))?;
    let scale: u64 = match unit.trim() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return Err(format!("Invalid duration unit: {s}")),
    };
    let secs = value
        .checked_mul(scale)
        .ok_or_else(|| format!("Invalid duration: {s}"))?;
    Ok(Duration::from_secs(secs))
}

pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 != 0 {
        return format!("{ms}ms");
    }
    let secs = d.as_secs();
    match secs {
        s if s != 0 && s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s != 0 && s % 3600 == 0 => format!("{}h", s / 3600),
        s if s != 0 && s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{s}s"),
    }
}

mod duration_str {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// `Option<Duration>` written as seconds (`30`) or a duration string (`"30s"`).
pub(crate) mod duration_opt {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(
        d: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => serializer.serialize_some(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
            Some(Raw::Text(text)) => parse_duration(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("500ms", Duration::from_millis(500))]
    #[case("30s", Duration::from_secs(30))]
    #[case("5m", Duration::from_secs(300))]
    #[case("72h", Duration::from_secs(72 * 3600))]
    #[case("7d", Duration::from_secs(7 * 86_400))]
    fn parses_durations(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(input).unwrap(), expected);
        assert_eq!(parse_duration(&format_duration(expected)).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("10")]
    #[case("ten s")]
    #[case("5w")]
    #[case("300000000000000d")]
    #[case("99999999999999999999s")]
    fn rejects_bad_durations(#[case] input: &str) {
        assert!(parse_duration(input).is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.recent_log_capacity, 100);
        assert_eq!(config.log_retention, Duration::from_secs(72 * 3600));
        assert_eq!(config.output_cap_bytes, 10 * 1024);
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = EngineConfig::parse(
            r#"
            state_dir = "/var/lib/spindle"
            log_retention = "24h"
            recent_log_capacity = 20

            [ssh]
            user = "deploy"
            "#,
        )
        .unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/spindle"));
        assert_eq!(config.log_retention, Duration::from_secs(24 * 3600));
        assert_eq!(config.recent_log_capacity, 20);
        assert_eq!(config.ssh.user, "deploy");
        assert_eq!(config.ssh.port, 22);
        assert_eq!(config.output_cap_bytes, 10 * 1024);
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let err = EngineConfig::parse("recent_log_capacity = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct WithTimeout {
        #[serde(default, with = "duration_opt")]
        timeout: Option<Duration>,
    }

    #[rstest]
    #[case(r#"{"timeout": 2}"#, Some(Duration::from_secs(2)))]
    #[case(r#"{"timeout": "500ms"}"#, Some(Duration::from_millis(500)))]
    #[case(r#"{"timeout": null}"#, None)]
    #[case(r#"{}"#, None)]
    fn optional_durations_accept_numbers_and_strings(
        #[case] json: &str,
        #[case] expected: Option<Duration>,
    ) {
        let parsed: WithTimeout = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.timeout, expected);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = EngineConfig::load_from("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
