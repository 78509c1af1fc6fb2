//! Process configuration.
//!
//! Read from a TOML file when `--config` is given, otherwise from the
//! environment (a `.env` file is loaded first if present).

use anyhow::{bail, Context};
use backup_engine::config::BarrierPolicy;
use backup_engine::{BackupTask, EngineConfig, RetentionPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    pub panel: PanelConfig,

    #[serde(default)]
    pub google: GoogleConfig,

    pub engine: EngineConfig,
}

#[derive(Clone, Deserialize)]
pub struct PanelConfig {
    /// Pterodactyl panel base URL
    pub url: String,

    /// Client API key
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,

    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_path() -> PathBuf {
    PathBuf::from("token.json")
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            token_path: default_token_path(),
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env()?,
        };
        config.engine.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| var(key).with_context(|| format!("{key} is not set"));
        let parsed = |key: &str| -> anyhow::Result<Option<u64>> {
            var(key)
                .map(|v| v.parse::<u64>().with_context(|| format!("{key} must be a number")))
                .transpose()
        };

        let names = split_list(&var("FOLDER_NAMES").unwrap_or_default());
        let paths = split_list(&var("FOLDER_PATHS").unwrap_or_default());
        if names.len() != paths.len() {
            bail!(
                "FOLDER_NAMES has {} entries but FOLDER_PATHS has {}",
                names.len(),
                paths.len()
            );
        }
        let tasks = names
            .into_iter()
            .zip(paths)
            .map(|(name, path)| BackupTask::new(name, path))
            .collect();

        let backup_dir = var("BACKUP_DIR").unwrap_or_else(|| "backups".into());
        let mut engine = EngineConfig::new(backup_dir, tasks);
        if let Some(time) = var("BACKUP_TIME") {
            engine.schedule.time = time;
        }
        if let Some(tz) = var("BACKUP_TIMEZONE") {
            engine.schedule.timezone = tz;
        }
        if let Some(secs) = parsed("TICK_SECS")? {
            engine.schedule.tick_secs = secs;
        }
        if let Some(max) = parsed("MAX_BACKUPS")? {
            engine.retention = RetentionPolicy::keep(usize::try_from(max).context("MAX_BACKUPS is too large")?);
        }
        if let Some(secs) = parsed("PANEL_TIMEOUT_SECS")? {
            engine.power.request_timeout_secs = secs;
        }
        if let Some(flag) = var("SHUTDOWN_BEFORE_BACKUP") {
            engine.shutdown_before_backup = parse_bool(&flag)
                .with_context(|| format!("SHUTDOWN_BEFORE_BACKUP must be true or false, got {flag:?}"))?;
        }
        if let Some(polls) = parsed("BARRIER_MAX_POLLS")? {
            // 0 restores the unbounded wait
            engine.barrier.max_polls = match polls {
                0 => None,
                n => Some(u32::try_from(n).context("BARRIER_MAX_POLLS is too large")?),
            };
        }
        if let Some(policy) = var("BARRIER_POLICY") {
            engine.barrier.policy = match policy.to_ascii_lowercase().as_str() {
                "abort" => BarrierPolicy::Abort,
                "proceed" => BarrierPolicy::Proceed,
                other => bail!("BARRIER_POLICY must be abort or proceed, got {other:?}"),
            };
        }

        let mut google = GoogleConfig::default();
        if let Some(path) = var("GOOGLE_CREDENTIALS_PATH") {
            google.credentials_path = path.into();
        }
        if let Some(path) = var("GOOGLE_TOKEN_PATH") {
            google.token_path = path.into();
        }

        Ok(Self {
            port: parsed("PORT")?
                .map(|p| u16::try_from(p).with_context(|| format!("PORT {p} is out of range")))
                .transpose()?
                .unwrap_or_else(default_port),
            log_level: var("LOG_LEVEL").unwrap_or_else(default_log_level),
            panel: PanelConfig {
                url: required("PTERODACTYL_API_URL")?,
                api_key: required("PTERODACTYL_API_KEY")?,
            },
            google,
            engine,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const PANEL: [(&str, &str); 2] = [
        ("PTERODACTYL_API_URL", "https://panel.example.com"),
        ("PTERODACTYL_API_KEY", "ptlc_secret"),
    ];

    #[test]
    fn test_env_folder_pairs_and_defaults() {
        let mut pairs = PANEL.to_vec();
        pairs.push(("FOLDER_NAMES", "world1, world2"));
        pairs.push(("FOLDER_PATHS", "/srv/a,/srv/b"));

        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.engine.tasks.len(), 2);
        assert_eq!(config.engine.tasks[1].label, "world2");
        assert_eq!(config.engine.tasks[1].source_path, PathBuf::from("/srv/b"));
        assert_eq!(config.engine.schedule.timezone, "Asia/Colombo");
        assert!(config.engine.shutdown_before_backup);
        assert_eq!(config.google.token_path, PathBuf::from("token.json"));
    }

    #[test]
    fn test_env_overrides() {
        let mut pairs = PANEL.to_vec();
        pairs.extend([
            ("BACKUP_TIME", "03:15"),
            ("BACKUP_TIMEZONE", "Europe/Berlin"),
            ("MAX_BACKUPS", "5"),
            ("SHUTDOWN_BEFORE_BACKUP", "false"),
            ("BARRIER_MAX_POLLS", "0"),
            ("BARRIER_POLICY", "Proceed"),
            ("PORT", "8080"),
            ("PANEL_TIMEOUT_SECS", "20"),
        ]);

        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.engine.power.request_timeout_secs, 20);
        assert_eq!(config.engine.schedule.time, "03:15");
        assert_eq!(config.engine.retention.max_backups, 5);
        assert!(!config.engine.shutdown_before_backup);
        assert_eq!(config.engine.barrier.max_polls, None);
        assert_eq!(config.engine.barrier.policy, BarrierPolicy::Proceed);
        config.engine.validate().unwrap();
    }

    #[test]
    fn test_mismatched_folder_lists_are_rejected() {
        let mut pairs = PANEL.to_vec();
        pairs.push(("FOLDER_NAMES", "a,b"));
        pairs.push(("FOLDER_PATHS", "/a"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_out_of_range_numbers_are_rejected() {
        let mut pairs = PANEL.to_vec();
        pairs.push(("PORT", "70000"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = PANEL.to_vec();
        pairs.push(("BARRIER_MAX_POLLS", "4294967296"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_panel_url_is_required() {
        assert!(AppConfig::from_lookup(lookup(&[("PTERODACTYL_API_KEY", "k")])).is_err());
    }

    #[test]
    fn test_toml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(
            &path,
            r#"
            port = 4000

            [panel]
            url = "https://panel.example.com"
            api_key = "k"

            [engine]
            backup_dir = "/srv/backups"
            retention = { max_backups = 7 }

            [[engine.tasks]]
            label = "world1"
            source_path = "/srv/world1"
            "#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();

        assert_eq!(config.port, 4000);
        assert_eq!(config.engine.retention.max_backups, 7);
        assert_eq!(config.engine.tasks[0].label, "world1");
        assert_eq!(config.google.credentials_path, PathBuf::from("credentials.json"));
    }
}
