//! Configuration file management for fitplan.
//!
//! Provides a TOML config file at `~/.config/fitplan/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use fitplan_core::worker::WorkerConfig;
use fitplan_db::config::DbConfig;
use fitplan_db::models::Currency;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub payment: PaymentSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub timeout_secs: u64,
    pub concurrency: usize,
    pub poll_interval_secs: u64,
    pub stale_minutes: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        let d = WorkerConfig::default();
        Self {
            max_attempts: d.max_attempts,
            base_delay_secs: d.base_delay.as_secs(),
            timeout_secs: d.assemble_timeout.as_secs(),
            concurrency: d.concurrency,
            poll_interval_secs: d.poll_interval.as_secs(),
            stale_minutes: d.stale_after.as_secs() / 60,
        }
    }
}

impl WorkerSection {
    pub fn to_worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.base_delay_secs),
            assemble_timeout: Duration::from_secs(self.timeout_secs),
            concurrency: self.concurrency,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            stale_after: Duration::from_secs(self.stale_minutes * 60),
        }
    }
}

/// Settings for the mock gateway used by `fitplan simulate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentSection {
    /// Plan price in minor units.
    pub amount: i64,
    pub currency: String,
    pub request_success_rate: f64,
    pub verify_success_rate: f64,
}

impl Default for PaymentSection {
    fn default() -> Self {
        Self {
            amount: 500_000,
            currency: "IRR".to_owned(),
            request_success_rate: 1.0,
            verify_success_rate: 1.0,
        }
    }
}

impl PaymentSection {
    pub fn currency(&self) -> Result<Currency> {
        self.currency
            .parse()
            .with_context(|| format!("invalid payment.currency {:?}", self.currency))
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the fitplan config directory: `$XDG_CONFIG_HOME/fitplan` or
/// `~/.config/fitplan`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("fitplan");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("fitplan")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

/// Serialize and write `config` to `path`, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config_to(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone)]
pub struct FitplanConfig {
    pub db_config: DbConfig,
    pub worker: WorkerSection,
    pub payment: PaymentSection,
}

impl FitplanConfig {
    /// Resolve using the default config path.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        Self::resolve_with(cli_db_url, &config_path())
    }

    /// DB URL: `cli_db_url` > `FITPLAN_DATABASE_URL` > `database.url` in
    /// the file > [`DbConfig::DEFAULT_URL`]. Worker and payment settings
    /// come from the file or their defaults. A missing file is fine; an
    /// unreadable or malformed one is an error.
    pub fn resolve_with(cli_db_url: Option<&str>, path: &Path) -> Result<Self> {
        let file_config = if path.exists() {
            Some(load_config_from(path)?)
        } else {
            None
        };

        let db_url = if let Some(url) = cli_db_url {
            url.to_owned()
        } else if let Ok(url) = std::env::var(DbConfig::ENV_VAR) {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_owned()
        };

        let (worker, payment) = match file_config {
            Some(cfg) => (cfg.worker, cfg.payment),
            None => (WorkerSection::default(), PaymentSection::default()),
        };

        if !(0.0..=1.0).contains(&payment.request_success_rate)
            || !(0.0..=1.0).contains(&payment.verify_success_rate)
        {
            bail!("payment success rates must be between 0.0 and 1.0");
        }

        Ok(Self {
            db_config: DbConfig::new(db_url),
            worker,
            payment,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    fn sample() -> ConfigFile {
        ConfigFile {
            database: DatabaseSection {
                url: "postgresql://testhost:5432/testdb".to_owned(),
            },
            worker: WorkerSection {
                concurrency: 8,
                ..WorkerSection::default()
            },
            payment: PaymentSection::default(),
        }
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("fitplan").join("config.toml");

        save_config_to(&path, &sample()).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, sample());
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        save_config_to(&path, &sample()).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn missing_sections_take_defaults() {
        let cfg: ConfigFile = toml::from_str(
            "[database]\nurl = \"postgresql://h/db\"\n\n[worker]\nconcurrency = 2\n",
        )
        .unwrap();
        assert_eq!(cfg.worker.concurrency, 2);
        assert_eq!(cfg.worker.max_attempts, 3);
        assert_eq!(cfg.worker.base_delay_secs, 60);
        assert_eq!(cfg.payment, PaymentSection::default());

        let worker = cfg.worker.to_worker_config();
        assert_eq!(worker.stale_after, Duration::from_secs(30 * 60));
        assert_eq!(worker.assemble_timeout, Duration::from_secs(120));
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        save_config_to(&path, &sample()).unwrap();

        unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };
        let config = FitplanConfig::resolve_with(Some("postgresql://cli:5432/clidb"), &path);
        unsafe { std::env::remove_var(DbConfig::ENV_VAR) };

        let config = config.unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");
        assert_eq!(config.worker.concurrency, 8);
    }

    #[test]
    fn resolve_with_env_var_overrides_config_file() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        save_config_to(&path, &sample()).unwrap();

        unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };
        let config = FitplanConfig::resolve_with(None, &path);
        unsafe { std::env::remove_var(DbConfig::ENV_VAR) };

        assert_eq!(
            config.unwrap().db_config.database_url,
            "postgresql://env:5432/envdb"
        );
    }

    #[test]
    fn resolve_uses_file_then_default() {
        let _lock = lock_env();
        unsafe { std::env::remove_var(DbConfig::ENV_VAR) };
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");

        let config = FitplanConfig::resolve_with(None, &path).unwrap();
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
        assert_eq!(config.worker, WorkerSection::default());

        save_config_to(&path, &sample()).unwrap();
        let config = FitplanConfig::resolve_with(None, &path).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://testhost:5432/testdb");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "this is not toml = [").unwrap();
        let err = FitplanConfig::resolve_with(Some("postgresql://x/y"), &path).unwrap_err();
        assert!(err.to_string().contains("failed to parse config file"));
    }

    #[test]
    fn bad_currency_is_reported() {
        let payment = PaymentSection {
            currency: "GBP".to_owned(),
            ..PaymentSection::default()
        };
        assert!(payment.currency().is_err());
        assert_eq!(PaymentSection::default().currency().unwrap(), Currency::Irr);
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("fitplan/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
