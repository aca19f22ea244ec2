//! Configuration for `a2ahub`.
//!
//! The database URL follows a resolution chain (CLI flag > env var >
//! config file > default). `SECRET_KEY` does not participate in that
//! chain: it is a hard required environment variable, fatal at startup if
//! absent, with no config-file fallback.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use a2a_db::config::DbConfig;

/// Environment variable carrying the HMAC secret used by the Artifact
/// Verifier. Required before the server or any command touching `result`
/// payloads can start (§6).
pub const SECRET_KEY_ENV: &str = "SECRET_KEY";

/// Environment variable overriding the resolved database URL.
pub const DATABASE_URL_ENV: &str = "A2A_DATABASE_URL";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the a2ahub config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/a2ahub` or `~/.config/a2ahub`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("a2ahub");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("a2ahub")
}

/// Return the path to the a2ahub config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Secret generation
// -----------------------------------------------------------------------

/// Generate a random `SECRET_KEY` candidate: 32 random bytes, hex-encoded
/// (64 chars). `a2ahub init` prints this for the operator to export -- it
/// is never written into the config file (`SECRET_KEY` is env-only, fatal
/// if absent, no file fallback).
pub fn generate_secret_key() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct HubConfig {
    pub db_config: DbConfig,
    pub secret_key: Vec<u8>,
}

impl HubConfig {
    /// Resolve configuration.
    ///
    /// - DB URL: `cli_db_url` > `A2A_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`.
    /// - Secret key: `SECRET_KEY` env var, taken as raw UTF-8 bytes. Absence
    ///   is a fatal startup error (§6), never resolved from a config file.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        let secret_key = require_secret_key()?;

        Ok(Self {
            db_config,
            secret_key,
        })
    }
}

/// Read `SECRET_KEY` from the environment, failing loudly if it is unset
/// or empty. Exit code `1` per §6.
pub fn require_secret_key() -> Result<Vec<u8>> {
    match std::env::var(SECRET_KEY_ENV) {
        Ok(val) if !val.is_empty() => Ok(val.into_bytes()),
        Ok(_) => anyhow::bail!("{SECRET_KEY_ENV} is set but empty"),
        Err(_) => anyhow::bail!("{SECRET_KEY_ENV} must be set before the hub can start"),
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

    #[test]
    fn save_and_load_config_roundtrip() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("a2ahub");
        let path = dir.join("config.toml");

        let original = ConfigFile {
            database: DatabaseSection {
                url: "postgresql://testhost:5432/testdb".to_string(),
            },
        };

        std::fs::create_dir_all(&dir).unwrap();
        let contents = toml::to_string_pretty(&original).unwrap();
        std::fs::write(&path, &contents).unwrap();

        let loaded_contents = std::fs::read_to_string(&path).unwrap();
        let loaded: ConfigFile = toml::from_str(&loaded_contents).unwrap();

        assert_eq!(loaded.database.url, original.database.url);
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("test.toml");
        std::fs::write(&file, "test").unwrap();

        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&file, perms).unwrap();

        let meta = std::fs::metadata(&file).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn resolve_with_cli_flag_overrides_env() {
        let _lock = lock_env();
        unsafe { std::env::set_var(DATABASE_URL_ENV, "postgresql://env:5432/envdb") };
        unsafe { std::env::set_var(SECRET_KEY_ENV, "test-secret") };

        let config = HubConfig::resolve(Some("postgresql://cli:5432/clidb")).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");

        unsafe { std::env::remove_var(DATABASE_URL_ENV) };
        unsafe { std::env::remove_var(SECRET_KEY_ENV) };
    }

    #[test]
    fn resolve_defaults_db_url_when_nothing_set() {
        let _lock = lock_env();
        unsafe { std::env::remove_var(DATABASE_URL_ENV) };
        unsafe { std::env::set_var(SECRET_KEY_ENV, "test-secret") };

        let config = HubConfig::resolve(None).unwrap();
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);

        unsafe { std::env::remove_var(SECRET_KEY_ENV) };
    }

    #[test]
    fn resolve_errors_when_no_secret_key() {
        let _lock = lock_env();
        unsafe { std::env::remove_var(SECRET_KEY_ENV) };

        let result = HubConfig::resolve(Some("postgresql://localhost:5432/a2a_hub"));
        assert!(result.is_err(), "should error when SECRET_KEY is unset");
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("SECRET_KEY"), "unexpected error: {msg}");
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("a2ahub/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
