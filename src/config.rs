use crate::error::{Error, Result};
use byte_unit::Byte;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
}

#[derive(Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: Byte,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    #[serde(default = "default_vault_root")]
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// sqlx connection URL. Empty means `sqlite://<vault_root>/index.db`.
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_session_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_upload_size() -> Byte {
    Byte::from_u64_with_unit(10, byte_unit::Unit::MiB).unwrap()
}

fn default_vault_root() -> PathBuf {
    PathBuf::from("vault")
}

fn default_session_timeout_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: default_vault_root(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: String::new() }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout_secs(),
        }
    }
}

impl Config {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Add config file sources in order of precedence (lower to higher)
        if config_path.is_none() {
            // Release builds: look in /etc/asset-vault/
            #[cfg(not(debug_assertions))]
            {
                builder = builder
                    .add_source(config::File::with_name("/etc/asset-vault/config").required(false));
            }

            // Debug builds: look in current working directory
            #[cfg(debug_assertions)]
            {
                builder = builder.add_source(config::File::with_name("config").required(false));
            }
        }

        // Custom config path (if specified via --config)
        if let Some(path) = config_path {
            builder = builder.add_source(
                config::File::with_name(path)
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        // Environment variables (highest precedence)
        builder = builder.add_source(config::Environment::with_prefix("ASSET_VAULT"));

        let config = builder.build().map_err(|e| Error::Config {
            msg: format!("Failed to load configuration: {}", e),
        })?;

        let mut config: Self = config.try_deserialize().map_err(|e| Error::Config {
            msg: format!("Failed to deserialize configuration: {}", e),
        })?;

        config.absolutize_vault_root()?;

        Ok(config)
    }

    /// sqlx URL for the index database, defaulting to a file inside the vault
    pub fn database_url(&self) -> String {
        if self.database.url.is_empty() {
            format!(
                "sqlite://{}?mode=rwc",
                self.vault.root.join("index.db").display()
            )
        } else {
            self.database.url.clone()
        }
    }

    /// Session inactivity timeout
    pub fn session_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sessions.timeout_secs)
    }

    fn absolutize_vault_root(&mut self) -> Result<()> {
        if !self.vault.root.is_absolute() {
            let cwd = std::env::current_dir().map_err(|e| Error::Config {
                msg: format!("Failed to get current directory: {}", e),
            })?;
            self.vault.root = cwd.join(&self.vault.root);
        }

        // Clean up the path (resolve . and .. components)
        // If canonicalize fails (e.g., path doesn't exist yet), keep the absolute path
        if let Ok(canonical) = self.vault.root.canonicalize() {
            self.vault.root = canonical;
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut config = Self {
            server: ServerConfig::default(),
            vault: VaultConfig::default(),
            database: DatabaseConfig::default(),
            sessions: SessionConfig::default(),
        };
        let _ = config.absolutize_vault_root();
        config
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field(
                "max_upload_size",
                &format!(
                    "{}",
                    self.max_upload_size
                        .get_appropriate_unit(byte_unit::UnitType::Binary)
                ),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.sessions.timeout_secs, 300);
        assert_eq!(config.server.max_upload_size.as_u64(), 10 * 1024 * 1024);
        assert!(
            config.vault.root.is_absolute(),
            "vault root should be absolute but got: {:?}",
            config.vault.root
        );
    }

    #[test]
    fn test_relative_vault_root_converted_to_absolute() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(
            &config_path,
            r#"
[server]
host = "127.0.0.1"
port = 3000

[vault]
root = "./my_vault"
"#,
        )
        .unwrap();

        let config = Config::load(Some(config_path.to_str().unwrap())).unwrap();

        assert!(
            config.vault.root.is_absolute(),
            "vault root should be absolute but got: {:?}",
            config.vault.root
        );
        let path_str = config.vault.root.to_string_lossy();
        assert!(
            path_str.ends_with("my_vault"),
            "Expected path to end with 'my_vault' but got: {}",
            path_str
        );
    }

    #[test]
    fn test_database_url_defaults_into_vault() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let vault_root = temp_dir.path().join("vault");

        fs::write(
            &config_path,
            format!(
                r#"
[vault]
root = "{}"
"#,
                vault_root.display()
            ),
        )
        .unwrap();

        let config = Config::load(Some(config_path.to_str().unwrap())).unwrap();
        let url = config.database_url();
        assert!(url.starts_with("sqlite://"), "got: {}", url);
        assert!(url.contains("index.db"), "got: {}", url);
    }

    #[test]
    fn test_explicit_database_url_wins() {
        let mut config = Config::default();
        config.database.url = "sqlite::memory:".to_string();
        assert_eq!(config.database_url(), "sqlite::memory:");
    }
}
