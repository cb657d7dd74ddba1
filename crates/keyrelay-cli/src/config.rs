use anyhow::{Context, Result, anyhow, bail};
use keyrelay_core::{DispatchConfig, mask_secret};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatch: DispatchSection,
}

// ── Server Config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("Invalid server address {}:{}", self.bind, self.port))
    }
}

// ── Admin Config ────────────────────────────────────────────────

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Empty disables the admin endpoints
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("password", &mask_secret(&self.password))
            .finish()
    }
}

// ── Storage Config ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "~/.keyrelay/keyrelay.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Database path with a leading `~/` resolved to the home directory
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

// ── Dispatch Config ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSection {
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    #[serde(default = "default_deadline_margin_secs")]
    pub deadline_margin_secs: u64,
}

fn default_provider_timeout_secs() -> u64 {
    10
}

fn default_deadline_margin_secs() -> u64 {
    2
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            provider_timeout_secs: default_provider_timeout_secs(),
            deadline_margin_secs: default_deadline_margin_secs(),
        }
    }
}

impl DispatchSection {
    pub fn to_dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            provider_timeout: Duration::from_secs(self.provider_timeout_secs),
            deadline_margin: Duration::from_secs(self.deadline_margin_secs),
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".keyrelay")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

impl RelayConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path.clone().unwrap_or_else(default_config_path);

        check_permissions(&path)?;

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `keyrelay init` first.",
                path.display()
            )
        })?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    /// Expand allowlisted env vars, parse, and validate
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        if admin_password_is_literal(raw) {
            warn!(
                "Admin password is hardcoded in config file. For security, use environment variables: password = \"${{RELAY_ADMIN_PASSWORD}}\""
            );
        }

        let expanded = expand_env_vars(raw);
        let config: Self = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.server.socket_addr()?;
        if self.dispatch.provider_timeout_secs == 0 {
            bail!("dispatch.provider_timeout_secs must be greater than zero");
        }
        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.trim().is_empty() {
            bail!("storage.path must be set when storage.backend = \"sqlite\"");
        }
        Ok(())
    }

    /// TOML rendering with the admin password masked
    pub fn to_display_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        shown.admin.password = mask_secret(&self.admin.password);
        toml::to_string_pretty(&shown).map_err(|e| anyhow!("Failed to render config: {}", e))
    }
}

/// Refuse configs readable by group or other, since they hold the admin password
#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            bail!(
                "Config file {:?} has overly permissive permissions ({:o}). \
                 It may contain secrets. Fix with: chmod 600 {:?}",
                path,
                mode & 0o777,
                path
            );
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// True when `[admin] password` is set to a literal rather than `${VAR}`
fn admin_password_is_literal(raw: &str) -> bool {
    let Ok(value) = toml::from_str::<toml::Table>(raw) else {
        return false;
    };
    value
        .get("admin")
        .and_then(|admin| admin.get("password"))
        .and_then(|p| p.as_str())
        .is_some_and(|p| !p.is_empty() && !p.contains("${"))
}

/// Allowlist of environment variable names that may be expanded in config files.
const ALLOWED_ENV_VARS: &[&str] = &["RELAY_ADMIN_PASSWORD", "KEYRELAY_DB", "HOME", "USER"];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while let Some(start) = result[pos..].find("${") {
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}

pub fn expand_home(s: &str) -> PathBuf {
    match s.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(s)),
        None => PathBuf::from(s),
    }
}
