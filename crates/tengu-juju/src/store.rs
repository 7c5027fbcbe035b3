//! Environment registry and per-environment state files
//!
//! The registry (`environments.yaml`) maps environment names to provider
//! config. Each environment also has a state file (`environments/<name>.jenv`)
//! holding credentials and bootstrap config. Writes are atomic and registry
//! updates hold an exclusive lock for the read-modify-write.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::JujuConfig;
use crate::error::{JujuError, Result};

const LOCK_FILE: &str = ".tengu-registry.lock";

/// Contents of `environments.yaml`
#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    #[serde(default)]
    environments: Option<BTreeMap<String, serde_yaml::Value>>,
    /// Other top-level keys (e.g. `default:`) survive rewrites
    #[serde(flatten)]
    other: BTreeMap<String, serde_yaml::Value>,
}

/// Parsed per-environment state file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentState {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, rename = "bootstrap-config")]
    pub bootstrap_config: BootstrapConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default, rename = "bootstrap-user")]
    pub bootstrap_user: Option<String>,
}

/// One registered environment
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentRecord {
    pub name: String,
    /// Provider config, opaque to this crate
    pub provider_config: serde_yaml::Value,
    /// Raw state file bytes, if the environment has been bootstrapped
    pub state: Option<Vec<u8>>,
}

/// Transportable form of an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExportedEnvironment {
    pub environment_name: String,
    /// base64 of the provider config as YAML
    pub environment_config: String,
    /// base64 of the raw state file
    pub environment_jenv: String,
}

impl ExportedEnvironment {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(token: &str) -> Result<Self> {
        serde_json::from_str(token).map_err(|e| JujuError::InvalidToken(e.to_string()))
    }
}

/// File-backed registry of Juju environments
#[derive(Debug, Clone)]
pub struct EnvironmentStore {
    registry_path: PathBuf,
    home: PathBuf,
}

impl EnvironmentStore {
    pub fn new(config: &JujuConfig) -> Self {
        Self {
            registry_path: config.registry_path(),
            home: config.juju_home.clone(),
        }
    }

    /// State file path for an environment
    pub fn state_path(&self, name: &str) -> PathBuf {
        self.home.join("environments").join(format!("{name}.jenv"))
    }

    /// Names of all registered environments
    pub fn list(&self) -> Result<Vec<String>> {
        let registry = self.read_registry()?;
        Ok(registry
            .environments
            .map(|envs| envs.into_keys().collect())
            .unwrap_or_default())
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.list()?.iter().any(|n| n == name))
    }

    /// Load a registered environment
    pub fn load(&self, name: &str) -> Result<EnvironmentRecord> {
        let registry = self.read_registry()?;
        let provider_config = registry
            .environments
            .and_then(|mut envs| envs.remove(name))
            .ok_or_else(|| JujuError::NotFound(format!("environment {name}")))?;

        let state_path = self.state_path(name);
        let state = if state_path.exists() {
            Some(fs::read(&state_path)?)
        } else {
            None
        };

        Ok(EnvironmentRecord {
            name: name.to_string(),
            provider_config,
            state,
        })
    }

    /// Register or overwrite an environment; writes the state file when present
    pub fn save(&self, record: &EnvironmentRecord) -> Result<()> {
        self.register(&record.name, record.provider_config.clone())?;
        if let Some(state) = &record.state {
            self.write_state_bytes(&record.name, state)?;
        }
        Ok(())
    }

    /// Add or replace a registry entry
    pub fn register(&self, name: &str, provider_config: serde_yaml::Value) -> Result<()> {
        info!(environment = name, "registering environment");
        self.update_registry(|envs| {
            envs.insert(name.to_string(), provider_config);
        })
    }

    /// Remove a registry entry and its state file
    pub fn unregister(&self, name: &str) -> Result<()> {
        info!(environment = name, "unregistering environment");
        self.update_registry(|envs| {
            envs.remove(name);
        })?;
        let state_path = self.state_path(name);
        if state_path.exists() {
            fs::remove_file(state_path)?;
        }
        Ok(())
    }

    /// Parsed state file
    pub fn state(&self, name: &str) -> Result<EnvironmentState> {
        let raw = self.read_state_bytes(name)?;
        Ok(serde_yaml::from_slice(&raw)?)
    }

    pub fn read_state_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.state_path(name);
        if !path.exists() {
            return Err(JujuError::NotFound(format!(
                "state file {}",
                path.display()
            )));
        }
        Ok(fs::read(path)?)
    }

    pub fn write_state_bytes(&self, name: &str, bytes: &[u8]) -> Result<()> {
        write_atomic(&self.state_path(name), bytes)
    }

    /// Encode an environment's config and raw state file as one token
    pub fn export(&self, name: &str) -> Result<ExportedEnvironment> {
        let record = self.load(name)?;
        let state = record.state.ok_or_else(|| {
            JujuError::NotFound(format!("state file {}", self.state_path(name).display()))
        })?;
        let config_yaml = serde_yaml::to_string(&record.provider_config)?;

        Ok(ExportedEnvironment {
            environment_name: record.name,
            environment_config: STANDARD.encode(config_yaml),
            environment_jenv: STANDARD.encode(state),
        })
    }

    /// Inverse of [`export`](Self::export); overwrites a same-named entry.
    /// Returns the imported environment's name.
    pub fn import(&self, token: &ExportedEnvironment) -> Result<String> {
        let name = token.environment_name.trim();
        if name.is_empty() || name.contains('/') {
            return Err(JujuError::InvalidToken(format!(
                "bad environment name '{}'",
                token.environment_name
            )));
        }

        let config_yaml = STANDARD.decode(&token.environment_config)?;
        let provider_config: serde_yaml::Value = serde_yaml::from_slice(&config_yaml)?;
        let state = STANDARD.decode(&token.environment_jenv)?;

        self.save(&EnvironmentRecord {
            name: name.to_string(),
            provider_config,
            state: Some(state),
        })?;
        Ok(name.to_string())
    }

    fn read_registry(&self) -> Result<Registry> {
        if !self.registry_path.exists() {
            return Ok(Registry::default());
        }
        let content = fs::read_to_string(&self.registry_path)?;
        if content.trim().is_empty() {
            return Ok(Registry::default());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    fn update_registry(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, serde_yaml::Value>),
    ) -> Result<()> {
        let _lock = RegistryLock::acquire(&self.home.join(LOCK_FILE))?;
        let mut registry = self.read_registry()?;
        apply(registry.environments.get_or_insert_with(BTreeMap::new));
        let content = serde_yaml::to_string(&registry)?;
        write_atomic(&self.registry_path, content.as_bytes())
    }
}

/// Exclusive advisory lock held for a registry read-modify-write
struct RegistryLock {
    file: File,
}

impl RegistryLock {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        debug!(lock = %path.display(), "registry lock acquired");
        Ok(Self { file })
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Write-temp-then-rename so readers never see a partial file
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| JujuError::Io(e.error))?;
    Ok(())
}
