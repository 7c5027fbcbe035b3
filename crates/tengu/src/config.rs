//! CLI configuration file and override resolution
//!
//! Path: `~/.config/tengu/juju.toml` (XDG-style, shared with the other tengu tools)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tengu_juju::JujuConfig;

/// Configuration file structure
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub juju: JujuSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub bundle: BundleSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct JujuSection {
    pub bin: Option<PathBuf>,
    pub home: Option<PathBuf>,
}

/// Delays in whole seconds
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TimingSection {
    pub poll_interval: Option<u64>,
    /// `0` waits forever
    pub wait_timeout: Option<u64>,
    pub add_machine_delay: Option<u64>,
    pub settle_delay: Option<u64>,
    pub bootstrap_delay: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BundleSection {
    pub wait_message: Option<String>,
}

/// Values given on the command line
#[derive(Debug, Default)]
pub struct Overrides {
    pub juju_bin: Option<PathBuf>,
    pub juju_home: Option<PathBuf>,
}

/// Config path - `$XDG_CONFIG_HOME/tengu/juju.toml`, else `~/.config/tengu/juju.toml`
pub fn config_path() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tengu")
        .join("juju.toml")
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    if path.exists() {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    } else {
        Ok(Config::default())
    }
}

/// Merge CLI overrides, environment and file into a [`JujuConfig`]
///
/// Priority: CLI args > env vars > config file > defaults
pub fn resolve(
    overrides: &Overrides,
    config: &Config,
    env: impl Fn(&str) -> Option<String>,
) -> JujuConfig {
    let mut builder = JujuConfig::builder();

    let bin = overrides
        .juju_bin
        .clone()
        .or_else(|| env("TENGU_JUJU_BIN").map(PathBuf::from))
        .or_else(|| config.juju.bin.clone());
    if let Some(bin) = bin {
        builder = builder.juju_bin(bin);
    }

    let home = overrides
        .juju_home
        .clone()
        .or_else(|| env("JUJU_HOME").map(PathBuf::from))
        .or_else(|| config.juju.home.as_deref().map(|h| expand_home(h, &env)));
    if let Some(home) = home {
        builder = builder.juju_home(home);
    }

    let timing = &config.timing;
    if let Some(secs) = timing.poll_interval {
        builder = builder.poll_interval(Duration::from_secs(secs));
    }
    if let Some(secs) = timing.wait_timeout {
        builder = builder.wait_timeout((secs > 0).then(|| Duration::from_secs(secs)));
    }
    if let Some(secs) = timing.add_machine_delay {
        builder = builder.add_machine_delay(Duration::from_secs(secs));
    }
    if let Some(secs) = timing.settle_delay {
        builder = builder.settle_delay(Duration::from_secs(secs));
    }
    if let Some(secs) = timing.bootstrap_delay {
        builder = builder.bootstrap_delay(Duration::from_secs(secs));
    }
    if let Some(message) = &config.bundle.wait_message {
        builder = builder.default_wait_message(message);
    }

    builder.build()
}

/// Expand a leading `~/` against `$HOME`
fn expand_home(path: &Path, env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    match (path.strip_prefix("~"), env("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
