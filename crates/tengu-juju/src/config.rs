//! Configuration for talking to Juju

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings shared by every environment handle.
///
/// Built once at process start and passed to each [`Environment`](crate::Environment).
#[derive(Debug, Clone)]
pub struct JujuConfig {
    /// Path or name of the `juju` binary
    pub juju_bin: PathBuf,
    /// Juju home directory (holds `environments.yaml` and `environments/*.jenv`)
    pub juju_home: PathBuf,
    /// Delay between status polls in `wait_until`
    pub poll_interval: Duration,
    /// Upper bound for `wait_until`; `None` polls forever
    pub wait_timeout: Option<Duration>,
    /// Delay between dispatching consecutive `add-machine` commands
    pub add_machine_delay: Duration,
    /// Delay after bootstrap before the registry is treated as consistent
    pub settle_delay: Duration,
    /// Delay between switching to a new environment and bootstrapping it
    pub bootstrap_delay: Duration,
    /// Status message bundle services wait for when none is annotated
    pub default_wait_message: String,
}

impl Default for JujuConfig {
    fn default() -> Self {
        Self {
            juju_bin: PathBuf::from("juju"),
            juju_home: default_juju_home(),
            poll_interval: Duration::from_secs(5),
            wait_timeout: Some(Duration::from_secs(30 * 60)),
            add_machine_delay: Duration::from_secs(10),
            settle_delay: Duration::from_secs(20),
            bootstrap_delay: Duration::from_secs(5),
            default_wait_message: "Ready".into(),
        }
    }
}

impl JujuConfig {
    /// Create a new config builder
    pub fn builder() -> JujuConfigBuilder {
        JujuConfigBuilder::default()
    }

    /// Path of the environment registry
    pub fn registry_path(&self) -> PathBuf {
        self.juju_home.join("environments.yaml")
    }
}

/// `$JUJU_HOME`, else `~/.juju`
fn default_juju_home() -> PathBuf {
    std::env::var_os("JUJU_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".juju")))
        .unwrap_or_else(|| PathBuf::from(".juju"))
}

/// Builder for `JujuConfig`
#[derive(Debug, Clone, Default)]
pub struct JujuConfigBuilder {
    config: JujuConfig,
}

impl JujuConfigBuilder {
    /// Set the `juju` binary
    pub fn juju_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.config.juju_bin = bin.into();
        self
    }

    /// Set the Juju home directory
    pub fn juju_home(mut self, home: impl AsRef<Path>) -> Self {
        self.config.juju_home = home.as_ref().to_path_buf();
        self
    }

    /// Set the status poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the wait timeout (`None` disables it)
    pub fn wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.wait_timeout = timeout;
        self
    }

    /// Set the delay between `add-machine` dispatches
    pub fn add_machine_delay(mut self, delay: Duration) -> Self {
        self.config.add_machine_delay = delay;
        self
    }

    /// Set the post-bootstrap settle delay
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay = delay;
        self
    }

    /// Set the pre-bootstrap delay
    pub fn bootstrap_delay(mut self, delay: Duration) -> Self {
        self.config.bootstrap_delay = delay;
        self
    }

    /// Set the default bundle wait message
    pub fn default_wait_message(mut self, message: impl Into<String>) -> Self {
        self.config.default_wait_message = message.into();
        self
    }

    /// Zero every rate-limit and settle delay, including the poll interval
    pub fn without_delays(mut self) -> Self {
        self.config.poll_interval = Duration::ZERO;
        self.config.add_machine_delay = Duration::ZERO;
        self.config.settle_delay = Duration::ZERO;
        self.config.bootstrap_delay = Duration::ZERO;
        self
    }

    /// Build the configuration
    pub fn build(self) -> JujuConfig {
        self.config
    }
}
