//! Handle on one deployed service

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::environment::Environment;
use crate::error::{JujuError, Result};
use crate::runner::Invocation;
use crate::status::{ServiceStatus, is_container};

/// Longest uninterrupted sleep inside a wait, so cancellation is noticed quickly
const CANCEL_SLICE: Duration = Duration::from_millis(100);

/// Shared flag that stops a blocking wait
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How `wait_until` polls
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    pub interval: Duration,
    /// `None` waits forever
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl WaitOptions {
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Output of `juju get <service> --format yaml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub charm: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, ConfigOption>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigOption {
    #[serde(default)]
    pub value: Option<serde_yaml::Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub option_type: Option<String>,
    #[serde(default)]
    pub default: Option<serde_yaml::Value>,
}

/// A service within an environment
#[derive(Debug, Clone)]
pub struct Service<'env> {
    env: &'env Environment,
    name: String,
}

impl<'env> Service<'env> {
    pub(crate) fn new(env: &'env Environment, name: impl Into<String>) -> Self {
        Self {
            env,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Live status; `NotFound` if the environment has no such service
    pub fn status(&self) -> Result<ServiceStatus> {
        self.env
            .status()?
            .services
            .remove(&self.name)
            .ok_or_else(|| JujuError::NotFound(format!("service {} not found", self.name)))
    }

    /// `false` only when the service is absent; other failures propagate
    pub fn exists(&self) -> Result<bool> {
        match self.status() {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Raw `juju get` document
    pub fn config(&self) -> Result<ServiceConfig> {
        let output = self.env.output(
            Invocation::new("get")
                .arg(&self.name)
                .environment(self.env.name())
                .flag("format", "yaml"),
        )?;
        Ok(serde_yaml::from_str(&output)?)
    }

    /// Option name -> value, for options that have a value set
    pub fn get_config(&self) -> Result<BTreeMap<String, serde_yaml::Value>> {
        Ok(self
            .config()?
            .settings
            .into_iter()
            .filter_map(|(name, option)| match option.value {
                None | Some(serde_yaml::Value::Null) => None,
                Some(value) => Some((name, value)),
            })
            .collect())
    }

    /// Update options. Takes the flat `option -> value` shape, not the
    /// `settings` envelope that [`config`](Self::config) returns.
    pub fn set_config(&self, options: &BTreeMap<String, serde_yaml::Value>) -> Result<()> {
        let document = BTreeMap::from([(self.name.as_str(), options)]);
        // Removed on drop, whether or not `set` succeeds
        let mut staged = tempfile::Builder::new()
            .prefix(&format!("{}-config-", self.name))
            .suffix(".yaml")
            .tempfile()?;
        staged.write_all(serde_yaml::to_string(&document)?.as_bytes())?;
        staged.flush()?;

        self.env.call(
            Invocation::new("set")
                .arg(&self.name)
                .environment(self.env.name())
                .flag("config", staged.path().display()),
        )
    }

    /// Poll until the status message contains `target` (case-insensitive)
    pub fn wait_until(&self, target: &str, options: &WaitOptions) -> Result<()> {
        info!(service = %self.name, target, "waiting for service");
        let started = Instant::now();

        loop {
            let status = self.status()?;
            debug!(
                service = %self.name,
                current = %status.service_status.current,
                message = %status.service_status.message,
                "polled service status"
            );
            if status.service_status.reports(target) {
                info!(service = %self.name, target, "service reached target status");
                return Ok(());
            }

            if let Some(timeout) = options.timeout {
                if started.elapsed() >= timeout {
                    return Err(JujuError::Timeout {
                        service: self.name.clone(),
                        target: target.to_string(),
                        elapsed: started.elapsed(),
                    });
                }
            }

            let next_poll = Instant::now() + options.interval;
            loop {
                if options.cancelled() {
                    return Err(JujuError::Cancelled(self.name.clone()));
                }
                let now = Instant::now();
                if now >= next_poll {
                    break;
                }
                thread::sleep(CANCEL_SLICE.min(next_poll - now));
            }
        }
    }

    /// Request one more unit, optionally on a given machine
    pub fn add_unit(&self, placement: Option<&str>) -> Result<()> {
        let mut invocation = Invocation::new("add-unit")
            .arg(&self.name)
            .environment(self.env.name());
        if let Some(machine) = placement {
            invocation = invocation.flag("to", machine);
        }
        info!(service = %self.name, to = ?placement, "adding unit");
        self.env.call(invocation)
    }

    pub fn upgrade(&self) -> Result<()> {
        self.env.call(
            Invocation::new("upgrade-charm")
                .arg(&self.name)
                .environment(self.env.name()),
        )
    }

    /// Remove the service. With `force`, also destroy the containers that
    /// hosted only this service's units. Returns the machines destroyed.
    pub fn destroy(&self, force: bool) -> Result<Vec<String>> {
        let hosting = self.status()?.unit_machines();

        info!(service = %self.name, "destroying service");
        self.env.call(
            Invocation::new("destroy-service")
                .arg(&self.name)
                .environment(self.env.name()),
        )?;

        if !force {
            return Ok(vec![]);
        }

        // Recomputed after destroy-service: other services may have moved
        // onto these machines since the snapshot was taken.
        let machine_units = self.env.machine_unit_map()?;
        let doomed = reclaimable_machines(&self.name, &hosting, &machine_units);

        for machine in &doomed {
            info!(machine = %machine, "destroying machine");
            self.env.call(
                Invocation::new("destroy-machine")
                    .arg(machine)
                    .arg("--force")
                    .environment(self.env.name()),
            )?;
        }
        Ok(doomed)
    }
}

/// Machines that can be destroyed along with `service`.
///
/// A candidate survives only if it is a container and every unit still on it
/// belongs to `service`.
pub fn reclaimable_machines(
    service: &str,
    candidates: &[String],
    machine_units: &BTreeMap<String, Vec<String>>,
) -> Vec<String> {
    // Without a pattern no unit is ours, so every occupied machine counts as shared
    let own_unit = unit_pattern(service);
    let owns = |unit: &str| own_unit.as_ref().is_some_and(|re| re.is_match(unit));

    let containers: Vec<&String> = candidates
        .iter()
        .filter(|machine| {
            let keep = is_container(machine);
            if !keep {
                warn!(machine = %machine, "not destroying physical machine");
            }
            keep
        })
        .collect();

    containers
        .into_iter()
        .filter(|machine| {
            let shared = machine_units
                .get(machine.as_str())
                .is_some_and(|units| units.iter().any(|u| !owns(u)));
            if shared {
                warn!(machine = %machine, "not destroying machine still used by another service");
            }
            !shared
        })
        .cloned()
        .collect()
}

fn unit_pattern(service: &str) -> Option<Regex> {
    Regex::new(&format!("^{}/[0-9]+$", regex::escape(service))).ok()
}
