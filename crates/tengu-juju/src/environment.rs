//! Handle on one Juju environment
//!
//! Wraps the environment-scoped `juju` subcommands and owns the bootstrap
//! sequence used to create a new Tengu environment.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use tracing::{info, warn};

use crate::bundle::{Bundle, BundleDeployer};
use crate::config::JujuConfig;
use crate::error::{JujuError, Result};
use crate::runner::{CommandRunner, Invocation};
use crate::service::{Service, WaitOptions};
use crate::status::StatusDocument;
use crate::store::{EnvironmentStore, ExportedEnvironment};

/// Options for `juju deploy`, rendered in field order
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Machine placement (`--to`)
    pub to: Option<String>,
    /// Path of a YAML config file (`--config`)
    pub config: Option<String>,
    /// Initial unit count (`--num-units`)
    pub num_units: Option<u32>,
}

/// A named Juju environment
pub struct Environment {
    name: String,
    runner: Arc<dyn CommandRunner>,
    store: EnvironmentStore,
    config: JujuConfig,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("name", &self.name)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Environment {
    pub fn new(name: impl Into<String>, runner: Arc<dyn CommandRunner>, config: JujuConfig) -> Self {
        Self {
            name: name.into(),
            store: EnvironmentStore::new(&config),
            runner,
            config,
        }
    }

    /// The environment `juju switch` reports as active
    pub fn current(runner: Arc<dyn CommandRunner>, config: JujuConfig) -> Result<Self> {
        let name = runner.output(&Invocation::new("switch"))?.trim_end().to_string();
        Ok(Self::new(name, runner, config))
    }

    /// Names of all environments known to juju
    pub fn list(runner: &dyn CommandRunner) -> Result<Vec<String>> {
        let output = runner.output(&Invocation::new("switch").arg("--list"))?;
        Ok(output.split_whitespace().map(String::from).collect())
    }

    pub fn exists(runner: &dyn CommandRunner, name: &str) -> Result<bool> {
        Ok(Self::list(runner)?.iter().any(|n| n == name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &JujuConfig {
        &self.config
    }

    pub fn store(&self) -> &EnvironmentStore {
        &self.store
    }

    /// Wait settings derived from the shared config
    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            interval: self.config.poll_interval,
            timeout: self.config.wait_timeout,
            cancel: None,
        }
    }

    pub(crate) fn output(&self, invocation: Invocation) -> Result<String> {
        self.runner.output(&invocation)
    }

    pub(crate) fn call(&self, invocation: Invocation) -> Result<()> {
        self.runner.call(&invocation)
    }

    /// Freshly fetched status document
    pub fn status(&self) -> Result<StatusDocument> {
        let output = self.output(
            Invocation::new("status")
                .environment(&self.name)
                .flag("format", "json"),
        )?;
        Ok(serde_json::from_str(&output)?)
    }

    pub fn machines(&self) -> Result<Vec<String>> {
        Ok(self.status()?.machines.into_keys().collect())
    }

    pub fn services(&self) -> Result<Vec<String>> {
        Ok(self.status()?.services.into_keys().collect())
    }

    /// Machine id -> units deployed on it, from a fresh status
    pub fn machine_unit_map(&self) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(self.status()?.machine_unit_map())
    }

    pub fn service(&self, name: impl Into<String>) -> Service<'_> {
        Service::new(self, name)
    }

    pub fn password(&self) -> Result<Option<String>> {
        Ok(self.store.state(&self.name)?.password)
    }

    pub fn bootstrap_user(&self) -> Result<Option<String>> {
        Ok(self.store.state(&self.name)?.bootstrap_config.bootstrap_user)
    }

    /// Make this the active environment
    pub fn set_active(&self) -> Result<()> {
        self.call(Invocation::new("switch").arg(&self.name))
    }

    /// Add ssh-reachable hosts as machines.
    ///
    /// The `add-machine` processes run concurrently, dispatched
    /// `add_machine_delay` apart. Fails with an aggregate error if any host
    /// could not be added.
    pub fn add_machines(&self, hosts: &[String]) -> Result<()> {
        let user = self.bootstrap_user()?.ok_or_else(|| JujuError::MissingState {
            environment: self.name.clone(),
            field: "bootstrap-config.bootstrap-user".into(),
        })?;

        info!(environment = %self.name, count = hosts.len(), "adding machines");
        let mut pending = Vec::with_capacity(hosts.len());
        let mut errors = vec![];

        for (i, host) in hosts.iter().enumerate() {
            if i > 0 {
                thread::sleep(self.config.add_machine_delay);
            }
            info!(host = %host, "adding machine");
            let invocation = Invocation::new("add-machine")
                .arg(format!("ssh:{user}@{host}"))
                .environment(&self.name);
            match self.runner.spawn(&invocation) {
                Ok(handle) => pending.push(handle),
                Err(e) => errors.push(e),
            }
        }

        for handle in pending {
            if let Err(e) = handle.wait() {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(JujuError::Aggregate {
                total: hosts.len(),
                errors,
            })
        }
    }

    /// Deploy `charm` as service `name`
    pub fn deploy(&self, charm: &str, name: &str, options: &DeployOptions) -> Result<Service<'_>> {
        let mut invocation = Invocation::new("deploy")
            .arg(charm)
            .arg(name)
            .environment(&self.name);
        if let Some(to) = &options.to {
            invocation = invocation.flag("to", to);
        }
        if let Some(config) = &options.config {
            invocation = invocation.flag("config", config);
        }
        if let Some(n) = options.num_units {
            invocation = invocation.flag("num-units", n);
        }

        info!(charm, service = name, "deploying");
        self.call(invocation)?;
        Ok(self.service(name))
    }

    /// Deploy a bundle file in its annotated order, waiting on each service.
    /// Returns the service names in deployment order.
    pub fn deploy_bundle(&self, path: &Path) -> Result<Vec<String>> {
        let bundle = Bundle::from_path(path)?;
        BundleDeployer::new(self, self.wait_options()).deploy(&bundle)
    }

    /// Hand a bundle to `juju deployer` untouched
    pub fn run_deployer(&self, path: &Path, extra_args: &[String]) -> Result<()> {
        self.call(
            Invocation::new("deployer")
                .arg("-c")
                .arg(path.display())
                .args(extra_args)
                .environment(&self.name),
        )
    }

    pub fn add_relation(&self, a: &str, b: &str) -> Result<()> {
        info!(a, b, "adding relation");
        self.call(
            Invocation::new("add-relation")
                .arg(a)
                .arg(b)
                .environment(&self.name),
        )
    }

    /// Run an action on a unit, returning its output
    pub fn action_do(&self, unit: &str, action: &str, flags: &[(String, String)]) -> Result<String> {
        let mut invocation = Invocation::new("action do")
            .arg(unit)
            .arg(action)
            .environment(&self.name);
        for (key, value) in flags {
            invocation = invocation.flag(key.as_str(), value);
        }
        self.output(invocation)
    }

    /// Force-destroy every container in the environment, innermost first.
    /// Returns the containers destroyed.
    pub fn destroy_containers(&self) -> Result<Vec<String>> {
        let mut containers = self.status()?.containers();
        containers.reverse();
        for container in &containers {
            info!(machine = %container, "destroying container");
            self.call(
                Invocation::new("destroy-machine")
                    .arg(container)
                    .arg("--force")
                    .environment(&self.name),
            )?;
        }
        Ok(containers)
    }

    pub fn export(&self) -> Result<ExportedEnvironment> {
        self.store.export(&self.name)
    }

    /// Import an exported environment and make it active
    pub fn import(
        runner: Arc<dyn CommandRunner>,
        config: JujuConfig,
        token: &ExportedEnvironment,
    ) -> Result<Self> {
        let name = EnvironmentStore::new(&config).import(token)?;
        info!(environment = %name, "imported environment");
        let env = Self::new(name, runner, config);
        env.set_active()?;
        Ok(env)
    }

    /// Register, bootstrap, populate and deploy a new environment.
    ///
    /// Stops at the first failure. Whatever was already done (registry entry,
    /// bootstrap node, machines) is left in place.
    pub fn create(
        runner: Arc<dyn CommandRunner>,
        config: JujuConfig,
        name: &str,
        provider_config: serde_yaml::Value,
        machines: &[String],
        bundle: &Path,
    ) -> Result<Self> {
        if Self::exists(runner.as_ref(), name)? {
            return Err(JujuError::AlreadyExists(name.to_string()));
        }

        let env = Self::new(name, runner, config);
        env.bootstrap(provider_config)?;

        // The registry write is not immediately visible to juju.
        thread::sleep(env.config.settle_delay);

        env.add_machines(machines)?;
        let deployed = env.deploy_bundle(bundle)?;
        info!(environment = name, services = deployed.len(), "environment created");
        Ok(env)
    }

    fn bootstrap(&self, provider_config: serde_yaml::Value) -> Result<()> {
        self.store.register(&self.name, provider_config)?;
        self.set_active()?;
        thread::sleep(self.config.bootstrap_delay);

        info!(environment = %self.name, "bootstrapping");
        self.call(
            Invocation::new("bootstrap")
                .arg("--debug")
                .environment(&self.name),
        )
        .inspect_err(|e| warn!(environment = %self.name, error = %e, "bootstrap failed"))
    }
}
