//! Tengu Juju - Environment Lifecycle over the `juju` CLI
//!
//! Wraps the `juju` command line in typed handles for environments and
//! services, and drives ordered bundle deployments on top of them.
//!
//! # Architecture
//!
//! - [`runner`]: [`CommandRunner`] trait, [`Invocation`] builder, and the
//!   process-backed [`JujuCli`]
//! - [`store`]: [`EnvironmentStore`], the registry and per-environment state files
//! - [`service`]: [`Service`] handle (status, config, scaling, destruction)
//! - [`environment`]: [`Environment`] manager (machines, relations, bootstrap)
//! - [`bundle`]: [`Bundle`] documents and the sequential [`BundleDeployer`]
//! - [`charm`]: Hauchiwa reactive lifecycle as an explicit state machine
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tengu_juju::{Environment, JujuCli, JujuConfig};
//!
//! let config = JujuConfig::builder().juju_home("/home/ubuntu/.juju").build();
//! let runner = Arc::new(JujuCli::from_config(&config));
//! let env = Environment::current(runner, config)?;
//!
//! let web = env.service("web");
//! if web.exists()? {
//!     web.wait_until("ready", &env.wait_options())?;
//! }
//! ```

pub mod bundle;
pub mod charm;
pub mod config;
pub mod environment;
pub mod error;
pub mod mock;
pub mod runner;
pub mod service;
pub mod status;
pub mod store;

pub use bundle::{Bundle, BundleDeployer, ServiceSpec};
pub use config::JujuConfig;
pub use environment::{DeployOptions, Environment};
pub use error::{JujuError, Result};
pub use mock::{MockResponse, MockRunner};
pub use runner::{CommandRunner, Invocation, JujuCli, PendingCommand};
pub use service::{CancelToken, ConfigOption, Service, ServiceConfig, WaitOptions};
pub use status::{StatusDocument, StatusKind};
pub use store::{EnvironmentStore, ExportedEnvironment};
