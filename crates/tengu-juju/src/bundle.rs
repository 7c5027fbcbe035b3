//! Ordered bundle deployment
//!
//! Services deploy in ascending `annotations.order`, one at a time. Each
//! service must reach its wait message before the next one starts.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Deserializer, de};
use tracing::{info, warn};

use crate::environment::{DeployOptions, Environment};
use crate::error::{JujuError, Result};
use crate::service::WaitOptions;

/// A bundle document
#[derive(Debug, Clone, Deserialize)]
pub struct Bundle {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
}

/// One service definition inside a bundle
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSpec {
    pub charm: String,
    #[serde(default)]
    pub options: serde_yaml::Mapping,
    /// Target machines; `to:` may be one id or a list, written as strings or numbers
    #[serde(default, deserialize_with = "machine_ids")]
    pub to: Option<Vec<String>>,
    #[serde(default)]
    pub annotations: Annotations,
}

fn machine_ids<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<String>>, D::Error> {
    fn scalar<E: de::Error>(value: serde_yaml::Value) -> Result<String, E> {
        match value {
            serde_yaml::Value::String(s) => Ok(s),
            serde_yaml::Value::Number(n) => Ok(n.to_string()),
            other => Err(E::custom(format!("invalid machine id: {other:?}"))),
        }
    }

    match Option::<serde_yaml::Value>::deserialize(deserializer)? {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::Sequence(items)) => {
            items.into_iter().map(scalar).collect::<Result<_, _>>().map(Some)
        }
        Some(value) => scalar(value).map(|id| Some(vec![id])),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Annotations {
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default, rename = "wait-until-message")]
    pub wait_until_message: Option<String>,
}

impl Bundle {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| JujuError::InvalidBundle(e.to_string()))
    }

    /// Services sorted by their `order` annotation; ties fall back to name
    pub fn ordered_services(&self) -> Result<Vec<(&str, &ServiceSpec)>> {
        let mut ordered = self
            .services
            .iter()
            .map(|(name, spec)| {
                spec.annotations
                    .order
                    .map(|order| (order, name.as_str(), spec))
                    .ok_or_else(|| {
                        JujuError::InvalidBundle(format!("service '{name}' has no order annotation"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        // Stable sort over name-ordered input keeps ties deterministic
        ordered.sort_by_key(|(order, _, _)| *order);
        Ok(ordered
            .into_iter()
            .map(|(_, name, spec)| (name, spec))
            .collect())
    }
}

/// Drives an [`Environment`] through a [`Bundle`]
pub struct BundleDeployer<'env> {
    env: &'env Environment,
    wait: WaitOptions,
}

impl<'env> BundleDeployer<'env> {
    pub fn new(env: &'env Environment, wait: WaitOptions) -> Self {
        Self { env, wait }
    }

    /// Deploy every service in order; returns the names in deployment order
    pub fn deploy(&self, bundle: &Bundle) -> Result<Vec<String>> {
        let ordered = bundle.ordered_services()?;
        let mut deployed = Vec::with_capacity(ordered.len());

        for (name, spec) in ordered {
            let placements = match &spec.to {
                Some(machines) => machines.clone(),
                // Every machine, as of the previous service's deployment
                None => self.env.machines()?,
            };
            self.deploy_service(name, spec, &placements)?;
            deployed.push(name.to_string());
        }
        Ok(deployed)
    }

    fn deploy_service(&self, name: &str, spec: &ServiceSpec, placements: &[String]) -> Result<()> {
        let mut staged = tempfile::Builder::new()
            .prefix(&format!("{name}-options-"))
            .suffix(".yaml")
            .tempfile()?;
        let document = BTreeMap::from([(name, &spec.options)]);
        staged.write_all(serde_yaml::to_string(&document)?.as_bytes())?;
        staged.flush()?;

        let (first, rest) = match placements.split_first() {
            Some((first, rest)) => (Some(first.clone()), rest),
            None => (None, &[][..]),
        };
        let options = DeployOptions {
            to: first,
            config: Some(staged.path().display().to_string()),
            num_units: None,
        };

        let service = match self.env.deploy(&spec.charm, name, &options) {
            Ok(service) => service,
            Err(e) => {
                // Keep the staged options around for debugging the failed deploy
                if let Ok((_, path)) = staged.keep() {
                    warn!(service = name, config = %path.display(), "deploy failed, keeping staged options");
                }
                return Err(e);
            }
        };
        drop(staged);

        for machine in rest {
            service.add_unit(Some(machine))?;
        }

        let target = spec
            .annotations
            .wait_until_message
            .as_deref()
            .unwrap_or(&self.env.config().default_wait_message);
        service.wait_until(target, &self.wait)?;
        info!(service = name, "bundle service ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLE: &str = r"
services:
  b-worker:
    charm: cs:trusty/worker
    to: ['1', 2, '3/lxc/0']
    annotations:
      order: 2
  a-controller:
    charm: cs:trusty/controller
    options:
      port: 8080
      debug: true
    to: '0'
    annotations:
      order: 1
      wait-until-message: Controller up
  c-extra:
    charm: local:trusty/extra
    annotations:
      order: 2
";

    #[test]
    fn orders_by_annotation_not_document_order() {
        let bundle = Bundle::parse(BUNDLE).unwrap();
        let names: Vec<&str> = bundle
            .ordered_services()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();

        assert_eq!(names, ["a-controller", "b-worker", "c-extra"]);
    }

    #[test]
    fn placement_accepts_scalar_or_list() {
        let bundle = Bundle::parse(BUNDLE).unwrap();

        assert_eq!(
            bundle.services["a-controller"].to.as_deref().unwrap(),
            ["0"]
        );
        assert_eq!(
            bundle.services["b-worker"].to.as_deref().unwrap(),
            ["1", "2", "3/lxc/0"]
        );
        assert!(bundle.services["c-extra"].to.is_none());
        assert!(bundle.services["c-extra"].options.is_empty());
    }

    #[test]
    fn missing_order_is_rejected() {
        let bundle = Bundle::parse("services:\n  web:\n    charm: cs:apache2\n").unwrap();
        let err = bundle.ordered_services().unwrap_err();

        assert_eq!(err.kind(), "invalid-bundle");
        assert!(err.to_string().contains("'web'"));
    }

    #[test]
    fn malformed_bundle_is_invalid() {
        let err = Bundle::parse("services: [1, 2]").unwrap_err();
        assert_eq!(err.kind(), "invalid-bundle");
    }
}
