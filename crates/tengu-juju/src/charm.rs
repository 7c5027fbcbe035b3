//! Hauchiwa charm lifecycle
//!
//! The charm's reactive handlers keyed on boolean flags, modelled as an
//! explicit [`HookState`] and a pure [`transition`] function. Running the
//! resulting [`HookAction`]s is left to the caller.

use std::collections::BTreeSet;
use std::fmt;

/// A reactive state flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    JujuInstalled,
    JujuRepoAvailable,
    TenguInstalled,
    TenguConfigured,
    TenguRepoAvailable,
    ProviderConfigured,
    PortForwardAvailable,
    PortForwardReady,
    PortForwardShown,
    Rest2jfedAvailable,
    Rest2jfedConfigured,
    ApiStarted,
    BundleDeployed,
    FeatureFlagsChanged,
    ProjectNameChanged,
    S4CertPathChanged,
    PubkeyChanged,
}

impl Flag {
    /// Flag name as used by the charm
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JujuInstalled => "juju.installed",
            Self::JujuRepoAvailable => "juju.repo.available",
            Self::TenguInstalled => "tengu.installed",
            Self::TenguConfigured => "tengu.configured",
            Self::TenguRepoAvailable => "tengu.repo.available",
            Self::ProviderConfigured => "hauchiwa.provider.configured",
            Self::PortForwardAvailable => "hauchiwa-port-forward.available",
            Self::PortForwardReady => "hauchiwa-port-forward.ready",
            Self::PortForwardShown => "hauchiwa-port-forward.shown",
            Self::Rest2jfedAvailable => "rest2jfed.available",
            Self::Rest2jfedConfigured => "rest2jfed.configured",
            Self::ApiStarted => "h_api.started",
            Self::BundleDeployed => "bundle.deployed",
            Self::FeatureFlagsChanged => "config.changed.feature-flags",
            Self::ProjectNameChanged => "config.changed.project-name",
            Self::S4CertPathChanged => "config.changed.s4-cert-path",
            Self::PubkeyChanged => "config.changed.pubkey",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which provider the charm fronts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flavor {
    Rest2jfed,
    Ssh,
    Tokin,
    Other(String),
}

impl From<&str> for Flavor {
    fn from(s: &str) -> Self {
        match s {
            "rest2jfed" => Self::Rest2jfed,
            "ssh" => Self::Ssh,
            "tokin" => Self::Tokin,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for Flavor {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadState {
    Active,
    Blocked,
}

/// Side effect requested by a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookAction {
    ConfigurePortForward,
    /// Publish the forwarded ports as an active "Ready pf:" status
    ShowPortForwards,
    DownloadBigFiles,
    InstallTengu,
    OpenPort(u16),
    RenderApiService,
    RestartApi,
    WriteGlobalConfig,
    SetStatus(WorkloadState, String),
    /// Run `tengu create` with the configured bundle
    CreateEnvironment,
    ConfigureRest2jfed,
}

/// Handlers, in the order they are evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Handler {
    ConfigurePortForward,
    ShowPortForward,
    DownloadBigFiles,
    Install,
    FeatureFlagsChanged,
    ConfigChanged,
    SetBlocked,
    CreateEnvironment,
    SetupRest2jfed,
    RemoveRest2jfed,
}

impl Handler {
    pub const ALL: [Self; 10] = [
        Self::ConfigurePortForward,
        Self::ShowPortForward,
        Self::DownloadBigFiles,
        Self::Install,
        Self::FeatureFlagsChanged,
        Self::ConfigChanged,
        Self::SetBlocked,
        Self::CreateEnvironment,
        Self::SetupRest2jfed,
        Self::RemoveRest2jfed,
    ];

    fn ready(self, state: &HookState) -> bool {
        use Flag::{
            BundleDeployed, FeatureFlagsChanged, JujuInstalled, JujuRepoAvailable,
            PortForwardAvailable, PortForwardReady, PortForwardShown, ProjectNameChanged,
            ProviderConfigured, PubkeyChanged, Rest2jfedAvailable, Rest2jfedConfigured,
            S4CertPathChanged, TenguConfigured, TenguInstalled, TenguRepoAvailable,
        };

        match self {
            Self::ConfigurePortForward => state.has(PortForwardAvailable),
            Self::ShowPortForward => state.all(&[
                PortForwardReady,
                TenguRepoAvailable,
                JujuRepoAvailable,
                ProviderConfigured,
            ]),
            Self::DownloadBigFiles => state.has(JujuRepoAvailable) && !state.has(TenguRepoAvailable),
            Self::Install => state.has(JujuInstalled) && !state.has(TenguInstalled),
            Self::FeatureFlagsChanged => state.has(TenguInstalled) && state.has(FeatureFlagsChanged),
            Self::ConfigChanged => {
                state.has(TenguInstalled)
                    && [ProjectNameChanged, S4CertPathChanged, PubkeyChanged]
                        .iter()
                        .any(|f| state.has(*f))
            }
            Self::SetBlocked => state.has(TenguInstalled) && !state.has(Rest2jfedAvailable),
            Self::CreateEnvironment => {
                state.all(&[
                    TenguConfigured,
                    TenguRepoAvailable,
                    JujuRepoAvailable,
                    ProviderConfigured,
                    PortForwardShown,
                ]) && !state.has(BundleDeployed)
            }
            Self::SetupRest2jfed => state.has(Rest2jfedAvailable) && !state.has(Rest2jfedConfigured),
            Self::RemoveRest2jfed => state.has(Rest2jfedConfigured) && !state.has(Rest2jfedAvailable),
        }
    }

    /// Actions and flag changes for a ready handler
    fn fire(self, state: &HookState, next: &mut HookState) -> Vec<HookAction> {
        match self {
            Self::ConfigurePortForward => vec![HookAction::ConfigurePortForward],
            Self::ShowPortForward => {
                next.set(Flag::PortForwardShown);
                vec![HookAction::ShowPortForwards]
            }
            Self::DownloadBigFiles => {
                next.set(Flag::TenguRepoAvailable);
                vec![HookAction::DownloadBigFiles]
            }
            Self::Install => {
                next.set(Flag::TenguInstalled);
                vec![HookAction::InstallTengu, HookAction::OpenPort(22)]
            }
            Self::FeatureFlagsChanged => {
                next.set(Flag::ApiStarted);
                vec![
                    HookAction::RenderApiService,
                    HookAction::RestartApi,
                    HookAction::OpenPort(5000),
                ]
            }
            Self::ConfigChanged => {
                next.set(Flag::TenguConfigured);
                vec![HookAction::WriteGlobalConfig]
            }
            Self::SetBlocked => match &state.flavor {
                Flavor::Rest2jfed => vec![HookAction::SetStatus(
                    WorkloadState::Blocked,
                    "Waiting for connection to rest2jfed".into(),
                )],
                Flavor::Ssh | Flavor::Tokin => {
                    next.set(Flag::ProviderConfigured);
                    vec![HookAction::SetStatus(WorkloadState::Active, "Ready".into())]
                }
                Flavor::Other(name) => vec![HookAction::SetStatus(
                    WorkloadState::Blocked,
                    format!("Hauchiwa flavor {name} not recognized"),
                )],
            },
            Self::CreateEnvironment => {
                next.set(Flag::BundleDeployed);
                vec![HookAction::CreateEnvironment]
            }
            Self::SetupRest2jfed => {
                next.set(Flag::Rest2jfedConfigured);
                next.set(Flag::ProviderConfigured);
                vec![HookAction::ConfigureRest2jfed]
            }
            Self::RemoveRest2jfed => {
                next.clear(Flag::Rest2jfedConfigured);
                vec![]
            }
        }
    }
}

/// Flags currently set plus the configured flavor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookState {
    pub flags: BTreeSet<Flag>,
    pub flavor: Flavor,
}

impl HookState {
    pub fn new(flavor: impl Into<Flavor>) -> Self {
        Self {
            flags: BTreeSet::new(),
            flavor: flavor.into(),
        }
    }

    pub fn with(mut self, flags: &[Flag]) -> Self {
        self.flags.extend(flags.iter().copied());
        self
    }

    pub fn has(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    fn all(&self, flags: &[Flag]) -> bool {
        flags.iter().all(|f| self.has(*f))
    }

    pub fn set(&mut self, flag: Flag) {
        self.flags.insert(flag);
    }

    pub fn clear(&mut self, flag: Flag) {
        self.flags.remove(&flag);
    }
}

/// Outcome of one evaluation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub fired: Vec<Handler>,
    pub actions: Vec<HookAction>,
    pub next: HookState,
}

/// Fire every handler whose guard holds in `state`.
///
/// Guards are evaluated against the input state only, so handlers in the same
/// pass do not see each other's flag changes.
pub fn transition(state: &HookState) -> Transition {
    transition_excluding(state, &BTreeSet::new())
}

fn transition_excluding(state: &HookState, skip: &BTreeSet<Handler>) -> Transition {
    let mut next = state.clone();
    let mut fired = vec![];
    let mut actions = vec![];

    for handler in Handler::ALL {
        if skip.contains(&handler) || !handler.ready(state) {
            continue;
        }
        fired.push(handler);
        actions.extend(handler.fire(state, &mut next));
    }

    Transition {
        fired,
        actions,
        next,
    }
}

/// Upper bound on passes in [`settle`]; there are fewer handlers than this
const MAX_PASSES: usize = 32;

/// Run passes until the flags stop changing. Each handler fires at most once.
pub fn settle(state: &HookState) -> (Vec<HookAction>, HookState) {
    let mut current = state.clone();
    let mut fired = BTreeSet::new();
    let mut actions = vec![];

    for _ in 0..MAX_PASSES {
        let step = transition_excluding(&current, &fired);
        if step.fired.is_empty() {
            break;
        }
        fired.extend(step.fired);
        actions.extend(step.actions);
        let changed = step.next != current;
        current = step.next;
        if !changed {
            break;
        }
    }
    (actions, current)
}
