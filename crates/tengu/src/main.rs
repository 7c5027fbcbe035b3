//! Tengu - Juju Environment Manager
//!
//! Creates, populates and tears down Tengu environments over the `juju` CLI.
//! - create: bootstrap a manual environment, enlist machines, deploy a bundle
//! - status/wait: inspect services and block on their workload status
//! - export/import: move an environment's credentials between hosts

mod config;
mod ui;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use std::{fs, io};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use console::style;
use tengu_juju::{
    CancelToken, CommandRunner, Environment, EnvironmentStore, ExportedEnvironment, Invocation,
    JujuCli, JujuConfig, JujuError,
};
use tracing_subscriber::EnvFilter;

use config::{Overrides, config_path, load_config, resolve};
use ui::{CHECK, CROSS, FOLDER, GEAR, HOURGLASS, ROCKET};

#[derive(Parser, Debug)]
#[command(
    name = "tengu",
    version,
    about = "Create and manage Tengu Juju environments"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (global)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Environment to operate on (defaults to `juju switch`)
    #[arg(short, long, global = true)]
    environment: Option<String>,

    /// juju binary
    #[arg(long, global = true)]
    juju_bin: Option<PathBuf>,

    /// Juju home directory
    #[arg(long, global = true)]
    juju_home: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Show config file path and exit
    #[arg(long)]
    show_config: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bootstrap a new environment, add machines and deploy a bundle
    Create {
        /// Environment name
        name: String,

        /// YAML file with the provider settings for environments.yaml
        #[arg(long)]
        provider_config: PathBuf,

        /// Bundle to deploy once the machines are added
        #[arg(long)]
        bundle: PathBuf,

        /// Host to add over SSH (repeatable)
        #[arg(long = "machine")]
        machines: Vec<String>,
    },

    /// List environments known to juju
    List,

    /// Import an export token from a file, or `-` for stdin
    Import { file: String },

    /// Drop an environment from the registry and delete its state file
    Forget {
        name: String,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    #[command(flatten)]
    Env(EnvCommand),
}

/// Commands that act on one selected environment
#[derive(Subcommand, Debug)]
enum EnvCommand {
    /// Show services in the environment
    Status {
        /// Print the raw status document as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print an environment's export token
    Export {
        /// Environment name (defaults to the selected environment)
        name: Option<String>,
    },

    /// Add SSH-reachable hosts as machines
    AddMachines {
        #[arg(required = true)]
        hosts: Vec<String>,
    },

    /// Relate two services
    AddRelation { a: String, b: String },

    /// Deploy a bundle in its annotated order
    DeployBundle { path: PathBuf },

    /// Pass a bundle to `juju deployer` untouched
    Deployer {
        path: PathBuf,

        /// Extra arguments for juju deployer
        #[arg(last = true)]
        extra: Vec<String>,
    },

    /// Wait for a service to report a status message
    Wait {
        service: String,

        /// Message to wait for (defaults to the configured wait message)
        message: Option<String>,

        /// Give up after this many seconds (0 waits forever)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Read or change service configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Destroy a service
    DestroyService {
        name: String,

        /// Also destroy the containers it leaves unused
        #[arg(short, long)]
        force: bool,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Force-destroy every container in the environment
    DestroyContainers {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Run an action on a unit
    Action {
        unit: String,
        action: String,

        /// Extra `juju action do` flag as key=value (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,
    },

    /// Upgrade a service's charm
    Upgrade { service: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Show every option with its value, type and default
    Get { service: String },

    /// Set options as key=value
    Set {
        service: String,
        #[arg(required = true)]
        options: Vec<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let kind = err
                .downcast_ref::<JujuError>()
                .map_or("error", JujuError::kind);
            eprintln!(
                "{CROSS} {} {}",
                style(format!("[{kind}]")).red().bold(),
                style(format!("{err:#}")).red()
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TENGU_LOG").unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn run(args: Args) -> Result<()> {
    // Show config path and exit
    if args.show_config {
        let path = args.config.clone().unwrap_or_else(config_path);
        println!("{} Config: {}", FOLDER, path.display());
        if path.exists() {
            println!("  {CHECK} exists");
        } else {
            println!("  {} not found (will use defaults)", style("!").yellow());
        }
        return Ok(());
    }

    let file_config = load_config(args.config.as_deref())?;
    let overrides = Overrides {
        juju_bin: args.juju_bin.clone(),
        juju_home: args.juju_home.clone(),
    };
    let juju = resolve(&overrides, &file_config, |key| std::env::var(key).ok());
    let runner: Arc<dyn CommandRunner> = Arc::new(JujuCli::from_config(&juju));

    let Some(command) = args.command else {
        return run_list(runner.as_ref());
    };

    match command {
        Commands::Create {
            name,
            provider_config,
            bundle,
            machines,
        } => run_create(runner, juju, &name, &provider_config, &bundle, &machines),
        Commands::List => run_list(runner.as_ref()),
        Commands::Import { file } => run_import(runner, juju, &file),
        Commands::Forget { name, yes } => run_forget(&juju, &name, yes),
        Commands::Env(command) => {
            let env = select_environment(runner, juju, args.environment)?;
            run_in_environment(&env, command)
        }
    }
}

fn select_environment(
    runner: Arc<dyn CommandRunner>,
    config: JujuConfig,
    name: Option<String>,
) -> Result<Environment> {
    match name {
        Some(name) => Ok(Environment::new(name, runner, config)),
        None => Environment::current(runner, config).context("Failed to find the active environment"),
    }
}

fn run_in_environment(env: &Environment, command: EnvCommand) -> Result<()> {
    match command {
        EnvCommand::Status { json } => {
            let status = env.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{} {}\n", style("▸").blue().bold(), style(env.name()).cyan());
                println!("{}", ui::status_table(&status));
            }
        }
        EnvCommand::Export { name } => {
            let token = match name {
                Some(name) => env.store().export(&name)?,
                None => env.export()?,
            };
            println!("{}", token.to_json()?);
        }
        EnvCommand::AddMachines { hosts } => {
            let spinner = ui::spinner(format!("Adding {} machine(s)...", hosts.len()));
            let result = env.add_machines(&hosts);
            spinner.finish_and_clear();
            result?;
            println!("{CHECK} Added {} machine(s)", hosts.len());
        }
        EnvCommand::AddRelation { a, b } => {
            env.add_relation(&a, &b)?;
            println!("{CHECK} Related {a} and {b}");
        }
        EnvCommand::DeployBundle { path } => {
            ui::step(&format!("Deploying {}", path.display()));
            let deployed = env.deploy_bundle(&path)?;
            ui::print_success(&format!("Deployed {}", deployed.join(", ")));
        }
        EnvCommand::Deployer { path, extra } => env.run_deployer(&path, &extra)?,
        EnvCommand::Wait {
            service,
            message,
            timeout,
        } => run_wait(env, &service, message.as_deref(), timeout)?,
        EnvCommand::Config { command } => run_config(env, command)?,
        EnvCommand::DestroyService { name, force, yes } => {
            if !confirm(&format!("Destroy service '{name}' in {}?", env.name()), yes)? {
                println!("Aborted.");
                return Ok(());
            }
            let reclaimed = env.service(&name).destroy(force)?;
            println!("{CHECK} Destroyed {name}");
            for machine in reclaimed {
                println!("  {} machine {machine}", style("-").dim());
            }
        }
        EnvCommand::DestroyContainers { yes } => {
            if !confirm(&format!("Destroy every container in {}?", env.name()), yes)? {
                println!("Aborted.");
                return Ok(());
            }
            let destroyed = env.destroy_containers()?;
            println!("{CHECK} Destroyed {} container(s)", destroyed.len());
        }
        EnvCommand::Action {
            unit,
            action,
            params,
        } => {
            let flags = params
                .iter()
                .map(String::as_str)
                .map(parse_assignment)
                .collect::<Result<Vec<_>>>()?;
            print!("{}", env.action_do(&unit, &action, &flags)?);
        }
        EnvCommand::Upgrade { service } => {
            env.service(&service).upgrade()?;
            println!("{CHECK} Upgrading {service}");
        }
    }
    Ok(())
}

fn run_create(
    runner: Arc<dyn CommandRunner>,
    config: JujuConfig,
    name: &str,
    provider_config: &Path,
    bundle: &Path,
    machines: &[String],
) -> Result<()> {
    let content = fs::read_to_string(provider_config)
        .with_context(|| format!("Failed to read {}", provider_config.display()))?;
    let provider: serde_yaml::Value = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", provider_config.display()))?;

    print_banner_for(name, machines.len(), bundle);
    println!("{ROCKET} Creating environment...");

    match Environment::create(runner, config, name, provider, machines, bundle) {
        Ok(env) => {
            ui::print_success(&format!("Environment {} ready", env.name()));
            Ok(())
        }
        Err(err @ JujuError::AlreadyExists(_)) => Err(err.into()),
        Err(err) => {
            eprintln!(
                "{} Creation stopped partway. Clean up with: {} and {}",
                style("!").yellow(),
                style(format!("juju destroy-environment {name}")).cyan(),
                style(format!("tengu forget {name}")).cyan()
            );
            Err(err.into())
        }
    }
}

fn print_banner_for(name: &str, machines: usize, bundle: &Path) {
    ui::print_banner();
    println!("{GEAR} {}", style(name).cyan().bold());
    println!("  {} machines: {machines}", style("->").dim());
    println!("  {} bundle: {}", style("->").dim(), bundle.display());
    println!();
}

fn run_list(runner: &dyn CommandRunner) -> Result<()> {
    let names = Environment::list(runner)?;
    let active = runner
        .output(&Invocation::new("switch"))
        .map(|s| s.trim_end().to_string())
        .ok();

    for name in names {
        if active.as_deref() == Some(name.as_str()) {
            println!("{CHECK}{}", style(&name).green().bold());
        } else {
            println!("   {name}");
        }
    }
    Ok(())
}

fn run_import(runner: Arc<dyn CommandRunner>, config: JujuConfig, file: &str) -> Result<()> {
    let mut content = String::new();
    if file == "-" {
        io::stdin()
            .read_to_string(&mut content)
            .context("Failed to read token from stdin")?;
    } else {
        content = fs::read_to_string(file).with_context(|| format!("Failed to read {file}"))?;
    }

    let token = ExportedEnvironment::from_json(content.trim())?;
    let env = Environment::import(runner, config, &token)?;
    println!("{CHECK} Imported {} (now active)", style(env.name()).cyan());
    Ok(())
}

fn run_forget(config: &JujuConfig, name: &str, yes: bool) -> Result<()> {
    if !confirm(&format!("Forget environment '{name}'?"), yes)? {
        println!("Aborted.");
        return Ok(());
    }
    EnvironmentStore::new(config).unregister(name)?;
    println!("{CHECK} Forgot {name}");
    Ok(())
}

fn run_wait(env: &Environment, service: &str, message: Option<&str>, timeout: Option<u64>) -> Result<()> {
    let target = message.unwrap_or(&env.config().default_wait_message);

    let token = CancelToken::new();
    let handler = token.clone();
    ctrlc::set_handler(move || handler.cancel()).context("Failed to install Ctrl-C handler")?;

    let mut options = env.wait_options().with_cancel(token);
    if let Some(secs) = timeout {
        options = options.with_timeout((secs > 0).then(|| Duration::from_secs(secs)));
    }

    let spinner = ui::spinner(format!("{HOURGLASS}Waiting for {service} to report '{target}'..."));
    let result = env.service(service).wait_until(target, &options);
    match &result {
        Ok(()) => spinner.finish_with_message(format!("{CHECK} {service} ready")),
        Err(_) => spinner.finish_and_clear(),
    }
    result.map_err(Into::into)
}

fn run_config(env: &Environment, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Get { service } => {
            let config = env.service(&service).config()?;
            ui::step(&ui::config_heading(&config, &service));
            println!("{}", ui::config_table(&config));
        }
        ConfigCommand::Set { service, options } => {
            let options: BTreeMap<String, serde_yaml::Value> = options
                .iter()
                .map(|o| {
                    let (key, value) = parse_assignment(o)?;
                    Ok((key, parse_value(&value)))
                })
                .collect::<Result<_>>()?;
            env.service(&service).set_config(&options)?;
            println!("{CHECK} Updated {service}");
        }
    }
    Ok(())
}

fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    Ok(dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

/// Split `key=value`; the value may itself contain `=`
fn parse_assignment(input: &str) -> Result<(String, String)> {
    match input.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("expected key=value, got '{input}'"),
    }
}

/// Read a config value as a YAML scalar so numbers and booleans keep their type
fn parse_value(value: &str) -> serde_yaml::Value {
    match serde_yaml::from_str::<serde_yaml::Value>(value) {
        Ok(parsed @ (serde_yaml::Value::Bool(_) | serde_yaml::Value::Number(_))) => parsed,
        _ => serde_yaml::Value::String(value.to_string()),
    }
}
