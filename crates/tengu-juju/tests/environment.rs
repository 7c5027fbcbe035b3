//! Environment and service behaviour against a scripted juju

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tengu_juju::{
    CancelToken, Environment, EnvironmentStore, JujuConfig, JujuError, MockResponse, MockRunner,
    WaitOptions,
};

const JENV: &str = "password: s3cret\nbootstrap-config:\n  bootstrap-user: ubuntu\n";

struct Fixture {
    home: tempfile::TempDir,
    runner: Arc<MockRunner>,
    env: Environment,
}

fn config(home: &Path) -> JujuConfig {
    JujuConfig::builder()
        .juju_home(home)
        .without_delays()
        .wait_timeout(Some(Duration::from_secs(5)))
        .build()
}

fn fixture() -> Fixture {
    let home = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let env = Environment::new("tengu", runner.clone(), config(home.path()));
    Fixture { home, runner, env }
}

fn with_state(fixture: &Fixture) {
    fixture
        .env
        .store()
        .write_state_bytes("tengu", JENV.as_bytes())
        .unwrap();
}

fn status(services: serde_json::Value) -> MockResponse {
    MockResponse::output(
        json!({
            "machines": {"0": {}, "1": {"containers": {"1/lxc/0": {}, "1/lxc/1": {}}}},
            "services": services,
        })
        .to_string(),
    )
}

fn service(current: &str, message: &str, units: serde_json::Value) -> serde_json::Value {
    json!({
        "service-status": {"current": current, "message": message},
        "units": units,
    })
}

fn destroyed_machines(runner: &MockRunner) -> Vec<String> {
    runner
        .calls_matching(&["destroy-machine"])
        .into_iter()
        .map(|c| c.argv[1].clone())
        .collect()
}

#[test]
fn exists_is_false_when_service_is_absent() {
    let f = fixture();
    f.runner.on(
        &["status"],
        status(json!({"db": service("active", "Ready", json!({}))})),
    );

    assert!(!f.env.service("web").exists().unwrap());
    assert!(f.env.service("db").exists().unwrap());
}

#[test]
fn exists_propagates_other_failures() {
    let f = fixture();
    f.runner
        .on(&["status"], MockResponse::fail("ERROR permission denied"))
        .on(
            &["status"],
            MockResponse::fail("ERROR Unable to connect to environment \"tengu\""),
        )
        .on(
            &["status"],
            MockResponse::fail("ERROR missing namespace, config not prepared"),
        );

    let web = f.env.service("web");
    match web.exists() {
        Err(JujuError::Execution { command, output }) => {
            assert_eq!(command, "juju status -e tengu --format json");
            assert_eq!(output, "ERROR permission denied");
        }
        other => panic!("expected execution error, got {other:?}"),
    }
    assert_eq!(web.exists().unwrap_err().kind(), "unreachable");
    assert!(!web.exists().unwrap());
}

#[test]
fn force_destroy_spares_physical_machines() {
    let f = fixture();
    f.runner.on(
        &["status"],
        status(json!({
            "web": service("active", "Ready", json!({
                "web/0": {"machine": "0"},
                "web/1": {"machine": "1/lxc/0"},
            })),
        })),
    );

    let destroyed = f.env.service("web").destroy(true).unwrap();

    assert_eq!(destroyed, ["1/lxc/0"]);
    assert_eq!(destroyed_machines(&f.runner), ["1/lxc/0"]);
    assert_eq!(f.runner.calls_matching(&["destroy-service", "web"]).len(), 1);
}

#[test]
fn force_destroy_spares_machines_shared_with_other_services() {
    let f = fixture();
    f.runner.on(
        &["status"],
        status(json!({
            "web": service("active", "Ready", json!({
                "web/0": {"machine": "1"},
                "web/1": {"machine": "1/lxc/1"},
            })),
            "db": service("active", "Ready", json!({
                "db/0": {"machine": "1"},
                "db/1": {"machine": "1/lxc/1"},
            })),
        })),
    );

    let destroyed = f.env.service("web").destroy(true).unwrap();

    assert!(destroyed.is_empty());
    assert!(destroyed_machines(&f.runner).is_empty());
}

#[test]
fn destroy_without_force_leaves_machines() {
    let f = fixture();
    f.runner.on(
        &["status"],
        status(json!({"web": service("active", "Ready", json!({"web/0": {"machine": "1/lxc/0"}}))})),
    );

    assert!(f.env.service("web").destroy(false).unwrap().is_empty());
    assert!(destroyed_machines(&f.runner).is_empty());
}

#[test]
fn bundle_deploys_in_annotated_order() {
    let f = fixture();
    let bundle = f.home.path().join("bundle.yaml");
    std::fs::write(
        &bundle,
        "services:
  b:
    charm: cs:trusty/worker
    to: ['1', '1/lxc/0']
    options:
      workers: 4
    annotations:
      order: 2
      wait-until-message: serving
  a:
    charm: cs:trusty/controller
    annotations:
      order: 1
",
    )
    .unwrap();
    f.runner.on(
        &["status"],
        status(json!({
            "a": service("active", "Ready", json!({})),
            "b": service("active", "Serving requests", json!({})),
        })),
    );

    let deployed = f.env.deploy_bundle(&bundle).unwrap();
    assert_eq!(deployed, ["a", "b"]);

    let deploys = f.runner.calls_matching(&["deploy"]);
    assert_eq!(deploys.len(), 2);

    let a = &deploys[0];
    assert_eq!(&a.argv[..5], ["deploy", "cs:trusty/controller", "a", "-e", "tengu"]);
    // No placement: the first machine in the environment
    assert_eq!(&a.argv[5..7], ["--to", "0"]);
    assert_eq!(a.config_file.as_deref(), Some("a: {}\n"));

    let b = &deploys[1];
    assert_eq!(b.argv[2], "b");
    assert_eq!(&b.argv[5..7], ["--to", "1"]);
    assert_eq!(b.config_file.as_deref(), Some("b:\n  workers: 4\n"));

    let add_units = f.runner.calls_matching(&["add-unit"]);
    assert_eq!(
        add_units.iter().map(|c| c.argv.clone()).collect::<Vec<_>>(),
        [
            vec!["add-unit", "a", "-e", "tengu", "--to", "1"],
            vec!["add-unit", "b", "-e", "tengu", "--to", "1/lxc/0"],
        ]
    );

    // Staged option files are released after a successful deploy
    let staged = a.argv.last().unwrap();
    assert!(!Path::new(staged).exists());
}

#[test]
fn add_machines_fails_if_any_host_fails() {
    let f = fixture();
    with_state(&f);
    f.runner.on(
        &["add-machine", "ssh:ubuntu@bad.example"],
        MockResponse::fail("ERROR cannot reach host"),
    );

    let hosts = ["a.example", "bad.example", "c.example"].map(String::from);
    let err = f.env.add_machines(&hosts).unwrap_err();

    match err {
        JujuError::Aggregate { total, errors } => {
            assert_eq!(total, 3);
            assert_eq!(errors.len(), 1);
            assert!(errors[0].to_string().contains("cannot reach host"));
        }
        other => panic!("expected aggregate error, got {other:?}"),
    }
    let issued: Vec<String> = f
        .runner
        .calls_matching(&["add-machine"])
        .into_iter()
        .map(|c| c.argv[1].clone())
        .collect();
    assert_eq!(
        issued,
        ["ssh:ubuntu@a.example", "ssh:ubuntu@bad.example", "ssh:ubuntu@c.example"]
    );
}

#[test]
fn add_machines_requires_bootstrap_user() {
    let f = fixture();
    f.env
        .store()
        .write_state_bytes("tengu", b"password: x\n")
        .unwrap();

    let err = f.env.add_machines(&["a.example".into()]).unwrap_err();
    assert_eq!(err.kind(), "missing-state");
    assert!(f.runner.calls_matching(&["add-machine"]).is_empty());
}

#[test]
fn set_then_get_config_round_trips() {
    let f = fixture();
    let web = f.env.service("web");

    let options = BTreeMap::from([("x".to_string(), serde_yaml::Value::from("1"))]);
    web.set_config(&options).unwrap();

    let set = &f.runner.calls_matching(&["set", "web", "-e", "tengu"])[0];
    let staged: BTreeMap<String, BTreeMap<String, serde_yaml::Value>> =
        serde_yaml::from_str(set.config_file.as_deref().unwrap()).unwrap();
    assert_eq!(staged["web"], options);
    assert!(!Path::new(set.argv.last().unwrap()).exists());

    // juju reports options inside a `settings` envelope
    let settings: BTreeMap<_, _> = staged["web"]
        .iter()
        .map(|(k, v)| (k.clone(), json!({"value": v.as_str(), "type": "string"})))
        .collect();
    let get = serde_yaml::to_string(&json!({
        "charm": "apache2",
        "service": "web",
        "settings": settings,
    }))
    .unwrap();
    f.runner.on(&["get", "web"], MockResponse::output(get));

    assert_eq!(web.get_config().unwrap(), options);
}

#[test]
fn get_config_skips_unset_options() {
    let f = fixture();
    f.runner.on(
        &["get", "web"],
        MockResponse::output(
            "service: web\nsettings:\n  port:\n    value: 80\n  vhost:\n    description: unset\n    type: string\n",
        ),
    );

    let config = f.env.service("web").get_config().unwrap();
    assert_eq!(config.len(), 1);
    assert_eq!(config["port"], serde_yaml::Value::from(80));
}

#[test]
fn wait_until_polls_until_message_matches() {
    let f = fixture();
    f.runner
        .on(
            &["status"],
            status(json!({"web": service("maintenance", "Installing", json!({}))})),
        )
        .on(
            &["status"],
            status(json!({"web": service("active", "ready", json!({}))})),
        );

    f.env
        .service("web")
        .wait_until("Ready", &f.env.wait_options())
        .unwrap();
    assert_eq!(f.runner.calls_matching(&["status"]).len(), 2);
}

#[test]
fn wait_until_times_out() {
    let f = fixture();
    f.runner.on(
        &["status"],
        status(json!({"web": service("blocked", "Waiting for rest2jfed", json!({}))})),
    );

    let options = f.env.wait_options().with_timeout(Some(Duration::ZERO));
    let err = f.env.service("web").wait_until("Ready", &options).unwrap_err();
    assert_eq!(err.kind(), "timeout");
}

#[test]
fn wait_until_honours_cancellation() {
    let f = fixture();
    f.runner.on(
        &["status"],
        status(json!({"web": service("maintenance", "Installing", json!({}))})),
    );

    let token = CancelToken::new();
    token.cancel();
    let options = WaitOptions {
        interval: Duration::from_secs(3600),
        timeout: None,
        cancel: None,
    }
    .with_cancel(token);

    let err = f.env.service("web").wait_until("Ready", &options).unwrap_err();
    assert!(matches!(err, JujuError::Cancelled(name) if name == "web"));
}

#[test]
fn destroy_containers_removes_every_container() {
    let f = fixture();
    f.runner.on(&["status"], status(json!({})));

    let destroyed = f.env.destroy_containers().unwrap();

    assert_eq!(destroyed, ["1/lxc/1", "1/lxc/0"]);
    let calls = f.runner.calls_matching(&["destroy-machine"]);
    assert_eq!(
        calls[0].argv,
        ["destroy-machine", "1/lxc/1", "--force", "-e", "tengu"]
    );
}

#[test]
fn create_bootstraps_then_populates() {
    let home = tempfile::tempdir().unwrap();
    let config = config(home.path());
    EnvironmentStore::new(&config)
        .write_state_bytes("tengu", JENV.as_bytes())
        .unwrap();
    let bundle = home.path().join("bundle.yaml");
    std::fs::write(
        &bundle,
        "services:\n  hauchiwa:\n    charm: local:trusty/hauchiwa\n    to: '0'\n    annotations:\n      order: 1\n",
    )
    .unwrap();

    let runner = Arc::new(MockRunner::new());
    runner
        .on(&["switch", "--list"], MockResponse::output("local\nother\n"))
        .on(
            &["status"],
            status(json!({"hauchiwa": service("active", "Ready", json!({}))})),
        );

    let provider: serde_yaml::Value = serde_yaml::from_str("type: manual\nbootstrap-host: h0\n").unwrap();
    let env = Environment::create(
        runner.clone(),
        config.clone(),
        "tengu",
        provider,
        &["h1".into()],
        &bundle,
    )
    .unwrap();

    assert_eq!(env.name(), "tengu");
    assert!(env.store().exists("tengu").unwrap());

    let argv: Vec<Vec<String>> = runner.calls().into_iter().map(|c| c.argv).collect();
    assert_eq!(argv[0], ["switch", "--list"]);
    assert_eq!(argv[1], ["switch", "tengu"]);
    assert_eq!(argv[2], ["bootstrap", "--debug", "-e", "tengu"]);
    assert_eq!(argv[3], ["add-machine", "ssh:ubuntu@h1", "-e", "tengu"]);
    assert!(argv.iter().any(|a| a[0] == "deploy" && a[2] == "hauchiwa"));
}

#[test]
fn create_refuses_existing_environment() {
    let home = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    runner.on(&["switch", "--list"], MockResponse::output("local tengu"));

    let err = Environment::create(
        runner.clone(),
        config(home.path()),
        "tengu",
        serde_yaml::Value::Null,
        &[],
        Path::new("bundle.yaml"),
    )
    .unwrap_err();

    assert_eq!(err.kind(), "already-exists");
    assert_eq!(runner.calls().len(), 1);
}

#[test]
fn create_leaves_partial_environment_registered() {
    let home = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    runner.on(&["bootstrap"], MockResponse::fail("ERROR bootstrap failed"));

    let err = Environment::create(
        runner,
        config(home.path()),
        "tengu",
        serde_yaml::from_str("type: manual").unwrap(),
        &[],
        Path::new("bundle.yaml"),
    )
    .unwrap_err();

    assert_eq!(err.kind(), "execution");
    assert!(
        EnvironmentStore::new(&config(home.path()))
            .exists("tengu")
            .unwrap()
    );
}

#[test]
fn import_registers_and_activates() {
    let source = fixture();
    source
        .env
        .store()
        .register("tengu", serde_yaml::from_str("type: manual").unwrap())
        .unwrap();
    with_state(&source);
    let token = source.env.export().unwrap();

    let home = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let env = Environment::import(runner.clone(), config(home.path()), &token).unwrap();

    assert_eq!(env.password().unwrap().as_deref(), Some("s3cret"));
    assert_eq!(runner.calls()[0].argv, ["switch", "tengu"]);
}

#[test]
fn passthrough_commands_render_in_order() {
    let f = fixture();
    f.runner
        .on(&["action", "do"], MockResponse::output("Action queued with id: 42\n"));

    f.env
        .run_deployer(Path::new("/tmp/b.yaml"), &["--no-relations".into()])
        .unwrap();
    f.env.add_relation("web", "db").unwrap();
    let out = f
        .env
        .action_do("web/0", "backup", &[("params".into(), "/tmp/p.yaml".into())])
        .unwrap();

    assert_eq!(out, "Action queued with id: 42\n");
    let argv: Vec<Vec<String>> = f.runner.calls().into_iter().map(|c| c.argv).collect();
    assert_eq!(
        argv,
        [
            vec!["deployer", "-c", "/tmp/b.yaml", "--no-relations", "-e", "tengu"],
            vec!["add-relation", "web", "db", "-e", "tengu"],
            vec![
                "action", "do", "web/0", "backup", "-e", "tengu", "--params", "/tmp/p.yaml"
            ],
        ]
    );
}

#[test]
fn service_scaling_and_upgrade() {
    let f = fixture();
    let web = f.env.service("web");

    web.add_unit(None).unwrap();
    web.add_unit(Some("1/lxc/0")).unwrap();
    web.upgrade().unwrap();

    let argv: Vec<Vec<String>> = f.runner.calls().into_iter().map(|c| c.argv).collect();
    assert_eq!(
        argv,
        [
            vec!["add-unit", "web", "-e", "tengu"],
            vec!["add-unit", "web", "-e", "tengu", "--to", "1/lxc/0"],
            vec!["upgrade-charm", "web", "-e", "tengu"],
        ]
    );
}

/// Registry written by the store is the one a real juju child reads
#[cfg(unix)]
#[test]
fn juju_child_sees_the_store_registry() {
    use std::os::unix::fs::PermissionsExt;
    use tengu_juju::JujuCli;

    let home = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    let program = bin.path().join("juju");
    // `switch --list` prints registered names; `switch NAME` fails unless NAME is registered
    std::fs::write(
        &program,
        r#"#!/bin/sh
registry="$JUJU_HOME/environments.yaml"
if [ "$1" = switch ] && [ "$2" = --list ]; then
    sed -n 's/^  \([^ :]*\):.*/\1/p' "$registry"
elif [ "$1" = switch ]; then
    grep -q "^  $2:" "$registry" 2>/dev/null || { echo "ERROR environment \"$2\" not found" >&2; exit 1; }
fi
"#,
    )
    .unwrap();
    std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config = JujuConfig::builder()
        .juju_bin(&program)
        .juju_home(home.path())
        .without_delays()
        .build();
    let runner = Arc::new(JujuCli::from_config(&config));

    let env = Environment::new("tengu", runner.clone(), config.clone());
    env.store()
        .register("tengu", serde_yaml::from_str("type: manual").unwrap())
        .unwrap();

    env.set_active().unwrap();
    assert_eq!(Environment::list(runner.as_ref()).unwrap(), ["tengu"]);
    assert!(Environment::exists(runner.as_ref(), "tengu").unwrap());
}
