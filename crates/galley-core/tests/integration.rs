use galley_core::{run, run_until, Cause, CoreError, ErrorKind, Instance, RunAction, Workspace};
use galley_plugin::{
    ConfigContext, Driver, Peers, Plugin, PluginConfig, PluginError, PluginRegistry,
};
use galley_schema::{instance_name, Action, DestroyMode, Platform, PluginKind, Suite};
use galley_store::{InstanceState, ProjectLayout, StateFile};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Shared observations of every recorder driver in one test.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn calls(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_suffix(":enter").map(str::to_owned))
            .collect()
    }
}

struct Handshake {
    tx: Mutex<Sender<()>>,
    rx: Mutex<Receiver<()>>,
}

fn handshake_pair() -> (Handshake, Handshake) {
    let (tx_a, rx_b) = mpsc::channel();
    let (tx_b, rx_a) = mpsc::channel();
    (
        Handshake {
            tx: Mutex::new(tx_a),
            rx: Mutex::new(rx_a),
        },
        Handshake {
            tx: Mutex::new(tx_b),
            rx: Mutex::new(rx_b),
        },
    )
}

/// Driver double that records entry and exit of every action.
struct RecordingDriver {
    type_name: &'static str,
    config: PluginConfig,
    recorder: Arc<Recorder>,
    serial: Vec<Action>,
    delay: Duration,
    fail_on: Option<Action>,
    handshake: Option<Handshake>,
}

impl RecordingDriver {
    fn new(type_name: &'static str, recorder: &Arc<Recorder>) -> Self {
        Self {
            type_name,
            config: PluginConfig::new(
                PluginKind::Driver,
                type_name,
                BTreeMap::new(),
                ConfigContext::new("unset".into(), "unset", "unset", "/tmp"),
            ),
            recorder: Arc::clone(recorder),
            serial: Vec::new(),
            delay: Duration::ZERO,
            fail_on: None,
            handshake: None,
        }
    }

    fn serial(mut self, actions: &[Action]) -> Self {
        self.serial = actions.to_vec();
        self
    }

    fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn fail_on(mut self, action: Action) -> Self {
        self.fail_on = Some(action);
        self
    }

    fn handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = Some(handshake);
        self
    }

    fn record(&self, action: Action) -> Result<(), PluginError> {
        let who = self.config.instance_name().to_string();
        self.recorder
            .events
            .lock()
            .unwrap()
            .push(format!("{who}:{action}:enter"));
        let now = self.recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let mut result = Ok(());
        if let Some(h) = &self.handshake {
            h.tx.lock().unwrap().send(()).unwrap();
            if h.rx
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .is_err()
            {
                result = Err(PluginError::Other("peer never arrived".to_owned()));
            }
        }
        thread::sleep(self.delay);

        self.recorder.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.recorder
            .events
            .lock()
            .unwrap()
            .push(format!("{who}:{action}:exit"));

        if self.fail_on == Some(action) {
            return Err(PluginError::Other(format!("{action} exploded")));
        }
        result
    }
}

impl Plugin for RecordingDriver {
    fn name(&self) -> &str {
        self.type_name
    }

    fn config(&self) -> &PluginConfig {
        &self.config
    }
}

impl Driver for RecordingDriver {
    fn serial_actions(&self) -> &[Action] {
        &self.serial
    }

    fn create(&self, state: &mut InstanceState) -> Result<(), PluginError> {
        state.insert("server_id", "srv-1234");
        self.record(Action::Create)
    }

    fn converge(&self, _state: &mut InstanceState, _peers: &Peers<'_>) -> Result<(), PluginError> {
        self.record(Action::Converge)
    }

    fn setup(&self, _state: &mut InstanceState, _peers: &Peers<'_>) -> Result<(), PluginError> {
        self.record(Action::Setup)
    }

    fn verify(&self, _state: &mut InstanceState, _peers: &Peers<'_>) -> Result<(), PluginError> {
        self.record(Action::Verify)
    }

    fn destroy(&self, state: &mut InstanceState) -> Result<(), PluginError> {
        self.record(Action::Destroy)?;
        state.remove("server_id");
        Ok(())
    }
}

fn build_instance(dir: &Path, suite: &str, platform: &str, mut driver: RecordingDriver) -> Instance {
    let registry = PluginRegistry::with_builtins();
    let ctx = ConfigContext::new(instance_name(suite, platform), suite, platform, dir);
    driver.config = PluginConfig::new(
        PluginKind::Driver,
        driver.type_name,
        BTreeMap::new(),
        ctx.clone(),
    );
    let empty = BTreeMap::new();
    Instance::builder()
        .suite(Suite {
            name: suite.to_owned(),
        })
        .platform(Platform {
            name: platform.to_owned(),
        })
        .driver(Box::new(driver))
        .provisioner(registry.load_provisioner("dummy", &empty, &ctx).unwrap())
        .verifier(registry.load_verifier("dummy", &empty, &ctx).unwrap())
        .transport(registry.load_transport("exec", &empty, &ctx).unwrap())
        .layout(ProjectLayout::new(dir))
        .build()
        .unwrap()
}

fn state_of(dir: &Path, name: &str) -> InstanceState {
    StateFile::new(&ProjectLayout::new(dir), name)
        .unwrap()
        .read()
        .unwrap()
}

#[test]
fn fresh_verify_runs_the_whole_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let instance = build_instance(dir.path(), "default", "ubuntu", RecordingDriver::new("recording", &recorder));

    instance.verify().unwrap();

    assert_eq!(
        recorder.calls(),
        vec![
            "default-ubuntu:create",
            "default-ubuntu:converge",
            "default-ubuntu:setup",
            "default-ubuntu:verify",
        ]
    );
    let state = state_of(dir.path(), "default-ubuntu");
    assert_eq!(state.get_str("last_action"), Some("verify"));
    assert_eq!(state.get_str("server_id"), Some("srv-1234"));
}

#[test]
fn moving_backward_reruns_only_the_requested_action() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let instance = build_instance(dir.path(), "s", "p", RecordingDriver::new("recording", &recorder));

    let mut prior = InstanceState::new();
    prior.set_last_action(Action::Setup);
    instance.state_file().write(&prior).unwrap();

    instance.create().unwrap();

    assert_eq!(recorder.calls(), vec!["s-p:create"]);
    assert_eq!(instance.last_action().unwrap(), Some(Action::Create));
}

#[test]
fn operations_chain() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let instance = build_instance(dir.path(), "s", "p", RecordingDriver::new("recording", &recorder));

    instance.create().unwrap().converge().unwrap().destroy().unwrap();

    assert_eq!(recorder.calls(), vec!["s-p:create", "s-p:converge", "s-p:destroy"]);
    assert!(!instance.state_file().exists());
}

#[test]
fn state_survives_a_failed_create() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let instance = build_instance(
        dir.path(),
        "s",
        "p",
        RecordingDriver::new("recording", &recorder).fail_on(Action::Create),
    );

    let err = instance.create().unwrap_err();
    assert!(matches!(err, CoreError::ActionFailed { action: Action::Create, .. }));

    let state = state_of(dir.path(), "s-p");
    assert_eq!(state.get_str("server_id"), Some("srv-1234"));
    assert_eq!(state.last_action(), Some(Action::Create));
}

#[test]
fn plain_verify_error_is_wrapped_with_its_original() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let instance = build_instance(
        dir.path(),
        "s",
        "p",
        RecordingDriver::new("recording", &recorder).fail_on(Action::Verify),
    );

    let err = instance.verify().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ActionFailed);
    assert_eq!(
        err.to_string(),
        "Failed to complete #verify action: [verify exploded]"
    );
    let Some(Cause::Single(original)) = err.original() else {
        panic!("expected a single original error, got {:?}", err.original());
    };
    let plugin = original.downcast_ref::<PluginError>().unwrap();
    assert!(matches!(plugin, PluginError::Other(m) if m == "verify exploded"));
    assert_eq!(instance.last_action().unwrap(), Some(Action::Verify));
}

#[test]
fn failed_action_stops_the_cascade() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let instance = build_instance(
        dir.path(),
        "s",
        "p",
        RecordingDriver::new("recording", &recorder).fail_on(Action::Converge),
    );

    assert!(instance.verify().is_err());
    assert_eq!(recorder.calls(), vec!["s-p:create", "s-p:converge"]);

    // a later attempt resumes from the recorded attempt, not from scratch
    assert!(instance.verify().is_err());
    assert_eq!(
        recorder.calls(),
        vec!["s-p:create", "s-p:converge", "s-p:converge"]
    );
}

#[test]
fn same_driver_type_serializes_declared_actions() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let serial = |platform| {
        build_instance(
            dir.path(),
            "s",
            platform,
            RecordingDriver::new("serial-create-recorder", &recorder)
                .serial(&[Action::Create])
                .delay(Duration::from_millis(100)),
        )
    };
    let a = serial("one");
    let b = serial("two");

    run(RunAction::Create, &[&a, &b], Some(2)).unwrap();

    let events = recorder.events();
    assert_eq!(events.len(), 4);
    // entries and exits alternate: one create at a time
    for pair in events.chunks(2) {
        let who = pair[0].strip_suffix(":create:enter").unwrap();
        assert_eq!(pair[1], format!("{who}:create:exit"));
    }
    assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn undeclared_actions_of_a_serial_driver_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let (h1, h2) = handshake_pair();
    let a = build_instance(
        dir.path(),
        "s",
        "one",
        RecordingDriver::new("serial-destroy-recorder", &recorder)
            .serial(&[Action::Destroy])
            .handshake(h1),
    );
    let b = build_instance(
        dir.path(),
        "s",
        "two",
        RecordingDriver::new("serial-destroy-recorder", &recorder)
            .serial(&[Action::Destroy])
            .handshake(h2),
    );

    // each create waits for the other to have started
    run(RunAction::Create, &[&a, &b], Some(2)).unwrap();
    assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 2);
}

#[test]
fn different_driver_types_never_block_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let (h1, h2) = handshake_pair();
    let a = build_instance(
        dir.path(),
        "s",
        "one",
        RecordingDriver::new("type-a-recorder", &recorder)
            .serial(&[Action::Create])
            .handshake(h1),
    );
    let b = build_instance(
        dir.path(),
        "s",
        "two",
        RecordingDriver::new("type-b-recorder", &recorder).handshake(h2),
    );

    run(RunAction::Create, &[&a, &b], Some(2)).unwrap();
    assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 2);
}

#[test]
fn concurrency_bound_is_respected() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let instances: Vec<Instance> = (0..6)
        .map(|i| {
            build_instance(
                dir.path(),
                "s",
                &format!("p{i}"),
                RecordingDriver::new("recording", &recorder).delay(Duration::from_millis(30)),
            )
        })
        .collect();
    let refs: Vec<&Instance> = instances.iter().collect();

    run(RunAction::Create, &refs, Some(2)).unwrap();

    assert!(recorder.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(recorder.calls().len(), 6);
    for instance in &instances {
        assert_eq!(instance.last_action().unwrap(), Some(Action::Create));
    }
}

#[test]
fn default_concurrency_is_serial() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let instances: Vec<Instance> = (0..3)
        .map(|i| {
            build_instance(
                dir.path(),
                "s",
                &format!("p{i}"),
                RecordingDriver::new("recording", &recorder).delay(Duration::from_millis(10)),
            )
        })
        .collect();
    let refs: Vec<&Instance> = instances.iter().collect();

    run(RunAction::Create, &refs, None).unwrap();

    assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
    // FIFO admission
    assert_eq!(recorder.calls(), vec!["s-p0:create", "s-p1:create", "s-p2:create"]);
}

#[test]
fn runner_returns_a_single_failure_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let ok = build_instance(dir.path(), "s", "ok", RecordingDriver::new("recording", &recorder));
    let bad = build_instance(
        dir.path(),
        "s",
        "bad",
        RecordingDriver::new("recording", &recorder).fail_on(Action::Create),
    );

    let err = run(RunAction::Create, &[&ok, &bad], Some(2)).unwrap_err();
    assert!(matches!(err, CoreError::ActionFailed { action: Action::Create, .. }));
    // the healthy instance still ran to completion
    assert_eq!(ok.last_action().unwrap(), Some(Action::Create));
}

#[test]
fn runner_folds_several_failures() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let failing = |platform| {
        build_instance(
            dir.path(),
            "s",
            platform,
            RecordingDriver::new("recording", &recorder).fail_on(Action::Verify),
        )
    };
    let a = failing("a");
    let b = failing("b");

    let err = run(RunAction::Verify, &[&a, &b], Some(2)).unwrap_err();
    let CoreError::InstanceFailure {
        instances,
        message,
        original: Some(Cause::Composite(errors)),
    } = &err
    else {
        panic!("expected a composite instance failure, got {err:?}");
    };
    let mut names: Vec<_> = instances.iter().map(ToString::to_string).collect();
    names.sort();
    assert_eq!(names, vec!["s-a", "s-b"]);
    assert_eq!(message, "2 actions failed");
    assert_eq!(errors.len(), 2);
    assert!(err.is_transient());
}

#[test]
fn interrupted_run_reports_the_instances_it_never_started() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let make = |platform| {
        build_instance(
            dir.path(),
            "s",
            platform,
            RecordingDriver::new("recording", &recorder),
        )
    };
    let (a, b, c) = (make("a"), make("b"), make("c"));

    // stop is polled before each instance; the second poll interrupts
    let polls = AtomicUsize::new(0);
    let err = run_until(RunAction::Create, &[&a, &b, &c], None, || {
        polls.fetch_add(1, Ordering::SeqCst) >= 1
    })
    .unwrap_err();

    let CoreError::User(message) = &err else {
        panic!("expected a user error, got {err:?}");
    };
    assert_eq!(message, "interrupted: 2 instance(s) not run: s-b, s-c");
    assert!(!err.is_transient());

    assert_eq!(state_of(dir.path(), "s-a").last_action(), Some(Action::Create));
    assert_eq!(state_of(dir.path(), "s-b").last_action(), None);
    assert_eq!(state_of(dir.path(), "s-c").last_action(), None);
}

#[test]
fn run_until_without_a_stop_matches_run() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let a = build_instance(
        dir.path(),
        "s",
        "a",
        RecordingDriver::new("recording", &recorder),
    );
    run_until(RunAction::Create, &[&a], Some(2), || false).unwrap();
    assert_eq!(state_of(dir.path(), "s-a").last_action(), Some(Action::Create));
}

#[test]
fn test_passing_destroys_only_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let good = build_instance(dir.path(), "s", "good", RecordingDriver::new("recording", &recorder));
    good.test(DestroyMode::Passing).unwrap();
    assert!(!good.state_file().exists());

    let bad = build_instance(
        dir.path(),
        "s",
        "bad",
        RecordingDriver::new("recording", &recorder).fail_on(Action::Verify),
    );
    let err = bad.test(DestroyMode::Passing).unwrap_err();
    assert!(matches!(err, CoreError::InstanceFailure { .. }));
    assert!(err.to_string().ends_with("on s-bad"));
    // kept around for inspection
    assert_eq!(bad.last_action().unwrap(), Some(Action::Verify));
}

#[test]
fn test_starts_by_destroying_prior_runs() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let instance = build_instance(dir.path(), "s", "p", RecordingDriver::new("recording", &recorder));
    instance.converge().unwrap();

    instance.test(DestroyMode::Never).unwrap();

    assert_eq!(
        recorder.calls(),
        vec![
            "s-p:create",
            "s-p:converge",
            "s-p:destroy",
            "s-p:create",
            "s-p:converge",
            "s-p:setup",
            "s-p:verify",
        ]
    );
    assert_eq!(instance.last_action().unwrap(), Some(Action::Verify));
}

#[test]
fn test_always_destroys_after_failed_verify() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let instance = build_instance(
        dir.path(),
        "s",
        "p",
        RecordingDriver::new("recording", &recorder).fail_on(Action::Verify),
    );

    let err = instance.test(DestroyMode::Always).unwrap_err();
    assert!(matches!(err, CoreError::InstanceFailure { .. }));
    assert_eq!(recorder.calls().last().map(String::as_str), Some("s-p:destroy"));
    assert!(!instance.state_file().exists());
}

#[test]
fn test_always_keeps_both_errors_when_cleanup_fails_too() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());

    struct VerifyAndDestroyFail(RecordingDriver);
    impl Plugin for VerifyAndDestroyFail {
        fn name(&self) -> &str {
            self.0.name()
        }
        fn config(&self) -> &PluginConfig {
            self.0.config()
        }
    }
    impl Driver for VerifyAndDestroyFail {
        fn create(&self, state: &mut InstanceState) -> Result<(), PluginError> {
            self.0.create(state)
        }
        fn verify(&self, _: &mut InstanceState, _: &Peers<'_>) -> Result<(), PluginError> {
            Err(PluginError::Other("tests failed".to_owned()))
        }
        fn destroy(&self, state: &mut InstanceState) -> Result<(), PluginError> {
            // the pre-test cleanup succeeds, the final one does not
            if state.contains_key("server_id") {
                Err(PluginError::Other("api unavailable".to_owned()))
            } else {
                Ok(())
            }
        }
    }

    let ctx = ConfigContext::new(instance_name("s", "p"), "s", "p", dir.path());
    let mut inner = RecordingDriver::new("recording", &recorder);
    inner.config = PluginConfig::new(PluginKind::Driver, "recording", BTreeMap::new(), ctx.clone());
    let registry = PluginRegistry::with_builtins();
    let empty = BTreeMap::new();
    let instance = Instance::builder()
        .suite(Suite {
            name: "s".to_owned(),
        })
        .platform(Platform {
            name: "p".to_owned(),
        })
        .driver(Box::new(VerifyAndDestroyFail(inner)))
        .provisioner(registry.load_provisioner("dummy", &empty, &ctx).unwrap())
        .verifier(registry.load_verifier("dummy", &empty, &ctx).unwrap())
        .transport(registry.load_transport("exec", &empty, &ctx).unwrap())
        .layout(ProjectLayout::new(dir.path()))
        .build()
        .unwrap();

    let err = instance.test(DestroyMode::Always).unwrap_err();
    let Some(Cause::Composite(errors)) = err.original() else {
        panic!("expected both failures, got {err:?}");
    };
    assert_eq!(errors.len(), 2);
    assert!(errors[0].to_string().contains("tests failed"));
    assert!(errors[1].to_string().contains("api unavailable"));
    assert!(err.to_string().contains("tests failed"));
    assert!(err.to_string().contains("api unavailable"));
    // failed destroy leaves the state behind
    assert_eq!(instance.last_action().unwrap(), Some(Action::Destroy));
}

#[test]
fn corrupt_state_file_is_not_an_instance_failure() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let instance = build_instance(dir.path(), "s", "p", RecordingDriver::new("recording", &recorder));
    fs::create_dir_all(dir.path().join(".galley")).unwrap();
    fs::write(instance.state_file().path(), "[\"not\", \"a\", \"map\"]").unwrap();

    let err = instance.test(DestroyMode::Passing).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateFileLoad);
    assert!(recorder.calls().is_empty());
}

#[test]
fn workspace_drives_dummy_instances_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("galley.toml"),
        r#"
[driver]
name = "dummy"

[verifier]
name = "shell"
command = "test -n \"$GALLEY_INSTANCE\""

[[platforms]]
name = "ubuntu-22.04"

[[platforms]]
name = "debian-12"

[[suites]]
name = "default"
"#,
    )
    .unwrap();

    let ws = Workspace::load(dir.path(), Path::new("galley.toml")).unwrap();
    let selected = ws.select(Some("default")).unwrap();
    assert_eq!(selected.len(), 2);

    run(RunAction::Verify, &selected, Some(2)).unwrap();
    for instance in &selected {
        let state = state_of(dir.path(), instance.name());
        assert_eq!(state.last_action(), Some(Action::Verify));
        assert!(state.get_str("my_id").is_some());
    }

    run(RunAction::Destroy, &selected, None).unwrap();
    assert!(selected.iter().all(|i| !i.state_file().exists()));
}

#[test]
fn concurrent_processes_are_kept_off_one_instance() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let first = build_instance(
        dir.path(),
        "s",
        "p",
        RecordingDriver::new("recording", &recorder).delay(Duration::from_millis(300)),
    );
    let second = build_instance(dir.path(), "s", "p", RecordingDriver::new("recording", &recorder));

    let (tx, rx) = mpsc::channel();
    thread::scope(|s| {
        s.spawn(|| {
            tx.send(()).unwrap();
            first.create().unwrap();
        });
        rx.recv().unwrap();
        // give the first operation time to take the lock
        thread::sleep(Duration::from_millis(100));
        let err = second.create().unwrap_err();
        assert!(matches!(err, CoreError::User(ref m) if m.contains("in use")));
    });
    assert_eq!(recorder.calls(), vec!["s-p:create"]);
}
