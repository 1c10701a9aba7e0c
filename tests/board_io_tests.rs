use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pigeonio::{
    AppError, BoardConfig, EdgeDetect, GpioBackend, IoEvent, IoHost, IoSnapshot, LineHandle,
    LineRef, MockGpioBackend, PinKind, RunMode, Settings, WatchSink,
};
use tokio::sync::broadcast;
use tokio::time::timeout;

fn sample_config() -> BoardConfig {
    BoardConfig::from_json(
        r#"
        {
            "outputs": {
                "O1": { "name": "PUMP", "init": "high" },
                "O3": { "name": "O3" }
            },
            "inputs": {
                "I1+": { "name": "DOOR", "edge": "both" },
                "ID2": { "name": "KEY", "edge": "rising" }
            }
        }
        "#,
    )
    .expect("valid sample config")
}

async fn next_event(rx: &mut broadcast::Receiver<IoEvent>) -> IoEvent {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("event within a second")
        .expect("bus open")
}

async fn assert_quiet(rx: &mut broadcast::Receiver<IoEvent>) {
    assert!(
        timeout(Duration::from_millis(50), rx.recv()).await.is_err(),
        "unexpected extra event"
    );
}

/// Backend that forgets its lines as soon as they are handed out, so only the
/// board keeps them alive.
#[derive(Default)]
struct ForgetfulBackend {
    released: Arc<AtomicUsize>,
}

struct ForgetfulLine {
    line: u32,
    released: Arc<AtomicUsize>,
}

impl Drop for ForgetfulLine {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl GpioBackend for ForgetfulBackend {
    fn open_output(&self, line: u32) -> Result<LineRef, AppError> {
        Ok(Arc::new(ForgetfulLine {
            line,
            released: self.released.clone(),
        }))
    }

    fn open_input(&self, line: u32, _: EdgeDetect, _: Duration) -> Result<LineRef, AppError> {
        self.open_output(line)
    }
}

impl LineHandle for ForgetfulLine {
    fn line(&self) -> u32 {
        self.line
    }

    fn read_value(&self) -> Result<u8, AppError> {
        Ok(0)
    }

    fn write_value(&self, _: u8) -> Result<(), AppError> {
        Ok(())
    }

    fn watch(&self, _: WatchSink) -> Result<(), AppError> {
        Ok(())
    }
}

async fn sample_host(backend: &Arc<MockGpioBackend>) -> IoHost {
    let mut host = IoHost::default();
    host.setup_from(Ok(sample_config()), &Settings::default(), backend.clone())
        .await
        .expect("sample config is valid");
    host
}

#[tokio::test]
async fn pump_config_compiles_to_three_pins() {
    let backend = Arc::new(MockGpioBackend::default());
    let cfg = BoardConfig::from_json(r#"{"outputs":{"O1":{"name":"PUMP","init":"high"}}}"#)
        .expect("valid config");

    let mut host = IoHost::default();
    host.setup_from(Ok(cfg), &Settings::default(), backend.clone())
        .await
        .expect("setup");

    let names: Vec<&str> = host.config().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["OUT_ENABLE", "OUT_USERLED", "OUT_PUMP"]);

    let pump = &host.config()[2];
    assert_eq!(pump.init, 1);
    assert_eq!(pump.gpio, 35);
    assert_eq!(pump.kind, PinKind::Output);

    assert_eq!(backend.line(34).unwrap().writes(), vec![0]);
    assert_eq!(backend.line(45).unwrap().writes(), vec![0]);
    assert_eq!(backend.line(35).unwrap().writes(), vec![1]);
    assert_eq!(host.board().unwrap().pin_state("OUT_PUMP"), Some(1));
}

#[tokio::test]
async fn inputs_are_opened_with_their_policy_and_watched() {
    let backend = Arc::new(MockGpioBackend::default());
    let host = sample_host(&backend).await;

    let door = backend.line(12).expect("door line open");
    assert_eq!(door.edge(), EdgeDetect::Both);
    assert_eq!(door.debounce(), Duration::from_millis(50));
    assert!(door.is_watched());
    assert_eq!(backend.line(31).unwrap().edge(), EdgeDetect::Rising);

    assert_eq!(backend.opened_lines(), vec![12, 31, 34, 35, 37, 45]);
    assert_eq!(host.board().unwrap().pin_state("IN_DOOR"), None);
}

#[tokio::test]
async fn transition_updates_state_and_publishes_once() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut host = IoHost::default();
    let mut rx = host.emitter().subscribe();
    host.setup_from(Ok(sample_config()), &Settings::default(), backend.clone())
        .await
        .expect("setup");

    backend.set_level(12, 1).unwrap();

    assert_eq!(
        next_event(&mut rx).await,
        IoEvent::Data {
            name: "IN_DOOR".into(),
            value: 1
        }
    );
    assert_quiet(&mut rx).await;
    assert_eq!(host.board().unwrap().pin_state("IN_DOOR"), Some(1));
}

#[tokio::test]
async fn watch_error_publishes_error_and_keeps_state() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut host = IoHost::default();
    let mut rx = host.emitter().subscribe();
    host.setup_from(Ok(sample_config()), &Settings::default(), backend.clone())
        .await
        .expect("setup");

    backend.set_level(12, 1).unwrap();
    next_event(&mut rx).await;

    backend.inject_error(12, "line lost").unwrap();

    match next_event(&mut rx).await {
        IoEvent::Error(message) => {
            assert!(message.contains("IN_DOOR"));
            assert!(message.contains("12"));
            assert!(message.contains("line lost"));
        }
        other => panic!("expected error event, got {other:?}"),
    }
    assert_quiet(&mut rx).await;
    assert_eq!(host.board().unwrap().pin_state("IN_DOOR"), Some(1));
}

#[tokio::test]
async fn write_drives_a_live_output() {
    let backend = Arc::new(MockGpioBackend::default());
    let host = sample_host(&backend).await;

    host.write("O3", 1).await;

    assert_eq!(backend.line(37).unwrap().writes(), vec![0, 1]);
    assert_eq!(host.board().unwrap().pin_state("OUT_O3"), Some(1));
}

#[tokio::test]
async fn write_to_unknown_output_touches_no_hardware() {
    let backend = Arc::new(MockGpioBackend::default());
    let host = sample_host(&backend).await;
    let before: Vec<Vec<u8>> = backend
        .opened_lines()
        .into_iter()
        .map(|l| backend.line(l).unwrap().writes())
        .collect();

    host.write("O9", 1).await;
    host.write("PUMP", 2).await;

    let after: Vec<Vec<u8>> = backend
        .opened_lines()
        .into_iter()
        .map(|l| backend.line(l).unwrap().writes())
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn read_collects_every_live_line() {
    let backend = Arc::new(MockGpioBackend::default());
    let host = sample_host(&backend).await;

    backend.set_level(31, 1).unwrap();
    let snapshot = host.read().await;

    assert_eq!(snapshot.get("OUT", "PUMP"), Some(1));
    assert_eq!(snapshot.get("OUT", "O3"), Some(0));
    assert_eq!(snapshot.get("OUT", "ENABLE"), Some(0));
    assert_eq!(snapshot.get("IN", "DOOR"), Some(0));
    assert_eq!(snapshot.get("IN", "KEY"), Some(1));
    assert_eq!(snapshot.outputs.len(), 4);
    assert_eq!(snapshot.inputs.len(), 2);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["IN"]["KEY"], 1);
    assert_eq!(json["OUT"]["PUMP"], 1);
}

#[tokio::test]
async fn failed_line_is_skipped_and_the_rest_comes_up() {
    let backend = Arc::new(MockGpioBackend::default());
    backend.fail_line(35);
    let host = sample_host(&backend).await;
    let board = host.board().expect("initialized");

    assert!(board.state().read().get("OUT_PUMP").is_none());
    assert!(board.state().read().get("OUT_O3").is_some());
    assert!(board.state().read().get("IN_DOOR").is_some());

    let snapshot = host.read().await;
    assert_eq!(snapshot.get("OUT", "PUMP"), None);
    assert_eq!(snapshot.get("OUT", "O3"), Some(0));

    host.write("PUMP", 1).await;
    assert!(backend.line(35).is_none());
}

#[tokio::test]
async fn missing_config_leaves_subsystem_closed() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        config_dir: dir.path().to_path_buf(),
        ..Settings::default()
    };
    let backend = Arc::new(MockGpioBackend::default());

    let mut host = IoHost::default();
    host.setup(&settings, backend.clone())
        .await
        .expect("load failure is not raised");

    assert!(!host.is_initialized());
    assert!(host.config().is_empty());
    assert_eq!(host.read().await, IoSnapshot::default());
    host.write("PUMP", 1).await;
    assert!(backend.opened_lines().is_empty());
}

#[tokio::test]
async fn config_file_is_loaded_from_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("pigeonio.json"),
        r#"{"inputs":{"I3+":{"name":"STOP","edge":"falling"}}}"#,
    )
    .unwrap();
    let settings = Settings {
        config_dir: dir.path().to_path_buf(),
        ..Settings::default()
    };
    let backend = Arc::new(MockGpioBackend::default());

    let mut host = IoHost::default();
    host.setup(&settings, backend.clone()).await.expect("setup");

    let names: Vec<&str> = host.config().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["IN_STOP"]);
    assert_eq!(backend.opened_lines(), vec![18]);
}

#[tokio::test]
async fn invalid_config_is_raised_and_nothing_is_opened() {
    let backend = Arc::new(MockGpioBackend::default());
    let cfg = BoardConfig::from_json(
        r#"{
            "outputs": { "O9": { "name": "GHOST" } },
            "inputs": { "I1+": { "name": "DOOR", "edge": "sideways" } }
        }"#,
    )
    .unwrap();

    let mut host = IoHost::default();
    let err = host
        .setup_from(Ok(cfg), &Settings::default(), backend.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(err.violations().len(), 2);
    assert!(err.violations()[0].starts_with("\"[2].gpio\""));
    assert!(err.violations()[1].starts_with("\"[3].edge\""));
    assert!(!host.is_initialized());
    assert!(backend.opened_lines().is_empty());
}

#[tokio::test]
async fn development_mode_skips_hardware_and_reads_fixture() {
    let root = tempfile::tempdir().unwrap();
    let devdata = root.path().join("apps").join("washer").join("devdata");
    fs::create_dir_all(&devdata).unwrap();
    fs::write(
        devdata.join("pigeonio.json"),
        r#"{"IN":{"DOOR":1},"OUT":{"PUMP":0}}"#,
    )
    .unwrap();

    let settings = Settings {
        mode: RunMode::Development,
        app: Some("washer".into()),
        app_root: root.path().to_path_buf(),
        ..Settings::default()
    };
    let backend = Arc::new(MockGpioBackend::default());

    let mut host = IoHost::default();
    host.setup_from(Ok(sample_config()), &settings, backend.clone())
        .await
        .expect("setup");

    assert!(backend.opened_lines().is_empty());
    let board = host.board().unwrap();
    assert!(board.state().read().values().all(|p| p.handle.is_none()));
    assert_eq!(board.pin_state("OUT_PUMP"), Some(1));

    let snapshot = host.read().await;
    assert_eq!(snapshot.get("IN", "DOOR"), Some(1));
    assert_eq!(snapshot.get("OUT", "PUMP"), Some(0));

    host.write("PUMP", 1).await;
    assert!(backend.opened_lines().is_empty());
}

#[tokio::test]
async fn development_mode_without_fixture_reads_empty() {
    let settings = Settings {
        mode: RunMode::Development,
        app: Some("missing".into()),
        app_root: tempfile::tempdir().unwrap().path().to_path_buf(),
        ..Settings::default()
    };
    let backend = Arc::new(MockGpioBackend::default());

    let mut host = IoHost::default();
    host.setup_from(Ok(sample_config()), &settings, backend)
        .await
        .expect("setup");

    let snapshot = host.read().await;
    assert_eq!(snapshot, IoSnapshot::default());
    assert_eq!(
        serde_json::to_string(&snapshot).unwrap(),
        r#"{"IN":{},"OUT":{}}"#
    );
}

#[tokio::test]
async fn subscribers_survive_reinitialization() {
    let mut host = IoHost::default();
    let mut rx = host.emitter().subscribe();

    let first = Arc::new(MockGpioBackend::default());
    host.setup_from(Ok(sample_config()), &Settings::default(), first)
        .await
        .expect("first setup");

    let second = Arc::new(MockGpioBackend::default());
    host.setup_from(Ok(sample_config()), &Settings::default(), second.clone())
        .await
        .expect("second setup");

    second.set_level(31, 1).unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        IoEvent::Data {
            name: "IN_KEY".into(),
            value: 1
        }
    );
}

#[tokio::test]
async fn duplicate_labels_share_one_state_entry() {
    let backend = Arc::new(MockGpioBackend::default());
    let cfg = BoardConfig::from_json(
        r#"{"inputs":{"I1+":{"name":"SENSE"},"I2+":{"name":"SENSE"}}}"#,
    )
    .unwrap();

    let mut host = IoHost::default();
    let mut rx = host.emitter().subscribe();
    host.setup_from(Ok(cfg), &Settings::default(), backend.clone())
        .await
        .expect("setup");

    let board = host.board().unwrap();
    assert_eq!(board.config().len(), 2);
    assert_eq!(board.state().read().len(), 1);

    backend.set_level(12, 1).unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        IoEvent::Data {
            name: "IN_SENSE".into(),
            value: 1
        }
    );
    assert_eq!(board.pin_state("IN_SENSE"), Some(1));
}

#[tokio::test]
async fn duplicate_labels_keep_every_line_requested() {
    let backend = Arc::new(ForgetfulBackend::default());
    let released = backend.released.clone();
    let cfg = BoardConfig::from_json(
        r#"{"inputs":{"I1+":{"name":"SENSE"},"I2+":{"name":"SENSE"}}}"#,
    )
    .unwrap();

    let mut host = IoHost::default();
    host.setup_from(Ok(cfg), &Settings::default(), backend)
        .await
        .expect("setup");

    let board = host.board().unwrap();
    assert_eq!(board.state().read().len(), 1);
    assert_eq!(board.open_line_count(), 2);
    assert_eq!(released.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn event_capacity_setting_sizes_the_bus() {
    let settings = Settings {
        event_capacity: 2,
        ..Settings::default()
    };
    let mut host = IoHost::from_settings(&settings);
    let mut rx = host.emitter().subscribe();
    host.setup_from(Ok(sample_config()), &settings, Arc::new(MockGpioBackend::default()))
        .await
        .expect("setup");

    for value in 0..10 {
        host.emitter().publish(IoEvent::Data {
            name: "IN_DOOR".into(),
            value: value % 2,
        });
    }

    assert!(matches!(
        rx.recv().await,
        Err(broadcast::error::RecvError::Lagged(_))
    ));
}

#[tokio::test]
async fn failed_read_keeps_the_previous_value() {
    let backend = Arc::new(MockGpioBackend::default());
    let host = sample_host(&backend).await;

    backend.set_level(31, 1).unwrap();
    assert_eq!(host.read().await.get("IN", "KEY"), Some(1));

    let key = backend.line(31).unwrap();
    key.set_read_failure(true);
    backend.set_level(31, 0).unwrap();

    let snapshot = host.read().await;
    assert_eq!(snapshot.get("IN", "KEY"), Some(1));
    assert_eq!(snapshot.get("IN", "DOOR"), Some(0));

    key.set_read_failure(false);
    assert_eq!(host.read().await.get("IN", "KEY"), Some(0));
}
