mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{addresses, free_addr, tag, temp_path};
use icsim_runtime::device::{
    Controller, ControllerDevice, Panel, PanelDevice, ProcessSimulation, TableView,
};
use icsim_runtime::recorder::SnapshotRecorder;
use icsim_runtime::store::MemoryStore;
use icsim_runtime::{
    CycleTiming, DeviceRunner, DeviceState, Direction, ManualClock, RuntimeError, SharedStore,
    Store, SystemClock, TagRegistry, TagValue, TestbedConfig,
};

fn idle(_controller: &mut Controller, _timing: &CycleTiming) -> Result<(), RuntimeError> {
    Ok(())
}

#[test]
fn panel_write_reaches_the_store_through_the_owner() {
    let tags = Arc::new(
        TagRegistry::new([tag("T", 1, 1, Direction::Output, 0.0)]).expect("registry"),
    );
    let store: SharedStore = Arc::new(MemoryStore::new());
    store.initialize(&tags.defaults(), true).expect("seed");
    let addresses = addresses(&[(1, free_addr())]);

    let mut panel = Panel::new("HMI1", tags.clone(), &addresses).expect("panel");
    assert_eq!(panel.get("T").expect("get"), None, "owner not started yet");

    let plc = Controller::new(1, "PLC1", tags, store.clone(), &addresses).expect("controller");
    let mut runner = DeviceRunner::new(
        ControllerDevice::new(plc, idle),
        ManualClock::auto_advancing(),
        Duration::from_millis(100),
    )
    .expect("runner");
    runner.step().expect("first tick");

    assert_eq!(panel.get("T").expect("get"), Some(TagValue::ZERO));
    assert!(panel.set("T", &TagValue::from(1.0)).expect("set"));
    assert_eq!(
        store.get("T").expect("store"),
        TagValue::ZERO,
        "store follows on the owner's next sync"
    );

    runner.step().expect("second tick");
    assert_eq!(store.get("T").expect("store"), TagValue::from(1.0));
    assert_eq!(panel.get("T").expect("get"), Some(TagValue::from(1.0)));

    runner.behavior_mut().controller_mut().stop();
    assert_eq!(panel.get("T").expect("get"), None);
}

#[test]
fn full_testbed_runs_and_records_snapshots() {
    let snapshot_dir = temp_path("snapshots", "");
    let text = format!(
        r#"
        snapshot_dir = "{dir}"

        [store]
        type = "memory"

        [process]
        name = "Plant"
        period_ms = 20

        [[controllers]]
        id = 1
        name = "PLC1"
        address = "{addr}"
        period_ms = 40
        record_snapshots = true

        [[panels]]
        name = "HMI1"
        period_ms = 50

        [tags.level]
        id = 0
        owner = 1
        direction = "input"
        default = 2.0

        [tags.pump]
        id = 1
        owner = 1
        direction = "output"
        default = 1
        "#,
        dir = snapshot_dir.display().to_string().replace('\\', "/"),
        addr = free_addr(),
    );
    let config = TestbedConfig::from_toml_str(&text).expect("config");
    let store = config.store.open(&config.tags).expect("store");

    let model = |store: &dyn Store, elapsed: Duration| -> Result<(), RuntimeError> {
        let level = store.get("level")?.as_f64().unwrap_or(0.0);
        let pump = store.get("pump")?.is_on();
        let delta = elapsed.as_secs_f64() * if pump { 1.0 } else { -1.0 };
        store.set("level", &TagValue::from(level + delta)).map(|_| ())
    };
    let process = config.process.as_ref().expect("process section");
    let simulation =
        ProcessSimulation::new(process.name.clone(), &config.tags, store.clone(), model)
            .expect("simulation");
    let mut handles = vec![DeviceRunner::new(simulation, SystemClock::new(), process.period)
        .expect("runner")
        .spawn("plant")
        .expect("spawn")];

    let settings = config.controller(1).expect("controller settings");
    let plc = Controller::new(1, "PLC1", config.tags.clone(), store.clone(), &config.addresses())
        .expect("controller");
    let recorder = SnapshotRecorder::create(&config.snapshot_dir, "PLC1").expect("recorder");
    let device = ControllerDevice::new(plc, idle).with_recorder(recorder);
    handles.push(
        DeviceRunner::new(device, SystemClock::new(), settings.period)
            .expect("runner")
            .spawn("plc1")
            .expect("spawn"),
    );

    let panel_settings = config.panel("HMI1").expect("panel settings");
    let panel = Panel::new("HMI1", config.tags.clone(), &config.addresses()).expect("panel");
    handles.push(
        DeviceRunner::new(
            PanelDevice::new(panel, TableView),
            SystemClock::new(),
            panel_settings.period,
        )
        .expect("runner")
        .spawn("hmi1")
        .expect("spawn"),
    );

    std::thread::sleep(Duration::from_millis(500));
    for handle in &handles {
        assert_eq!(handle.state(), DeviceState::Running, "{}", handle.name());
    }
    for handle in &handles {
        handle.stop();
    }
    for handle in &mut handles {
        handle.join().expect("clean stop");
        assert_eq!(handle.state(), DeviceState::Stopped);
    }

    let level = store.get("level").expect("level").as_f64().expect("numeric");
    assert!(level > 2.0, "pump default is on, level rose to {level}");

    let csv = std::fs::read_to_string(snapshot_dir.join("snapshots_PLC1.csv")).expect("csv");
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("time, current_loop, loop_latency, logic_execution_time, level(0), pump(1)")
    );
    let rows: Vec<&str> = lines.collect();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|row| row.split(", ").count() == 6));
    let _ = std::fs::remove_dir_all(&snapshot_dir);
}
