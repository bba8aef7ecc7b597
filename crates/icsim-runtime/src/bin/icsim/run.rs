//! Device launcher helpers.

use std::io::BufRead;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use icsim_runtime::device::{Controller, ControllerDevice, Panel, PanelDevice, ProcessSimulation, TableView};
use icsim_runtime::recorder::SnapshotRecorder;
use icsim_runtime::{ControllerId, DeviceHandle, DeviceRunner, SharedStore, SystemClock, TestbedConfig};
use tracing::{info, warn};

use crate::conveyor::{ConveyorLogic, ConveyorModel};

/// Which devices `icsim run` launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    All,
    Process,
    Controller(ControllerId),
    Panel(String),
}

impl DeviceSelector {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let text = text.trim();
        match text.to_ascii_lowercase().as_str() {
            "all" => return Ok(Self::All),
            "process" => return Ok(Self::Process),
            _ => {}
        }
        if let Some(id) = text.strip_prefix("controller:") {
            let id = id
                .parse()
                .with_context(|| format!("invalid controller id in '{text}'"))?;
            return Ok(Self::Controller(id));
        }
        if let Some(name) = text.strip_prefix("panel:") {
            return Ok(Self::Panel(name.to_string()));
        }
        anyhow::bail!("invalid device '{text}' (expected process, controller:<id>, panel:<name> or all)")
    }
}

pub fn run_check(path: &Path) -> anyhow::Result<()> {
    let config = TestbedConfig::load(path)?;
    println!("store: {} {}", config.store.kind.as_str(), config.store.path);
    if let Some(process) = config.process.as_ref() {
        println!("process: {} every {} ms", process.name, process.period.as_millis());
    }
    for controller in &config.controllers {
        println!(
            "controller {}: {} at {} every {} ms ({} tags)",
            controller.id,
            controller.name,
            controller.address,
            controller.period.as_millis(),
            config.tags.owned_by(controller.id).count()
        );
    }
    for panel in &config.panels {
        println!("panel: {} every {} ms", panel.name, panel.period.as_millis());
    }
    println!("Config ok");
    Ok(())
}

pub fn run_devices(path: &Path, selector: &DeviceSelector, run_for: Option<u64>) -> anyhow::Result<()> {
    let config = TestbedConfig::load(path)?;
    match selector {
        DeviceSelector::Controller(id) => {
            config.controller(*id)?;
        }
        DeviceSelector::Panel(name) => {
            config.panel(name)?;
        }
        DeviceSelector::Process if config.process.is_none() => {
            anyhow::bail!("config has no [process] section")
        }
        _ => {}
    }
    let store = config
        .store
        .open(&config.tags)
        .context("failed to open tag store")?;
    let mut handles = Vec::new();

    if matches!(selector, DeviceSelector::All | DeviceSelector::Process) {
        if config.process.is_some() {
            handles.push(spawn_process(&config, store.clone())?);
        }
    }
    for controller in &config.controllers {
        let selected = match selector {
            DeviceSelector::All => true,
            DeviceSelector::Controller(id) => *id == controller.id,
            _ => false,
        };
        if selected {
            handles.push(spawn_controller(&config, controller.id, store.clone())?);
        }
    }
    for panel in &config.panels {
        let selected = match selector {
            DeviceSelector::All => true,
            DeviceSelector::Panel(name) => *name == panel.name,
            _ => false,
        };
        if selected {
            handles.push(spawn_panel(&config, &panel.name)?);
        }
    }
    if handles.is_empty() {
        anyhow::bail!("no devices selected");
    }

    wait_for_shutdown(&handles, run_for);
    for handle in &handles {
        handle.stop();
    }
    let mut failed = 0usize;
    for handle in &mut handles {
        if let Err(fault) = handle.join() {
            warn!(device = handle.name(), "{fault}");
            failed += 1;
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} device(s) stopped on a fault");
    }
    Ok(())
}

fn spawn_process(config: &TestbedConfig, store: SharedStore) -> anyhow::Result<DeviceHandle<SystemClock>> {
    let Some(process) = config.process.as_ref() else {
        anyhow::bail!("config has no [process] section");
    };
    let device = ProcessSimulation::new(process.name.clone(), &config.tags, store, ConveyorModel)?;
    let runner = DeviceRunner::new(device, SystemClock::new(), process.period)?;
    Ok(runner.spawn(format!("icsim-{}", process.name))?)
}

fn spawn_controller(
    config: &TestbedConfig,
    id: ControllerId,
    store: SharedStore,
) -> anyhow::Result<DeviceHandle<SystemClock>> {
    let settings = config.controller(id)?;
    let controller = Controller::new(
        id,
        settings.name.clone(),
        config.tags.clone(),
        store,
        &config.addresses(),
    )?;
    let mut device = ControllerDevice::new(controller, ConveyorLogic::default());
    if settings.record_snapshots {
        let recorder = SnapshotRecorder::create(&config.snapshot_dir, &settings.name)?;
        if let Some(path) = recorder.path() {
            info!(device = %settings.name, path = %path.display(), "recording snapshots");
        }
        device = device.with_recorder(recorder);
    }
    let runner = DeviceRunner::new(device, SystemClock::new(), settings.period)?;
    Ok(runner.spawn(format!("icsim-{}", settings.name))?)
}

fn spawn_panel(config: &TestbedConfig, name: &str) -> anyhow::Result<DeviceHandle<SystemClock>> {
    let settings = config.panel(name)?;
    let panel = Panel::new(settings.name.clone(), config.tags.clone(), &config.addresses())?;
    let device = PanelDevice::new(panel, TableView);
    let runner = DeviceRunner::new(device, SystemClock::new(), settings.period)?;
    Ok(runner.spawn(format!("icsim-{}", settings.name))?)
}

/// Block until stdin closes, a `q` line arrives, `run_for` elapses or every
/// device has stopped on its own.
fn wait_for_shutdown(handles: &[DeviceHandle<SystemClock>], run_for: Option<u64>) {
    if let Some(secs) = run_for {
        let deadline = std::time::Instant::now() + Duration::from_secs(secs);
        while std::time::Instant::now() < deadline && !all_finished(handles) {
            std::thread::sleep(Duration::from_millis(100));
        }
        return;
    }
    println!("Devices running. Enter q (or close stdin) to stop.");
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        let _ = tx.send(());
    });
    while !all_finished(handles) {
        if rx.recv_timeout(Duration::from_millis(100)).is_ok() {
            break;
        }
    }
}

fn all_finished(handles: &[DeviceHandle<SystemClock>]) -> bool {
    handles.iter().all(DeviceHandle::is_finished)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_parse_roles() {
        assert_eq!(DeviceSelector::parse("all").unwrap(), DeviceSelector::All);
        assert_eq!(DeviceSelector::parse("Process").unwrap(), DeviceSelector::Process);
        assert_eq!(
            DeviceSelector::parse("controller:1").unwrap(),
            DeviceSelector::Controller(1)
        );
        assert_eq!(
            DeviceSelector::parse("panel:HMI1").unwrap(),
            DeviceSelector::Panel("HMI1".into())
        );
        assert!(DeviceSelector::parse("controller:x").is_err());
        assert!(DeviceSelector::parse("plc").is_err());
    }
}
