//! Scripted hotplug scenarios
//!
//! A scenario is a JSON list of steps replayed against a virtual bus:
//!
//! ```json
//! {
//!   "description": "adapter pulled mid-transfer",
//!   "steps": [
//!     { "action": "plug", "name": "ftdi", "vendor_id": 1027, "product_id": 24577 },
//!     { "action": "open", "name": "ftdi" },
//!     { "action": "sleep", "ms": 250 },
//!     { "action": "transfer_failed", "name": "ftdi" }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use hotplug::{DeviceId, DispatchSummary, OpenHandle};
use hotplug_sim::{VirtualBus, VirtualDeviceConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One scenario step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Attach a device under a scenario-local name
    Plug {
        name: String,
        vendor_id: u16,
        product_id: u16,
        #[serde(default)]
        device_class: u8,
    },
    /// Detach a named device
    Unplug { name: String },
    /// Open a handle on a named device
    Open { name: String },
    /// Close the oldest open handle on a named device
    Close { name: String },
    /// Fail a transfer on the oldest open handle of a named device
    TransferFailed { name: String },
    /// Pause replay
    Sleep { ms: u64 },
}

/// A scripted sequence of device changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub description: String,
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid scenario")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_json(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }
}

/// Totals for a replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub steps: usize,
    pub invoked: usize,
    pub disconnected: usize,
}

impl ReplayReport {
    fn record(&mut self, summary: DispatchSummary) {
        self.invoked += summary.invoked;
        self.disconnected += summary.disconnected;
    }
}

/// Replays scenarios against a virtual bus
#[derive(Debug)]
pub struct ScenarioRunner<'a> {
    bus: &'a VirtualBus,
    devices: HashMap<String, DeviceId>,
    handles: HashMap<String, Vec<Arc<OpenHandle>>>,
    report: ReplayReport,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(bus: &'a VirtualBus) -> Self {
        Self {
            bus,
            devices: HashMap::new(),
            handles: HashMap::new(),
            report: ReplayReport::default(),
        }
    }

    /// Replay every step, honouring sleeps
    pub async fn run(mut self, scenario: &Scenario) -> anyhow::Result<ReplayReport> {
        if !scenario.description.is_empty() {
            info!("Replaying scenario: {}", scenario.description);
        }

        for (index, step) in scenario.steps.iter().enumerate() {
            match step {
                ScenarioStep::Sleep { ms } => {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                    self.report.steps += 1;
                }
                _ => self
                    .apply(step)
                    .with_context(|| format!("step {} failed", index + 1))?,
            }
        }

        Ok(self.report)
    }

    /// Apply one step; sleeps are ignored
    pub fn apply(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        debug!("Applying {:?}", step);
        match step {
            ScenarioStep::Plug {
                name,
                vendor_id,
                product_id,
                device_class,
            } => {
                if self.devices.contains_key(name) {
                    bail!("device {:?} is already plugged in", name);
                }
                let config = VirtualDeviceConfig {
                    label: name.clone(),
                    ..VirtualDeviceConfig::new(*vendor_id, *product_id, *device_class)
                };
                let (device, summary) = self.bus.plug(&config);
                self.devices.insert(name.clone(), device.id());
                self.report.record(summary);
            }
            ScenarioStep::Unplug { name } => {
                let id = self.device(name)?;
                let (_, summary) = self.bus.unplug(id)?;
                self.devices.remove(name);
                self.report.record(summary);
            }
            ScenarioStep::Open { name } => {
                let id = self.device(name)?;
                let handle = self.bus.open(id)?;
                self.handles.entry(name.clone()).or_default().push(handle);
            }
            ScenarioStep::Close { name } => {
                let handle = self.take_handle(name)?;
                self.bus.close(&handle);
            }
            ScenarioStep::TransferFailed { name } => {
                let handle = self.take_handle(name)?;
                let summary = self.bus.transfer_failed(&handle);
                self.devices.remove(name);
                self.report.record(summary);
            }
            ScenarioStep::Sleep { .. } => {}
        }
        self.report.steps += 1;
        Ok(())
    }

    fn device(&self, name: &str) -> anyhow::Result<DeviceId> {
        match self.devices.get(name) {
            Some(id) => Ok(*id),
            None => bail!("no device named {:?} is plugged in", name),
        }
    }

    fn take_handle(&mut self, name: &str) -> anyhow::Result<Arc<OpenHandle>> {
        match self.handles.get_mut(name) {
            Some(handles) if !handles.is_empty() => Ok(handles.remove(0)),
            _ => bail!("no open handle on {:?}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotplug::{EventMask, HotplugRegistration};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DEMO: &str = r#"{
        "description": "adapter pulled mid-transfer",
        "steps": [
            { "action": "plug", "name": "ftdi", "vendor_id": 1027, "product_id": 24577 },
            { "action": "open", "name": "ftdi" },
            { "action": "open", "name": "ftdi" },
            { "action": "sleep", "ms": 1 },
            { "action": "transfer_failed", "name": "ftdi" }
        ]
    }"#;

    #[test]
    fn test_parse() {
        let scenario = Scenario::from_json(DEMO).unwrap();
        assert_eq!(scenario.steps.len(), 5);
        assert_eq!(
            scenario.steps[0],
            ScenarioStep::Plug {
                name: "ftdi".into(),
                vendor_id: 0x0403,
                product_id: 0x6001,
                device_class: 0,
            }
        );
        assert_eq!(scenario.steps[3], ScenarioStep::Sleep { ms: 1 });
    }

    #[test]
    fn test_unknown_action() {
        assert!(Scenario::from_json(r#"{ "steps": [{ "action": "explode" }] }"#).is_err());
    }

    #[tokio::test]
    async fn test_replay() {
        let bus = VirtualBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        bus.context()
            .register(HotplugRegistration::new(EventMask::ALL).callback(move |_, _, _| {
                c.fetch_add(1, Ordering::SeqCst);
                false
            }))
            .unwrap();

        let scenario = Scenario::from_json(DEMO).unwrap();
        let report = ScenarioRunner::new(&bus).run(&scenario).await.unwrap();

        assert_eq!(report.steps, 5);
        assert_eq!(report.invoked, 2);
        // Both handles on the failed device are disconnected
        assert_eq!(report.disconnected, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(bus.devices().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_failure_after_unplug_is_not_a_second_departure() {
        let bus = VirtualBus::new();
        let scenario = Scenario::from_json(
            r#"{ "steps": [
                { "action": "plug", "name": "ftdi", "vendor_id": 1027, "product_id": 24577 },
                { "action": "open", "name": "ftdi" },
                { "action": "open", "name": "ftdi" },
                { "action": "unplug", "name": "ftdi" },
                { "action": "transfer_failed", "name": "ftdi" },
                { "action": "transfer_failed", "name": "ftdi" }
            ] }"#,
        )
        .unwrap();
        let departures = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&departures);
        bus.context()
            .register(HotplugRegistration::new(EventMask::LEFT).callback(move |_, _, _| {
                d.fetch_add(1, Ordering::SeqCst);
                false
            }))
            .unwrap();

        let report = ScenarioRunner::new(&bus).run(&scenario).await.unwrap();

        assert_eq!(report.invoked, 1);
        assert_eq!(report.disconnected, 2);
        assert_eq!(departures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_device_fails() {
        let bus = VirtualBus::new();
        let mut runner = ScenarioRunner::new(&bus);
        let err = runner
            .apply(&ScenarioStep::Unplug { name: "ghost".into() })
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_duplicate_plug_fails() {
        let bus = VirtualBus::new();
        let mut runner = ScenarioRunner::new(&bus);
        let plug = ScenarioStep::Plug {
            name: "a".into(),
            vendor_id: 1,
            product_id: 2,
            device_class: 0,
        };
        runner.apply(&plug).unwrap();
        assert!(runner.apply(&plug).is_err());
        assert_eq!(bus.devices().len(), 1);
    }
}
