//! Simulated detection thread
//!
//! Real platforms learn about device changes on a dedicated event thread and
//! dispatch callbacks from there. This module gives the virtual bus the same
//! shape: plug and unplug requests are queued on a channel and applied, in
//! order, by one background thread. Callbacks therefore run on a thread the
//! registering code does not own, which is the situation re-entrancy rules
//! exist for.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use hotplug::{DeviceId, DispatchSummary, HotplugEvent, UsbDevice};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bus::{VirtualBus, VirtualDeviceConfig};
use crate::error::SimError;

/// Capacity of the broadcast channel carrying [`BusEvent`]s
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Requests processed by the detection thread
#[derive(Debug)]
pub enum SimCommand {
    /// Attach a new device
    Plug(VirtualDeviceConfig),
    /// Detach a device by id
    Unplug(DeviceId),
    /// Wait until every earlier command has been applied
    Sync(oneshot::Sender<()>),
    /// Stop the thread
    Shutdown,
}

/// A device change applied by the detection thread
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub device: Arc<UsbDevice>,
    pub event: HotplugEvent,
    pub summary: DispatchSummary,
}

/// Handle to a running detection thread
#[derive(Debug)]
pub struct DetectionThread {
    cmd_tx: mpsc::UnboundedSender<SimCommand>,
    event_tx: broadcast::Sender<BusEvent>,
    join: Option<JoinHandle<()>>,
}

impl DetectionThread {
    /// Start a detection thread driving `bus`
    pub fn spawn(bus: Arc<VirtualBus>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let thread_events = event_tx.clone();
        let join = thread::Builder::new()
            .name("hotplug-detect".into())
            .spawn(move || run_detection_loop(bus, cmd_rx, thread_events))
            .map_err(|e| warn!("Failed to spawn detection thread: {}", e))
            .ok();

        Self {
            cmd_tx,
            event_tx,
            join,
        }
    }

    /// Queue a command for the detection thread
    pub fn send(&self, cmd: SimCommand) -> Result<(), SimError> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| SimError::DetectionStopped)
    }

    pub fn plug(&self, config: VirtualDeviceConfig) -> Result<(), SimError> {
        self.send(SimCommand::Plug(config))
    }

    pub fn unplug(&self, id: DeviceId) -> Result<(), SimError> {
        self.send(SimCommand::Unplug(id))
    }

    /// Block until all previously queued commands have been applied
    ///
    /// Must not be called from inside a hotplug callback, since the
    /// detection thread would be waiting on itself.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context (a
    /// tokio runtime worker or `#[tokio::main]`), because it blocks the
    /// current thread. From async code, run it through
    /// `tokio::task::spawn_blocking`.
    pub fn sync(&self) -> Result<(), SimError> {
        let (tx, rx) = oneshot::channel();
        self.send(SimCommand::Sync(tx))?;
        rx.blocking_recv().map_err(|_| SimError::DetectionStopped)
    }

    /// Subscribe to applied device changes
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the thread and wait for it to exit
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.cmd_tx.send(SimCommand::Shutdown);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("Detection thread panicked");
            }
        }
    }
}

impl Drop for DetectionThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_detection_loop(
    bus: Arc<VirtualBus>,
    mut cmd_rx: mpsc::UnboundedReceiver<SimCommand>,
    event_tx: broadcast::Sender<BusEvent>,
) {
    info!("Detection thread started for {}", bus.context().id());

    while let Some(cmd) = cmd_rx.blocking_recv() {
        match cmd {
            SimCommand::Plug(config) => {
                let (device, summary) = bus.plug(&config);
                let _ = event_tx.send(BusEvent {
                    device,
                    event: HotplugEvent::Arrived,
                    summary,
                });
            }
            SimCommand::Unplug(id) => match bus.unplug(id) {
                Ok((device, summary)) => {
                    let _ = event_tx.send(BusEvent {
                        device,
                        event: HotplugEvent::Left,
                        summary,
                    });
                }
                Err(e) => warn!("Ignoring unplug: {}", e),
            },
            SimCommand::Sync(done) => {
                let _ = done.send(());
            }
            SimCommand::Shutdown => {
                debug!("Detection thread shutting down");
                break;
            }
        }
    }

    info!("Detection thread stopped for {}", bus.context().id());
}
