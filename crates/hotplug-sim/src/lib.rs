//! Simulated USB Platform
//!
//! This crate provides a simulation layer for exercising hotplug callbacks
//! without physical devices. It includes:
//!
//! - **SimBackend**: A platform backend that records handle disconnects
//! - **VirtualBus**: Attaches and detaches virtual devices, keeping the
//!   context's device list current and delivering events
//! - **DetectionThread**: Applies bus changes from a background thread, the
//!   way a real platform's event thread would
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use hotplug::{EventMask, HotplugRegistration};
//! use hotplug_sim::{DetectionThread, VirtualBus, VirtualDeviceConfig};
//!
//! let bus = Arc::new(VirtualBus::new());
//! bus.context()
//!     .register(HotplugRegistration::new(EventMask::ARRIVED).callback(|_ctx, device, event| {
//!         println!("{} {}", event, device);
//!         false
//!     }))
//!     .unwrap();
//!
//! let detect = DetectionThread::spawn(Arc::clone(&bus));
//! detect.plug(VirtualDeviceConfig::new(0x0403, 0x6001, 0)).unwrap();
//! detect.sync().unwrap();
//! assert_eq!(bus.devices().len(), 1);
//! detect.shutdown();
//! ```

pub mod backend;
pub mod bus;
pub mod detection;
pub mod error;

pub use backend::{DisconnectRecord, SimBackend};
pub use bus::{VirtualBus, VirtualDeviceConfig};
pub use detection::{BusEvent, DetectionThread, SimCommand};
pub use error::SimError;
