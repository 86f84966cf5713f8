//! Device filters and the hotplug match predicate

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::UsbDevice;
use crate::error::HotplugError;
use crate::event::{EventMask, HotplugEvent};

/// Raw wildcard value accepted by the positional registration API
pub const MATCH_ANY: i32 = -1;

/// Vendor/product/class filter; `None` matches any value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeviceFilter {
    #[serde(default)]
    pub vendor_id: Option<u16>,
    #[serde(default)]
    pub product_id: Option<u16>,
    #[serde(default)]
    pub device_class: Option<u8>,
}

impl DeviceFilter {
    /// Filter matching every device
    pub const ANY: DeviceFilter = DeviceFilter {
        vendor_id: None,
        product_id: None,
        device_class: None,
    };

    /// Build a filter from raw values, where [`MATCH_ANY`] is the wildcard
    ///
    /// Vendor and product must fit in 16 bits and class in 8 bits.
    pub fn from_raw(vendor_id: i32, product_id: i32, device_class: i32) -> Result<Self, HotplugError> {
        Ok(Self {
            vendor_id: raw_field(vendor_id, "vendor_id")?,
            product_id: raw_field(product_id, "product_id")?,
            device_class: raw_field(device_class, "device_class")?,
        })
    }

    /// Whether the device's descriptor satisfies this filter
    pub fn matches_device(&self, device: &UsbDevice) -> bool {
        field_matches(self.vendor_id, device.vendor_id())
            && field_matches(self.product_id, device.product_id())
            && field_matches(self.device_class, device.device_class())
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vendor_id {
            Some(v) => write!(f, "{:04x}", v)?,
            None => f.write_str("*")?,
        }
        match self.product_id {
            Some(p) => write!(f, ":{:04x}", p)?,
            None => f.write_str(":*")?,
        }
        match self.device_class {
            Some(c) => write!(f, " class {:02x}", c),
            None => f.write_str(" class *"),
        }
    }
}

fn raw_field<T: TryFrom<i32>>(value: i32, name: &str) -> Result<Option<T>, HotplugError> {
    if value == MATCH_ANY {
        return Ok(None);
    }
    T::try_from(value)
        .map(Some)
        .map_err(|_| HotplugError::InvalidParam(format!("{} out of range: {:#x}", name, value)))
}

fn field_matches<T: PartialEq>(filter: Option<T>, actual: T) -> bool {
    filter.map_or(true, |want| want == actual)
}

/// Does a device/event pair satisfy a callback's event mask and filter
///
/// Pure and total. Lifecycle checks (pending removal) happen before this is
/// consulted.
pub fn matches(events: EventMask, filter: &DeviceFilter, device: &UsbDevice, event: HotplugEvent) -> bool {
    events.contains(event) && filter.matches_device(device)
}
