//! Hotplug events, event masks and registration flags

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// A device arrival or departure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotplugEvent {
    /// A device has arrived and is ready to use
    Arrived,
    /// A device has left and is no longer available
    Left,
}

impl HotplugEvent {
    /// Bit used for this event inside an [`EventMask`]
    pub const fn bit(self) -> u8 {
        match self {
            Self::Arrived => 0x01,
            Self::Left => 0x02,
        }
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Arrived => "arrived",
            Self::Left => "left",
        }
    }
}

impl fmt::Display for HotplugEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of events a callback listens for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct EventMask(u8);

impl EventMask {
    /// No events
    pub const EMPTY: EventMask = EventMask(0);
    /// Device arrival only
    pub const ARRIVED: EventMask = EventMask(HotplugEvent::Arrived.bit());
    /// Device departure only
    pub const LEFT: EventMask = EventMask(HotplugEvent::Left.bit());
    /// Both arrival and departure
    pub const ALL: EventMask = EventMask(HotplugEvent::Arrived.bit() | HotplugEvent::Left.bit());

    /// Build a mask from raw bits, keeping only known event bits
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Raw bit value
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether the mask contains the given event
    pub const fn contains(self, event: HotplugEvent) -> bool {
        self.0 & event.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<u8> for EventMask {
    fn from(bits: u8) -> Self {
        Self::from_bits_truncate(bits)
    }
}

impl From<EventMask> for u8 {
    fn from(mask: EventMask) -> Self {
        mask.bits()
    }
}

impl From<HotplugEvent> for EventMask {
    fn from(event: HotplugEvent) -> Self {
        Self(event.bit())
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Flags modifying registration behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct HotplugFlags(u8);

impl HotplugFlags {
    /// No flags
    pub const NONE: HotplugFlags = HotplugFlags(0);
    /// Deliver ARRIVED for every already-connected matching device
    /// before `register` returns
    pub const ENUMERATE: HotplugFlags = HotplugFlags(0x01);

    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ENUMERATE.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: HotplugFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl From<u8> for HotplugFlags {
    fn from(bits: u8) -> Self {
        Self::from_bits_truncate(bits)
    }
}

impl From<HotplugFlags> for u8 {
    fn from(flags: HotplugFlags) -> Self {
        flags.bits()
    }
}

impl BitOr for HotplugFlags {
    type Output = HotplugFlags;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_contains() {
        assert!(EventMask::ARRIVED.contains(HotplugEvent::Arrived));
        assert!(!EventMask::ARRIVED.contains(HotplugEvent::Left));
        assert!(EventMask::ALL.contains(HotplugEvent::Left));
        assert!(!EventMask::EMPTY.contains(HotplugEvent::Arrived));
    }

    #[test]
    fn test_mask_bits_match_wire_values() {
        assert_eq!(EventMask::ARRIVED.bits(), 1);
        assert_eq!(EventMask::LEFT.bits(), 2);
        assert_eq!((EventMask::ARRIVED | EventMask::LEFT), EventMask::ALL);
        assert_eq!(EventMask::from_bits_truncate(0xFF), EventMask::ALL);
    }

    #[test]
    fn test_flags() {
        assert!(HotplugFlags::ENUMERATE.contains(HotplugFlags::ENUMERATE));
        assert!(!HotplugFlags::NONE.contains(HotplugFlags::ENUMERATE));
        assert_eq!(HotplugFlags::from_bits_truncate(0x03), HotplugFlags::ENUMERATE);
    }

    #[test]
    fn test_deserialize_drops_unknown_bits() {
        let mask: EventMask = serde_json::from_str("255").unwrap();
        assert_eq!(mask, EventMask::ALL);
        assert_eq!(mask.bits(), 3);

        let flags: HotplugFlags = serde_json::from_str("7").unwrap();
        assert_eq!(flags, HotplugFlags::ENUMERATE);

        assert_eq!(serde_json::to_string(&EventMask::LEFT).unwrap(), "2");
    }
}
