//! USB class codes and well-known vendor IDs
//!
//! Useful for building filters (e.g. "any HID device") and for labelling
//! devices in logs.

/// bDeviceClass codes assigned by USB-IF
pub mod class {
    /// Class is defined per interface
    pub const PER_INTERFACE: u8 = 0x00;
    pub const AUDIO: u8 = 0x01;
    /// Communications and CDC control (modems, CDC ACM serial)
    pub const COMM: u8 = 0x02;
    pub const HID: u8 = 0x03;
    pub const PHYSICAL: u8 = 0x05;
    pub const IMAGE: u8 = 0x06;
    pub const PRINTER: u8 = 0x07;
    pub const MASS_STORAGE: u8 = 0x08;
    pub const HUB: u8 = 0x09;
    pub const CDC_DATA: u8 = 0x0A;
    pub const SMART_CARD: u8 = 0x0B;
    pub const VIDEO: u8 = 0x0E;
    pub const WIRELESS: u8 = 0xE0;
    pub const MISCELLANEOUS: u8 = 0xEF;
    pub const APPLICATION: u8 = 0xFE;
    pub const VENDOR_SPECIFIC: u8 = 0xFF;
}

/// Vendor IDs of common USB-to-serial bridge chips
pub mod vendor {
    /// FTDI (Future Technology Devices International)
    pub const FTDI: u16 = 0x0403;
    /// Silicon Labs CP210x
    pub const SILICON_LABS: u16 = 0x10C4;
    /// WCH CH340/CH341
    pub const WCH: u16 = 0x1A86;
    /// Prolific PL2303
    pub const PROLIFIC: u16 = 0x067B;
    /// pid.codes shared VID for open source hardware
    pub const PID_CODES: u16 = 0x1209;
}

/// Human-readable name for a device class code
pub fn class_name(code: u8) -> &'static str {
    match code {
        class::PER_INTERFACE => "per-interface",
        class::AUDIO => "audio",
        class::COMM => "communications",
        class::HID => "HID",
        class::PHYSICAL => "physical",
        class::IMAGE => "image",
        class::PRINTER => "printer",
        class::MASS_STORAGE => "mass storage",
        class::HUB => "hub",
        class::CDC_DATA => "CDC data",
        class::SMART_CARD => "smart card",
        class::VIDEO => "video",
        class::WIRELESS => "wireless",
        class::MISCELLANEOUS => "miscellaneous",
        class::APPLICATION => "application specific",
        class::VENDOR_SPECIFIC => "vendor specific",
        _ => "unknown",
    }
}

/// Chip vendor name for known serial bridge VIDs
pub fn vendor_name(vid: u16) -> Option<&'static str> {
    match vid {
        vendor::FTDI => Some("FTDI"),
        vendor::SILICON_LABS => Some("Silicon Labs"),
        vendor::WCH => Some("WCH"),
        vendor::PROLIFIC => Some("Prolific"),
        vendor::PID_CODES => Some("pid.codes"),
        _ => None,
    }
}
