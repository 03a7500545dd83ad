use super::*;

/// A list of known USB speeds, numbered as USB/IP reports them
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, FromPrimitive)]
pub enum UsbSpeed {
    #[default]
    Unknown = 0x0,
    Low,
    Full,
    High,
    Wireless,
    Super,
    SuperPlus,
}

impl From<rusb::Speed> for UsbSpeed {
    fn from(speed: rusb::Speed) -> Self {
        match speed {
            rusb::Speed::Low => UsbSpeed::Low,
            rusb::Speed::Full => UsbSpeed::Full,
            rusb::Speed::High => UsbSpeed::High,
            rusb::Speed::Super => UsbSpeed::Super,
            rusb::Speed::SuperPlus => UsbSpeed::SuperPlus,
            _ => UsbSpeed::Unknown,
        }
    }
}

/// USB device class of hubs, which are never exported
pub const HUB_CLASS: u8 = 0x09;

/// USB endpoint direction: IN or OUT
/// Already exists in rusb crate
pub use rusb::Direction;

/// A list of defined USB standard requests
/// from USB 2.0 standard Table 9.4. Standard Request Codes
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum StandardRequest {
    GetStatus = 0,
    ClearFeature = 1,
    SetFeature = 3,
    SetAddress = 5,
    GetDescriptor = 6,
    SetDescriptor = 7,
    GetConfiguration = 8,
    SetConfiguration = 9,
    GetInterface = 10,
    SetInterface = 11,
    SynchFrame = 12,
}

/// Feature selector of CLEAR_FEATURE(ENDPOINT_HALT)
pub const FEATURE_ENDPOINT_HALT: u16 = 0;

/// Status codes carried by OP_REP_DEVLIST and OP_REP_IMPORT
pub const ST_OK: u32 = 0x00;
/// Request not applicable in the current state
pub const ST_NA: u32 = 0x01;
/// No such device
pub const ST_NODEV: u32 = 0x02;
/// Device already imported by another client
pub const ST_CONNREFUSED: u32 = 0x03;
/// Unspecified failure
pub const ST_ERROR: u32 = 0xFF;

/// Linux errno values, negated in RET_SUBMIT and RET_UNLINK status fields
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const ENOMEM: i32 = 12;
    pub const EBUSY: i32 = 16;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
    pub const EPIPE: i32 = 32;
    pub const EOPNOTSUPP: i32 = 95;
    pub const ETIMEDOUT: i32 = 110;
}
