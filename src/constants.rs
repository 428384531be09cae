//! ## Constants
//!
//! Wire-level constants for the USBTMC class and the USB488 subclass.
//!

#[allow(unused)]
pub mod usb {
    /// The interface class code for USBTMC
    pub const USBTMC_CLASS_CODE: u8 = 0xFE;
    /// The interface subclass code for USBTMC
    pub const USBTMC_SUBCLASS_CODE: u8 = 0x03;
    /// The interface protocol code for plain USBTMC
    pub const USBTMC_PROTOCOL_CODE: u8 = 0x00;
    /// The interface protocol code for the USB488 subclass
    pub const USB488_PROTOCOL_CODE: u8 = 0x01;
}

#[allow(unused)]
pub mod misc {
    use std::time::Duration;

    /// The default timeout for bulk and control transfers
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    /// The default timeout for the abort sub-protocols
    pub const DEFAULT_ABORT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Delay between CHECK_STATUS polls while a split operation is pending
    pub const CHECK_STATUS_POLL_INTERVAL: Duration = Duration::from_millis(100);
    /// The size in bytes of a USBTMC bulk transfer header
    pub const USBTMC_HEADER_SIZE: usize = 12;
    /// Largest message chunk moved in a single bulk transaction
    pub const DEFAULT_MAX_TRANSFER_SIZE: usize = 1024 * 1024;
}

#[allow(unused)]
pub mod usbtmc_status {
    /// Success
    pub const STATUS_SUCCESS: u8 = 0x01;
    /// A split CHECK_STATUS request was received and the operation is still running
    pub const STATUS_PENDING: u8 = 0x02;
    /// Failure for unspecified or undefined reason
    pub const STATUS_FAILED: u8 = 0x80;
    /// The device received an INITIATE_ABORT request with no transfer in progress
    pub const STATUS_TRANSFER_NOT_IN_PROGRESS: u8 = 0x81;
    /// The device got a CHECK_STATUS request without a matching INITIATE
    pub const STATUS_SPLIT_NOT_IN_PROGRESS: u8 = 0x82;
    /// The device got an INITIATE request while another one is being processed
    pub const STATUS_SPLIT_IN_PROGRESS: u8 = 0x83;
}

#[allow(unused)]
pub mod control_requests {
    pub const INITIATE_ABORT_BULK_OUT: u8 = 1;
    pub const CHECK_ABORT_BULK_OUT_STATUS: u8 = 2;
    pub const INITIATE_ABORT_BULK_IN: u8 = 3;
    pub const CHECK_ABORT_BULK_IN_STATUS: u8 = 4;
    pub const INITIATE_CLEAR: u8 = 5;
    pub const CHECK_CLEAR_STATUS: u8 = 6;
    pub const GET_CAPABILITIES: u8 = 7;
    pub const INDICATOR_PULSE: u8 = 64;
    // USB488 subclass requests
    pub const READ_STATUS_BYTE: u8 = 128;
    pub const REN_CONTROL: u8 = 160;
    pub const GOTO_LOCAL: u8 = 161;
    pub const LOCAL_LOCKOUT: u8 = 162;
}

#[allow(unused)]
pub mod bulk_msg_id {
    pub const DEV_DEP_MSG_OUT: u8 = 1;
    pub const REQUEST_DEV_DEP_MSG_IN: u8 = 2;
    pub const DEV_DEP_MSG_IN: u8 = 2;
    pub const VENDOR_SPECIFIC_OUT: u8 = 126;
    pub const REQUEST_VENDOR_SPECIFIC_IN: u8 = 127;
    pub const VENDOR_SPECIFIC_IN: u8 = 127;
    pub const TRIGGER: u8 = 128;
}
