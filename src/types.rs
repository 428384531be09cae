//! ## Types
//!
//! The shared types used across the crate.
//!

use std::sync::{Arc, Mutex, MutexGuard};

use rusb::{Context, DeviceHandle, Direction, TransferType};

/// ### Handle
///
/// A libusb device handle wrapped in an Arc and Mutex so the session and the
/// close path can share it.
///
#[derive(Debug, Clone)]
pub struct Handle(Arc<Mutex<DeviceHandle<Context>>>);

impl Handle {
    pub fn new(handle: DeviceHandle<Context>) -> Handle {
        Handle(Arc::new(Mutex::new(handle)))
    }

    pub fn borrow(&self) -> MutexGuard<'_, DeviceHandle<Context>> {
        self.0.lock().unwrap()
    }
}

/// ### Endpoint
///
/// Properties of an endpoint.
///
#[derive(Clone, Debug)]
pub struct Endpoint {
    /// Address of the endpoint on the interface
    pub address: u8,
    /// The maximal size a packet can have on this endpoint
    pub max_packet_size: u16,
    /// The transfer type of the endpoint (for USBTMC, Bulk or Interrupt)
    pub transfer_type: TransferType,
    /// The direction of the endpoint (for USBTMC, In or Out)
    pub direction: Direction,
}

/// ### USBTMC Endpoints
///
/// The endpoint set the USBTMC spec requires of an interface.
///
#[derive(Clone, Debug)]
pub struct UsbtmcEndpoints {
    /// The mandatory BULK OUT endpoint
    pub bulk_out_ep: Endpoint,
    /// The mandatory BULK IN endpoint
    pub bulk_in_ep: Endpoint,
    /// The optional INTERRUPT IN endpoint
    pub interrupt_ep: Option<Endpoint>,
}

/// ### Device Mode
///
/// The configuration and interface selected for a USBTMC session.
///
#[derive(Debug, Clone, Default)]
pub struct DeviceMode {
    /// Index of the configuration descriptor, for descriptor lookups
    pub config_index: u8,
    /// bConfigurationValue, for set_active_configuration
    pub config_value: u8,
    /// The interface number specific to the configuration
    pub interface_number: u8,
    /// bInterfaceProtocol: 0 for plain USBTMC, 1 for USB488
    pub protocol: u8,
}

/// ### Capabilities
///
/// The decoded GET_CAPABILITIES reply of a USBTMC device.
///
#[derive(Clone, Debug, Default)]
pub struct Capabilities {
    pub bcd_usbtmc: u16,
    /// Accepts the INDICATOR_PULSE control request
    pub support_pulse: bool,
    /// Only sends data to the host
    pub support_talk_only: bool,
    /// Only accepts data from the host
    pub support_listen_only: bool,
    /// Honors the termination character in REQUEST_DEV_DEP_MSG_IN
    pub support_term_char: bool,
    /// USB488 subclass capabilities, present when the interface protocol is USB488
    pub usb488: Option<Usb488Capabilities>,
}

/// The USB488 layer of the GET_CAPABILITIES reply.
#[derive(Clone, Copy, Debug, Default)]
pub struct Usb488Capabilities {
    pub bcd_usb488: u16,
    /// The interface is 488.2 compliant
    pub support_488_2: bool,
    /// Accepts REN_CONTROL, GOTO_LOCAL and LOCAL_LOCKOUT
    pub support_remote_local: bool,
    /// Accepts the TRIGGER bulk-out message
    pub support_trigger: bool,
    /// Understands all mandatory SCPI commands
    pub support_scpi: bool,
    /// Service-request capable
    pub support_sr: bool,
    /// Remote-local capable
    pub support_rl: bool,
    /// Device-trigger capable
    pub support_dt: bool,
}

impl Capabilities {
    /// Decode a GET_CAPABILITIES reply buffer. The status byte has already
    /// been checked by the caller.
    pub fn parse(buf: &[u8], usb488: bool) -> Capabilities {
        let byte = |n: usize| buf.get(n).copied().unwrap_or(0);

        let usb488_caps = if usb488 {
            Some(Usb488Capabilities {
                bcd_usb488: u16::from_le_bytes([byte(12), byte(13)]),
                support_488_2: byte(14) & 4 != 0,
                support_remote_local: byte(14) & 2 != 0,
                support_trigger: byte(14) & 1 != 0,
                support_scpi: byte(15) & 8 != 0,
                support_sr: byte(15) & 4 != 0,
                support_rl: byte(15) & 2 != 0,
                support_dt: byte(15) & 1 != 0,
            })
        } else {
            None
        };

        Capabilities {
            bcd_usbtmc: u16::from_le_bytes([byte(2), byte(3)]),
            support_pulse: byte(4) & 4 != 0,
            support_talk_only: byte(4) & 2 != 0,
            support_listen_only: byte(4) & 1 != 0,
            support_term_char: byte(5) & 1 != 0,
            usb488: usb488_caps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_usbtmc_layer() {
        let mut buf = [0u8; 24];
        buf[0] = 0x01;
        buf[2] = 0x00;
        buf[3] = 0x01; // bcdUSBTMC 1.00
        buf[4] = 0b0000_0110; // pulse + talk-only
        buf[5] = 0b0000_0001; // term char

        let caps = Capabilities::parse(&buf, false);
        assert_eq!(caps.bcd_usbtmc, 0x0100);
        assert!(caps.support_pulse);
        assert!(caps.support_talk_only);
        assert!(!caps.support_listen_only);
        assert!(caps.support_term_char);
        assert!(caps.usb488.is_none());
    }

    #[test]
    fn parse_usb488_layer() {
        let mut buf = [0u8; 24];
        buf[0] = 0x01;
        buf[12] = 0x00;
        buf[13] = 0x01; // bcdUSB488 1.00
        buf[14] = 0b0000_0101; // 488.2 + trigger
        buf[15] = 0b0000_1100; // scpi + sr

        let caps = Capabilities::parse(&buf, true);
        let u488 = caps.usb488.expect("usb488 layer");
        assert_eq!(u488.bcd_usb488, 0x0100);
        assert!(u488.support_488_2);
        assert!(!u488.support_remote_local);
        assert!(u488.support_trigger);
        assert!(u488.support_scpi);
        assert!(u488.support_sr);
        assert!(!u488.support_rl);
        assert!(!u488.support_dt);
    }

    #[test]
    fn parse_tolerates_short_reply() {
        let caps = Capabilities::parse(&[0x01, 0x00, 0x10], true);
        assert_eq!(caps.bcd_usbtmc, 0x0010);
        assert!(caps.usb488.is_some());
    }
}
