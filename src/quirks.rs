//! ## Quirks
//!
//! Vendor deviations from the USBTMC specification, modelled as a framing
//! strategy chosen once at open time plus a handful of vendor tables.
//!

use crate::error::Error;
use crate::init;

use anyhow::Result;
use log::debug;
use rusb::{Context, Device, Direction, Recipient, RequestType, UsbContext};
use std::time::{Duration, Instant};

/// Advantest/ADCMT instruments: 63-byte reads, no EOM on responses.
pub(crate) const ADVANTEST_VID: u16 = 0x1334;

pub(crate) const RIGOL_VID: u16 = 0x1ab1;
/// Rigol scopes that omit the per-packet bulk-in header.
pub(crate) const RIGOL_QUIRK_PIDS: [u16; 2] = [0x04ce, 0x0588];
const RIGOL_IEEE_BLOCK_PID: u16 = 0x04ce;

pub(crate) const AGILENT_VID: u16 = 0x0957;
/// Agilent U27xx modular devices enumerate at the left PID until their
/// firmware is kicked, then re-enumerate at the right PID.
pub(crate) const AGILENT_U27XX_PID_MAP: [(u16, u16); 3] =
    [(0x2818, 0x2918), (0x4218, 0x4118), (0x4418, 0x4318)];

const ADVANTEST_MAX_TRANSFER_SIZE: usize = 63;
const U27XX_REENUMERATE_TIMEOUT: Duration = Duration::from_secs(20);
const U27XX_REENUMERATE_POLL: Duration = Duration::from_millis(500);
const U27XX_BOOT_TIMEOUT: Duration = Duration::from_secs(1);

/// ### FramingPolicy
///
/// How the bulk engines frame and re-assemble messages for the device at
/// hand. Selected from VID/PID when the session opens.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramingPolicy {
    /// Per-packet headers, EOM-driven re-assembly, as USBTMC mandates.
    Default,
    /// Single short packet per response, EOM never signalled.
    Advantest,
    /// Header only on the first packet of a response; the declared transfer
    /// size governs re-assembly. `ieee_block` devices additionally lie about
    /// the transfer size of IEEE 488.2 definite-length blocks.
    Rigol { ieee_block: bool },
}

impl FramingPolicy {
    pub fn detect(vid: u16, pid: u16) -> FramingPolicy {
        if vid == ADVANTEST_VID {
            FramingPolicy::Advantest
        } else if vid == RIGOL_VID && RIGOL_QUIRK_PIDS.contains(&pid) {
            FramingPolicy::Rigol {
                ieee_block: pid == RIGOL_IEEE_BLOCK_PID,
            }
        } else {
            FramingPolicy::Default
        }
    }

    pub fn is_advantest(&self) -> bool {
        matches!(self, FramingPolicy::Advantest)
    }

    pub fn is_rigol(&self) -> bool {
        matches!(self, FramingPolicy::Rigol { .. })
    }

    /// A cap on `max_transfer_size` the vendor requires, if any.
    pub fn max_transfer_override(&self) -> Option<usize> {
        match self {
            FramingPolicy::Advantest => Some(ADVANTEST_MAX_TRANSFER_SIZE),
            _ => None,
        }
    }
}

/// The post-boot PID for an Agilent U27xx in firmware-update mode.
pub(crate) fn agilent_firmware_post_pid(vid: u16, pid: u16) -> Option<u16> {
    if vid != AGILENT_VID {
        return None;
    }
    AGILENT_U27XX_PID_MAP
        .iter()
        .find(|(fw_pid, _)| *fw_pid == pid)
        .map(|&(_, post_pid)| post_pid)
}

/// Remap the identifiers reported by enumeration so firmware-mode devices
/// show up under the identity they will have once booted.
pub(crate) fn resource_ids(vid: u16, pid: u16) -> (u16, u16) {
    match agilent_firmware_post_pid(vid, pid) {
        Some(post_pid) => (vid, post_pid),
        None => (vid, pid),
    }
}

/// Kick a U27xx out of firmware-update mode and wait for it to come back
/// under `post_pid`, matching on serial number when one is readable.
pub(crate) fn boot_agilent_u27xx(
    device: &Device<Context>,
    post_pid: u16,
) -> Result<Device<Context>> {
    let desc = device.device_descriptor()?;
    let serial = init::read_serial(device);

    let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
    let mut buf = [0u8; 1];
    {
        let handle = device.open()?;
        match desc.product_id() {
            0x2818 => {
                // U2701A/U2702A
                handle.read_control(request_type, 0x0C, 0x0000, 0x047E, &mut buf, U27XX_BOOT_TIMEOUT)?;
                handle.read_control(request_type, 0x0C, 0x0000, 0x0487, &mut buf, U27XX_BOOT_TIMEOUT)?;
            }
            _ => {
                // U2722A/U2723A
                handle.read_control(request_type, 0x0C, 0x0000, 0x047D, &mut buf, U27XX_BOOT_TIMEOUT)?;
            }
        }
    }

    debug!(
        "agilent u27xx boot sequence sent, waiting for re-enumeration at {:04x}:{:04x}",
        AGILENT_VID, post_pid
    );

    let context = Context::new()?;
    let deadline = Instant::now() + U27XX_REENUMERATE_TIMEOUT;
    while Instant::now() < deadline {
        std::thread::sleep(U27XX_REENUMERATE_POLL);
        for candidate in context.devices()?.iter() {
            let Ok(candidate_desc) = candidate.device_descriptor() else {
                continue;
            };
            if candidate_desc.vendor_id() != AGILENT_VID
                || candidate_desc.product_id() != post_pid
            {
                continue;
            }
            if serial.is_none() || init::read_serial(&candidate) == serial {
                debug!("u27xx re-enumerated on bus {}", candidate.bus_number());
                return Ok(candidate);
            }
        }
    }

    Err(Error::DeviceNotFound.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_advantest() {
        let policy = FramingPolicy::detect(ADVANTEST_VID, 0x1234);
        assert!(policy.is_advantest());
        assert_eq!(policy.max_transfer_override(), Some(63));
    }

    #[test]
    fn detects_rigol_variants() {
        assert_eq!(
            FramingPolicy::detect(RIGOL_VID, 0x04ce),
            FramingPolicy::Rigol { ieee_block: true }
        );
        assert_eq!(
            FramingPolicy::detect(RIGOL_VID, 0x0588),
            FramingPolicy::Rigol { ieee_block: false }
        );
        // other Rigol products are spec-compliant
        assert_eq!(FramingPolicy::detect(RIGOL_VID, 0x0c01), FramingPolicy::Default);
    }

    #[test]
    fn default_for_compliant_devices() {
        let policy = FramingPolicy::detect(0x0957, 0x17a4);
        assert_eq!(policy, FramingPolicy::Default);
        assert_eq!(policy.max_transfer_override(), None);
    }

    #[test]
    fn agilent_pid_remap() {
        assert_eq!(agilent_firmware_post_pid(AGILENT_VID, 0x2818), Some(0x2918));
        assert_eq!(agilent_firmware_post_pid(AGILENT_VID, 0x4218), Some(0x4118));
        assert_eq!(agilent_firmware_post_pid(AGILENT_VID, 0x4418), Some(0x4318));
        assert_eq!(agilent_firmware_post_pid(AGILENT_VID, 0x2918), None);
        assert_eq!(agilent_firmware_post_pid(0x1ab1, 0x2818), None);

        assert_eq!(resource_ids(AGILENT_VID, 0x4218), (AGILENT_VID, 0x4118));
        assert_eq!(resource_ids(AGILENT_VID, 0x17a4), (AGILENT_VID, 0x17a4));
    }
}
