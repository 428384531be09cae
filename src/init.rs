//! ## Initialization
//!
//! Bus enumeration and the descriptor work needed to bring a session up:
//! finding USBTMC devices, selecting the interface, releasing kernel
//! drivers and discovering endpoints.
//!

use crate::constants::usb::*;
use crate::error::Error;
use crate::quirks;
use crate::resource;
use crate::types::{DeviceMode, Endpoint, UsbtmcEndpoints};

use anyhow::Result;
use log::{debug, trace};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, Direction, TransferType, UsbContext};

fn has_usbtmc_interface(device: &Device<Context>, desc: &DeviceDescriptor) -> bool {
    (0..desc.num_configurations()).any(|config_index| {
        if let Ok(config_desc) = device.config_descriptor(config_index) {
            config_desc.interfaces().any(|interface| {
                interface.descriptors().any(|interface_desc| {
                    interface_desc.class_code() == USBTMC_CLASS_CODE
                        && interface_desc.sub_class_code() == USBTMC_SUBCLASS_CODE
                })
            })
        } else {
            false
        }
    })
}

/// A device counts as USBTMC when it carries a class 0xFE subclass 3
/// interface, or when its identifiers name a known non-compliant vendor.
pub(crate) fn is_tmc_device(device: &Device<Context>, desc: &DeviceDescriptor) -> bool {
    has_usbtmc_interface(device, desc)
        || desc.vendor_id() == quirks::ADVANTEST_VID
        || quirks::agilent_firmware_post_pid(desc.vendor_id(), desc.product_id()).is_some()
}

/// ### List Devices
///
/// All connected USBTMC devices on the bus.
///
pub(crate) fn list_devices(context: &Context) -> Result<Vec<Device<Context>>> {
    Ok(context
        .devices()?
        .iter()
        .filter(|device| {
            device
                .device_descriptor()
                .map(|desc| is_tmc_device(device, &desc))
                .unwrap_or(false)
        })
        .collect())
}

/// ### List Resources
///
/// VISA resource strings (decimal IDs) for every connected USBTMC device.
/// Firmware-mode Agilent U27xx devices are reported under their post-boot
/// product ID.
///
pub(crate) fn list_resources(context: &Context) -> Result<Vec<String>> {
    let mut resources = Vec::new();
    for device in list_devices(context)? {
        let desc = device.device_descriptor()?;
        let (vid, pid) = quirks::resource_ids(desc.vendor_id(), desc.product_id());
        let serial = read_serial(&device);
        resources.push(resource::format_resource(vid, pid, serial.as_deref()));
    }
    Ok(resources)
}

/// ### Find Device
///
/// First USBTMC device matching the identifiers. A missing serial matches
/// the first VID/PID hit; devices whose serial cannot be read are skipped
/// when one is required.
///
pub(crate) fn find_device(
    context: &Context,
    vid: u16,
    pid: u16,
    serial: Option<&str>,
) -> Result<Option<Device<Context>>> {
    for device in list_devices(context)? {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        if desc.vendor_id() != vid || desc.product_id() != pid {
            continue;
        }
        match serial {
            None => return Ok(Some(device)),
            Some(wanted) => {
                if read_serial(&device).as_deref() == Some(wanted) {
                    return Ok(Some(device));
                }
            }
        }
    }
    Ok(None)
}

/// Best-effort read of a device's serial number string.
pub(crate) fn read_serial(device: &Device<Context>) -> Option<String> {
    let desc = device.device_descriptor().ok()?;
    let handle = device.open().ok()?;
    handle.read_serial_number_string_ascii(&desc).ok()
}

/// ### Select Mode
///
/// Pick the configuration and interface to drive: the first USBTMC
/// interface, or the first interface of any kind on Advantest hardware.
///
pub(crate) fn select_mode(device: &Device<Context>, desc: &DeviceDescriptor) -> Result<DeviceMode> {
    let advantest = desc.vendor_id() == quirks::ADVANTEST_VID;

    for config_index in 0..desc.num_configurations() {
        let config_desc = device.config_descriptor(config_index)?;
        for interface in config_desc.interfaces() {
            for interface_desc in interface.descriptors() {
                let matches = advantest
                    || (interface_desc.class_code() == USBTMC_CLASS_CODE
                        && interface_desc.sub_class_code() == USBTMC_SUBCLASS_CODE);
                if matches {
                    return Ok(DeviceMode {
                        config_index,
                        config_value: config_desc.number(),
                        interface_number: interface_desc.interface_number(),
                        protocol: interface_desc.protocol_code(),
                    });
                }
            }
        }
    }

    Err(Error::NotUsbtmcDevice.into())
}

/// ### Discover Endpoints
///
/// First bulk-IN, first bulk-OUT and first interrupt-IN endpoint of the
/// selected interface. Either bulk endpoint missing is fatal.
///
pub(crate) fn discover_endpoints(
    device: &Device<Context>,
    mode: &DeviceMode,
) -> Result<UsbtmcEndpoints> {
    let config_desc = device.config_descriptor(mode.config_index)?;
    let interface = config_desc
        .interfaces()
        .find(|interface| interface.number() == mode.interface_number)
        .ok_or(Error::InvalidEndpointConfig)?;
    // USBTMC interfaces have exactly one altsetting
    let interface_desc = interface
        .descriptors()
        .next()
        .ok_or(Error::InvalidEndpointConfig)?;

    let mut bulk_in_ep = None;
    let mut bulk_out_ep = None;
    let mut interrupt_ep = None;

    for endpoint_desc in interface_desc.endpoint_descriptors() {
        let endpoint = Endpoint {
            address: endpoint_desc.address(),
            max_packet_size: endpoint_desc.max_packet_size(),
            transfer_type: endpoint_desc.transfer_type(),
            direction: endpoint_desc.direction(),
        };
        trace!(
            "endpoint {:#04x}: {:?} {:?}",
            endpoint.address,
            endpoint.transfer_type,
            endpoint.direction
        );

        match (endpoint.transfer_type, endpoint.direction) {
            (TransferType::Bulk, Direction::In) => {
                bulk_in_ep.get_or_insert(endpoint);
            }
            (TransferType::Bulk, Direction::Out) => {
                bulk_out_ep.get_or_insert(endpoint);
            }
            (TransferType::Interrupt, Direction::In) => {
                interrupt_ep.get_or_insert(endpoint);
            }
            _ => {}
        }
    }

    match (bulk_out_ep, bulk_in_ep) {
        (Some(bulk_out_ep), Some(bulk_in_ep)) => Ok(UsbtmcEndpoints {
            bulk_out_ep,
            bulk_in_ep,
            interrupt_ep,
        }),
        _ => Err(Error::InvalidEndpointConfig.into()),
    }
}

/// Interface numbers of the configuration with the given
/// bConfigurationValue. Best effort; unreadable descriptors yield nothing.
pub(crate) fn configuration_interfaces(
    device: &Device<Context>,
    desc: &DeviceDescriptor,
    config_value: u8,
) -> Vec<u8> {
    for config_index in 0..desc.num_configurations() {
        if let Ok(config_desc) = device.config_descriptor(config_index) {
            if config_desc.number() == config_value {
                return config_desc
                    .interfaces()
                    .map(|interface| interface.number())
                    .collect();
            }
        }
    }
    Vec::new()
}

/// ### Release Kernel Driver
///
/// Detach the kernel driver bound to `interface` where the platform allows
/// it, recording the interface for reattach at close.
///
pub(crate) fn release_kernel_driver(
    handle: &mut DeviceHandle<Context>,
    interface: u8,
    reattach: &mut Vec<u8>,
) -> Result<()> {
    if !rusb::supports_detach_kernel_driver() {
        return Ok(());
    }
    if handle.kernel_driver_active(interface).unwrap_or(false) {
        handle.detach_kernel_driver(interface)?;
        debug!("detached kernel driver from interface {interface}");
        reattach.push(interface);
    }
    Ok(())
}
