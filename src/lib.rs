//! # usbtmc
//!
//! Pure Rust implementation of the USBTMC and USB488 protocols to talk to
//! test and measurement instruments (oscilloscopes, function generators,
//! multimeters, power supplies) over USB.
//!
//! The crate covers the full bulk-transfer message protocol (fragmentation,
//! EOM and termination-character handling, bTag pairing), the control
//! sub-protocols (CLEAR, the abort state machines, GET_CAPABILITIES,
//! INDICATOR_PULSE), the USB488 additions (TRIGGER, READ_STATUS_BYTE with
//! interrupt-endpoint delivery), and the vendor quirks of Advantest/ADCMT,
//! Rigol and Agilent U27xx hardware.
//!
//! ## Usage
//!
//! To use, add the following line to your project's Cargo.toml dependencies:
//! ```toml
//! usbtmc = "0.1"
//! ```
//!
//! ## Example
//!
//! Instruments are addressed by VISA resource string, by VID/PID (and
//! optional serial number), or by a device picked from [`list_devices`].
//!
//! ```no_run
//! use usbtmc::Instrument;
//!
//! fn main() -> anyhow::Result<()> {
//!     // connect to the instrument
//!     let mut scope = Instrument::from_resource("USB::0x0957::0x17A4::INSTR")?;
//!     scope.open()?;
//!
//!     // query the identification string
//!     let id = scope.ask("*IDN?", None)?;
//!     println!("{id}");
//!
//!     // binary transfers work the same way
//!     let screenshot = scope.ask_raw(b":DISP:DATA?", None)?;
//!     println!("{} bytes", screenshot.len());
//!
//!     scope.close()?;
//!     Ok(())
//! }
//! ```
//!

mod constants;
mod error;
mod header;
mod init;
mod instrument;
mod quirks;
mod resource;
mod transport;
mod types;
mod communication {
    pub mod bulk;
    pub mod control;
}

pub use error::Error;
pub use instrument::Instrument;
pub use resource::{format_resource, VisaResource};
pub use transport::{Transport, UsbTransport};
pub use types::{Capabilities, Endpoint, Usb488Capabilities, UsbtmcEndpoints};

use anyhow::Result;
use rusb::{Context, Device};

/// ### List Devices
///
/// All connected USBTMC-capable devices, including the known
/// non-compliant vendors.
///
pub fn list_devices() -> Result<Vec<Device<Context>>> {
    let context = Context::new()?;
    init::list_devices(&context)
}

/// ### List Resources
///
/// VISA resource strings (decimal IDs) for every connected USBTMC-capable
/// device.
///
pub fn list_resources() -> Result<Vec<String>> {
    let context = Context::new()?;
    init::list_resources(&context)
}

/// ### Find Device
///
/// First device matching the vendor and product IDs, narrowed by serial
/// number when one is given.
///
pub fn find_device(vid: u16, pid: u16, serial: Option<&str>) -> Result<Option<Device<Context>>> {
    let context = Context::new()?;
    init::find_device(&context, vid, pid, serial)
}
