//! ## Instrument
//!
//! The session type an application holds: construction from a resource
//! string, identifiers or a pre-opened device, the open/close lifecycle,
//! and the public I/O surface delegating to the protocol engines.
//!

use crate::constants::misc::{DEFAULT_ABORT_TIMEOUT, DEFAULT_MAX_TRANSFER_SIZE, DEFAULT_TIMEOUT};
use crate::constants::usb::USB488_PROTOCOL_CODE;
use crate::error::Error;
use crate::header::{BTag, RstbTag};
use crate::init;
use crate::quirks::{self, FramingPolicy};
use crate::resource::VisaResource;
use crate::transport::{Transport, UsbTransport};
use crate::types::{Capabilities, UsbtmcEndpoints};

use anyhow::Result;
use log::debug;
use rusb::{Context, Device};
use std::time::Duration;

/// ### Session
///
/// The connected state of an instrument: transport, endpoints, decoded
/// capabilities and the engine bookkeeping. Generic over [`Transport`] so
/// the engines can be exercised against a mock.
///
pub(crate) struct Session<T: Transport> {
    pub(crate) transport: T,
    pub(crate) interface_number: u8,
    pub(crate) endpoints: UsbtmcEndpoints,
    pub(crate) capabilities: Capabilities,
    pub(crate) usb488: bool,
    pub(crate) framing: FramingPolicy,
    pub(crate) term_char: Option<u8>,
    pub(crate) max_transfer_size: usize,
    pub(crate) timeout: Duration,
    pub(crate) abort_timeout: Duration,
    pub(crate) btag: BTag,
    pub(crate) rstb_tag: RstbTag,
    pub(crate) advantest_locked: bool,
}

/// ### Instrument
///
/// A USBTMC/USB488 instrument session.
///
/// Created unconnected by one of the constructors; `open()` claims the USB
/// resources and probes the device, `close()` releases everything and is
/// also run on drop. I/O methods open the session on first use.
///
pub struct Instrument {
    vid: u16,
    pid: u16,
    serial: Option<String>,
    device: Device<Context>,
    term_char: Option<u8>,
    timeout: Duration,
    abort_timeout: Duration,
    max_transfer_size: usize,
    session: Option<Session<UsbTransport>>,
    interface_number: u8,
    reattach: Vec<u8>,
    restore_config: Option<u8>,
}

impl Instrument {
    /// ### From Resource
    ///
    /// Find an instrument by VISA resource string, e.g.
    /// `USB0::0x0957::0x17A4::MY50000001::INSTR`.
    ///
    pub fn from_resource(resource: &str) -> Result<Instrument> {
        let parsed = VisaResource::parse(resource)?;
        Instrument::from_ids(parsed.vid, parsed.pid, parsed.serial.as_deref())
    }

    /// ### From IDs
    ///
    /// Find an instrument by vendor and product ID, narrowed by serial
    /// number when one is given.
    ///
    pub fn from_ids(vid: u16, pid: u16, serial: Option<&str>) -> Result<Instrument> {
        let context = Context::new()?;
        let device =
            init::find_device(&context, vid, pid, serial)?.ok_or(Error::DeviceNotFound)?;
        Ok(Instrument::with_device(
            vid,
            pid,
            serial.map(str::to_string),
            device,
        ))
    }

    /// ### From Device
    ///
    /// Wrap a pre-selected USB device, e.g. one returned by
    /// [`crate::list_devices`].
    ///
    pub fn from_device(device: Device<Context>) -> Result<Instrument> {
        let desc = device.device_descriptor()?;
        Ok(Instrument::with_device(
            desc.vendor_id(),
            desc.product_id(),
            None,
            device,
        ))
    }

    fn with_device(
        vid: u16,
        pid: u16,
        serial: Option<String>,
        device: Device<Context>,
    ) -> Instrument {
        Instrument {
            vid,
            pid,
            serial,
            device,
            term_char: None,
            timeout: DEFAULT_TIMEOUT,
            abort_timeout: DEFAULT_ABORT_TIMEOUT,
            max_transfer_size: DEFAULT_MAX_TRANSFER_SIZE,
            session: None,
            interface_number: 0,
            reattach: Vec::new(),
            restore_config: None,
        }
    }

    /// ### Open
    ///
    /// Claim the USB resources and bring the session up: firmware boot for
    /// Agilent U27xx devices, interface selection, kernel-driver release,
    /// configuration, endpoint discovery, quirk detection, CLEAR and the
    /// capability probe. A no-op when already connected.
    ///
    pub fn open(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        // Devices stuck in firmware-update mode re-enumerate under a new PID
        if let Some(post_pid) = quirks::agilent_firmware_post_pid(self.vid, self.pid) {
            self.device = quirks::boot_agilent_u27xx(&self.device, post_pid)?;
            self.pid = post_pid;
        }

        let desc = self.device.device_descriptor()?;
        let mode = init::select_mode(&self.device, &desc)?;
        debug!(
            "opening {:04x}:{:04x} configuration {} interface {}",
            self.vid, self.pid, mode.config_value, mode.interface_number
        );

        let mut handle = self.device.open()?;

        let active_config = handle.active_configuration().ok();
        if active_config == Some(mode.config_value) {
            init::release_kernel_driver(&mut handle, mode.interface_number, &mut self.reattach)?;
        } else {
            // wrong configuration, or none set: every interface of the
            // active configuration may hold a kernel driver
            if let Some(active) = active_config {
                for interface in init::configuration_interfaces(&self.device, &desc, active) {
                    init::release_kernel_driver(&mut handle, interface, &mut self.reattach)?;
                }
            }
            handle.set_active_configuration(mode.config_value)?;
            // 0 means the device was unconfigured; nothing to restore then
            self.restore_config = active_config.filter(|&value| value != 0);
        }

        handle.claim_interface(mode.interface_number)?;
        // altsetting untouched: USBTMC interfaces have exactly one

        let endpoints = init::discover_endpoints(&self.device, &mode)?;

        let framing = FramingPolicy::detect(self.vid, self.pid);
        let max_transfer_size = framing
            .max_transfer_override()
            .unwrap_or(self.max_transfer_size);
        if framing != FramingPolicy::Default {
            debug!("framing policy {framing:?}, max transfer {max_transfer_size}");
        }

        let mut session = Session {
            transport: UsbTransport::new(handle),
            interface_number: mode.interface_number,
            endpoints,
            capabilities: Capabilities::default(),
            usb488: mode.protocol == USB488_PROTOCOL_CODE,
            framing,
            term_char: self.term_char,
            max_transfer_size,
            timeout: self.timeout,
            abort_timeout: self.abort_timeout,
            btag: BTag::new(),
            rstb_tag: RstbTag::new(),
            advantest_locked: false,
        };

        session.clear()?;
        session.get_capabilities()?;

        self.interface_number = mode.interface_number;
        self.session = Some(session);
        Ok(())
    }

    /// ### Close
    ///
    /// Release the interface, restore the original configuration if it was
    /// changed, and reattach any kernel drivers detached at open.
    /// Idempotent; reattach failures are ignored.
    ///
    pub fn close(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        let handle = session.transport.handle().clone();
        let _ = handle.borrow().release_interface(self.interface_number);
        if let Some(config) = self.restore_config.take() {
            let _ = handle.borrow().set_active_configuration(config);
        }
        for interface in std::mem::take(&mut self.reattach) {
            let _ = handle.borrow().attach_kernel_driver(interface);
        }
        debug!("closed {:04x}:{:04x}", self.vid, self.pid);
        Ok(())
    }

    fn session_mut(&mut self) -> Result<&mut Session<UsbTransport>> {
        if self.session.is_none() {
            self.open()?;
        }
        // open() either failed above or left a session behind
        Ok(self.session.as_mut().expect("session present after open"))
    }

    /// Whether the session is currently connected.
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Whether the device speaks the USB488 subclass protocol.
    pub fn is_usb488(&mut self) -> Result<bool> {
        Ok(self.session_mut()?.usb488)
    }

    /// The decoded capabilities, once the session has been opened.
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.session.as_ref().map(|session| &session.capabilities)
    }

    pub fn vid(&self) -> u16 {
        self.vid
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Set the termination character appended to read requests, or `None`
    /// to disable termination-character mode.
    pub fn set_term_char(&mut self, term_char: Option<u8>) {
        self.term_char = term_char;
        if let Some(session) = self.session.as_mut() {
            session.term_char = term_char;
        }
    }

    pub fn term_char(&self) -> Option<u8> {
        self.term_char
    }

    /// Set the timeout applied to bulk and control transfers.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        if let Some(session) = self.session.as_mut() {
            session.timeout = timeout;
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the timeout applied to the abort sub-protocols.
    pub fn set_abort_timeout(&mut self, abort_timeout: Duration) {
        self.abort_timeout = abort_timeout;
        if let Some(session) = self.session.as_mut() {
            session.abort_timeout = abort_timeout;
        }
    }

    pub fn abort_timeout(&self) -> Duration {
        self.abort_timeout
    }

    /// Set the largest chunk moved in a single bulk transaction. Quirk
    /// overrides still apply at open time.
    pub fn set_max_transfer_size(&mut self, max_transfer_size: usize) {
        self.max_transfer_size = max_transfer_size;
        if let Some(session) = self.session.as_mut() {
            session.max_transfer_size = max_transfer_size;
        }
    }

    pub fn max_transfer_size(&self) -> usize {
        self.session
            .as_ref()
            .map(|session| session.max_transfer_size)
            .unwrap_or(self.max_transfer_size)
    }

    /// Write binary data to the instrument.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.session_mut()?.write_raw(data)
    }

    /// Read binary data from the instrument. `num` limits the response
    /// size; `None` reads until the device signals end-of-message.
    pub fn read_raw(&mut self, num: Option<usize>) -> Result<Vec<u8>> {
        self.session_mut()?.read_raw(num)
    }

    /// Write binary data, then read the response.
    pub fn ask_raw(&mut self, data: &[u8], num: Option<usize>) -> Result<Vec<u8>> {
        self.session_mut()?.ask_raw(data, num)
    }

    /// Write a command string to the instrument.
    pub fn write(&mut self, message: &str) -> Result<()> {
        self.session_mut()?.write(message)
    }

    /// Write a sequence of command strings in order.
    pub fn write_many(&mut self, messages: &[&str]) -> Result<()> {
        for message in messages {
            self.write(message)?;
        }
        Ok(())
    }

    /// Read a response string, with trailing `\r`/`\n` stripped.
    pub fn read(&mut self, num: Option<usize>) -> Result<String> {
        self.session_mut()?.read(num)
    }

    /// Write a query, then read its response.
    pub fn ask(&mut self, message: &str, num: Option<usize>) -> Result<String> {
        self.session_mut()?.ask(message, num)
    }

    /// Ask a sequence of queries in order, collecting the responses.
    pub fn ask_many(&mut self, messages: &[&str], num: Option<usize>) -> Result<Vec<String>> {
        let mut responses = Vec::with_capacity(messages.len());
        for message in messages {
            responses.push(self.ask(message, num)?);
        }
        Ok(responses)
    }

    /// Send a device trigger: the USB488 TRIGGER message when supported,
    /// `*TRG` otherwise.
    pub fn trigger(&mut self) -> Result<()> {
        self.session_mut()?.trigger()
    }

    /// Clear the device's input and output buffers.
    pub fn clear(&mut self) -> Result<()> {
        self.session_mut()?.clear()
    }

    /// Blink the device's activity indicator, where supported.
    pub fn pulse(&mut self) -> Result<()> {
        self.session_mut()?.pulse()
    }

    /// Read the IEEE 488 status byte.
    pub fn read_stb(&mut self) -> Result<u8> {
        self.session_mut()?.read_stb()
    }

    /// Engage the Advantest/ADCMT remote-control lock.
    pub fn lock(&mut self) -> Result<()> {
        self.session_mut()?.lock()
    }

    /// Release the Advantest/ADCMT remote-control lock.
    pub fn unlock(&mut self) -> Result<()> {
        self.session_mut()?.unlock()
    }

    /// Put the device in remote mode. Not defined by USBTMC.
    pub fn remote(&mut self) -> Result<()> {
        Err(Error::NotImplemented.into())
    }

    /// Return the device to local mode. Not defined by USBTMC.
    pub fn local(&mut self) -> Result<()> {
        Err(Error::NotImplemented.into())
    }

    /// Read the MyID identifier of Advantest/ADCMT hardware.
    pub fn advantest_read_myid(&mut self) -> Result<Option<u8>> {
        self.session_mut()?.advantest_read_myid()
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Session fixtures over the mock transport, shared by the engine
    //! tests.

    use super::Session;
    use crate::header::{BTag, RstbTag};
    use crate::quirks::FramingPolicy;
    use crate::transport::mock::MockTransport;
    use crate::types::{Capabilities, Endpoint, UsbtmcEndpoints};
    use rusb::{Direction, TransferType};
    use std::time::Duration;

    pub(crate) const BULK_OUT_EP: u8 = 0x01;
    pub(crate) const BULK_IN_EP: u8 = 0x82;
    pub(crate) const INTERRUPT_EP: u8 = 0x83;

    fn endpoint(address: u8, transfer_type: TransferType, direction: Direction) -> Endpoint {
        Endpoint {
            address,
            max_packet_size: 64,
            transfer_type,
            direction,
        }
    }

    pub(crate) fn session(framing: FramingPolicy) -> Session<MockTransport> {
        session_with(framing, false, false)
    }

    pub(crate) fn usb488_session(interrupt: bool) -> Session<MockTransport> {
        session_with(FramingPolicy::Default, true, interrupt)
    }

    pub(crate) fn session_with(
        framing: FramingPolicy,
        usb488: bool,
        interrupt: bool,
    ) -> Session<MockTransport> {
        Session {
            transport: MockTransport::new(),
            interface_number: 0,
            endpoints: UsbtmcEndpoints {
                bulk_out_ep: endpoint(BULK_OUT_EP, TransferType::Bulk, Direction::Out),
                bulk_in_ep: endpoint(BULK_IN_EP, TransferType::Bulk, Direction::In),
                interrupt_ep: interrupt
                    .then(|| endpoint(INTERRUPT_EP, TransferType::Interrupt, Direction::In)),
            },
            capabilities: Capabilities::default(),
            usb488,
            framing,
            term_char: None,
            max_transfer_size: 1024,
            timeout: Duration::from_millis(50),
            abort_timeout: Duration::from_millis(50),
            btag: BTag::new(),
            rstb_tag: RstbTag::new(),
            advantest_locked: false,
        }
    }
}
