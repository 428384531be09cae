//! ## Control
//!
//! The control-endpoint sub-protocols: capability probe, CLEAR, the abort
//! state machines, READ_STATUS_BYTE, indicator pulse and the Advantest
//! vendor lock.
//!

use crate::constants::misc::{CHECK_STATUS_POLL_INTERVAL, USBTMC_HEADER_SIZE};
use crate::constants::{control_requests, usbtmc_status::*};
use crate::error::Error;
use crate::instrument::Session;
use crate::transport::Transport;
use crate::types::Capabilities;

use anyhow::Result;
use log::{debug, trace};
use rusb::{Direction, Recipient, RequestType};
use std::thread::sleep;

impl<T: Transport> Session<T> {
    fn class_interface_in(&self, request: u8, value: u16, buf: &mut [u8]) -> Result<usize> {
        let request_type =
            rusb::request_type(Direction::In, RequestType::Class, Recipient::Interface);
        let n = self
            .transport
            .read_control(
                request_type,
                request,
                value,
                self.interface_number as u16,
                buf,
                self.timeout,
            )
            .map_err(Error::Transport)?;
        Ok(n)
    }

    fn class_endpoint_in(
        &self,
        request: u8,
        value: u16,
        endpoint: u8,
        buf: &mut [u8],
    ) -> Result<usize> {
        let request_type =
            rusb::request_type(Direction::In, RequestType::Class, Recipient::Endpoint);
        let n = self
            .transport
            .read_control(
                request_type,
                request,
                value,
                endpoint as u16,
                buf,
                self.abort_timeout,
            )
            .map_err(Error::Transport)?;
        Ok(n)
    }

    /// ### Get Capabilities
    ///
    /// Probe the interface's USBTMC (and, on USB488 devices, USB488)
    /// feature bits.
    ///
    pub(crate) fn get_capabilities(&mut self) -> Result<()> {
        let mut buf = [0u8; 0x18];
        let n = self.class_interface_in(control_requests::GET_CAPABILITIES, 0, &mut buf)?;
        if n == 0 || buf[0] != STATUS_SUCCESS {
            return Err(Error::CapabilityProbeFailed.into());
        }

        self.capabilities = Capabilities::parse(&buf[..n], self.usb488);
        debug!("capabilities: {:?}", self.capabilities);
        Ok(())
    }

    /// ### Clear
    ///
    /// Clear the device's input and output buffers, then the halt condition
    /// on bulk-out.
    ///
    pub(crate) fn clear(&mut self) -> Result<()> {
        let mut buf = [0u8; 1];
        self.class_interface_in(control_requests::INITIATE_CLEAR, 0, &mut buf)?;
        if buf[0] != STATUS_SUCCESS {
            return Err(Error::ClearFailed.into());
        }

        let mut status = [0u8; 2];
        loop {
            self.class_interface_in(control_requests::CHECK_CLEAR_STATUS, 0, &mut status)?;
            if status[0] != STATUS_PENDING {
                break;
            }
            trace!("clear pending");
            sleep(CHECK_STATUS_POLL_INTERVAL);
        }

        self.transport
            .clear_halt(self.endpoints.bulk_out_ep.address)
            .map_err(Error::Transport)?;
        Ok(())
    }

    /// ### Abort Bulk-OUT
    ///
    /// Abort the bulk-out transaction identified by the last bTag. Returns
    /// silently when the device reports no transfer in progress.
    ///
    pub(crate) fn abort_bulk_out(&mut self) -> Result<()> {
        let btag = self.btag.last();
        let endpoint = self.endpoints.bulk_out_ep.address;

        let mut buf = [0u8; 2];
        self.class_endpoint_in(
            control_requests::INITIATE_ABORT_BULK_OUT,
            btag as u16,
            endpoint,
            &mut buf,
        )?;
        if buf[0] != STATUS_SUCCESS {
            trace!("abort bulk-out: no transfer in progress");
            return Ok(());
        }

        let mut status = [0u8; 8];
        loop {
            self.class_endpoint_in(
                control_requests::CHECK_ABORT_BULK_OUT_STATUS,
                0,
                endpoint,
                &mut status,
            )?;
            if status[0] != STATUS_PENDING {
                break;
            }
            sleep(CHECK_STATUS_POLL_INTERVAL);
        }

        if status[0] == STATUS_SUCCESS {
            self.transport
                .clear_halt(endpoint)
                .map_err(Error::Transport)?;
        }
        Ok(())
    }

    /// ### Abort Bulk-IN
    ///
    /// Abort the bulk-in transaction identified by the last bTag, draining
    /// whatever the device already queued. Returns silently when no
    /// transfer is in progress.
    ///
    pub(crate) fn abort_bulk_in(&mut self) -> Result<()> {
        let btag = self.btag.last();
        let endpoint = self.endpoints.bulk_in_ep.address;

        let mut buf = [0u8; 2];
        self.class_endpoint_in(
            control_requests::INITIATE_ABORT_BULK_IN,
            btag as u16,
            endpoint,
            &mut buf,
        )?;
        if buf[0] != STATUS_SUCCESS {
            trace!("abort bulk-in: no transfer in progress");
            return Ok(());
        }

        // flush whatever the device already queued for this transfer
        let mut drain = vec![0u8; self.max_transfer_size + USBTMC_HEADER_SIZE + 3];
        let _ = self
            .transport
            .read_bulk(endpoint, &mut drain, self.abort_timeout);

        let mut status = [0u8; 8];
        loop {
            self.class_endpoint_in(
                control_requests::CHECK_ABORT_BULK_IN_STATUS,
                0,
                endpoint,
                &mut status,
            )?;
            if status[0] != STATUS_PENDING {
                break;
            }
            sleep(CHECK_STATUS_POLL_INTERVAL);
        }
        Ok(())
    }

    /// ### Read Status Byte
    ///
    /// The USB488 READ_STATUS_BYTE request, delivered over the interrupt
    /// endpoint when the device has one. Non-USB488 devices answer
    /// `*STB?` instead.
    ///
    pub(crate) fn read_stb(&mut self) -> Result<u8> {
        if !self.usb488 {
            let response = self.ask("*STB?", None)?;
            return Ok(response.trim().parse::<u8>()?);
        }

        let btag = self.rstb_tag.next();
        let mut buf = [0u8; 3];
        self.class_interface_in(control_requests::READ_STATUS_BYTE, btag as u16, &mut buf)?;
        if buf[0] != STATUS_SUCCESS {
            return Err(Error::ReadStatusFailed.into());
        }
        if buf[1] != btag {
            return Err(Error::StatusByteTagMismatch.into());
        }

        match &self.endpoints.interrupt_ep {
            None => Ok(buf[2]),
            Some(endpoint) => {
                let mut packet = [0u8; 2];
                self.transport
                    .read_interrupt(endpoint.address, &mut packet, self.timeout)
                    .map_err(Error::Transport)?;
                if packet[0] != btag | 0x80 {
                    return Err(Error::StatusByteTagMismatch.into());
                }
                Ok(packet[1])
            }
        }
    }

    /// ### Pulse
    ///
    /// Blink the device's activity indicator. A no-op on devices that do
    /// not advertise the capability.
    ///
    pub(crate) fn pulse(&mut self) -> Result<()> {
        if !self.capabilities.support_pulse {
            debug!("indicator pulse not supported, skipping");
            return Ok(());
        }

        let mut buf = [0u8; 1];
        self.class_interface_in(control_requests::INDICATOR_PULSE, 0, &mut buf)?;
        if buf[0] != STATUS_SUCCESS {
            return Err(Error::PulseFailed.into());
        }
        Ok(())
    }

    pub(crate) fn lock(&mut self) -> Result<()> {
        self.advantest_remote(true)
    }

    pub(crate) fn unlock(&mut self) -> Result<()> {
        self.advantest_remote(false)
    }

    /// The Advantest/ADCMT vendor control that enables remote control.
    /// Without it the hardware only ever reports its latest measurement.
    fn advantest_remote(&mut self, enable: bool) -> Result<()> {
        if !self.framing.is_advantest() {
            return Err(Error::NotImplemented.into());
        }

        let request_type =
            rusb::request_type(Direction::In, RequestType::Class, Recipient::Interface);
        let mut buf = [0u8; 1];
        self.transport
            .read_control(request_type, 0xA0, enable as u16, 0, &mut buf, self.timeout)
            .map_err(Error::Transport)?;
        self.advantest_locked = enable;
        Ok(())
    }

    /// Read the MyID identifier of Advantest/ADCMT hardware. Unreadable
    /// values yield `None`.
    pub(crate) fn advantest_read_myid(&mut self) -> Result<Option<u8>> {
        if !self.framing.is_advantest() {
            return Err(Error::NotImplemented.into());
        }

        let request_type =
            rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Interface);
        let mut buf = [0u8; 1];
        match self
            .transport
            .read_control(request_type, 0xF5, 0, 0, &mut buf, self.timeout)
        {
            Ok(n) if n >= 1 => Ok(Some(buf[0])),
            _ => Ok(None),
        }
    }
}
