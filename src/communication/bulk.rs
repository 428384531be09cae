//! ## Bulk
//!
//! The bulk-OUT and bulk-IN engines: fragmentation, EOM handling,
//! termination-character mode and response re-assembly, including the
//! vendor framing variants.
//!

use crate::constants::misc::USBTMC_HEADER_SIZE;
use crate::error::Error;
use crate::header;
use crate::instrument::Session;
use crate::quirks::FramingPolicy;
use crate::transport::Transport;

use anyhow::Result;
use log::{debug, trace};

impl<T: Transport> Session<T> {
    /// ### Write Raw
    ///
    /// Write binary data to the instrument, fragmented at
    /// `max_transfer_size`. Exactly the final fragment carries EOM.
    ///
    pub(crate) fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let max = self.max_transfer_size;
        let num_chunks = match data.len() % max {
            0 => data.len() / max,
            _ => data.len() / max + 1,
        };

        for (index, chunk) in data.chunks(max).enumerate() {
            let eom = index + 1 == num_chunks;
            let btag = self.btag.next();

            let padded = USBTMC_HEADER_SIZE + header::padded_len(chunk.len());
            let mut transfer = Vec::with_capacity(padded);
            transfer.extend_from_slice(&header::dev_dep_msg_out_header(
                btag,
                chunk.len() as u32,
                eom,
            ));
            transfer.extend_from_slice(chunk);
            transfer.resize(padded, 0);

            trace!("bulk-out btag {btag}, {} bytes, eom {eom}", chunk.len());
            if let Err(err) =
                self.transport
                    .write_bulk(self.endpoints.bulk_out_ep.address, &transfer, self.timeout)
            {
                return Err(self.bulk_out_failed(err));
            }
        }

        Ok(())
    }

    /// ### Read Raw
    ///
    /// Read binary data from the instrument. `num` bounds the response
    /// size; `None` (or zero) reads until the device signals
    /// end-of-message.
    ///
    pub(crate) fn read_raw(&mut self, num: Option<usize>) -> Result<Vec<u8>> {
        let mut remaining = num.filter(|&n| n > 0);
        let mut read_len = self.max_transfer_size;
        if let Some(n) = remaining {
            if n < read_len {
                read_len = n;
            }
        }

        let mut read_data: Vec<u8> = Vec::new();
        // what the device claims the response totals, under the Rigol quirk
        let mut expected_size: usize = 0;
        let mut eom = false;

        while !eom {
            let rigol_continuation = self.framing.is_rigol() && !read_data.is_empty();
            if !rigol_continuation {
                // a Rigol that sees the request again restarts the transfer,
                // so it is only sent before the first packet
                let btag = self.btag.next();
                let request =
                    header::request_dev_dep_msg_in_header(btag, read_len as u32, self.term_char);
                if let Err(err) = self.transport.write_bulk(
                    self.endpoints.bulk_out_ep.address,
                    &request,
                    self.timeout,
                ) {
                    return Err(self.bulk_in_failed(err));
                }
            }

            let mut buf = vec![0u8; read_len + USBTMC_HEADER_SIZE + 3];
            let n = match self.transport.read_bulk(
                self.endpoints.bulk_in_ep.address,
                &mut buf,
                self.timeout,
            ) {
                Ok(n) => n,
                Err(err) => return Err(self.bulk_in_failed(err)),
            };
            buf.truncate(n);

            let appended;
            match self.framing {
                FramingPolicy::Rigol { ieee_block } => {
                    if rigol_continuation {
                        // no header past the first packet
                        appended = buf.len();
                        read_data.extend_from_slice(&buf);
                    } else {
                        let resp = header::unpack_bulk_in_header(&buf)?;
                        let body_end =
                            buf.len().min(USBTMC_HEADER_SIZE + resp.transfer_size as usize);
                        let body = &buf[USBTMC_HEADER_SIZE..body_end];

                        expected_size = resp.transfer_size as usize;
                        if ieee_block && body.starts_with(b"#") {
                            // the header lies about the size of definite-length
                            // block responses; the block prefix is authoritative
                            expected_size = ieee_block_total_size(body)?;
                            trace!("rigol ieee block, {expected_size} bytes total");
                        }

                        appended = body.len();
                        read_data.extend_from_slice(body);
                    }

                    if read_data.len() >= expected_size {
                        // bytes past the declared size are dropped
                        read_data.truncate(expected_size);
                        eom = true;
                    }
                }
                _ => {
                    let resp = header::unpack_bulk_in_header(&buf)?;
                    let declared = resp.transfer_size as usize;
                    let body_end = buf.len().min(USBTMC_HEADER_SIZE + declared);
                    let body = &buf[USBTMC_HEADER_SIZE..body_end];

                    // EOM only counts once the whole declared payload arrived
                    eom = resp.is_eom() && body.len() >= declared;
                    appended = body.len();
                    read_data.extend_from_slice(body);
                }
            }

            trace!(
                "bulk-in packet {appended} bytes, {} total, eom {eom}",
                read_data.len()
            );

            // Advantest devices never signal EOM and send a single packet
            if self.framing.is_advantest() {
                break;
            }

            if let Some(rem) = remaining.as_mut() {
                *rem = rem.saturating_sub(appended);
                if *rem == 0 {
                    break;
                }
                if *rem < read_len {
                    read_len = *rem;
                }
            }
        }

        Ok(read_data)
    }

    /// ### Trigger
    ///
    /// The USB488 TRIGGER message when the device supports it, `*TRG`
    /// otherwise.
    ///
    pub(crate) fn trigger(&mut self) -> Result<()> {
        let supported = self
            .capabilities
            .usb488
            .map(|caps| caps.support_trigger)
            .unwrap_or(false);

        if supported {
            let btag = self.btag.next();
            let request = header::trigger_header(btag);
            if let Err(err) =
                self.transport
                    .write_bulk(self.endpoints.bulk_out_ep.address, &request, self.timeout)
            {
                return Err(self.bulk_out_failed(err));
            }
            Ok(())
        } else {
            self.write("*TRG")
        }
    }

    pub(crate) fn write(&mut self, message: &str) -> Result<()> {
        self.write_raw(message.as_bytes())
    }

    pub(crate) fn read(&mut self, num: Option<usize>) -> Result<String> {
        let data = self.read_raw(num)?;
        let text = String::from_utf8(data)?;
        Ok(text.trim_end_matches(&['\r', '\n'][..]).to_string())
    }

    pub(crate) fn ask(&mut self, message: &str, num: Option<usize>) -> Result<String> {
        self.with_advantest_lock(|session| {
            session.write(message)?;
            session.read(num)
        })
    }

    pub(crate) fn ask_raw(&mut self, data: &[u8], num: Option<usize>) -> Result<Vec<u8>> {
        self.with_advantest_lock(|session| {
            session.write_raw(data)?;
            session.read_raw(num)
        })
    }

    /// Advantest hardware only answers queries while its vendor lock is
    /// held; the prior lock state is restored afterwards.
    fn with_advantest_lock<R>(&mut self, op: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let needs_lock = self.framing.is_advantest() && !self.advantest_locked;
        if !needs_lock {
            return op(self);
        }

        self.lock()?;
        let result = op(self);
        let unlocked = self.unlock();
        let value = result?;
        unlocked?;
        Ok(value)
    }

    fn bulk_out_failed(&mut self, err: rusb::Error) -> anyhow::Error {
        if err == rusb::Error::Timeout {
            debug!("bulk-out timed out, aborting transfer");
            if let Err(abort_err) = self.abort_bulk_out() {
                debug!("abort bulk-out failed: {abort_err}");
            }
            Error::Timeout.into()
        } else {
            Error::Transport(err).into()
        }
    }

    fn bulk_in_failed(&mut self, err: rusb::Error) -> anyhow::Error {
        if err == rusb::Error::Timeout {
            debug!("bulk-in timed out, aborting transfer");
            if let Err(abort_err) = self.abort_bulk_in() {
                debug!("abort bulk-in failed: {abort_err}");
            }
            Error::Timeout.into()
        } else {
            Error::Transport(err).into()
        }
    }
}

/// Total size of an IEEE 488.2 definite-length block, `#<L><N_1..N_L>`
/// prefix included.
fn ieee_block_total_size(body: &[u8]) -> Result<usize> {
    let digits = body
        .get(1)
        .copied()
        .filter(u8::is_ascii_digit)
        .ok_or(Error::MalformedBlockHeader)? as usize
        - b'0' as usize;
    let len_field = body
        .get(2..2 + digits)
        .ok_or(Error::MalformedBlockHeader)?;
    let payload_len = std::str::from_utf8(len_field)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or(Error::MalformedBlockHeader)?;
    Ok(payload_len + digits + 2)
}
