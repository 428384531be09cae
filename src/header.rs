//! ## Header codec
//!
//! Packing and unpacking of the 12-byte USBTMC bulk transfer headers, plus
//! the bTag allocators that pair requests with responses.
//!

use crate::constants::{bulk_msg_id, misc::USBTMC_HEADER_SIZE};
use crate::error::Error;

use anyhow::Result;

/// ### BTag
///
/// The bulk transfer tag. Strictly rotates through 1..=255; 0 is never
/// issued.
///
#[derive(Debug, Clone, Default)]
pub struct BTag(u8);

impl BTag {
    pub fn new() -> BTag {
        BTag(0)
    }

    /// Advance to the next tag and return it.
    pub fn next(&mut self) -> u8 {
        self.0 = (self.0 % 255) + 1;
        self.0
    }

    /// The tag of the most recent bulk-out transaction.
    pub fn last(&self) -> u8 {
        self.0
    }
}

/// ### RstbTag
///
/// The READ_STATUS_BYTE tag. Rotates through 2..=127; 0 and 1 are skipped
/// on wrap.
///
#[derive(Debug, Clone, Default)]
pub struct RstbTag(u8);

impl RstbTag {
    pub fn new() -> RstbTag {
        RstbTag(0)
    }

    pub fn next(&mut self) -> u8 {
        let mut tag = (self.0 % 127) + 1;
        if tag < 2 {
            tag = 2;
        }
        self.0 = tag;
        tag
    }
}

fn bulk_out_header(msg_id: u8, btag: u8) -> [u8; 12] {
    let mut header = [0u8; 12];
    header[0] = msg_id;
    header[1] = btag;
    header[2] = !btag;
    header
}

/// Header for a DEV_DEP_MSG_OUT transfer carrying `transfer_size` payload
/// bytes.
pub fn dev_dep_msg_out_header(btag: u8, transfer_size: u32, eom: bool) -> [u8; 12] {
    let mut header = bulk_out_header(bulk_msg_id::DEV_DEP_MSG_OUT, btag);
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());
    if eom {
        header[8] = 0b0000_0001;
    }
    header
}

/// Header requesting a device-dependent response of up to `transfer_size`
/// bytes, optionally terminated at `term_char`.
pub fn request_dev_dep_msg_in_header(btag: u8, transfer_size: u32, term_char: Option<u8>) -> [u8; 12] {
    let mut header = bulk_out_header(bulk_msg_id::REQUEST_DEV_DEP_MSG_IN, btag);
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());
    if let Some(tc) = term_char {
        header[8] = 0b0000_0010;
        header[9] = tc;
    }
    header
}

/// Header for a VENDOR_SPECIFIC_OUT transfer.
pub fn _vendor_specific_out_header(btag: u8, transfer_size: u32) -> [u8; 12] {
    let mut header = bulk_out_header(bulk_msg_id::VENDOR_SPECIFIC_OUT, btag);
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());
    header
}

/// Header requesting a vendor-specific response.
pub fn _request_vendor_specific_in_header(btag: u8, transfer_size: u32) -> [u8; 12] {
    let mut header = bulk_out_header(bulk_msg_id::REQUEST_VENDOR_SPECIFIC_IN, btag);
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());
    header
}

/// The USB488 TRIGGER message. Header only, all message-specific bytes zero.
pub fn trigger_header(btag: u8) -> [u8; 12] {
    bulk_out_header(bulk_msg_id::TRIGGER, btag)
}

/// Number of bytes a bulk-out payload occupies once zero-padded to a 4-byte
/// boundary.
pub fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

/// ### BulkInHeader
///
/// The decoded header of a DEV_DEP_MSG_IN response.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkInHeader {
    pub msg_id: u8,
    pub btag: u8,
    pub transfer_size: u32,
    pub transfer_attributes: u8,
}

impl BulkInHeader {
    pub fn is_eom(&self) -> bool {
        self.transfer_attributes & 1 != 0
    }
}

/// Unpack the header of a bulk-in response, enforcing the bTag/~bTag
/// complement invariant.
pub fn unpack_bulk_in_header(data: &[u8]) -> Result<BulkInHeader> {
    if data.len() < USBTMC_HEADER_SIZE {
        return Err(Error::TruncatedHeader.into());
    }
    if data[2] != !data[1] {
        return Err(Error::TagMismatch.into());
    }

    Ok(BulkInHeader {
        msg_id: data[0],
        btag: data[1],
        transfer_size: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        transfer_attributes: data[8],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn btag_rotates_skipping_zero() {
        let mut btag = BTag::new();
        assert_eq!(btag.next(), 1);
        for expected in 2..=255u8 {
            assert_eq!(btag.next(), expected);
        }
        // wraps back to 1, never 0
        assert_eq!(btag.next(), 1);
        assert_eq!(btag.last(), 1);
    }

    #[test]
    fn rstb_tag_skips_zero_and_one() {
        let mut tag = RstbTag::new();
        assert_eq!(tag.next(), 2);
        for expected in 3..=127u8 {
            assert_eq!(tag.next(), expected);
        }
        // wraps straight back to 2, skipping 0 and 1
        assert_eq!(tag.next(), 2);
    }

    #[test]
    fn dev_dep_out_header_layout() {
        let header = dev_dep_msg_out_header(1, 5, true);
        assert_eq!(
            header,
            [0x01, 0x01, 0xFE, 0x00, 0x05, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn request_in_header_with_term_char() {
        let header = request_dev_dep_msg_in_header(7, 0x1000, Some(b'\n'));
        assert_eq!(header[0], 2);
        assert_eq!(header[1], 7);
        assert_eq!(header[2], !7u8);
        assert_eq!(&header[4..8], &0x1000u32.to_le_bytes());
        assert_eq!(header[8], 2);
        assert_eq!(header[9], b'\n');
    }

    #[test]
    fn request_in_header_without_term_char() {
        let header = request_dev_dep_msg_in_header(7, 64, None);
        assert_eq!(header[8], 0);
        assert_eq!(header[9], 0);
    }

    #[test]
    fn trigger_header_layout() {
        let header = trigger_header(3);
        assert_eq!(header[0], 128);
        assert_eq!(header[1], 3);
        assert_eq!(header[2], !3u8);
        assert!(header[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn padding_reaches_four_byte_boundary() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 4);
        assert_eq!(padded_len(4), 4);
        assert_eq!(padded_len(5), 8);
    }

    #[test]
    fn unpack_round_trip() {
        let mut buf = [0u8; 16];
        buf[0] = 2;
        buf[1] = 9;
        buf[2] = !9u8;
        buf[4..8].copy_from_slice(&300u32.to_le_bytes());
        buf[8] = 1;

        let header = unpack_bulk_in_header(&buf).unwrap();
        assert_eq!(header.msg_id, 2);
        assert_eq!(header.btag, 9);
        assert_eq!(header.transfer_size, 300);
        assert!(header.is_eom());
    }

    #[test]
    fn unpack_rejects_bad_complement() {
        let mut buf = [0u8; 12];
        buf[1] = 9;
        buf[2] = 9;
        let err = unpack_bulk_in_header(&buf).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::TagMismatch)));
    }

    #[test]
    fn unpack_rejects_short_buffer() {
        let err = unpack_bulk_in_header(&[0u8; 11]).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::TruncatedHeader)));
    }
}
