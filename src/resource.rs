//! ## Resource strings
//!
//! Parsing and formatting of VISA-style `USB[n]::VID::PID[::SERIAL]::INSTR`
//! instrument addresses.
//!

use crate::error::Error;

use anyhow::Result;
use std::fmt;

/// A parsed VISA USB resource string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisaResource {
    pub vid: u16,
    pub pid: u16,
    pub serial: Option<String>,
}

impl VisaResource {
    /// Parse a resource string, case-insensitively.
    ///
    /// VID and PID accept C-style radix autodetection: a `0x` prefix selects
    /// hexadecimal, anything else is decimal.
    pub fn parse(resource: &str) -> Result<VisaResource> {
        let segments: Vec<&str> = resource.split("::").collect();
        if segments.len() != 4 && segments.len() != 5 {
            return Err(Error::InvalidResource.into());
        }

        let prefix = segments[0].as_bytes();
        if prefix.len() < 3 || !prefix[..3].eq_ignore_ascii_case(b"USB") {
            return Err(Error::InvalidResource.into());
        }
        if !prefix[3..].iter().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidResource.into());
        }

        let suffix = segments[segments.len() - 1];
        if !suffix.eq_ignore_ascii_case("INSTR") {
            return Err(Error::InvalidResource.into());
        }

        for arg in &segments[1..segments.len() - 1] {
            if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains(':') {
                return Err(Error::InvalidResource.into());
            }
        }

        let vid = parse_id(segments[1])?;
        let pid = parse_id(segments[2])?;
        let serial = if segments.len() == 5 {
            Some(segments[3].to_string())
        } else {
            None
        };

        Ok(VisaResource { vid, pid, serial })
    }
}

impl fmt::Display for VisaResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.serial {
            Some(serial) => write!(f, "USB::{}::{}::{}::INSTR", self.vid, self.pid, serial),
            None => write!(f, "USB::{}::{}::INSTR", self.vid, self.pid),
        }
    }
}

/// Format an enumeration result as a resource string with decimal IDs.
pub fn format_resource(vid: u16, pid: u16, serial: Option<&str>) -> String {
    VisaResource {
        vid,
        pid,
        serial: serial.map(str::to_string),
    }
    .to_string()
}

fn parse_id(arg: &str) -> Result<u16> {
    let parsed = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => arg.parse::<u16>(),
    };
    parsed.map_err(|_| Error::InvalidResource.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_ids_and_serial() {
        let res = VisaResource::parse("USB0::0x0957::0x17A4::MY50000001::INSTR").unwrap();
        assert_eq!(res.vid, 0x0957);
        assert_eq!(res.pid, 0x17A4);
        assert_eq!(res.serial.as_deref(), Some("MY50000001"));
    }

    #[test]
    fn parses_decimal_ids_without_serial() {
        let res = VisaResource::parse("USB::1234::5678::INSTR").unwrap();
        assert_eq!(res.vid, 1234);
        assert_eq!(res.pid, 5678);
        assert_eq!(res.serial, None);
    }

    #[test]
    fn case_insensitive() {
        let res = VisaResource::parse("usb3::0X1AB1::0x04ce::instr").unwrap();
        assert_eq!(res.vid, 0x1ab1);
        assert_eq!(res.pid, 0x04ce);
    }

    #[test]
    fn mixed_radix() {
        let res = VisaResource::parse("USB0::0x0957::6020::INSTR").unwrap();
        assert_eq!(res.vid, 0x0957);
        assert_eq!(res.pid, 6020);
    }

    #[test]
    fn rejects_malformed_strings() {
        for bad in [
            "",
            "USB0::INSTR",
            "USB0::0x0957::INSTR",
            "USB0::0x0957::0x17A4::RAW",
            "GPIB0::9::INSTR",
            "USBX::1::2::INSTR",
            "USB0::0xZZZZ::2::INSTR",
            "USB0::1::2::a serial::INSTR",
            "USB0::1::2::a:b::INSTR",
            "USB0::1::2::3::4::INSTR",
            "USB0::70000::2::INSTR",
        ] {
            let err = VisaResource::parse(bad).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<Error>(), Some(Error::InvalidResource)),
                "expected InvalidResource for {bad:?}"
            );
        }
    }

    #[test]
    fn format_parse_round_trip() {
        for vid in [0u16, 1, 0x0957, 0x1ab1, u16::MAX] {
            for pid in [0u16, 42, 0x04ce, u16::MAX] {
                for serial in [None, Some("MY50000001"), Some("A-1_b.2")] {
                    let formatted = format_resource(vid, pid, serial);
                    let parsed = VisaResource::parse(&formatted).unwrap();
                    assert_eq!(parsed.vid, vid);
                    assert_eq!(parsed.pid, pid);
                    assert_eq!(parsed.serial.as_deref(), serial);
                }
            }
        }
    }
}
