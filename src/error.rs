//! ## USBTMC Errors
//!
//! The errors surfaced to callers of the crate.
//!

#[allow(unused)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid resource string")]
    InvalidResource,
    #[error("no device specified")]
    NoDeviceSpecified,
    #[error("device not found")]
    DeviceNotFound,
    #[error("not a USBTMC device")]
    NotUsbtmcDevice,
    #[error("invalid endpoint configuration")]
    InvalidEndpointConfig,
    #[error("get capabilities failed")]
    CapabilityProbeFailed,
    #[error("clear failed")]
    ClearFailed,
    #[error("indicator pulse failed")]
    PulseFailed,
    #[error("read status byte failed")]
    ReadStatusFailed,
    #[error("read status byte btag mismatch")]
    StatusByteTagMismatch,
    #[error("bulk transfer timed out")]
    Timeout,
    #[error("bulk-in response shorter than a USBTMC header")]
    TruncatedHeader,
    #[error("bulk-in btag complement mismatch")]
    TagMismatch,
    #[error("malformed IEEE 488.2 definite-length block header")]
    MalformedBlockHeader,
    #[error("operation not implemented for this device")]
    NotImplemented,
    #[error("usb transport error: {0}")]
    Transport(#[from] rusb::Error),
}
