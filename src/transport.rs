//! ## Transport
//!
//! Thin seam over the host USB stack. The protocol engines only ever touch
//! a [`Transport`], so they can run against real hardware or against the
//! scripted mock used by the tests.
//!

use crate::types::Handle;

use rusb::{Context, DeviceHandle};
use std::time::Duration;

/// The host-stack operations the USBTMC engine needs.
///
/// All methods return `rusb::Result` so callers can match on
/// [`rusb::Error::Timeout`] rather than comparing platform error numbers.
pub trait Transport {
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize>;
    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;
    fn read_interrupt(&self, endpoint: u8, buf: &mut [u8], timeout: Duration)
        -> rusb::Result<usize>;
    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;
    fn clear_halt(&self, endpoint: u8) -> rusb::Result<()>;
}

/// ### UsbTransport
///
/// [`Transport`] over an opened libusb device handle.
///
#[derive(Debug, Clone)]
pub struct UsbTransport {
    handle: Handle,
}

impl UsbTransport {
    pub fn new(handle: DeviceHandle<Context>) -> UsbTransport {
        UsbTransport {
            handle: Handle::new(handle),
        }
    }

    /// The shared device handle, for lifecycle work outside the engine
    /// (release, configuration restore, kernel-driver reattach).
    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Transport for UsbTransport {
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.borrow().write_bulk(endpoint, data, timeout)
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.borrow().read_bulk(endpoint, buf, timeout)
    }

    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle.borrow().read_interrupt(endpoint, buf, timeout)
    }

    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle
            .borrow()
            .read_control(request_type, request, value, index, buf, timeout)
    }

    fn clear_halt(&self, endpoint: u8) -> rusb::Result<()> {
        self.handle.borrow().clear_halt(endpoint)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! A scripted transport for exercising the protocol engines without
    //! hardware. Bulk-in packets, control replies and interrupt packets are
    //! queued up front; every bulk-out buffer and control request is
    //! recorded for inspection.

    use super::Transport;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ControlCall {
        pub request_type: u8,
        pub request: u8,
        pub value: u16,
        pub index: u16,
        pub length: usize,
    }

    #[derive(Default)]
    pub struct MockTransport {
        pub bulk_out: RefCell<Vec<Vec<u8>>>,
        pub bulk_out_results: RefCell<VecDeque<rusb::Result<()>>>,
        pub bulk_in: RefCell<VecDeque<rusb::Result<Vec<u8>>>>,
        pub interrupt_in: RefCell<VecDeque<rusb::Result<Vec<u8>>>>,
        pub control_calls: RefCell<Vec<ControlCall>>,
        pub control_in: RefCell<VecDeque<rusb::Result<Vec<u8>>>>,
        pub cleared_halts: RefCell<Vec<u8>>,
    }

    impl MockTransport {
        pub fn new() -> MockTransport {
            MockTransport::default()
        }

        pub fn push_bulk_in(&self, data: &[u8]) {
            self.bulk_in.borrow_mut().push_back(Ok(data.to_vec()));
        }

        pub fn push_bulk_in_err(&self, err: rusb::Error) {
            self.bulk_in.borrow_mut().push_back(Err(err));
        }

        pub fn push_bulk_out_err(&self, err: rusb::Error) {
            self.bulk_out_results.borrow_mut().push_back(Err(err));
        }

        pub fn push_control(&self, data: &[u8]) {
            self.control_in.borrow_mut().push_back(Ok(data.to_vec()));
        }

        pub fn push_interrupt(&self, data: &[u8]) {
            self.interrupt_in.borrow_mut().push_back(Ok(data.to_vec()));
        }

        pub fn written(&self) -> Vec<Vec<u8>> {
            self.bulk_out.borrow().clone()
        }

        pub fn control_calls(&self) -> Vec<ControlCall> {
            self.control_calls.borrow().clone()
        }
    }

    impl Transport for MockTransport {
        fn write_bulk(&self, _endpoint: u8, data: &[u8], _timeout: Duration) -> rusb::Result<usize> {
            if let Some(result) = self.bulk_out_results.borrow_mut().pop_front() {
                result?;
            }
            self.bulk_out.borrow_mut().push(data.to_vec());
            Ok(data.len())
        }

        fn read_bulk(&self, _endpoint: u8, buf: &mut [u8], _timeout: Duration) -> rusb::Result<usize> {
            match self.bulk_in.borrow_mut().pop_front() {
                Some(Ok(data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                Some(Err(err)) => Err(err),
                None => Err(rusb::Error::Timeout),
            }
        }

        fn read_interrupt(
            &self,
            _endpoint: u8,
            buf: &mut [u8],
            _timeout: Duration,
        ) -> rusb::Result<usize> {
            match self.interrupt_in.borrow_mut().pop_front() {
                Some(Ok(data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                Some(Err(err)) => Err(err),
                None => Err(rusb::Error::Timeout),
            }
        }

        fn read_control(
            &self,
            request_type: u8,
            request: u8,
            value: u16,
            index: u16,
            buf: &mut [u8],
            _timeout: Duration,
        ) -> rusb::Result<usize> {
            self.control_calls.borrow_mut().push(ControlCall {
                request_type,
                request,
                value,
                index,
                length: buf.len(),
            });
            match self.control_in.borrow_mut().pop_front() {
                Some(Ok(data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                Some(Err(err)) => Err(err),
                None => Err(rusb::Error::Timeout),
            }
        }

        fn clear_halt(&self, endpoint: u8) -> rusb::Result<()> {
            self.cleared_halts.borrow_mut().push(endpoint);
            Ok(())
        }
    }
}
