//! Transport implementations: UDP, USB bulk, and the serial stub.
//!
//! The protocol core sees only the `Transport` trait; which byte pipe is
//! underneath is decided once at session construction. All I/O is
//! blocking with per-call receive timeouts, matching the strictly
//! sequential request/response model.

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use rusb::{DeviceHandle, GlobalContext};
use tracing::{debug, info};

use super::types::{USB_ENDPOINT_IN, USB_ENDPOINT_OUT, USB_PID, USB_VID};
use crate::error::{DppError, Result};

/// Device-side UDP command port.
pub const DEVICE_UDP_PORT: u16 = 10001;

/// Default receive timeout: 3 s plus the vendor's 500 us slack.
pub const DEFAULT_UDP_TIMEOUT: Duration = Duration::from_micros(3_000_500);
/// Default USB bulk-transfer timeout.
pub const DEFAULT_USB_TIMEOUT: Duration = Duration::from_millis(500);
/// USB bulk timeout for diagnostic-data requests, which run a full
/// self test before answering.
pub const DIAGNOSTIC_USB_TIMEOUT: Duration = Duration::from_millis(2500);

/// One byte pipe to a device.
pub trait Transport {
    /// Send a framed packet; returns the byte count accepted.
    fn send(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Receive one datagram/transfer into `buffer`, blocking up to
    /// `timeout`. Returns the byte count received.
    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Release the underlying endpoint.
    fn close(&mut self) -> Result<()>;

    /// Human-readable endpoint description for logs.
    fn description(&self) -> String;
}

/// UDP transport to an Ethernet-attached device.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Bind an ephemeral local port and aim it at the device.
    pub fn connect(peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(peer)?;
        info!("UDP transport bound to {peer}");
        Ok(Self { socket, peer })
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        debug!("UDP TX {} bytes to {}", bytes.len(), self.peer);
        Ok(self.socket.send(bytes)?)
    }

    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        self.socket.set_read_timeout(Some(timeout))?;
        match self.socket.recv(buffer) {
            Ok(count) => {
                debug!("UDP RX {count} bytes");
                Ok(count)
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(DppError::Timeout)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the socket releases the port; nothing to signal
        Ok(())
    }

    fn description(&self) -> String {
        format!("UDP {}", self.peer)
    }
}

/// USB bulk transport via libusb.
pub struct UsbTransport {
    handle: DeviceHandle<GlobalContext>,
    bus: u8,
    address: u8,
}

impl UsbTransport {
    /// Open the `index`-th attached device matching the Amptek VID/PID
    /// (0 = first found) and claim its bulk interface.
    pub fn open(index: usize) -> Result<Self> {
        let mut matches = Vec::new();
        for device in rusb::devices()?.iter() {
            let descriptor = device.device_descriptor()?;
            if descriptor.vendor_id() == USB_VID && descriptor.product_id() == USB_PID {
                matches.push(device);
            }
        }
        if matches.is_empty() {
            return Err(DppError::NoDevice(format!(
                "no USB device with VID {USB_VID:04X} PID {USB_PID:04X}"
            )));
        }
        let device = matches
            .into_iter()
            .nth(index)
            .ok_or_else(|| DppError::NoDevice(format!("USB device index {index} out of range")))?;

        let bus = device.bus_number();
        let address = device.address();
        let mut handle = device.open()?;
        handle.set_auto_detach_kernel_driver(true).ok(); // unsupported on some platforms
        handle.claim_interface(0)?;
        info!("USB transport claimed device on bus {bus} addr {address}");

        Ok(Self { handle, bus, address })
    }
}

impl Transport for UsbTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        debug!("USB TX {} bytes", bytes.len());
        Ok(self
            .handle
            .write_bulk(USB_ENDPOINT_OUT, bytes, DEFAULT_USB_TIMEOUT)?)
    }

    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        match self.handle.read_bulk(USB_ENDPOINT_IN, buffer, timeout) {
            Ok(count) => {
                debug!("USB RX {count} bytes");
                Ok(count)
            }
            Err(rusb::Error::Timeout) => Err(DppError::Timeout),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.handle.release_interface(0)?;
        Ok(())
    }

    fn description(&self) -> String {
        format!("USB bus {} addr {}", self.bus, self.address)
    }
}

/// Placeholder for the RS-232 option. The serial protocol variant is
/// not implemented; every operation reports that.
pub struct SerialTransport;

impl Transport for SerialTransport {
    fn send(&mut self, _bytes: &[u8]) -> Result<usize> {
        Err(DppError::SerialUnsupported)
    }

    fn receive(&mut self, _buffer: &mut [u8], _timeout: Duration) -> Result<usize> {
        Err(DppError::SerialUnsupported)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn description(&self) -> String {
        "serial (unimplemented)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_stub_reports_unsupported() {
        let mut serial = SerialTransport;
        assert!(matches!(serial.send(&[0]), Err(DppError::SerialUnsupported)));
        let mut buffer = [0u8; 8];
        assert!(matches!(
            serial.receive(&mut buffer, Duration::from_millis(1)),
            Err(DppError::SerialUnsupported)
        ));
        assert!(serial.close().is_ok());
    }

    #[test]
    fn udp_transport_talks_to_local_socket() {
        // Loopback echo: prove send/receive plumbing and timeout mapping
        let echo = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer = echo.local_addr().unwrap();

        let mut transport = UdpTransport::connect(peer).unwrap();
        transport.send(&[0xF5, 0xFA, 0x01, 0x01]).unwrap();

        let mut relay = [0u8; 16];
        let (count, from) = echo.recv_from(&mut relay).unwrap();
        assert_eq!(&relay[..count], &[0xF5, 0xFA, 0x01, 0x01]);
        echo.send_to(&relay[..count], from).unwrap();

        let mut buffer = [0u8; 16];
        let count = transport
            .receive(&mut buffer, Duration::from_secs(2))
            .unwrap();
        assert_eq!(&buffer[..count], &[0xF5, 0xFA, 0x01, 0x01]);

        // Nothing more queued: the receive times out rather than blocks
        assert!(matches!(
            transport.receive(&mut buffer, Duration::from_millis(50)),
            Err(DppError::Timeout)
        ));
    }
}
