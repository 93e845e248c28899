//! Cross-module tests: session request/response cycles against a
//! scripted transport, plus loopback discovery.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::rc::Rc;
use std::time::Duration;

use super::protocol::{self, frame};
use super::session::{discover_via, DppSession};
use super::transport::{Transport, DEFAULT_USB_TIMEOUT, DIAGNOSTIC_USB_TIMEOUT};
use super::types::{
    AckCode, DeviceVariant, RequestKind, MAX_ASCII_PAYLOAD, PID1_ACK, PID1_DATA, PID1_STATUS,
    PID2_CONFIG_READBACK, PID2_DIAGNOSTIC,
};
use crate::error::DppError;

/// Transport that replays queued packets and records what was sent.
struct MockTransport {
    sent: Rc<RefCell<Vec<Vec<u8>>>>,
    timeouts: Rc<RefCell<Vec<Duration>>>,
    responses: RefCell<VecDeque<Vec<u8>>>,
}

impl MockTransport {
    fn new(
        responses: Vec<Vec<u8>>,
    ) -> (Self, Rc<RefCell<Vec<Vec<u8>>>>, Rc<RefCell<Vec<Duration>>>) {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let timeouts = Rc::new(RefCell::new(Vec::new()));
        let transport = Self {
            sent: Rc::clone(&sent),
            timeouts: Rc::clone(&timeouts),
            responses: RefCell::new(responses.into()),
        };
        (transport, sent, timeouts)
    }
}

impl Transport for MockTransport {
    fn send(&mut self, bytes: &[u8]) -> crate::error::Result<usize> {
        self.sent.borrow_mut().push(bytes.to_vec());
        Ok(bytes.len())
    }

    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> crate::error::Result<usize> {
        self.timeouts.borrow_mut().push(timeout);
        match self.responses.borrow_mut().pop_front() {
            Some(packet) => {
                buffer[..packet.len()].copy_from_slice(&packet);
                Ok(packet.len())
            }
            None => Err(DppError::Timeout),
        }
    }

    fn close(&mut self) -> crate::error::Result<()> {
        Ok(())
    }

    fn description(&self) -> String {
        "mock".to_string()
    }
}

fn session_with(responses: Vec<Vec<u8>>) -> (DppSession, Rc<RefCell<Vec<Vec<u8>>>>) {
    let (transport, sent, _) = MockTransport::new(responses);
    (
        DppSession::from_transport(Box::new(transport), DEFAULT_USB_TIMEOUT),
        sent,
    )
}

fn sample_status(device_id: u8) -> Vec<u8> {
    let mut raw = vec![0u8; 64];
    raw[20..24].copy_from_slice(&1000u32.to_le_bytes()); // real time 1.0 s
    raw[24] = 0x67; // firmware 6.07
    raw[25] = 0x12;
    raw[26..30].copy_from_slice(&1234u32.to_le_bytes());
    raw[37] = 15;
    raw[39] = device_id;
    raw
}

fn ack(code: u8) -> Vec<u8> {
    frame(PID1_ACK, code, &[]).unwrap()
}

#[test]
fn status_round_trip_updates_snapshot() {
    let packet = frame(PID1_STATUS, 0x01, &sample_status(1)).unwrap();
    let (mut session, sent) = session_with(vec![packet]);

    let snapshot = session.request_status().unwrap();
    assert_eq!(snapshot.device, DeviceVariant::Px5);
    assert_eq!(snapshot.real_time, 1.0);
    assert_eq!(snapshot.serial_number, Some(1234));

    assert_eq!(
        sent.borrow()[0],
        protocol::build_request(RequestKind::Status).unwrap()
    );
    assert!(!session.status_text.is_empty());
}

#[test]
fn device_nak_becomes_error() {
    // Pid2 7: unrecognized command
    let (mut session, _) = session_with(vec![ack(7)]);
    match session.request_status() {
        Err(DppError::Nak(AckCode::UnrecognizedCommand)) => {}
        other => panic!("expected NAK error, got {other:?}"),
    }
}

#[test]
fn readback_needs_a_format_flag() {
    let (mut session, sent) = session_with(vec![]);
    match session.request_full_configuration() {
        Err(DppError::ReadbackFormatNotSet) => {}
        other => panic!("expected flag error, got {other:?}"),
    }
    // Nothing went out on the wire
    assert!(sent.borrow().is_empty());
}

#[test]
fn full_readback_publishes_config() {
    let readback = frame(PID1_DATA, PID2_CONFIG_READBACK, b"RESC=Y;TPEA=2.400;").unwrap();
    let (mut session, _) = session_with(vec![readback]);
    session.readback_format.cfg_read_back = true;

    let config = session.request_full_configuration().unwrap();
    assert_eq!(config, "RESC=Y;TPEA=2.400;");
    assert!(session.hw_cfg_ready);
    assert_eq!(session.hw_config.as_deref(), Some("RESC=Y;TPEA=2.400;"));
    assert!(!session.sca_read_back);
}

#[test]
fn display_sca_chains_second_readback() {
    let general = frame(PID1_DATA, PID2_CONFIG_READBACK, b"RESC=Y;").unwrap();
    let sca = frame(PID1_DATA, PID2_CONFIG_READBACK, b"SCAI=1;SCAL=100;").unwrap();
    let (mut session, sent) = session_with(vec![general, sca]);
    session.readback_format.display_sca = true;

    session.request_full_configuration().unwrap();
    assert!(session.hw_cfg_ready);
    assert!(session.sca_read_back);
    assert_eq!(session.sca_config.as_deref(), Some("SCAI=1;SCAL=100;"));
    assert_eq!(sent.borrow().len(), 2);
}

#[test]
fn oversized_command_splits_into_two_packets() {
    // ~700 bytes of benign commands; nothing for the shortener to shrink
    let long: String = (0..70).map(|_| "TPEA=2.400;").collect();
    let (mut session, sent) = session_with(vec![ack(0), ack(0)]);

    session.send_configuration(&long).unwrap();

    let sent = sent.borrow();
    assert_eq!(sent.len(), 2);
    let mut recombined = String::new();
    for packet in sent.iter() {
        let payload = &packet[6..packet.len() - 2];
        assert!(payload.len() <= MAX_ASCII_PAYLOAD);
        recombined.push_str(std::str::from_utf8(payload).unwrap());
    }
    // Split lands on a command boundary and loses nothing
    assert_eq!(recombined, long);
    assert!(sent[0][6..].starts_with(b"TPEA"));
}

#[test]
fn short_command_goes_out_whole() {
    let (mut session, sent) = session_with(vec![ack(0)]);
    session.send_configuration("TPEA=2.400;MCAC=1024;").unwrap();
    assert_eq!(sent.borrow().len(), 1);
}

#[test]
fn enable_mca_requires_ok_ack() {
    let (mut session, _) = session_with(vec![ack(0)]);
    session.enable_mca().unwrap();

    let (mut session, _) = session_with(vec![ack(2)]);
    assert!(matches!(
        session.disable_mca(),
        Err(DppError::Nak(AckCode::PidError))
    ));
}

#[test]
fn diagnostics_use_extended_timeout() {
    let diagnostic = frame(PID1_DATA, PID2_DIAGNOSTIC, &[0u8; 256]).unwrap();
    let (transport, _, timeouts) = MockTransport::new(vec![diagnostic]);
    let mut session = DppSession::from_transport(Box::new(transport), DEFAULT_USB_TIMEOUT);

    session.request_diagnostics().unwrap();
    assert_eq!(timeouts.borrow()[0], DIAGNOSTIC_USB_TIMEOUT);
}

#[test]
fn status_timeout_stays_at_default() {
    let packet = frame(PID1_STATUS, 0x01, &sample_status(0)).unwrap();
    let (transport, _, timeouts) = MockTransport::new(vec![packet]);
    let mut session = DppSession::from_transport(Box::new(transport), DEFAULT_USB_TIMEOUT);

    session.request_status().unwrap();
    assert_eq!(timeouts.borrow()[0], DEFAULT_USB_TIMEOUT);
}

#[test]
fn exhausted_responses_surface_as_timeout() {
    let (mut session, _) = session_with(vec![]);
    assert!(matches!(session.request_status(), Err(DppError::Timeout)));
}

#[test]
fn discovery_finds_loopback_responder() {
    let responder = UdpSocket::bind("127.0.0.1:0").unwrap();
    let destination = responder.local_addr().unwrap();

    let handle = std::thread::spawn(move || {
        let mut buffer = [0u8; 64];
        let (count, from) = responder.recv_from(&mut buffer).unwrap();
        assert_eq!(count, 6);
        assert_eq!(&buffer[4..6], &[0xF4, 0xFA]);

        let mut reply = vec![0u8; 32];
        reply[0] = 0x01;
        reply[2..4].copy_from_slice(&buffer[2..4]); // echo the nonce
        reply.extend_from_slice(b"DP5\0S/N 99\0");
        responder.send_to(&reply, from).unwrap();
    });

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let target = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let reply = discover_via(&socket, destination, target).unwrap();
    assert_eq!(reply.identity, vec!["DP5".to_string(), "S/N 99".to_string()]);

    handle.join().unwrap();
}
