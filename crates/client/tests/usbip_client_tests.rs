//! USB/IP client integration tests
//!
//! Clients talk to `common::test_utils::MockUsbIpServer` over real loopback
//! sockets. Run with: `cargo test -p client --test usbip_client_tests`

use client::{ClientError, Transport, UsbIpClient, UsbIpManager, lock_client};
use common::test_utils::{MockStep, MockUsbIpServer, create_mock_device, create_mock_device_list};
use protocol::{
    IMPORT_REQUEST_SIZE, OpHeader, ProtocolError, encode_devlist_reply, encode_devlist_request,
    encode_import_reply, encode_import_request,
};
use std::io::{self, Read, Write};

const SENTINEL: u8 = 0xC3;

/// Transport that fails the test on any write
struct NoWriteTransport;

impl Read for NoWriteTransport {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for NoWriteTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        panic!("unexpected write of {} bytes", buf.len());
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for NoWriteTransport {}

fn connect(server: &MockUsbIpServer) -> UsbIpClient {
    let mut client = UsbIpClient::new();
    client.connect("127.0.0.1", server.port()).unwrap();
    client
}

// ============================================================================
// Connection lifecycle
// ============================================================================

mod connection {
    use super::*;

    #[test]
    fn test_connect_by_name() {
        let server = MockUsbIpServer::start(Vec::new()).unwrap();
        let mut client = UsbIpClient::new();

        client.connect("localhost", server.port()).unwrap();
        assert!(client.is_connected());
        assert_eq!(client.host(), "localhost");
        assert_eq!(client.port(), server.port());

        client.disconnect();
        assert!(server.finish().is_empty());
    }

    #[test]
    fn test_connect_twice_fails() {
        let server = MockUsbIpServer::start(Vec::new()).unwrap();
        let mut client = connect(&server);

        let err = client.connect("127.0.0.1", server.port()).unwrap_err();
        assert!(matches!(err, ClientError::AlreadyConnected));
        assert!(client.is_connected());

        client.disconnect();
        server.finish();
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut client = UsbIpClient::new();
        let err = client.connect("127.0.0.1", port).unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_unresolvable_host() {
        let mut client = UsbIpClient::new();
        let err = client.connect("no-such-host.invalid", 3240).unwrap_err();
        assert!(matches!(err, ClientError::Resolve { .. }));
    }
}

// ============================================================================
// Device list
// ============================================================================

mod device_list {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_end_to_end_list_and_import() {
        let device = create_mock_device("2-1", 0x1234, 0x5678, 1);
        let mut script = MockStep::devlist(std::slice::from_ref(&device)).unwrap();
        script.extend(MockStep::import(0));
        let server = MockUsbIpServer::start(script).unwrap();

        let mut client = connect(&server);
        let devices = client.get_device_list().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].busid, "2-1");
        assert_eq!(devices[0].id_vendor, 0x1234);
        assert_eq!(devices[0].id_product, 0x5678);
        assert_eq!(devices[0].num_interfaces, 1);
        assert_eq!(devices[0], device);

        client.import_device("2-1").unwrap();
        assert_eq!(client.get_imported_devices(), vec!["2-1".to_string()]);

        client.disconnect();
        let mut expected = encode_devlist_request();
        expected.extend(encode_import_request("2-1"));
        assert_eq!(server.finish(), expected);
    }

    #[test]
    fn test_wrong_reply_code_keeps_connection() {
        let mut reply = encode_import_reply(0);
        reply.extend([0, 0, 0, 0]);
        let server = MockUsbIpServer::start(vec![
            MockStep::Expect(OpHeader::SIZE),
            MockStep::Send(reply),
        ])
        .unwrap();

        let mut client = connect(&server);
        let err = client.get_device_list().unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::UnexpectedCommand { .. })
        ));
        assert!(client.is_connected());

        client.disconnect();
        server.finish();
    }

    #[test]
    fn test_peer_closes_mid_reply() {
        let mut reply = encode_devlist_reply(0, &create_mock_device_list(2)).unwrap();
        reply.truncate(reply.len() - 50);
        let server = MockUsbIpServer::start(vec![
            MockStep::Expect(OpHeader::SIZE),
            MockStep::Send(reply),
            MockStep::Close,
        ])
        .unwrap();

        let mut client = connect(&server);
        let err = client.get_device_list().unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::Truncated { .. })
        ));
        assert!(client.is_connected());

        client.disconnect();
        server.finish();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Property: N advertised devices come back in order and the stream
        /// ends exactly after the last interface record
        #[test]
        fn prop_device_list_framing(count in 0usize..=255) {
            let devices = create_mock_device_list(count);
            let mut script = MockStep::devlist(&devices).unwrap();
            script.push(MockStep::Send(vec![SENTINEL]));
            let server = MockUsbIpServer::start(script).unwrap();

            let mut client = connect(&server);
            let received = client.get_device_list().unwrap();
            prop_assert_eq!(&received, &devices);

            let mut next = [0u8; 1];
            client.transport_mut().unwrap().read_exact(&mut next).unwrap();
            prop_assert_eq!(next[0], SENTINEL);

            client.disconnect();
            server.finish();
        }
    }
}

// ============================================================================
// Import / export
// ============================================================================

mod import_export {
    use super::*;

    #[test]
    fn test_import_success_ignores_trailing_descriptor() {
        let mut reply = encode_import_reply(0);
        let mut record = Vec::new();
        create_mock_device("1-1", 1, 2, 0).write_to(&mut record).unwrap();
        reply.extend(record);

        let server = MockUsbIpServer::start(vec![
            MockStep::Expect(IMPORT_REQUEST_SIZE),
            MockStep::Send(reply),
        ])
        .unwrap();

        let mut client = connect(&server);
        client.import_device("1-1").unwrap();
        assert_eq!(client.get_imported_devices(), vec!["1-1".to_string()]);

        client.disconnect();
        assert_eq!(server.finish(), encode_import_request("1-1"));
    }

    #[test]
    fn test_import_rejected_status() {
        let server = MockUsbIpServer::start(MockStep::import(1)).unwrap();

        let mut client = connect(&server);
        let err = client.import_device("1-1").unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::RequestFailed { status: 1, .. })
        ));
        assert!(!client.get_imported_devices().contains(&"1-1".to_string()));
        assert!(client.is_connected());

        client.disconnect();
        server.finish();
    }

    #[test]
    fn test_import_wrong_reply_code() {
        let server = MockUsbIpServer::start(vec![
            MockStep::Expect(IMPORT_REQUEST_SIZE),
            MockStep::Send(encode_devlist_reply(0, &[]).unwrap()),
        ])
        .unwrap();

        let mut client = connect(&server);
        assert!(client.import_device("1-1").is_err());
        assert!(client.get_imported_devices().is_empty());

        client.disconnect();
        server.finish();
    }

    #[test]
    fn test_import_order_is_kept() {
        let mut script = MockStep::import(0);
        script.extend(MockStep::import(0));
        script.extend(MockStep::import(0));
        let server = MockUsbIpServer::start(script).unwrap();

        let mut client = connect(&server);
        for busid in ["3-1", "1-1", "2-4.1"] {
            client.import_device(busid).unwrap();
        }
        assert_eq!(client.get_imported_devices(), vec!["3-1", "1-1", "2-4.1"]);

        client.disconnect();
        server.finish();
    }

    #[test]
    fn test_export_touches_no_wire() {
        let mut client = UsbIpClient::with_transport("mock", 3240, NoWriteTransport);

        assert!(!client.export_device("1-1"));
        assert!(client.get_imported_devices().is_empty());
    }

    #[test]
    fn test_export_removes_imported() {
        let mut script = MockStep::import(0);
        script.extend(MockStep::import(0));
        let server = MockUsbIpServer::start(script).unwrap();

        let mut client = connect(&server);
        client.import_device("1-1").unwrap();
        client.import_device("1-2").unwrap();

        assert!(client.export_device("1-1"));
        assert!(!client.export_device("1-1"));
        assert_eq!(client.get_imported_devices(), vec!["1-2".to_string()]);

        client.disconnect();
        let expected: Vec<u8> = [encode_import_request("1-1"), encode_import_request("1-2")].concat();
        assert_eq!(server.finish(), expected);
    }
}

// ============================================================================
// Manager
// ============================================================================

mod manager {
    use super::*;

    #[test]
    fn test_create_and_aggregate() {
        let first = MockUsbIpServer::start(MockStep::import(0)).unwrap();
        let second = MockUsbIpServer::start(MockStep::import(0)).unwrap();

        let manager = UsbIpManager::new();
        let a = manager.create_client("127.0.0.1", first.port()).unwrap();
        let b = manager.create_client("127.0.0.1", second.port()).unwrap();
        assert_eq!(manager.get_clients().len(), 2);

        lock_client(&a).import_device("1-1").unwrap();
        lock_client(&b).import_device("2-1").unwrap();

        let mut imported: Vec<(u16, String)> = manager
            .get_all_imported_devices()
            .into_iter()
            .map(|d| (d.port, d.busid))
            .collect();
        imported.sort();
        let mut expected = vec![
            (first.port(), "1-1".to_string()),
            (second.port(), "2-1".to_string()),
        ];
        expected.sort();
        assert_eq!(imported, expected);

        manager.disconnect_all();
        assert!(manager.is_empty());
        first.finish();
        second.finish();
    }

    #[test]
    fn test_remove_client_disconnects() {
        let server = MockUsbIpServer::start(Vec::new()).unwrap();

        let manager = UsbIpManager::new();
        let handle = manager.create_client("127.0.0.1", server.port()).unwrap();

        assert!(manager.remove_client(&handle));
        assert!(!lock_client(&handle).is_connected());
        assert!(manager.get_clients().is_empty());
        assert!(!manager.remove_client(&handle));

        assert!(server.finish().is_empty());
    }

    #[test]
    fn test_disconnected_clients_are_not_aggregated() {
        let server = MockUsbIpServer::start(MockStep::import(0)).unwrap();

        let manager = UsbIpManager::new();
        let handle = manager.create_client("127.0.0.1", server.port()).unwrap();
        lock_client(&handle).import_device("1-1").unwrap();
        lock_client(&handle).disconnect();

        assert!(manager.get_all_imported_devices().is_empty());
        assert_eq!(manager.len(), 1);
        server.finish();
    }
}
