//! Wire-level tests for the USB/IP op-phase codec
//!
//! Replies are assembled byte by byte here, independently of the crate's own
//! encoders, so the decoder is checked against the documented layout.

use protocol::{
    DeviceSpeed, OpCode, ProtocolError, USBIP_VERSION, UsbDeviceInfo, read_devlist_reply,
    read_import_reply,
};
use std::io::{Cursor, Read};

fn be16(v: u16) -> [u8; 2] {
    v.to_be_bytes()
}

fn be32(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

fn fixed(value: &str, len: usize) -> Vec<u8> {
    let mut field = value.as_bytes().to_vec();
    field.resize(len, 0);
    field
}

/// Hand-assembled device record as a Linux usbipd would send it
fn raw_device(busid: &str, vid: u16, pid: u16, interfaces: &[(u8, u8, u8)]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend(fixed(&format!("/sys/devices/platform/vhci/usb1/{}", busid), 256));
    buf.extend(fixed(busid, 32));
    buf.extend(be32(1)); // busnum
    buf.extend(be32(4)); // devnum
    buf.extend(be32(3)); // speed: high
    buf.extend(be16(vid));
    buf.extend(be16(pid));
    buf.extend(be16(0x0210)); // bcdDevice
    buf.extend([0xEF, 0x02, 0x01]); // device class triple
    buf.extend([1, 1]); // bConfigurationValue, bNumConfigurations
    buf.push(interfaces.len() as u8);
    for &(class, subclass, protocol) in interfaces {
        buf.extend([class, subclass, protocol, 0]);
    }
    buf
}

fn raw_devlist_header(command: u16, status: u32, count: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend(be16(0x0111));
    buf.extend(be16(command));
    buf.extend(be32(status));
    buf.extend(be32(count));
    buf
}

mod devlist {
    use super::*;

    #[test]
    fn test_decode_hand_built_reply() {
        let mut wire = raw_devlist_header(0x0005, 0, 2);
        wire.extend(raw_device("1-1", 0x0781, 0x5581, &[(8, 6, 0x50)]));
        wire.extend(raw_device("1-2", 0x046d, 0x0825, &[(0x0e, 1, 0), (0x0e, 2, 0), (1, 1, 0)]));

        let devices = read_devlist_reply(&mut Cursor::new(wire)).unwrap();
        assert_eq!(devices.len(), 2);

        let storage = &devices[0];
        assert_eq!(storage.busid, "1-1");
        assert_eq!(storage.path, "/sys/devices/platform/vhci/usb1/1-1");
        assert_eq!(storage.busnum, 1);
        assert_eq!(storage.devnum, 4);
        assert_eq!(storage.device_speed(), DeviceSpeed::High);
        assert_eq!(storage.id_vendor, 0x0781);
        assert_eq!(storage.id_product, 0x5581);
        assert_eq!(storage.bcd_device, 0x0210);
        assert_eq!(
            (storage.device_class, storage.device_subclass, storage.device_protocol),
            (0xEF, 0x02, 0x01)
        );
        assert_eq!(storage.num_interfaces, 1);
        assert_eq!(storage.interfaces[0].interface_class, 8);
        assert_eq!(storage.interfaces[0].interface_protocol, 0x50);

        let camera = &devices[1];
        assert_eq!(camera.busid, "1-2");
        assert_eq!(camera.interfaces.len(), 3);
        assert_eq!(camera.interfaces[2].interface_class, 1);
    }

    #[test]
    fn test_empty_list() {
        let wire = raw_devlist_header(0x0005, 0, 0);
        assert!(read_devlist_reply(&mut Cursor::new(wire)).unwrap().is_empty());
    }

    #[test]
    fn test_cursor_stops_after_last_interface() {
        let mut wire = raw_devlist_header(0x0005, 0, 1);
        wire.extend(raw_device("2-1", 0x1234, 0x5678, &[(3, 0, 0)]));
        wire.push(0xC3);

        let mut cursor = Cursor::new(wire);
        read_devlist_reply(&mut cursor).unwrap();

        let mut sentinel = [0u8; 1];
        cursor.read_exact(&mut sentinel).unwrap();
        assert_eq!(sentinel[0], 0xC3);
    }

    #[test]
    fn test_import_reply_code_is_rejected() {
        let wire = raw_devlist_header(0x0003, 0, 0);
        let err = read_devlist_reply(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnexpectedCommand {
                expected: 0x0005,
                actual: 0x0003
            }
        ));
    }

    #[test]
    fn test_short_header() {
        let wire = raw_devlist_header(0x0005, 0, 1)[..10].to_vec();
        let err = read_devlist_reply(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                expected: 12,
                actual: 10
            }
        ));
    }

    #[test]
    fn test_fewer_devices_than_advertised() {
        let mut wire = raw_devlist_header(0x0005, 0, 2);
        wire.extend(raw_device("1-1", 1, 2, &[]));

        let err = read_devlist_reply(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                expected: UsbDeviceInfo::SIZE,
                actual: 0
            }
        ));
    }
}

mod import {
    use super::*;

    fn raw_import_reply(command: u16, status: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend(be16(0x0111));
        buf.extend(be16(command));
        buf.extend(be32(status));
        buf
    }

    #[test]
    fn test_success() {
        let header = read_import_reply(&mut Cursor::new(raw_import_reply(0x0003, 0))).unwrap();
        assert_eq!(header.version, USBIP_VERSION);
        assert_eq!(header.command_type().unwrap(), OpCode::RepImport);
    }

    #[test]
    fn test_nonzero_status() {
        let err = read_import_reply(&mut Cursor::new(raw_import_reply(0x0003, 1))).unwrap_err();
        assert!(matches!(err, ProtocolError::RequestFailed { status: 1, .. }));
    }

    #[test]
    fn test_devlist_code_is_rejected() {
        let err = read_import_reply(&mut Cursor::new(raw_import_reply(0x0005, 0))).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedCommand { .. }));
    }

    #[test]
    fn test_trailing_descriptor_is_left_unread() {
        let mut wire = raw_import_reply(0x0003, 0);
        wire.extend(raw_device("1-1", 1, 2, &[]));

        let mut cursor = Cursor::new(wire);
        read_import_reply(&mut cursor).unwrap();
        assert_eq!(cursor.position(), 8);
    }
}
