//! Test utilities and helpers
//!
//! A scripted USB/IP server for exercising clients over real sockets, plus
//! device fixtures and async timeout helpers.

use protocol::{UsbDeviceInfo, UsbInterfaceInfo, encode_devlist_reply, encode_import_reply};
use std::future::Future;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

/// Default timeout for async tests
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the mock server waits for the client to hang up once its
/// script has run out
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock exportable device
///
/// # Example
/// ```
/// use common::test_utils::create_mock_device;
///
/// let device = create_mock_device("2-1", 0x1234, 0x5678, 1);
/// assert_eq!(device.busid, "2-1");
/// assert_eq!(device.interfaces.len(), 1);
/// ```
pub fn create_mock_device(
    busid: &str,
    vendor_id: u16,
    product_id: u16,
    num_interfaces: u8,
) -> UsbDeviceInfo {
    UsbDeviceInfo {
        busid: busid.to_string(),
        path: format!("/sys/devices/pci0000:00/0000:00:14.0/usb1/{}", busid),
        busnum: 1,
        devnum: 2,
        speed: 3,
        id_vendor: vendor_id,
        id_product: product_id,
        bcd_device: 0x0100,
        device_class: 0,
        device_subclass: 0,
        device_protocol: 0,
        configuration_value: 1,
        num_configurations: 1,
        num_interfaces,
        interfaces: (0..num_interfaces)
            .map(|i| UsbInterfaceInfo {
                interface_class: 0x03,
                interface_subclass: i,
                interface_protocol: 0x01,
            })
            .collect(),
    }
}

/// Create `count` mock devices with bus ids `1-1`, `1-2`, ...
pub fn create_mock_device_list(count: usize) -> Vec<UsbDeviceInfo> {
    (0..count)
        .map(|i| {
            create_mock_device(
                &format!("1-{}", i + 1),
                0x1000 + i as u16,
                0x2000 + i as u16,
                (i % 3) as u8,
            )
        })
        .collect()
}

/// One step of a [`MockUsbIpServer`] script
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Read exactly this many bytes from the client
    Expect(usize),
    /// Write these bytes to the client
    Send(Vec<u8>),
    /// Close the connection without waiting for the client
    Close,
}

impl MockStep {
    /// Steps answering one OP_REQ_DEVLIST with the given devices
    pub fn devlist(devices: &[UsbDeviceInfo]) -> crate::Result<Vec<MockStep>> {
        Ok(vec![
            MockStep::Expect(protocol::OpHeader::SIZE),
            MockStep::Send(encode_devlist_reply(0, devices)?),
        ])
    }

    /// Steps answering one OP_REQ_IMPORT with the given status
    pub fn import(status: u32) -> Vec<MockStep> {
        vec![
            MockStep::Expect(protocol::IMPORT_REQUEST_SIZE),
            MockStep::Send(encode_import_reply(status)),
        ]
    }
}

/// USB/IP server driven by fixed scripts
///
/// Listens on an ephemeral loopback port, accepts one client per script, and
/// runs each script in order. Everything clients send is recorded and
/// returned by [`MockUsbIpServer::finish`]. After a script the server keeps
/// reading until the client disconnects, so replies are never cut short by a
/// reset.
pub struct MockUsbIpServer {
    addr: SocketAddr,
    handle: Option<JoinHandle<Vec<u8>>>,
}

impl MockUsbIpServer {
    pub fn start(script: Vec<MockStep>) -> crate::Result<Self> {
        Self::start_sessions(vec![script])
    }

    /// Serve one script per connection, accepting connections in order
    ///
    /// Bytes from every session are concatenated in the recorded result.
    pub fn start_sessions(scripts: Vec<Vec<MockStep>>) -> crate::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;

        let handle = std::thread::spawn(move || {
            let mut received = Vec::new();
            for script in scripts {
                match listener.accept() {
                    Ok((stream, _)) => received.extend(run_script(stream, script)),
                    Err(_) => break,
                }
            }
            received
        });

        Ok(Self {
            addr,
            handle: Some(handle),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait for the session to end and return the bytes the client sent
    pub fn finish(mut self) -> Vec<u8> {
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    }
}

fn run_script(mut stream: TcpStream, script: Vec<MockStep>) -> Vec<u8> {
    let mut received = Vec::new();

    for step in script {
        let ok = match step {
            MockStep::Expect(n) => {
                let mut buf = vec![0u8; n];
                match stream.read_exact(&mut buf) {
                    Ok(()) => {
                        received.extend_from_slice(&buf);
                        true
                    }
                    Err(_) => false,
                }
            }
            MockStep::Send(bytes) => stream.write_all(&bytes).is_ok(),
            MockStep::Close => false,
        };

        if !ok {
            return received;
        }
    }

    let _ = stream.set_read_timeout(Some(DRAIN_TIMEOUT));
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => received.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }

    received
}

/// Run an async test with a timeout
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mock_device_list() {
        let devices = create_mock_device_list(4);
        assert_eq!(devices.len(), 4);
        assert_eq!(devices[3].busid, "1-4");
        for device in &devices {
            assert_eq!(device.num_interfaces as usize, device.interfaces.len());
        }
    }

    #[test]
    fn test_mock_server_records_and_replies() {
        let server = MockUsbIpServer::start(vec![
            MockStep::Expect(3),
            MockStep::Send(b"ok".to_vec()),
        ])
        .unwrap();

        let mut stream = TcpStream::connect(server.addr()).unwrap();
        stream.write_all(b"abc").unwrap();
        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"ok");

        stream.write_all(b"de").unwrap();
        drop(stream);

        assert_eq!(server.finish(), b"abcde".to_vec());
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;
        assert!(result.is_err());
    }
}
