//! USB/IP client session
//!
//! One blocking connection to one USB/IP server. Requests are strictly
//! sequential: each operation writes a request and reads its reply before
//! returning.

use super::transport::Transport;
use crate::error::{ClientError, Result};
use protocol::{
    ProtocolError, USBIP_PORT, USBIP_VERSION, UsbDeviceInfo, encode_devlist_request,
    encode_import_request, read_devlist_reply, read_import_reply,
};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

/// Connection to a USB/IP server
///
/// # Example
/// ```no_run
/// use client::UsbIpClient;
///
/// let mut client = UsbIpClient::new();
/// client.connect("127.0.0.1", 3240)?;
/// for device in client.get_device_list()? {
///     println!("{}", device);
/// }
/// # Ok::<(), client::ClientError>(())
/// ```
#[derive(Debug)]
pub struct UsbIpClient<T: Transport = TcpStream> {
    host: String,
    port: u16,
    stream: Option<T>,
    /// Imported bus ids in import order
    imported: Vec<String>,
}

impl UsbIpClient<TcpStream> {
    /// Create a disconnected client
    pub fn new() -> Self {
        Self {
            host: String::new(),
            port: USBIP_PORT,
            stream: None,
            imported: Vec::new(),
        }
    }

    /// Open a TCP connection to a USB/IP server
    ///
    /// `host` is tried as a literal IP address first, then resolved by name;
    /// every resolved address is tried in order. Fails without touching the
    /// existing session if already connected.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }

        let addrs = resolve(host, port)?;
        let mut last_error = None;

        for addr in addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY on {}: {}", addr, e);
                    }
                    info!("Connected to USB/IP server {}:{} ({})", host, port, addr);
                    return self.attach(host, port, stream);
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(ClientError::Connect {
                        addr: addr.to_string(),
                        source: e,
                    });
                }
            }
        }

        let err = last_error.unwrap_or_else(|| ClientError::Resolve {
            host: host.to_string(),
        });
        warn!("Failed to connect to USB/IP server {}:{}: {}", host, port, err);
        Err(err)
    }
}

impl Default for UsbIpClient<TcpStream> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> UsbIpClient<T> {
    /// Create a client already connected over `transport`
    pub fn with_transport(host: &str, port: u16, transport: T) -> Self {
        Self {
            host: host.to_string(),
            port,
            stream: Some(transport),
            imported: Vec::new(),
        }
    }

    /// Adopt an established transport as this client's session
    pub fn attach(&mut self, host: &str, port: u16, transport: T) -> Result<()> {
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }

        self.host = host.to_string();
        self.port = port;
        self.stream = Some(transport);
        Ok(())
    }

    /// Close the session. Safe to call when not connected.
    pub fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown() {
                debug!("Shutdown of {}:{} failed: {}", self.host, self.port, e);
            }
            info!("Disconnected from USB/IP server {}:{}", self.host, self.port);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The underlying transport, if connected
    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.stream.as_mut()
    }

    fn stream(&mut self) -> Result<&mut T> {
        self.stream.as_mut().ok_or(ClientError::NotConnected)
    }

    /// Request the list of exportable devices (OP_REQ_DEVLIST)
    ///
    /// Devices come back in the order the server sent them. A failure leaves
    /// the stream wherever the error occurred; callers normally disconnect.
    pub fn get_device_list(&mut self) -> Result<Vec<UsbDeviceInfo>> {
        let (host, port) = (self.host.clone(), self.port);
        let stream = self.stream()?;

        let result = send(stream, &encode_devlist_request())
            .and_then(|()| read_devlist_reply(stream).map_err(ClientError::from));

        match &result {
            Ok(devices) => {
                info!("{}:{} exports {} device(s)", host, port, devices.len());
                for device in devices {
                    info!("  {}", device);
                }
            }
            Err(e) => warn!("Device list from {}:{} failed: {}", host, port, e),
        }

        result
    }

    /// Import a device by bus id (OP_REQ_IMPORT)
    ///
    /// On success the bus id is appended to the imported list. The device
    /// record that follows the reply header is not read.
    pub fn import_device(&mut self, busid: &str) -> Result<()> {
        let (host, port) = (self.host.clone(), self.port);
        let stream = self.stream()?;

        let result = send(stream, &encode_import_request(busid))
            .and_then(|()| read_import_reply(stream).map_err(ClientError::from));

        match result {
            Ok(header) => {
                if !header.version.is_compatible_with(&USBIP_VERSION) {
                    warn!(
                        "{}:{} replied with USB/IP version {}, expected {}",
                        host, port, header.version, USBIP_VERSION
                    );
                }
                self.imported.push(busid.to_string());
                info!("Imported device {} from {}:{}", busid, host, port);
                Ok(())
            }
            Err(e) => {
                warn!("Import of {} from {}:{} failed: {}", busid, host, port, e);
                Err(e)
            }
        }
    }

    /// Forget an imported device
    ///
    /// USB/IP has no release command, so nothing is sent to the server: the
    /// remote side still considers the device attached until the connection
    /// closes. Returns whether `busid` was in the imported list.
    pub fn export_device(&mut self, busid: &str) -> bool {
        match self.imported.iter().position(|b| b == busid) {
            Some(index) => {
                self.imported.remove(index);
                info!("Released device {} (local bookkeeping only)", busid);
                true
            }
            None => {
                debug!("Device {} was not imported", busid);
                false
            }
        }
    }

    /// Bus ids imported over this session, in import order
    pub fn get_imported_devices(&self) -> Vec<String> {
        self.imported.clone()
    }
}

impl<T: Transport> Drop for UsbIpClient<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn send<T: Transport>(stream: &mut T, packet: &[u8]) -> Result<()> {
    stream.write_all(packet).map_err(ProtocolError::from)?;
    stream.flush().map_err(ProtocolError::from)?;
    Ok(())
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| {
            debug!("Resolving {} failed: {}", host, e);
            ClientError::Resolve {
                host: host.to_string(),
            }
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ClientError::Resolve {
            host: host.to_string(),
        });
    }

    Ok(addrs)
}
