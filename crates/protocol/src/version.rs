//! USB/IP protocol version

use serde::{Deserialize, Serialize};
use std::fmt;

/// USB/IP protocol version as carried on the wire (BCD, e.g. `0x0111` = 1.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsbIpVersion(pub u16);

/// Version sent in every request
pub const USBIP_VERSION: UsbIpVersion = UsbIpVersion(0x0111);

impl UsbIpVersion {
    pub fn major(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn minor(&self) -> u8 {
        ((self.0 >> 4) & 0x0f) as u8
    }

    pub fn patch(&self) -> u8 {
        (self.0 & 0x0f) as u8
    }

    /// Check if this version is compatible with another version
    ///
    /// Servers in the wild reply with a range of 1.x versions; only the major
    /// number has to agree.
    pub fn is_compatible_with(&self, other: &UsbIpVersion) -> bool {
        self.major() == other.major()
    }
}

impl fmt::Display for UsbIpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_components() {
        assert_eq!(USBIP_VERSION.major(), 1);
        assert_eq!(USBIP_VERSION.minor(), 1);
        assert_eq!(USBIP_VERSION.patch(), 1);
        assert_eq!(USBIP_VERSION.to_string(), "1.1.1");
    }

    #[test]
    fn test_version_compatibility() {
        let v1_0_6 = UsbIpVersion(0x0106);
        let v2_0_0 = UsbIpVersion(0x0200);

        assert!(USBIP_VERSION.is_compatible_with(&v1_0_6));
        assert!(!USBIP_VERSION.is_compatible_with(&v2_0_0));
    }
}
