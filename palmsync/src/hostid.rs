//! `HostId`: a 32-bit identifier for this workstation, derived from the
//! primary IPv4 address, logged into the device's `last_sync_pc` field
//! after each sync (spec.md §6).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostId(pub u32);

impl HostId {
    /// Derive from the address the OS would use to route to a public
    /// host, without sending any traffic (connecting a UDP socket just
    /// selects a route).
    pub fn detect() -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        match socket.local_addr()?.ip() {
            IpAddr::V4(addr) => Ok(HostId::from_ipv4(addr)),
            IpAddr::V6(_) => Ok(HostId(0)),
        }
    }

    pub fn from_ipv4(addr: Ipv4Addr) -> Self {
        HostId(u32::from_be_bytes(addr.octets()))
    }

    pub fn to_ipv4(self) -> Ipv4Addr {
        Ipv4Addr::from(self.0.to_be_bytes())
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ipv4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_prints_dotted_quad() {
        let id = HostId::from_ipv4(Ipv4Addr::new(192, 168, 1, 42));
        assert_eq!(id.to_string(), "192.168.1.42");
    }

    #[test]
    fn roundtrips_through_u32() {
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        let id = HostId::from_ipv4(addr);
        assert_eq!(id.to_ipv4(), addr);
    }
}
