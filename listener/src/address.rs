use std::fmt::{Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// The port the request logger listens on when no other `Address` is given.
pub const DEFAULT_PORT: u16 = 8000;

/// An `Address` is the IP address and port a `Listener` binds to.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Address {
    ip: IpAddr,
    port: u16,
}

impl Address {
    pub fn new(ip: IpAddr, port: u16) -> Address {
        Address { ip, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The URL a user on this machine would type into a browser to reach this `Address`.
    ///
    /// Unspecified and loopback IPs are both reported as `localhost`.
    pub fn url(&self) -> String {
        if self.ip.is_unspecified() || self.ip.is_loopback() {
            format!("http://localhost:{}/", self.port)
        } else {
            format!("http://{}/", self)
        }
    }
}

/// All interfaces, on port 8000.
impl Default for Address {
    fn default() -> Self {
        Address::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::new(addr.ip(), addr.port())
    }
}

impl From<Address> for SocketAddr {
    fn from(address: Address) -> Self {
        SocketAddr::new(address.ip, address.port)
    }
}

/// Allows `Address`es to be converted to `String`s with `to_string()`.
impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", SocketAddr::from(*self))
    }
}
