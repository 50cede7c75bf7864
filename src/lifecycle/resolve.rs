//! Bind target resolution from settings.
//!
//! Never fails outright: a bad port falls back to the default and an unknown
//! interface yields no targets. Each problem is returned alongside the
//! targets so the controller can publish it.

use crate::config::{Settings, ALL_INTERFACES, LISTEN_IP, LISTEN_PORT};
use crate::error::{ConfigError, DEFAULT_PORT};
use crate::runtime::BindTarget;
use std::ffi::CStr;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use tracing::debug;

/// Source of per-interface addresses.
pub trait InterfaceTable: Send + Sync {
    /// Addresses assigned to interface `name` (port 0), or `None` when no
    /// such interface exists.
    fn addresses(&self, name: &str) -> io::Result<Option<Vec<SocketAddr>>>;
}

/// Result of resolving settings into bind targets.
#[derive(Debug, Default)]
pub struct Resolution {
    pub port: u16,
    pub targets: Vec<BindTarget>,
    pub errors: Vec<ConfigError>,
}

/// Parse `listen_port`, accepting only integers in `0..=65535`.
pub fn parse_port(value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidPort {
        value: value.to_string(),
    })
}

pub fn resolve_bind_targets(settings: &Settings, interfaces: &dyn InterfaceTable) -> Resolution {
    let mut resolution = Resolution::default();

    let default_port = DEFAULT_PORT.to_string();
    let port_value = settings.get_str(LISTEN_PORT, &default_port);
    resolution.port = match parse_port(port_value) {
        Ok(port) => port,
        Err(e) => {
            resolution.errors.push(e);
            DEFAULT_PORT
        }
    };
    let port = resolution.port;

    let name = settings.get_str(LISTEN_IP, ALL_INTERFACES);
    if name == ALL_INTERFACES {
        let wildcard = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        resolution.targets.push(BindTarget::new(wildcard));
        return resolution;
    }

    match interfaces.addresses(name) {
        Ok(Some(addrs)) => {
            resolution.targets = addrs
                .into_iter()
                .map(|mut addr| {
                    addr.set_port(port);
                    BindTarget::new(addr)
                })
                .collect();
            debug!(interface = name, targets = resolution.targets.len(), "Resolved interface");
        }
        Ok(None) => {
            resolution.errors.push(ConfigError::UnknownInterface {
                name: name.to_string(),
            });
        }
        Err(e) => {
            resolution.errors.push(ConfigError::InterfaceLookup {
                name: name.to_string(),
                source: e,
            });
        }
    }

    resolution
}

/// Interface table backed by `getifaddrs(3)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

impl InterfaceTable for SystemInterfaces {
    fn addresses(&self, name: &str) -> io::Result<Option<Vec<SocketAddr>>> {
        let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
        // SAFETY: getifaddrs fills `head` with a list we free below.
        if unsafe { libc::getifaddrs(&mut head) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let mut found = false;
        let mut addrs = Vec::new();
        let mut cursor = head;
        while !cursor.is_null() {
            // SAFETY: `cursor` is a node of the list returned by getifaddrs.
            let ifa = unsafe { &*cursor };
            cursor = ifa.ifa_next;

            if ifa.ifa_name.is_null() {
                continue;
            }
            // SAFETY: ifa_name is a NUL-terminated string owned by the list.
            let ifa_name = unsafe { CStr::from_ptr(ifa.ifa_name) };
            if ifa_name.to_bytes() != name.as_bytes() {
                continue;
            }

            found = true;
            // SAFETY: ifa_addr is either null or points at a sockaddr of
            // the family it declares.
            if let Some(addr) = unsafe { sockaddr_to_socket_addr(ifa.ifa_addr) } {
                addrs.push(addr);
            }
        }

        // SAFETY: `head` came from a successful getifaddrs call.
        unsafe { libc::freeifaddrs(head) };

        Ok(found.then_some(addrs))
    }
}

/// # Safety
/// `sa` must be null or point to a valid sockaddr whose size matches its
/// address family.
unsafe fn sockaddr_to_socket_addr(sa: *const libc::sockaddr) -> Option<SocketAddr> {
    if sa.is_null() {
        return None;
    }

    match (*sa).sa_family as libc::c_int {
        libc::AF_INET => {
            let sin = &*(sa as *const libc::sockaddr_in);
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Some(SocketAddr::V4(SocketAddrV4::new(ip, 0)))
        }
        libc::AF_INET6 => {
            let sin6 = &*(sa as *const libc::sockaddr_in6);
            let ip = IpAddr::from(sin6.sin6_addr.s6_addr);
            match ip {
                IpAddr::V6(ip) => Some(SocketAddr::V6(SocketAddrV6::new(
                    ip,
                    0,
                    0,
                    sin6.sin6_scope_id,
                ))),
                IpAddr::V4(_) => None,
            }
        }
        _ => None,
    }
}
