//! Interface ioctls (`SIOC[GS]IF*`) on a throwaway control socket.

use std::ffi::CStr;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use nix::libc::{self, IFNAMSIZ, c_char, c_int, c_short};

use crate::device::{IfIndex, MacAddr};

/// ifreq with the flags member of the union
#[repr(C)]
struct IfReqFlags {
    ifr_name: [c_char; IFNAMSIZ],
    ifr_flags: c_short,
    _pad: [u8; 22],
}

/// ifreq with the hardware address member of the union
#[repr(C)]
struct IfReqHwAddr {
    ifr_name: [c_char; IFNAMSIZ],
    ifr_hwaddr: libc::sockaddr,
    _pad: [u8; 8],
}

/// Copy an interface name into an ifreq name field.
pub(crate) fn ifr_name(name: &str) -> io::Result<[c_char; IFNAMSIZ]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= IFNAMSIZ {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid interface name: {name}"),
        ));
    }
    let mut out = [0 as c_char; IFNAMSIZ];
    for (i, &b) in bytes.iter().enumerate() {
        out[i] = b as c_char;
    }
    Ok(out)
}

fn control_socket() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn ioctl<T>(request: libc::Ioctl, ifr: &mut T) -> io::Result<()> {
    let sock = control_socket()?;
    let ret = unsafe { libc::ioctl(sock.as_raw_fd(), request, ifr as *mut T) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Index of the interface called `name`.
pub fn index(name: &str) -> io::Result<IfIndex> {
    let index = nix::net::if_::if_nametoindex(name).map_err(io::Error::from)?;
    Ok(IfIndex(index))
}

/// Name of the interface with index `index`.
pub fn name(index: IfIndex) -> io::Result<String> {
    let mut buf = [0 as c_char; IFNAMSIZ];
    let ret = unsafe { libc::if_indextoname(index.0, buf.as_mut_ptr()) };
    if ret.is_null() {
        return Err(io::Error::last_os_error());
    }
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}

pub fn hw_addr(name: &str) -> io::Result<MacAddr> {
    let mut ifr = IfReqHwAddr {
        ifr_name: ifr_name(name)?,
        ifr_hwaddr: unsafe { std::mem::zeroed() },
        _pad: [0; 8],
    };
    ioctl(libc::SIOCGIFHWADDR as _, &mut ifr)?;

    let mut mac = [0u8; 6];
    for (dst, src) in mac.iter_mut().zip(ifr.ifr_hwaddr.sa_data.iter()) {
        *dst = *src as u8;
    }
    Ok(MacAddr(mac))
}

pub fn set_hw_addr(name: &str, mac: MacAddr) -> io::Result<()> {
    let mut ifr = IfReqHwAddr {
        ifr_name: ifr_name(name)?,
        ifr_hwaddr: unsafe { std::mem::zeroed() },
        _pad: [0; 8],
    };
    ifr.ifr_hwaddr.sa_family = libc::ARPHRD_ETHER;
    for (dst, src) in ifr.ifr_hwaddr.sa_data.iter_mut().zip(mac.octets()) {
        *dst = src as c_char;
    }
    ioctl(libc::SIOCSIFHWADDR as _, &mut ifr)
}

fn flags(name: &str) -> io::Result<IfReqFlags> {
    let mut ifr = IfReqFlags {
        ifr_name: ifr_name(name)?,
        ifr_flags: 0,
        _pad: [0; 22],
    };
    ioctl(libc::SIOCGIFFLAGS as _, &mut ifr)?;
    Ok(ifr)
}

/// Whether the interface is administratively up.
pub fn is_up(name: &str) -> io::Result<bool> {
    let ifr = flags(name)?;
    Ok(ifr.ifr_flags as c_int & libc::IFF_UP != 0)
}

pub fn set_up(name: &str, up: bool) -> io::Result<()> {
    let mut ifr = flags(name)?;
    if up {
        ifr.ifr_flags |= libc::IFF_UP as c_short;
    } else {
        ifr.ifr_flags &= !(libc::IFF_UP as c_short);
    }
    ioctl(libc::SIOCSIFFLAGS as _, &mut ifr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ifreq_layout() {
        assert_eq!(std::mem::size_of::<IfReqFlags>(), 40);
        assert_eq!(std::mem::size_of::<IfReqHwAddr>(), 40);
    }

    #[test]
    fn test_ifr_name() {
        let name = ifr_name("veth2").unwrap();
        assert_eq!(name[0], b'v' as c_char);
        assert_eq!(name[4], b'2' as c_char);
        assert_eq!(name[5], 0);

        assert!(ifr_name("").is_err());
        assert!(ifr_name("sixteen-chars-xx").is_err());
    }

    #[test]
    fn test_loopback() {
        // Present on every Linux host, no privileges needed for reads
        let lo = index("lo").unwrap();
        assert_eq!(name(lo).unwrap(), "lo");
        assert!(is_up("lo").is_ok());
        assert_eq!(hw_addr("lo").unwrap(), MacAddr::default());
    }

    #[test]
    fn test_unknown_interface() {
        assert!(index("vnic-nope0").is_err());
        assert!(is_up("vnic-nope0").is_err());
    }
}
